//! Application wiring: file-backed storage, the persistent identity and the
//! identity manager

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use bitchat_identity::{
    EncryptionService, FileStorage, Fingerprint, SecureIdentityStateManager, SecureStorage,
};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Hex digits a fingerprint prefix needs before it is matched
const MIN_PREFIX_LEN: usize = 8;

/// Hex digits in a full fingerprint
const FINGERPRINT_HEX_LEN: usize = 64;

/// Identity services backed by the data directory
pub struct IdentityApp {
    config: AppConfig,
    data_dir: PathBuf,
    encryption: Arc<EncryptionService>,
    identities: Arc<SecureIdentityStateManager>,
}

impl IdentityApp {
    /// Open the data directory, loading or creating the persistent identity
    pub fn new(config: AppConfig) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let storage: Arc<dyn SecureStorage> = Arc::new(FileStorage::open(&data_dir)?);

        let encryption = Arc::new(EncryptionService::new(
            storage.clone(),
            &config.core.identity,
        ));
        let fingerprint = encryption.initialize()?;

        let identities = Arc::new(SecureIdentityStateManager::new(
            storage,
            config.core.identity.clone(),
        ));
        identities.load();

        info!(fingerprint = %fingerprint.short(), data_dir = %data_dir.display(), "Identity ready");
        Ok(Self {
            config,
            data_dir,
            encryption,
            identities,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn encryption(&self) -> &Arc<EncryptionService> {
        &self.encryption
    }

    pub fn identities(&self) -> &Arc<SecureIdentityStateManager> {
        &self.identities
    }

    /// Resolve a full fingerprint, a nickname, or a unique fingerprint prefix
    pub fn resolve_peer(&self, query: &str) -> Result<Fingerprint> {
        if let Some(fingerprint) = self.identities.find_by_nickname(query) {
            return Ok(fingerprint);
        }
        if query.len() == FINGERPRINT_HEX_LEN {
            let bytes: [u8; 32] = hex::decode(query)?
                .try_into()
                .map_err(|_| CliError::UnknownPeer(query.to_string()))?;
            return Ok(Fingerprint::new(bytes));
        }

        let prefix = query.to_ascii_lowercase();
        if prefix.len() < MIN_PREFIX_LEN || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CliError::UnknownPeer(query.to_string()));
        }

        let mut matches: Vec<Fingerprint> = self
            .identities
            .cryptographic_identities()
            .into_iter()
            .map(|c| c.fingerprint)
            .chain(self.identities.social_identities().into_iter().map(|s| s.fingerprint))
            .filter(|fp| fp.to_string().starts_with(&prefix))
            .collect();
        matches.sort();
        matches.dedup();

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(CliError::UnknownPeer(query.to_string())),
            n => Err(CliError::UnknownPeer(format!("{} matches {} peers", query, n))),
        }
    }

    /// Write pending identity changes to disk
    pub fn shutdown(&self) -> Result<()> {
        self.identities.flush()?;
        debug!("Identity cache flushed");
        Ok(())
    }
}
