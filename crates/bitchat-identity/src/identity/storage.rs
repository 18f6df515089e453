//! Storage abstraction for identity management
//!
//! The core only needs an opaque key → bytes store. Platform keychains plug in
//! by implementing [`SecureStorage`]; this module ships an in-memory store, a
//! directory-backed store, and an at-rest encryption wrapper.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::errors::StorageError;
use crate::{BitchatError, Result};

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Key-value blob storage for identity data
///
/// Implementations must be safe to share between the encryption service and
/// the identity manager.
pub trait SecureStorage: Send + Sync {
    /// Store data under a key, replacing any previous value
    fn store(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Retrieve data by key
    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete data by key; deleting a missing key succeeds
    fn delete(&self, key: &str) -> Result<()>;

    /// List all keys (for debugging/cleanup)
    fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all stored data (panic mode)
    fn clear_all(&self) -> Result<()>;

    /// Check if storage is available and accessible
    fn is_available(&self) -> bool;
}

fn lock_poisoned() -> BitchatError {
    BitchatError::storage_error("storage lock poisoned")
}

// ----------------------------------------------------------------------------
// Memory Storage Implementation
// ----------------------------------------------------------------------------

/// In-memory storage for tests and ephemeral deployments
#[derive(Debug)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability, e.g. to simulate a locked keychain
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StorageError::NotAvailable.into())
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureStorage for MemoryStorage {
    fn store(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.ensure_available()?;
        self.data
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(key.to_string(), data);
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        Ok(self
            .data
            .read()
            .map_err(|_| lock_poisoned())?
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        self.data.write().map_err(|_| lock_poisoned())?.remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        Ok(self
            .data
            .read()
            .map_err(|_| lock_poisoned())?
            .keys()
            .cloned()
            .collect())
    }

    fn clear_all(&self) -> Result<()> {
        self.ensure_available()?;
        self.data.write().map_err(|_| lock_poisoned())?.clear();
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// File Storage Implementation
// ----------------------------------------------------------------------------

const FILE_SUFFIX: &str = ".blob";

/// Directory-backed storage: one file per key, named by the hex of the key
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    write_lock: RwLock<()>,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(StorageError::Io)?;
        Ok(Self {
            root,
            write_lock: RwLock::new(()),
        })
    }

    /// Directory this store writes into
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", hex::encode(key.as_bytes()), FILE_SUFFIX))
    }
}

impl SecureStorage for FileStorage {
    fn store(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let _guard = self.write_lock.write().map_err(|_| lock_poisoned())?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data).map_err(StorageError::Io)?;
        fs::rename(&tmp, &path).map_err(StorageError::Io)?;
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.write_lock.read().map_err(|_| lock_poisoned())?;
        match fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e).into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.write().map_err(|_| lock_poisoned())?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e).into()),
        }
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let _guard = self.write_lock.read().map_err(|_| lock_poisoned())?;
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(StorageError::Io)? {
            let entry = entry.map_err(StorageError::Io)?;
            let name = entry.file_name();
            let Some(encoded) = name.to_str().and_then(|n| n.strip_suffix(FILE_SUFFIX)) else {
                continue;
            };
            if let Some(key) = hex::decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn clear_all(&self) -> Result<()> {
        for key in self.list_keys()? {
            self.delete(&key)?;
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.root.is_dir()
    }
}

// ----------------------------------------------------------------------------
// Encrypted Storage Wrapper
// ----------------------------------------------------------------------------

const AT_REST_NONCE_LEN: usize = 12;

/// At-rest encryption around another store (ChaCha20-Poly1305)
///
/// Values are stored as `nonce ‖ ciphertext ‖ tag`. The storage key is bound
/// as associated data so blobs cannot be swapped between keys.
pub struct EncryptedStorage<S: SecureStorage> {
    inner: S,
    key: Zeroizing<[u8; 32]>,
}

impl<S: SecureStorage> EncryptedStorage<S> {
    /// Wrap `inner`, encrypting every value with `key`
    pub fn new(inner: S, key: [u8; 32]) -> Self {
        Self {
            inner,
            key: Zeroizing::new(key),
        }
    }

    /// Access the wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()))
    }
}

impl<S: SecureStorage> core::fmt::Debug for EncryptedStorage<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EncryptedStorage")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl<S: SecureStorage> SecureStorage for EncryptedStorage<S> {
    fn store(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut nonce = [0u8; AT_REST_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce),
                chacha20poly1305::aead::Payload {
                    msg: &data,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| BitchatError::storage_error("at-rest encryption failed"))?;

        let mut blob = Vec::with_capacity(AT_REST_NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        self.inner.store(key, blob)
    }

    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(blob) = self.inner.retrieve(key)? else {
            return Ok(None);
        };
        if blob.len() < AT_REST_NONCE_LEN {
            return Err(BitchatError::storage_error("at-rest blob truncated"));
        }
        let (nonce, ciphertext) = blob.split_at(AT_REST_NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                chacha20poly1305::aead::Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| BitchatError::storage_error("at-rest decryption failed"))?;
        Ok(Some(plaintext))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        self.inner.list_keys()
    }

    fn clear_all(&self) -> Result<()> {
        self.inner.clear_all()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
