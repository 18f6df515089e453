//! Error handling for the BitChat identity CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("BitChat core error: {0}")]
    BitchatCore(#[from] bitchat_identity::BitchatError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Refusing to {0} without --yes")]
    NotConfirmed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
