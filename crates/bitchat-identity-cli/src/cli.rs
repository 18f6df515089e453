//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

use bitchat_identity::TrustLevel;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Data directory holding the identity key and cache
    #[arg(short, long)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the local identity fingerprint
    Whoami,
    /// List known peers
    Peers {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set or clear the local petname for a peer
    Petname {
        /// Fingerprint (hex) or nickname
        peer: String,
        /// New petname; omit to clear
        name: Option<String>,
    },
    /// Raise a peer's trust level
    Trust {
        /// Fingerprint (hex) or nickname
        peer: String,
        /// unknown, casual, trusted or verified
        level: TrustLevel,
    },
    /// Mark a peer's fingerprint as verified out-of-band
    Verify {
        /// Fingerprint (hex) or nickname
        peer: String,
    },
    /// Drop a peer's trust back to unknown
    ResetTrust {
        /// Fingerprint (hex) or nickname
        peer: String,
    },
    /// Block or unblock a peer
    Block {
        /// Fingerprint (hex) or nickname
        peer: String,
        /// Unblock instead
        #[arg(long)]
        off: bool,
    },
    /// Remove everything known about a peer
    Forget {
        /// Fingerprint (hex) or nickname
        peer: String,
    },
    /// Wipe the identity key and all identity data
    Panic {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Run an in-memory handshake between two throwaway peers
    Demo {
        /// Message the initiator sends once the session is up
        #[arg(default_value = "hello")]
        message: String,
    },
}
