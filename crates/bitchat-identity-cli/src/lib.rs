//! BitChat identity CLI library
//!
//! Inspect and manage the local identity and the identities of known peers.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::IdentityApp;
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
