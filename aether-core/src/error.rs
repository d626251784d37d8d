//! Error types for Aether userspace operations.
//!
//! The classifier has no error type: malformed frames are ordinary traffic.
//! These errors cover the loader, configuration and channel plumbing only.

use thiserror::Error;

use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::ebpf::EbpfError;

/// Result type alias for Aether operations.
pub type Result<T> = std::result::Result<T, AetherError>;

/// Top-level error for the Aether daemon and tools.
#[derive(Error, Debug)]
pub enum AetherError {
    /// Loading, attaching or map access failed
    #[error("ebpf error: {0}")]
    Ebpf(#[from] EbpfError),

    /// Environment configuration was invalid
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// In-process channel table rejected an operation
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AetherError {
    /// Process exit code for this error.
    #[inline]
    pub fn exit_code(&self) -> i32 {
        match self {
            AetherError::Config(_) => 2,
            _ => 1,
        }
    }
}
