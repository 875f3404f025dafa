use crate::block::BlockId;
use std::io;
use thiserror::Error;

/// Crate-wide error type. Variants mirror the error taxonomy of the design
/// (transient vs. fatal vs. purely-logged).
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection to storage server {0} failed")]
    ServerUnavailable(String),

    #[error("storage server {0} timed out")]
    ServerTimeout(String),

    #[error("storage server {0} returned a failure status")]
    ServerRejected(String),

    #[error("path authentication failed during decryption")]
    Crypto,

    #[error("stash overflow: {len} blocks held against capacity {capacity}")]
    StashOverflow { len: usize, capacity: usize },

    #[error("client channel protocol error")]
    Protocol,

    #[error("malformed configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("unknown block {0:?} referenced during flush")]
    UnknownBlock(BlockId),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the single error class the design mandates as fatal: an
    /// authentication failure during path decryption indicates a
    /// compromised or misbehaving server and the proxy must terminate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Crypto)
    }
}
