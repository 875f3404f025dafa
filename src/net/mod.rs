//! Network boundary traits the core consumes (§6 "Interfaces the core
//! consumes from external collaborators"). The concrete transport (TCP
//! listener, TLS termination, connection pooling) is an external
//! collaborator; the core only needs these two contracts.

pub mod fake;
pub mod tcp;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// One entry of a write-back batch destined for a single server.
pub struct WriteBatchEntry {
    pub relative_leaf: u64,
    pub encrypted_path: Vec<u8>,
}

/// `net.send(server, msg) -> future<response>` from §6, specialized to
/// the two message shapes the Processor issues.
#[async_trait]
pub trait ServerLink: Send + Sync {
    /// Fetches the encrypted path for `relative_leaf` (the within-
    /// partition index, per `PositionMap::relative_leaf`).
    async fn read_path(&self, relative_leaf: u64) -> Result<Vec<u8>>;

    /// Ships an encrypted write-back batch. Resolves only once the
    /// server acknowledges; the caller must not prune the Subtree until
    /// every server group in a batch has resolved successfully.
    async fn write_paths(&self, entries: Vec<WriteBatchEntry>) -> Result<()>;
}

/// `net.reply_to_client(client_addr, bytes)` from §6.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn reply(&self, bytes: Bytes) -> Result<()>;
}
