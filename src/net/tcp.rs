//! Reference TCP transport to a storage server. Intentionally thin: one
//! persistent connection, requests serialized through a lock. A
//! production deployment would pool connections and pipeline requests;
//! the core only depends on the `ServerLink` trait, so swapping this out
//! does not touch Processor/Sequencer code at all.

use super::{ServerLink, WriteBatchEntry};
use crate::{
    codec::{read_frame, server as wire, write_frame},
    error::{Error, Result},
};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::{net::TcpStream, sync::Mutex};
use tracing::warn;

pub struct TcpServerLink {
    addr: SocketAddr,
    conn: Mutex<Option<TcpStream>>,
}

impl TcpServerLink {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            conn: Mutex::new(None),
        }
    }

    async fn with_connection<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TcpStream) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            let stream = TcpStream::connect(self.addr)
                .await
                .map_err(|_| Error::ServerUnavailable(self.addr.to_string()))?;
            *guard = Some(stream);
        }

        let stream = guard.as_mut().expect("just populated");
        match f(stream).await {
            Ok(value) => Ok(value),
            Err(err) => {
                // Drop the connection on any failure so the next call
                // reconnects instead of reusing a poisoned stream.
                warn!(server = %self.addr, error = %err, "storage server request failed, dropping connection");
                *guard = None;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ServerLink for TcpServerLink {
    async fn read_path(&self, relative_leaf: u64) -> Result<Vec<u8>> {
        self.with_connection(|stream| async move {
            let payload = wire::ReadRequest { relative_leaf }.encode();
            write_frame(stream, wire::PROXY_READ_REQUEST, &payload).await?;

            let frame = read_frame(stream).await?;
            if frame.message_type != wire::SERVER_RESPONSE_READ {
                return Err(Error::Protocol);
            }
            let response = wire::ReadResponse::decode(&frame.payload)?;
            Ok(response.encrypted_path)
        })
        .await
    }

    async fn write_paths(&self, entries: Vec<WriteBatchEntry>) -> Result<()> {
        self.with_connection(|stream| async move {
            let payload = wire::WriteRequest {
                entries: entries
                    .into_iter()
                    .map(|e| wire::BatchEntry {
                        relative_leaf: e.relative_leaf,
                        encrypted_path: e.encrypted_path,
                    })
                    .collect(),
            }
            .encode();
            write_frame(stream, wire::PROXY_WRITE_REQUEST, &payload).await?;

            let frame = read_frame(stream).await?;
            if frame.message_type != wire::SERVER_RESPONSE_WRITE {
                return Err(Error::Protocol);
            }
            let response = wire::WriteResponse::decode(&frame.payload)?;
            if response.status == 0 {
                return Err(Error::ServerRejected(self.addr.to_string()));
            }
            Ok(())
        })
        .await
    }
}
