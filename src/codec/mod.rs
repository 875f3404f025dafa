//! Wire framing shared by both the client and the storage-server
//! channels (§6): `[message_type: u32 BE][payload_length: u32
//! BE][payload: bytes]`.

pub mod client;
pub mod server;

use crate::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub struct Frame {
    pub message_type: u32,
    pub payload: Vec<u8>,
}

/// Generous cap so a corrupt/malicious length field can't make the proxy
/// allocate unbounded memory before the frame is even parsed.
const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let message_type = reader.read_u32().await?;
    let payload_length = reader.read_u32().await?;

    if payload_length > MAX_FRAME_LEN {
        return Err(Error::Protocol);
    }

    let mut payload = vec![0u8; payload_length as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        message_type,
        payload,
    })
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message_type: u32,
    payload: &[u8],
) -> Result<()> {
    writer.write_u32(message_type).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> Result<u64> {
    buf.get(at..at + 8)
        .and_then(|slice| slice.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or(Error::Protocol)
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .and_then(|slice| slice.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or(Error::Protocol)
}
