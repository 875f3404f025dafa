//! Proxy <-> storage-server message bodies (§6). The write-request batch
//! format follows §4.4.4 step 5, which (unlike the abbreviated sketch in
//! §6) spells out that each path in a batch must carry its own
//! `relative_leaf` so the server knows which path is which; we follow
//! the more detailed section, noted in DESIGN.md.

use super::read_u64;
use crate::error::{Error, Result};

pub const PROXY_READ_REQUEST: u32 = 5;
pub const PROXY_WRITE_REQUEST: u32 = 6;
pub const SERVER_RESPONSE_READ: u32 = 7;
pub const SERVER_RESPONSE_WRITE: u32 = 8;

pub struct ReadRequest {
    pub relative_leaf: u64,
}

impl ReadRequest {
    pub fn encode(&self) -> Vec<u8> {
        self.relative_leaf.to_be_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            relative_leaf: read_u64(buf, 0)?,
        })
    }
}

pub struct ReadResponse {
    pub relative_leaf: u64,
    pub encrypted_path: Vec<u8>,
}

impl ReadResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.encrypted_path.len());
        out.extend_from_slice(&self.relative_leaf.to_be_bytes());
        out.extend_from_slice(&self.encrypted_path);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let relative_leaf = read_u64(buf, 0)?;
        let encrypted_path = buf.get(8..).ok_or(Error::Protocol)?.to_vec();
        Ok(Self {
            relative_leaf,
            encrypted_path,
        })
    }
}

/// One path within a write-back batch.
pub struct BatchEntry {
    pub relative_leaf: u64,
    pub encrypted_path: Vec<u8>,
}

pub struct WriteRequest {
    pub entries: Vec<BatchEntry>,
}

impl WriteRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.relative_leaf.to_be_bytes());
            out.extend_from_slice(&(entry.encrypted_path.len() as u32).to_be_bytes());
            out.extend_from_slice(&entry.encrypted_path);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let count = super::read_u32(buf, 0)? as usize;
        let mut at = 4;
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            let relative_leaf = read_u64(buf, at)?;
            let path_len = super::read_u32(buf, at + 8)? as usize;
            let start = at + 12;
            let encrypted_path = buf.get(start..start + path_len).ok_or(Error::Protocol)?.to_vec();
            entries.push(BatchEntry {
                relative_leaf,
                encrypted_path,
            });
            at = start + path_len;
        }

        Ok(Self { entries })
    }
}

pub struct WriteResponse {
    pub status: u8,
}

impl WriteResponse {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.status]
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            status: *buf.first().ok_or(Error::Protocol)?,
        })
    }
}
