//! Client <-> proxy message bodies (§6).

use super::read_u64;
use crate::error::{Error, Result};

pub const CLIENT_READ_REQUEST: u32 = 1;
pub const CLIENT_WRITE_REQUEST: u32 = 2;
pub const PROXY_RESPONSE_READ: u32 = 3;
pub const PROXY_RESPONSE_WRITE: u32 = 4;

pub struct ReadRequest {
    pub request_id: u64,
    pub block_id: u64,
    pub client_host_port: String,
}

pub struct WriteRequest {
    pub request_id: u64,
    pub block_id: u64,
    pub data: Box<[u8]>,
    pub client_host_port: String,
}

fn encode_host_port(out: &mut Vec<u8>, host_port: &str) {
    let bytes = host_port.as_bytes();
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn decode_host_port(buf: &[u8], at: usize) -> Result<(String, usize)> {
    let len = buf
        .get(at..at + 2)
        .and_then(|s| s.try_into().ok())
        .map(u16::from_be_bytes)
        .ok_or(Error::Protocol)? as usize;
    let start = at + 2;
    let text = buf
        .get(start..start + len)
        .ok_or(Error::Protocol)?;
    let text = std::str::from_utf8(text).map_err(|_| Error::Protocol)?;
    Ok((text.to_owned(), start + len))
}

impl ReadRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.client_host_port.len() + 2);
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.extend_from_slice(&self.block_id.to_be_bytes());
        encode_host_port(&mut out, &self.client_host_port);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let request_id = read_u64(buf, 0)?;
        let block_id = read_u64(buf, 8)?;
        let (client_host_port, _) = decode_host_port(buf, 16)?;
        Ok(Self {
            request_id,
            block_id,
            client_host_port,
        })
    }
}

impl WriteRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.data.len() + self.client_host_port.len() + 2);
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.extend_from_slice(&self.block_id.to_be_bytes());
        out.extend_from_slice(&self.data);
        encode_host_port(&mut out, &self.client_host_port);
        out
    }

    pub fn decode(buf: &[u8], block_size: usize) -> Result<Self> {
        let request_id = read_u64(buf, 0)?;
        let block_id = read_u64(buf, 8)?;
        let data = buf
            .get(16..16 + block_size)
            .ok_or(Error::Protocol)?
            .to_vec()
            .into_boxed_slice();
        let (client_host_port, _) = decode_host_port(buf, 16 + block_size)?;
        Ok(Self {
            request_id,
            block_id,
            data,
            client_host_port,
        })
    }
}

pub struct ReadResponse {
    pub request_id: u64,
    pub data: Box<[u8]>,
}

impl ReadResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.data.len());
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(buf: &[u8], block_size: usize) -> Result<Self> {
        let request_id = read_u64(buf, 0)?;
        let data = buf
            .get(8..8 + block_size)
            .ok_or(Error::Protocol)?
            .to_vec()
            .into_boxed_slice();
        Ok(Self { request_id, data })
    }
}

pub struct WriteResponse {
    pub request_id: u64,
    pub status: u8,
}

impl WriteResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.push(self.status);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let request_id = read_u64(buf, 0)?;
        let status = *buf.get(8).ok_or(Error::Protocol)?;
        Ok(Self { request_id, status })
    }
}
