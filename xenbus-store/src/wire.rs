//! Wire protocol for the xenstore socket.
//!
//! Every message is a 16-byte little-endian header followed by `len` payload
//! bytes. Request payloads are NUL-terminated strings; directory replies are
//! NUL-separated child names; watch events carry `path\0token\0`.

use crate::error::{Result, StoreError};

/// Size of the message header on the wire.
pub const HEADER_LEN: usize = 16;

/// Upper bound on a sane payload; larger frames are rejected.
pub const MAX_PAYLOAD: usize = 4096;

/// Message types understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    Control = 0,
    Directory = 1,
    Read = 2,
    GetPerms = 3,
    Watch = 4,
    Unwatch = 5,
    TransactionStart = 6,
    TransactionEnd = 7,
    Introduce = 8,
    Release = 9,
    GetDomainPath = 10,
    Write = 11,
    Mkdir = 12,
    Rm = 13,
    SetPerms = 14,
    WatchEvent = 15,
    Error = 16,
}

impl TryFrom<u32> for MsgType {
    type Error = StoreError;

    fn try_from(v: u32) -> Result<Self> {
        Ok(match v {
            0 => MsgType::Control,
            1 => MsgType::Directory,
            2 => MsgType::Read,
            3 => MsgType::GetPerms,
            4 => MsgType::Watch,
            5 => MsgType::Unwatch,
            6 => MsgType::TransactionStart,
            7 => MsgType::TransactionEnd,
            8 => MsgType::Introduce,
            9 => MsgType::Release,
            10 => MsgType::GetDomainPath,
            11 => MsgType::Write,
            12 => MsgType::Mkdir,
            13 => MsgType::Rm,
            14 => MsgType::SetPerms,
            15 => MsgType::WatchEvent,
            16 => MsgType::Error,
            other => return Err(StoreError::Protocol(format!("unknown message type {other}"))),
        })
    }
}

/// Message header: `{ type, req_id, tx_id, len }`, all little-endian u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: MsgType,
    pub req_id: u32,
    pub tx_id: u32,
    pub len: u32,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&(self.msg_type as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.req_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.tx_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.len.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let raw_type = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let req_id = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let tx_id = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let len = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        if len as usize > MAX_PAYLOAD {
            return Err(StoreError::Protocol(format!(
                "payload length {len} exceeds maximum {MAX_PAYLOAD}"
            )));
        }
        Ok(Header {
            msg_type: MsgType::try_from(raw_type)?,
            req_id,
            tx_id,
            len,
        })
    }
}

/// Payload for single-path requests: `path\0`.
pub fn path_payload(path: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(path.len() + 1);
    buf.extend_from_slice(path.as_bytes());
    buf.push(0);
    buf
}

/// Payload for `WRITE`: `path\0value` (value is raw bytes, not terminated).
pub fn write_payload(path: &str, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(path.len() + 1 + value.len());
    buf.extend_from_slice(path.as_bytes());
    buf.push(0);
    buf.extend_from_slice(value);
    buf
}

/// Payload for `WATCH` / `UNWATCH`: `path\0token\0`.
pub fn watch_payload(path: &str, token: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(path.len() + token.len() + 2);
    buf.extend_from_slice(path.as_bytes());
    buf.push(0);
    buf.extend_from_slice(token.as_bytes());
    buf.push(0);
    buf
}

/// Split a NUL-separated reply payload into strings, dropping the trailing
/// empty entry left by a terminating NUL.
pub fn split_strings(payload: &[u8]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for part in payload.split(|b| *b == 0) {
        if part.is_empty() {
            continue;
        }
        let s = std::str::from_utf8(part)
            .map_err(|_| StoreError::Protocol("non-UTF-8 string in payload".to_string()))?;
        out.push(s.to_string());
    }
    Ok(out)
}

/// Parse a `WATCH_EVENT` payload into `(path, token)`.
pub fn parse_watch_event(payload: &[u8]) -> Result<(String, String)> {
    let parts = split_strings(payload)?;
    if parts.len() != 2 {
        return Err(StoreError::Protocol(format!(
            "watch event with {} fields, expected 2",
            parts.len()
        )));
    }
    let mut it = parts.into_iter();
    Ok((it.next().unwrap(), it.next().unwrap()))
}

/// Parse an `ERROR` reply payload into the errno name.
pub fn parse_error(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}
