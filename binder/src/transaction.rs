//! Transaction classification and best-effort parsing.
//!
//! Byte-oriented traffic is only *tentatively* binder: the first word is
//! checked against the driver's object tags, and the service name is a
//! heuristic scan. Policy must tolerate misses; precision of the extracted
//! name is not guaranteed.

use thiserror::Error;

/// Strong binder object tag (`B_PACK_CHARS('s','b','*')`).
pub const TYPE_BINDER: u32 = 0x7362_2a85;
/// Weak binder object tag.
pub const TYPE_WEAK_BINDER: u32 = 0x7762_2a85;
/// Strong handle tag.
pub const TYPE_HANDLE: u32 = 0x6862_2a85;
/// Weak handle tag.
pub const TYPE_WEAK_HANDLE: u32 = 0x7768_2a85;

/// Smallest buffer that can carry an opcode and flags word.
pub const MIN_TRANSACTION_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("transaction buffer too short: {0} bytes")]
    TooShort(usize),
}

/// One intercepted transaction. Payload slices are owned copies, never
/// aliases into kernel buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub code: u32,
    pub flags: u32,
    /// Heuristically extracted target service; empty when no candidate run
    /// was found.
    pub service: String,
    pub data: Vec<u8>,
    pub reply: Vec<u8>,
}

/// Does the first word carry one of the driver's object tags?
pub fn is_tagged(buf: &[u8]) -> bool {
    if buf.len() < 4 {
        return false;
    }
    let word = u32::from_le_bytes(buf[..4].try_into().unwrap());
    matches!(
        word,
        TYPE_BINDER | TYPE_WEAK_BINDER | TYPE_HANDLE | TYPE_WEAK_HANDLE
    )
}

/// Parse a transaction buffer: first 32-bit word is the opcode, second is
/// flags, and the remainder is scanned for a service name.
pub fn parse(buf: &[u8]) -> Result<Transaction, ParseError> {
    if buf.len() < MIN_TRANSACTION_LEN {
        return Err(ParseError::TooShort(buf.len()));
    }

    let code = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let flags = u32::from_le_bytes(buf[4..8].try_into().unwrap());

    Ok(Transaction {
        code,
        flags,
        service: extract_service_name(&buf[8..]).unwrap_or_default(),
        data: buf.to_vec(),
        reply: Vec::new(),
    })
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'_'
}

/// Longest run of `[A-Za-z0-9._]` starting with a lowercase letter, of
/// length greater than 3.
pub fn extract_service_name(buf: &[u8]) -> Option<String> {
    let mut best: Option<&[u8]> = None;

    let mut i = 0;
    while i < buf.len() {
        if !buf[i].is_ascii_lowercase() {
            i += 1;
            continue;
        }
        let start = i;
        while i < buf.len() && is_name_byte(buf[i]) {
            i += 1;
        }
        let run = &buf[start..i];
        if run.len() > 3 && best.map_or(true, |b| run.len() > b.len()) {
            best = Some(run);
        }
    }

    best.map(|b| String::from_utf8_lossy(b).into_owned())
}
