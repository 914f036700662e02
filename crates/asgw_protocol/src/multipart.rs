//! Multipart response framing.
//!
//! [MS-ASHTTP] 2.2.1.10.1.1: a multipart response is a 4-byte
//! little-endian part count, one 8-byte little-endian (offset, length)
//! pair per part, then the concatenated part bytes. Part 0 is always
//! the primary binary document.

use crate::error::{ProtocolError, ProtocolResult};

/// Builds a multipart frame from ordered parts.
pub fn build(parts: &[Vec<u8>]) -> Vec<u8> {
    let count = parts.len();
    let header = 4 + count * 8;
    let total: usize = header + parts.iter().map(Vec::len).sum::<usize>();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(count as u32).to_le_bytes());

    let mut offset = header;
    for part in parts {
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&(part.len() as u32).to_le_bytes());
        offset += part.len();
    }
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Splits a multipart frame back into its parts.
pub fn parse(frame: &[u8]) -> ProtocolResult<Vec<Vec<u8>>> {
    let need = |n: usize| -> ProtocolResult<()> {
        if frame.len() < n {
            Err(ProtocolError::TruncatedFrame {
                needed: n,
                have: frame.len(),
            })
        } else {
            Ok(())
        }
    };

    need(4)?;
    let count = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
    let header = 4 + count * 8;
    need(header)?;

    let mut parts = Vec::with_capacity(count);
    for index in 0..count {
        let meta = 4 + index * 8;
        let offset = u32::from_le_bytes(frame[meta..meta + 4].try_into().unwrap()) as usize;
        let length = u32::from_le_bytes(frame[meta + 4..meta + 8].try_into().unwrap()) as usize;
        let end = offset.checked_add(length).filter(|&e| e <= frame.len());
        match end {
            Some(end) => parts.push(frame[offset..end].to_vec()),
            None => {
                return Err(ProtocolError::BadPartRange {
                    index,
                    offset,
                    length,
                    total: frame.len(),
                })
            }
        }
    }
    Ok(parts)
}
