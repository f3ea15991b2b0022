//! LoRaWAN application-layer packages.
//!
//! - `multicastsetup`: remote multicast setup (TS005, FPort 200)
//! - `fragmentation`: fragmented data block transport (TS004, FPort 201)
//! - `clocksync`: application-layer clock synchronization (TS003, FPort 202)
//!
//! Every frame carries exactly one command: the CID byte followed by a fixed
//! little-endian payload layout. Req and Ans share CIDs, so decoding needs to
//! know the direction.

pub mod clocksync;
pub mod fragmentation;
pub mod multicastsetup;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty command")]
    Empty,
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Unknown CID: 0x{0:02X}")]
    UnknownCid(u8),
    #[error("{field} out of range: {value} (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },
    #[error("{field} must be a multiple of {multiple}, got {value}")]
    NotAMultiple {
        field: &'static str,
        value: u64,
        multiple: u64,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) fn ensure_len(data: &[u8], expected: usize) -> Result<(), CodecError> {
    if data.len() < expected {
        return Err(CodecError::BufferTooSmall {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_max(field: &'static str, value: u64, max: u64) -> Result<(), CodecError> {
    if value > max {
        return Err(CodecError::OutOfRange { field, value, max });
    }
    Ok(())
}

/// Split a frame into its CID and payload.
pub(crate) fn split_cid(data: &[u8]) -> Result<(u8, &[u8]), CodecError> {
    match data.split_first() {
        Some((cid, payload)) => Ok((*cid, payload)),
        None => Err(CodecError::Empty),
    }
}
