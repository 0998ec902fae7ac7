#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! Wire-level helpers for split-architecture cores: just enough PFCP
//! (TS 29.244) header handling to route incoming messages by type, session
//! and sequence, plus the range-partitioned TEID allocator.
//!
//! Full PFCP information-element encoding lives outside this workspace; the
//! runtime only reads and writes the leading header bytes.

pub mod header;
pub mod teid;

pub use header::{msg_type, PfcpHeader, PFCP_VERSION};
pub use teid::TeidManager;

use thiserror::Error;

/// Failures raised by the protocol helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// The buffer is too short to hold the advertised header.
    #[error("buffer too short for PFCP header ({0} bytes)")]
    Truncated(usize),

    /// The version field does not carry a supported PFCP version.
    #[error("unsupported PFCP version {0}")]
    UnsupportedVersion(u8),

    /// TEID range bits outside `[0, 7]`.
    #[error("the range bits must be between 0 and 7")]
    InvalidNumberOfRangeBits,

    /// TEID range value outside `[0, 2^range_bits - 1]`.
    #[error("the TEID range value must be between {min} and {max}")]
    InvalidRangeValue { min: u32, max: u32 },
}

/// Specialized `Result` type for protocol helpers.
pub type Result<T> = std::result::Result<T, ProtoError>;
