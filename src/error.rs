//! # Error Types
//!
//! Error handling for the secure framing protocol.
//!
//! This module defines every failure that can surface from encoding, decoding,
//! reassembly and the transport adapters.
//!
//! ## Error Categories
//! - **Per-packet validation** (`Authentication`, `Integrity`, `Replay`): the
//!   offending packet is discarded and the receive loop continues.
//! - **Structural** (`Format`, `Sequence`, `ConnectionClosed`, `Io`): the
//!   in-flight message is aborted and the error is returned to the caller.
//! - **Local** (`OversizedPayload`, `OversizedMessage`, `Crypto`, `ConfigError`,
//!   `Timeout`): misuse or environment failures on this side of the wire.
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use secure_frame::error::{ProtocolError, Result};
//! use tracing::{error, warn};
//!
//! fn handle(result: Result<Vec<u8>>) {
//!     match result {
//!         Ok(_) => {}
//!         Err(e) if e.is_recoverable() => warn!(error = %e, "Packet discarded"),
//!         Err(e) => error!(error = %e, "Peer unreachable"),
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_SHORT_HEADER: &str = "Frame shorter than fixed header";
    pub const ERR_UNKNOWN_PACKET_TYPE: &str = "Unknown packet type";
    pub const ERR_SHORT_CIPHERTEXT: &str = "Encrypted payload shorter than IV";
    pub const ERR_OVERSIZED_FRAME: &str = "Frame exceeds negotiated limits";

    /// Replay errors
    pub const ERR_STALE_TIMESTAMP: &str = "Timestamp outside skew window";
    pub const ERR_NONCE_REPLAY: &str = "Nonce already seen";
    pub const ERR_TAG_REPLAY: &str = "Packet already accepted inside skew window";
    pub const ERR_STALE_SEQUENCE: &str = "Sequence number already delivered";
    pub const ERR_REPLAY_ESCALATION: &str = "Too many consecutive replayed packets";

    /// Cryptographic errors
    pub const ERR_RNG_FAILURE: &str = "Secure random source unavailable";
    pub const ERR_INVALID_KEY: &str = "Invalid key length";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Malformed frame: {0}")]
    Format(String),

    #[error("Authentication failed for packet seq {seq}")]
    Authentication { seq: u16 },

    #[error("Checksum mismatch for packet seq {seq}")]
    Integrity { seq: u16 },

    #[error("Replay rejected: {0}")]
    Replay(String),

    #[error("Out-of-sequence packet: expected {expected}, got {got}")]
    Sequence { expected: u16, got: u16 },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Payload too large: {0} bytes")]
    OversizedPayload(usize),

    #[error("Message needs {0} fragments, more than the sequence window allows")]
    OversizedMessage(usize),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Per-packet validation failures that the receive loops recover from by
    /// discarding the packet.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Authentication { .. }
                | ProtocolError::Integrity { .. }
                | ProtocolError::Replay(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
