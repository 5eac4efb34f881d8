//! # Core Protocol Components
//!
//! Low-level packet handling: checksum, wire format and stream framing.
//!
//! ## Components
//! - **Checksum**: keyless 16-bit corruption detector over the wire payload
//! - **Packet**: header layout plus the authenticated encode/decode pipeline
//! - **Codec**: Tokio codec that cuts whole frames out of a byte stream
//!
//! ## Wire Format
//! ```text
//! [Seq(2)] [Type(1)] [Length(2)] [Checksum(2)] [Freshness(8)] [MacLen(1)] [Mac(N)] [Payload(L)]
//! ```
//!
//! ## Security
//! - MAC verified before freshness, checksum or decryption
//! - Declared lengths bounded before any buffer reservation
//! - Tag width fixed by configuration, never by the peer

pub mod checksum;
pub mod codec;
pub mod packet;
