//! # secure-frame
//!
//! Authenticated, encrypted, replay-resistant message framing for two peers
//! sharing a pre-provisioned key.
//!
//! A message is split into DATA packets, each sealed with AES-128-CTR under a
//! fresh random IV, checksummed, stamped with a freshness token and tagged
//! with a truncated HMAC-SHA256. The receiver verifies the tag, the
//! freshness token and the checksum, in that order, before decrypting, then
//! reassembles the message by sequence number.
//!
//! ## Layers
//! - [`core`]: wire format, checksum and stream framing
//! - [`utils`]: crypto, replay policies, logging, metrics and timing
//! - [`protocol`]: fragmentation, reassembly and retransmission state
//! - [`transport`]: frame I/O over streams, datagrams or memory
//! - [`service`]: the `send`/`receive` channels applications use
//! - [`config`]: TOML and environment driven settings
//!
//! ## Quick Start
//! ```rust,no_run
//! use secure_frame::config::ProtocolConfig;
//! use secure_frame::service::SecureChannel;
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> secure_frame::error::Result<()> {
//! let config = ProtocolConfig::from_file("secure-frame.toml")?;
//! let stream = TcpStream::connect("127.0.0.1:7777").await?;
//! let mut channel = SecureChannel::from_config(stream, &config)?;
//!
//! channel.send(b"FIRE 3 4").await?;
//! let reply = channel.receive().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::ProtocolConfig;
pub use core::packet::{Packet, PacketCodec, PacketType};
pub use error::{ProtocolError, Result};
pub use service::{ReliableChannel, SecureChannel};
pub use transport::FrameTransport;
pub use utils::crypto::SharedKey;
pub use utils::freshness::{FreshnessContext, FreshnessPolicy};
