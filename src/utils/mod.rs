//! # Utility Modules
//!
//! Supporting utilities for cryptography, replay defence, logging and timing.
//!
//! ## Components
//! - **Crypto**: AES-128-CTR payload encryption and truncated HMAC-SHA256 tags
//! - **Freshness**: timestamp-skew and nonce-cache replay policies
//! - **Replay Cache**: bounded FIFO memory of accepted tokens
//! - **Logging**: Structured logging configuration
//! - **Time**: Unix timestamps for freshness stamping
//! - **Timeout**: Async timeout wrappers
//! - **Metrics**: Per-channel atomic counters
//!
//! ## Security
//! - IVs from the OS CSPRNG (getrandom), never from counters
//! - Constant-time tag comparison (subtle)
//! - Key material zeroized on drop (zeroize crate)

pub mod crypto;
pub mod freshness;
pub mod logging;
pub mod metrics;
pub mod replay_cache;
pub mod time;
pub mod timeout;

// Re-export public types for advanced users
pub use freshness::{FreshnessContext, FreshnessPolicy};
pub use replay_cache::ReplayCache;
