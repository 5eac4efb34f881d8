//! Wall-clock helpers for freshness stamping.

use crate::error::{constants, ProtocolError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in whole seconds.
///
/// # Errors
/// Returns `ProtocolError::Custom` if the system clock is earlier than the epoch.
pub fn unix_seconds() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.into()))
}

/// Absolute distance between two timestamps.
#[inline]
pub fn skew(a: u64, b: u64) -> u64 {
    a.abs_diff(b)
}
