//! Payload confidentiality and packet authentication.
//!
//! Payloads are encrypted with AES-128 in counter mode. The full 16-byte
//! counter block is initialised from a per-packet IV drawn from the operating
//! system CSPRNG, so two packets under one key never share a keystream.
//!
//! Packets are authenticated with HMAC-SHA256 truncated to the configured tag
//! length; tags are compared in constant time.
//!
//! The key is provisioned out-of-band. It is zeroized on drop and redacted from
//! `Debug` output.

use crate::error::{constants, ProtocolError, Result};
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Shared key length in bytes (AES-128).
pub const KEY_LEN: usize = 16;

/// Initialization vector length in bytes.
pub const IV_LEN: usize = 16;

/// Untruncated HMAC-SHA256 output length.
pub const MAX_MAC_LEN: usize = 32;

/// Shortest tag the codec will accept.
pub const MIN_MAC_LEN: usize = 8;

/// Default truncated tag length.
pub const DEFAULT_MAC_LEN: usize = 16;

/// Pre-shared symmetric key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_LEN]);

impl SharedKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice that must be exactly `KEY_LEN` bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            ProtocolError::Crypto(format!(
                "{}: expected {KEY_LEN} bytes, got {}",
                constants::ERR_INVALID_KEY,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Parse a hex-encoded key (32 hex characters).
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut raw = hex::decode(encoded.trim())
            .map_err(|e| ProtocolError::Crypto(format!("{}: {e}", constants::ERR_INVALID_KEY)))?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    /// Generate a fresh random key.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf)
        .map_err(|e| ProtocolError::Crypto(format!("{}: {e}", constants::ERR_RNG_FAILURE)))
}

/// Keyed cipher and authenticator for one connection.
#[derive(Clone, Debug)]
pub struct Crypto {
    key: SharedKey,
}

impl Crypto {
    pub fn new(key: SharedKey) -> Self {
        Self { key }
    }

    /// Draw a fresh IV from the OS CSPRNG.
    pub fn generate_iv() -> Result<[u8; IV_LEN]> {
        let mut iv = [0u8; IV_LEN];
        fill_random(&mut iv)?;
        Ok(iv)
    }

    /// Encrypt `plaintext` under `(key, iv)`.
    pub fn encrypt(&self, plaintext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>> {
        let mut buf = plaintext.to_vec();
        self.apply_keystream(&mut buf, iv)?;
        Ok(buf)
    }

    /// Decrypt `ciphertext` under `(key, iv)`. CTR mode is its own inverse.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>> {
        let mut buf = ciphertext.to_vec();
        self.apply_keystream(&mut buf, iv)?;
        Ok(buf)
    }

    fn apply_keystream(&self, buf: &mut [u8], iv: &[u8; IV_LEN]) -> Result<()> {
        let mut cipher = Aes128Ctr::new_from_slices(self.key.as_bytes(), iv)
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        cipher.apply_keystream(buf);
        Ok(())
    }

    /// Compute the tag over `header || payload`, truncated to `mac_len` bytes.
    pub fn sign(&self, header: &[u8], payload: &[u8], mac_len: usize) -> Result<Vec<u8>> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.key.as_bytes())
            .map_err(|_| ProtocolError::Crypto(constants::ERR_INVALID_KEY.into()))?;
        mac.update(header);
        mac.update(payload);
        let full = mac.finalize().into_bytes();
        Ok(full[..mac_len.min(MAX_MAC_LEN)].to_vec())
    }

    /// Constant-time check of a received tag.
    pub fn verify(&self, header: &[u8], payload: &[u8], tag: &[u8]) -> Result<bool> {
        let expected = self.sign(header, payload, tag.len())?;
        Ok(bool::from(expected.as_slice().ct_eq(tag)))
    }
}
