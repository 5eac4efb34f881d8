//! Stress tests
//!
//! Long message series and large messages through the streaming channel.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use secure_frame::config::ProtocolConfig;
use secure_frame::core::packet::{PacketCodec, PacketType};
use secure_frame::service::SecureChannel;
use secure_frame::utils::crypto::{Crypto, SharedKey, DEFAULT_MAC_LEN};
use secure_frame::utils::freshness::{FreshnessContext, FreshnessPolicy};

fn key() -> SharedKey {
    SharedKey::new(*b"leweisupersecret")
}

#[test]
fn stress_packet_seal_open_large_series() {
    let codec = PacketCodec::new(Crypto::new(key()), DEFAULT_MAC_LEN, 4096);
    let freshness = FreshnessContext::new(FreshnessPolicy::nonce(1 << 16));

    for size in [0usize, 1, 64, 512, 4096] {
        let payload = vec![0xC3u8; size];
        for i in 0..2_000u64 {
            let token = (size as u64) << 32 | i;
            let frame = codec
                .encode(i as u16, PacketType::Data, &payload, token)
                .unwrap();
            let packet = codec.decode(&frame, &freshness).unwrap();
            assert_eq!(packet.payload.len(), size);
        }
    }
}

#[tokio::test]
async fn stress_one_megabyte_message() {
    let cfg = ProtocolConfig::default_with_overrides(|c| {
        c.freshness.policy = FreshnessPolicy::nonce(1 << 14);
    });
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut alice = SecureChannel::new(a, key(), &cfg);
    let mut bob = SecureChannel::new(b, key(), &cfg);

    let message: Vec<u8> = (0..1_048_576u32).map(|i| (i * 31 % 251) as u8).collect();
    let sent = message.clone();
    let writer = tokio::spawn(async move { alice.send(&sent).await.unwrap() });
    assert_eq!(bob.receive().await.unwrap(), message);
    writer.await.unwrap();

    // 2048 DATA packets plus the terminator
    assert_eq!(bob.metrics().snapshot().packets_received, 2049);
}

#[tokio::test]
async fn stress_many_small_messages() {
    let cfg = ProtocolConfig::default_with_overrides(|c| {
        c.freshness.policy = FreshnessPolicy::nonce(1 << 15);
    });
    let (a, b) = tokio::io::duplex(1 << 14);
    let mut alice = SecureChannel::new(a, key(), &cfg);
    let mut bob = SecureChannel::new(b, key(), &cfg);

    let writer = tokio::spawn(async move {
        for i in 0..5_000u32 {
            alice.send(&i.to_be_bytes()).await.unwrap();
        }
        alice
    });
    for i in 0..5_000u32 {
        assert_eq!(bob.receive().await.unwrap(), i.to_be_bytes());
    }
    let alice = writer.await.unwrap();
    assert_eq!(alice.metrics().snapshot().messages_sent, 5_000);
}
