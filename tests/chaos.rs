//! Chaos engineering tests
//!
//! Drives the retransmitting channel over links that drop, duplicate and
//! reorder frames, and over real UDP sockets.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use secure_frame::config::ProtocolConfig;
use secure_frame::error::{ProtocolError, Result};
use secure_frame::service::ReliableChannel;
use secure_frame::transport::{DatagramTransport, FrameTransport, MemoryTransport};
use secure_frame::utils::crypto::SharedKey;
use secure_frame::utils::freshness::FreshnessPolicy;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Wraps a transport and misbehaves on the outbound side.
struct LossyLink<T> {
    inner: T,
    rng: StdRng,
    drop_rate: f64,
    duplicate_rate: f64,
    reorder_rate: f64,
    held: Option<Bytes>,
}

impl<T: FrameTransport> LossyLink<T> {
    fn new(inner: T, seed: u64) -> Self {
        Self {
            inner,
            rng: StdRng::seed_from_u64(seed),
            drop_rate: 0.2,
            duplicate_rate: 0.1,
            reorder_rate: 0.15,
            held: None,
        }
    }
}

impl<T: FrameTransport> FrameTransport for LossyLink<T> {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        if self.rng.random_bool(self.drop_rate) {
            return Ok(());
        }
        if self.held.is_none() && self.rng.random_bool(self.reorder_rate) {
            self.held = Some(frame);
            return Ok(());
        }
        if self.rng.random_bool(self.duplicate_rate) {
            self.inner.send_frame(frame.clone()).await?;
        }
        self.inner.send_frame(frame).await?;
        if let Some(late) = self.held.take() {
            self.inner.send_frame(late).await?;
        }
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Bytes> {
        self.inner.recv_frame().await
    }
}

fn key() -> SharedKey {
    SharedKey::new(*b"leweisupersecret")
}

fn lossy_config() -> ProtocolConfig {
    ProtocolConfig::default_with_overrides(|c| {
        c.channel.max_payload = 64;
        c.freshness.policy = FreshnessPolicy::nonce(1 << 16);
        c.freshness.replay_escalation_threshold = 0;
        c.reliability.ack_timeout = Duration::from_millis(30);
        c.reliability.max_retransmit_rounds = 60;
        c.reliability.done_linger = Duration::from_millis(500);
    })
}

fn messages() -> Vec<Vec<u8>> {
    vec![
        b"FIRE 3 4".to_vec(),
        Vec::new(),
        vec![0xA5],
        (0..700u32).map(|i| (i % 256) as u8).collect(),
        (0..3000u32).map(|i| (i * 7 % 256) as u8).collect(),
    ]
}

#[tokio::test]
async fn test_delivery_over_lossy_link() {
    let (a, b) = MemoryTransport::pair();
    let cfg = lossy_config();
    let mut sender = ReliableChannel::new(LossyLink::new(a, 1), key(), &cfg);
    let mut receiver = ReliableChannel::new(LossyLink::new(b, 2), key(), &cfg);

    let expected = messages();
    let count = expected.len();
    let rx = tokio::spawn(async move {
        let mut got = Vec::new();
        for _ in 0..count {
            got.push(receiver.receive().await.unwrap());
        }
        // Stay around in case the last DONE was dropped.
        receiver.finish().await;
        (got, receiver)
    });

    for message in &expected {
        sender.send(message).await.unwrap();
    }
    let (got, receiver) = rx.await.unwrap();
    assert_eq!(got, expected);

    let sent = sender.metrics().snapshot();
    let received = receiver.metrics().snapshot();
    assert_eq!(sent.messages_sent, count as u64);
    assert_eq!(received.messages_received, count as u64);
    assert!(sent.retransmissions > 0, "a 20% loss link should force resends");
}

#[tokio::test]
async fn test_two_way_exchange_over_lossy_link() {
    let (a, b) = MemoryTransport::pair();
    let cfg = lossy_config();
    let mut alice = ReliableChannel::new(LossyLink::new(a, 11), key(), &cfg);
    let mut bob = ReliableChannel::new(LossyLink::new(b, 12), key(), &cfg);

    let bob_task = tokio::spawn(async move {
        for _ in 0..3 {
            let shot = bob.receive().await.unwrap();
            let mut reply = b"MISS ".to_vec();
            reply.extend_from_slice(&shot);
            bob.send(&reply).await.unwrap();
        }
        bob
    });

    for shot in [b"A1".as_slice(), b"B7", b"J10"] {
        alice.send(shot).await.unwrap();
        let reply = alice.receive().await.unwrap();
        assert_eq!(reply, [b"MISS ".as_slice(), shot].concat());
    }
    bob_task.await.unwrap();
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let (a, _b) = MemoryTransport::pair();
    let cfg = ProtocolConfig::default_with_overrides(|c| {
        c.freshness.policy = FreshnessPolicy::nonce(64);
        c.reliability.ack_timeout = Duration::from_millis(10);
        c.reliability.max_retransmit_rounds = 5;
    });
    let mut sender = ReliableChannel::new(a, key(), &cfg);
    assert!(matches!(
        sender.send(&[1u8; 2000]).await,
        Err(ProtocolError::Timeout)
    ));
    assert_eq!(sender.metrics().snapshot().ack_timeouts, 5);
}

#[tokio::test]
async fn test_delivery_over_udp() {
    let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    a.connect(b.local_addr().unwrap()).await.unwrap();
    b.connect(a.local_addr().unwrap()).await.unwrap();

    let cfg = ProtocolConfig::default_with_overrides(|c| {
        c.freshness.policy = FreshnessPolicy::nonce(4096);
        c.reliability.ack_timeout = Duration::from_millis(100);
        c.reliability.done_linger = Duration::from_millis(200);
    });
    let max_wire = cfg.channel.max_payload + 16;
    let mut sender = ReliableChannel::new(DatagramTransport::from_socket(a, max_wire), key(), &cfg);
    let mut receiver =
        ReliableChannel::new(DatagramTransport::from_socket(b, max_wire), key(), &cfg);

    let message: Vec<u8> = (0..6000u32).map(|i| (i % 253) as u8).collect();
    let expected = message.clone();
    let rx = tokio::spawn(async move {
        let got = receiver.receive().await.unwrap();
        (got, receiver)
    });
    sender.send(&message).await.unwrap();
    let (got, _receiver) = rx.await.unwrap();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn test_udp_transport_connects_by_address() {
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let probe_addr = probe.local_addr().unwrap();
    let transport = DatagramTransport::connect("127.0.0.1:0", probe_addr, 528)
        .await
        .unwrap();
    assert_eq!(transport.peer_addr().unwrap(), probe_addr);
}
