//! Property-based tests using proptest
//!
//! Every corruption of a sealed frame must be caught, whatever the payload
//! and wherever the damage lands.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use secure_frame::core::checksum;
use secure_frame::core::packet::{PacketCodec, PacketType};
use secure_frame::error::ProtocolError;
use secure_frame::protocol::fragment::{fragment, Reassembler};
use secure_frame::protocol::retransmit::ReorderBuffer;
use secure_frame::utils::crypto::{Crypto, SharedKey, DEFAULT_MAC_LEN};
use secure_frame::utils::freshness::{FreshnessContext, FreshnessPolicy};

fn codec() -> PacketCodec {
    PacketCodec::new(
        Crypto::new(SharedKey::new(*b"leweisupersecret")),
        DEFAULT_MAC_LEN,
        512,
    )
}

fn fresh_ctx() -> FreshnessContext {
    FreshnessContext::new(FreshnessPolicy::nonce(64))
}

fn is_detected(result: &Result<secure_frame::core::packet::Packet, ProtocolError>) -> bool {
    matches!(
        result,
        Err(ProtocolError::Authentication { .. }) | Err(ProtocolError::Integrity { .. })
    )
}

// Property: sealed DATA packets open to the original plaintext
proptest! {
    #[test]
    fn prop_data_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..=512), seq in any::<u16>()) {
        let codec = codec();
        let frame = codec.encode(seq, PacketType::Data, &payload, 9).unwrap();
        let packet = codec.decode(&frame, &fresh_ctx()).unwrap();
        prop_assert_eq!(packet.seq_num, seq);
        prop_assert_eq!(&packet.payload[..], &payload[..]);
    }
}

// Property: any single-bit flip is an authentication or integrity failure
proptest! {
    #[test]
    fn prop_single_bit_flip_detected(
        payload in prop::collection::vec(any::<u8>(), 0..=512),
        kind in 0u8..5,
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let codec = codec();
        let packet_type = PacketType::try_from(kind).unwrap();
        let payload = if packet_type == PacketType::Data { payload } else { payload[..payload.len().min(8)].to_vec() };
        let mut frame = codec.encode(3, packet_type, &payload, 77).unwrap().to_vec();

        let index = position.index(frame.len());
        frame[index] ^= 1 << bit;

        let result = codec.decode(&frame, &fresh_ctx());
        prop_assert!(is_detected(&result), "flip at {} not detected: {:?}", index, result);
    }
}

// Property: a frame cut short never decodes
proptest! {
    #[test]
    fn prop_truncation_rejected(payload in prop::collection::vec(any::<u8>(), 1..=512), cut in any::<prop::sample::Index>()) {
        let codec = codec();
        let frame = codec.encode(0, PacketType::Data, &payload, 1).unwrap();
        let keep = cut.index(frame.len());
        prop_assert!(codec.decode(&frame[..keep], &fresh_ctx()).is_err());
    }
}

// Property: fragments reassemble in order to the original message
proptest! {
    #[test]
    fn prop_fragment_reassembly(message in prop::collection::vec(any::<u8>(), 0..5000), max_payload in 1usize..700) {
        let mut reassembler = Reassembler::new(0);
        let mut seq = 0u16;
        for chunk in fragment(&message, max_payload) {
            prop_assert!(reassembler.accept(seq, bytes::Bytes::copy_from_slice(chunk)).unwrap().is_none());
            seq += 1;
        }
        let out = reassembler.accept(seq, bytes::Bytes::new()).unwrap().unwrap();
        prop_assert_eq!(out, message);
    }
}

// Property: the reorder buffer is insensitive to arrival order
proptest! {
    #[test]
    fn prop_reorder_any_permutation(
        message in prop::collection::vec(any::<u8>(), 0..3000),
        base in any::<u16>(),
        seed in any::<u64>(),
    ) {
        let mut packets: Vec<(u16, bytes::Bytes)> = fragment(&message, 100)
            .enumerate()
            .map(|(i, c)| (base.wrapping_add(i as u16), bytes::Bytes::copy_from_slice(c)))
            .collect();
        packets.push((base.wrapping_add(packets.len() as u16), bytes::Bytes::new()));

        let mut rng = StdRng::seed_from_u64(seed);
        for i in (1..packets.len()).rev() {
            let j = rng.random_range(0..=i);
            packets.swap(i, j);
        }

        let mut buffer = ReorderBuffer::new(base);
        for (seq, payload) in packets {
            buffer.insert(seq, payload).unwrap();
        }
        let (_, out) = buffer.take_message().unwrap();
        prop_assert_eq!(out, message);
    }
}

/// Random burst errors across many frames: nothing damaged may decode.
#[test]
fn test_corruption_statistics() {
    let codec = codec();
    let mut rng = StdRng::seed_from_u64(0x5EC0_F8A3);
    let trials = 2_000;
    let mut undetected = 0;
    let mut by_auth = 0;

    for i in 0..trials {
        let len = rng.random_range(0..=512);
        let payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        let original = codec
            .encode(i as u16, PacketType::Data, &payload, i as u64)
            .unwrap()
            .to_vec();

        let mut frame = original.clone();
        let flips = rng.random_range(1..=8);
        for _ in 0..flips {
            let index = rng.random_range(0..frame.len());
            frame[index] ^= 1 << rng.random_range(0..8);
        }

        let result = codec.decode(&frame, &fresh_ctx());
        // Flips that cancel out leave a genuine frame behind.
        if result.is_ok() && frame != original {
            undetected += 1;
        }
        if matches!(result, Err(ProtocolError::Authentication { .. })) {
            by_auth += 1;
        }
    }

    assert_eq!(undetected, 0);
    assert!(by_auth > trials * 9 / 10);
}

/// The keyless checksum alone catches every single-bit error on a fragment.
#[test]
fn test_checksum_detects_single_bit_errors() {
    let mut rng = StdRng::seed_from_u64(7);
    let data: Vec<u8> = (0..512).map(|_| rng.random()).collect();
    let sum = checksum::compute(&data);
    for byte in 0..data.len() {
        for bit in 0..8 {
            let mut damaged = data.clone();
            damaged[byte] ^= 1 << bit;
            assert!(!checksum::verify(&damaged, sum));
        }
    }
}
