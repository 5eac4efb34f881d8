#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use secure_frame::core::codec::FrameCodec;
use secure_frame::core::packet::PacketCodec;
use secure_frame::utils::crypto::{Crypto, SharedKey, DEFAULT_MAC_LEN};
use secure_frame::utils::freshness::{FreshnessContext, FreshnessPolicy};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Hostile bytes must be rejected without panics or unbounded buffering
    let codec = PacketCodec::new(
        Crypto::new(SharedKey::new([7u8; 16])),
        DEFAULT_MAC_LEN,
        512,
    );
    let freshness = FreshnessContext::new(FreshnessPolicy::nonce(16));
    let _ = codec.decode(data, &freshness);

    let mut framer = FrameCodec::new(codec.max_wire_payload());
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = framer.decode(&mut buf) {
        let _ = codec.decode(&frame, &freshness);
    }
    let _ = framer.decode_eof(&mut buf);
});
