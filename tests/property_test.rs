// tests/property_test.rs

//! Property-based tests for SpinelDB: codec round-tripping, decoder
//! resumability across arbitrary splits, and `Store` idempotence (§8).

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use spineldb::core::protocol::{RespFrame, RespFrameCodec};
use spineldb::core::storage::Store;
use tokio_util::codec::{Decoder, Encoder};

fn encode(frame: &RespFrame) -> Vec<u8> {
    let mut buf = BytesMut::new();
    RespFrameCodec.encode(frame.clone(), &mut buf).unwrap();
    buf.to_vec()
}

fn decode_one(bytes: &[u8]) -> RespFrame {
    let mut buf = BytesMut::from(bytes);
    RespFrameCodec.decode(&mut buf).unwrap().unwrap()
}

fn command_frame(parts: &[Vec<u8>]) -> RespFrame {
    RespFrame::Array(
        parts
            .iter()
            .map(|p| RespFrame::BulkString(Bytes::from(p.clone())))
            .collect(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

    /// `encode` then `decode` recovers a bit-for-bit identical command frame
    /// (§8: "encode ∘ decode applied to any valid RESP frame recovers the
    /// original bytes").
    #[test]
    fn encode_then_decode_recovers_command_frame(
        parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8)
    ) {
        let frame = command_frame(&parts);
        let encoded = encode(&frame);
        let decoded = decode_one(&encoded);
        prop_assert_eq!(decoded, frame);
    }

    /// Decoding is resumable: feeding the same bytes split at any boundary,
    /// one chunk at a time, produces the same frame as a single call on the
    /// concatenation.
    #[test]
    fn decode_is_resumable_across_arbitrary_splits(
        parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..6),
        split_at in 0usize..200,
    ) {
        let frame = command_frame(&parts);
        let whole = encode(&frame);
        let split_at = split_at.min(whole.len());

        let mut codec = RespFrameCodec;
        let mut buf = BytesMut::from(&whole[..split_at]);
        prop_assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&whole[split_at..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(decoded, frame);
    }

    /// Decoding `bytes1 ++ bytes2` yields the same ordered frame list as
    /// decoding each half separately and concatenating the results.
    #[test]
    fn decode_of_concatenation_matches_decode_of_each_half(
        a_parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 1..4),
        b_parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 1..4),
    ) {
        let a = encode(&command_frame(&a_parts));
        let b = encode(&command_frame(&b_parts));

        let mut combined = BytesMut::new();
        combined.extend_from_slice(&a);
        combined.extend_from_slice(&b);
        let mut codec = RespFrameCodec;
        let mut combined_frames = Vec::new();
        while let Some(frame) = codec.decode(&mut combined).unwrap() {
            combined_frames.push(frame);
        }

        let mut separate_frames = Vec::new();
        for chunk in [&a, &b] {
            let mut buf = BytesMut::from(&chunk[..]);
            let mut codec = RespFrameCodec;
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                separate_frames.push(frame);
            }
        }

        prop_assert_eq!(combined_frames, separate_frames);
    }

    /// Repeated `DEL` on the same key returns 1 once, then 0 afterwards,
    /// regardless of the key or value chosen.
    #[test]
    fn del_is_idempotent_after_first_call(
        key in "[a-zA-Z0-9_]{1,32}",
        value in ".{0,256}",
    ) {
        let store = Store::new();
        let key = Bytes::from(key.into_bytes());
        store.set(key.clone(), Bytes::from(value.into_bytes()), None);

        prop_assert_eq!(store.del(&[key.clone()]), 1);
        prop_assert_eq!(store.del(&[key]), 0);
    }

    /// `get` immediately following `set` on the same key, with no TTL,
    /// always observes the value just written.
    #[test]
    fn get_after_set_observes_the_written_value(
        key in "[a-zA-Z0-9_]{1,32}",
        value in ".{0,256}",
    ) {
        let store = Store::new();
        let key = Bytes::from(key.into_bytes());
        let value = Bytes::from(value.into_bytes());
        store.set(key.clone(), value.clone(), None);
        prop_assert_eq!(store.get(&key), Some(value));
    }
}
