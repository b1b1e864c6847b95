//! Property tests for the resumable frame parser.
//!
//! A message must decode identically however its bytes are split across
//! reads, for every payload length encoding.

mod common;

use common::{init_test_logging, test_proptest_config};
use proptest::prelude::*;
use wsengine::net::websocket::{
    apply_mask, CloseCode, FeedOutcome, Frame, FrameEncoder, Message, MessageParser, Opcode,
};

const MAX: usize = MessageParser::DEFAULT_MAX_MESSAGE_SIZE;

/// Feeds `chunks` one read at a time; returns every message and any error.
fn decode_chunks<'a>(
    parser: &mut MessageParser,
    chunks: impl IntoIterator<Item = &'a [u8]>,
) -> (Vec<Message>, Option<CloseCode>) {
    let mut messages = Vec::new();
    for chunk in chunks {
        let mut cursor = 0;
        loop {
            let feed = parser.feed(chunk, cursor);
            cursor = feed.cursor;
            match feed.outcome {
                FeedOutcome::MessageReady => {
                    messages.extend(parser.take_message());
                }
                FeedOutcome::NeedMoreData => break,
                FeedOutcome::ProtocolError(code) => return (messages, Some(code)),
            }
        }
    }
    (messages, None)
}

/// Splits `bytes` at the given (unsorted, possibly repeated) points.
fn split_at_points(bytes: &[u8], points: &[usize]) -> Vec<Vec<u8>> {
    let mut cuts: Vec<usize> = points.iter().map(|p| p % (bytes.len() + 1)).collect();
    cuts.sort_unstable();
    cuts.dedup();
    let mut chunks = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        chunks.push(bytes[start..cut].to_vec());
        start = cut;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

fn client_bytes(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    FrameEncoder::client()
        .encode(opcode, payload)
        .expect("encodable")
}

fn arb_data_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![Just(Opcode::Text), Just(Opcode::Binary)]
}

fn arb_payload(opcode: Opcode) -> BoxedStrategy<Vec<u8>> {
    match opcode {
        Opcode::Text => "[a-zA-Z0-9 äöü€]{0,600}"
            .prop_map(String::into_bytes)
            .boxed(),
        _ => prop::collection::vec(any::<u8>(), 0..=600).boxed(),
    }
}

proptest! {
    #![proptest_config(test_proptest_config(300))]

    /// Any split of a single masked frame decodes to the same message.
    #[test]
    fn any_split_decodes_same_message(
        (opcode, payload) in arb_data_opcode().prop_flat_map(|op| (Just(op), arb_payload(op))),
        points in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        init_test_logging();
        let bytes = client_bytes(opcode, &payload);
        let chunks = split_at_points(&bytes, &points);
        let mut parser = MessageParser::server(MAX);
        let (messages, err) = decode_chunks(&mut parser, chunks.iter().map(Vec::as_slice));
        prop_assert_eq!(err, None);
        prop_assert_eq!(messages, vec![Message::new(opcode, payload)]);
    }

    /// Byte-at-a-time feeding of a fragmented message with an interleaved ping.
    #[test]
    fn fragmented_message_survives_byte_feeding(
        payload in prop::collection::vec(any::<u8>(), 2..400),
        fragment in 1usize..64,
        ping in prop::collection::vec(any::<u8>(), 0..=125),
    ) {
        init_test_logging();
        let encoder = FrameEncoder::client();
        let mut fragments = encoder
            .encode_fragmented(Opcode::Binary, &payload, fragment)
            .expect("encodable");
        let fragmented = fragments.len() > 1;
        fragments.insert(1, client_bytes(Opcode::Ping, &ping));
        let bytes: Vec<u8> = fragments.concat();

        let mut parser = MessageParser::server(MAX);
        let (messages, err) = decode_chunks(&mut parser, bytes.chunks(1));
        prop_assert_eq!(err, None);
        let ping = Message::new(Opcode::Ping, ping);
        let data = Message::binary(payload);
        let expected = if fragmented { vec![ping, data] } else { vec![data, ping] };
        prop_assert_eq!(messages, expected);
    }

    /// Several messages in one read come out in order.
    #[test]
    fn back_to_back_messages_in_order(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..8),
    ) {
        init_test_logging();
        let bytes: Vec<u8> = payloads
            .iter()
            .flat_map(|p| client_bytes(Opcode::Binary, p))
            .collect();
        let mut parser = MessageParser::server(MAX);
        let (messages, err) = decode_chunks(&mut parser, [bytes.as_slice()]);
        prop_assert_eq!(err, None);
        let expected: Vec<Message> = payloads.into_iter().map(Message::binary).collect();
        prop_assert_eq!(messages, expected);
    }
}

#[test]
fn payload_length_encoding_boundaries() {
    init_test_logging();
    crate::test_phase!("payload_length_encoding_boundaries");
    for opcode in [Opcode::Text, Opcode::Binary] {
        for len in [0usize, 1, 125, 126, 65_535, 65_536] {
            crate::test_section!(format!("{opcode:?} len={len}"));
            // Printable ASCII, so the same bytes are valid text.
            let payload: Vec<u8> = (0..len).map(|i| b'!' + (i % 94) as u8).collect();
            let bytes = client_bytes(opcode, &payload);
            // Split inside the extended length and again inside the payload.
            let chunks = split_at_points(&bytes, &[3, 9, bytes.len() / 2]);
            let mut parser = MessageParser::server(MAX);
            let (messages, err) = decode_chunks(&mut parser, chunks.iter().map(Vec::as_slice));
            assert_eq!(err, None, "{opcode:?} len={len}");
            assert_eq!(messages.len(), 1, "{opcode:?} len={len}");
            assert_eq!(messages[0].opcode, opcode);
            assert_eq!(messages[0].payload, payload);
        }
    }
    crate::test_complete!("payload_length_encoding_boundaries");
}

#[test]
fn three_fragments_of_one_hundred_bytes() {
    init_test_logging();
    let payload = "x".repeat(300);
    let fragments = FrameEncoder::client()
        .encode_fragmented(Opcode::Text, payload.as_bytes(), 100)
        .expect("encodable");
    assert_eq!(fragments.len(), 3);

    let mut parser = MessageParser::server(MAX);
    let (first, err) = decode_chunks(&mut parser, [fragments[0].as_slice()]);
    assert!(first.is_empty() && err.is_none());
    assert!(parser.in_fragmented_message());

    let (rest, err) = decode_chunks(&mut parser, fragments[1..].iter().map(Vec::as_slice));
    assert_eq!(err, None);
    assert_eq!(rest, vec![Message::text(payload)]);
    assert!(!parser.in_fragmented_message());
}

#[test]
fn unmasked_client_frame_is_a_protocol_error() {
    init_test_logging();
    let bytes = FrameEncoder::server()
        .encode(Opcode::Text, b"hi")
        .expect("encodable");
    let mut parser = MessageParser::server(MAX);
    let (messages, err) = decode_chunks(&mut parser, [bytes.as_slice()]);
    assert!(messages.is_empty());
    assert_eq!(err, Some(CloseCode::ProtocolError));
}

#[test]
fn oversized_message_is_refused_before_payload() {
    init_test_logging();
    let bytes = client_bytes(Opcode::Binary, &[0u8; 64]);
    let mut parser = MessageParser::server(32);
    // Header plus mask only: the size check must not wait for the payload.
    let (messages, err) = decode_chunks(&mut parser, [&bytes[..6]]);
    assert!(messages.is_empty());
    assert_eq!(err, Some(CloseCode::MessageTooBig));
}

#[test]
fn invalid_utf8_text_is_rejected() {
    init_test_logging();
    let frame = Frame::text(vec![0xff, 0xfe]).masked_with([1, 2, 3, 4]);
    let mut out = Vec::new();
    FrameEncoder::client()
        .encode_frame(&frame, &mut out)
        .expect("encodable");
    let mut parser = MessageParser::server(MAX);
    let (_, err) = decode_chunks(&mut parser, [out.as_slice()]);
    assert_eq!(err, Some(CloseCode::InvalidPayload));
}

proptest! {
    #![proptest_config(test_proptest_config(256))]

    /// Masking twice with the same key restores the payload, at every
    /// length and alignment of the word-at-a-time path.
    #[test]
    fn masking_twice_is_identity(
        key in any::<[u8; 4]>(),
        payload in prop::collection::vec(any::<u8>(), 0..300),
    ) {
        let mut masked = payload.clone();
        apply_mask(&mut masked, key);
        let expected: Vec<u8> = payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % 4])
            .collect();
        prop_assert_eq!(&masked, &expected);
        apply_mask(&mut masked, key);
        prop_assert_eq!(masked, payload);
    }
}
