//! Integration tests for the wire protocol: compression and codec together,
//! the way datagrams actually travel.

use shared::codec::{
    parse_client_message, parse_server_message, serialize_client_message, serialize_server_message,
};
use shared::compression::{compress, decompress};
use shared::messages::{ClientMessage, PlayerInputBroadcast, ServerMessage};
use shared::MAX_PACKET_SIZE;

/// A rollback broadcast survives serialize -> compress -> decompress -> parse.
#[test]
fn compressed_broadcast_round_trip() {
    let broadcast = PlayerInputBroadcast {
        num_players: 2,
        start_frame: vec![1, 1],
        num_frames: vec![8, 8],
        num_predicted: 0,
        num_zeroed: 0,
        ping: 24,
        loss_pct: 0,
        rift: -0.75,
        checksum_ack: 8,
        // Idle frames are all zeros, the codec's best case.
        input_per_frame: vec![vec![0, 0, 0, 4, 0, 0, 0, 0], vec![0; 8]],
    };
    let msg = ServerMessage::PlayerInput(broadcast.clone());
    let raw = serialize_server_message(101, &msg, 2);

    let compressed = compress(&raw).unwrap();
    assert!(compressed.len() < raw.len());

    let restored = decompress(&compressed, raw.len()).unwrap();
    assert_eq!(restored, raw);

    let parsed = parse_server_message(&restored, 2).unwrap();
    assert_eq!(parsed.sequence, 101);
    let ServerMessage::PlayerInput(got) = parsed.message else {
        panic!("expected PlayerInput");
    };
    assert_eq!(got.input_per_frame, broadcast.input_per_frame);
}

/// Receivers that only know the 1024-byte ceiling can still decompress: the
/// zero padding past the real body does not disturb parsing.
#[test]
fn decompress_with_ceiling_length_still_parses() {
    let msg = ServerMessage::RequestQualityData { ping: 40, loss_pct: 0 };
    let raw = serialize_server_message(9, &msg, 2);
    let compressed = compress(&raw).unwrap();

    let padded = decompress(&compressed, MAX_PACKET_SIZE).unwrap();
    assert_eq!(padded.len(), MAX_PACKET_SIZE);
    assert_eq!(&padded[..raw.len()], &raw[..]);

    let parsed = parse_server_message(&padded, 2).unwrap();
    assert_eq!(parsed.message, msg);
}

/// Every client message survives a serialize/parse round trip unchanged.
#[test]
fn client_messages_round_trip() {
    let messages = vec![
        ClientMessage::NewConnection {
            version: 2,
            team_id: 1,
            player_index: 1,
            match_id: "match-7f3a".to_string(),
            key: "secret".to_string(),
            environment_id: "prod".to_string(),
        },
        ClientMessage::Input {
            start_frame: 240,
            client_frame: 244,
            input_per_frame: vec![1, 2, 4, 8],
            checksum_per_frame: vec![0xAAAA, 0xBBBB],
        },
        ClientMessage::PlayerInputAck {
            ack_frame: vec![243, 240],
            server_message_sequence: 5120,
        },
    ];

    for msg in messages {
        let bytes = serialize_client_message(33, &msg);
        let parsed = parse_client_message(&bytes).unwrap();
        assert_eq!(parsed.message, msg);
    }
}

/// Random-ish byte soup round-trips through the compressor at any length up
/// to the packet ceiling.
#[test]
fn compression_round_trip_various_lengths() {
    for len in [1usize, 7, 8, 9, 63, 64, 65, 511, 1024] {
        let input: Vec<u8> = (0..len).map(|i| ((i * 37 + 11) % 256) as u8).collect();
        // Keep enough zeros that the output stays under the ceiling.
        let input: Vec<u8> = input
            .into_iter()
            .enumerate()
            .map(|(i, b)| if i % 4 == 0 { 0 } else { b })
            .collect();
        let compressed = compress(&input).unwrap();
        let restored = decompress(&compressed, len).unwrap();
        assert_eq!(restored, input, "length {len}");
    }
}
