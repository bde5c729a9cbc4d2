//! Fixed little-endian wire codec for client and server messages.
//!
//! Layout is position-based with no field tags: a one-byte message type, a
//! `u32` sequence, then the payload fields in declaration order. Both
//! directions are implemented so test harnesses can speak the protocol as a
//! client.
//!
//! The parsers are total. Every read is bounds-checked against the provided
//! buffer and an underrun yields [`CodecError::Truncated`]; nothing here
//! panics on hostile input.

use crate::error::CodecError;
use crate::messages::{
    encode_rift, ClientMessage, PlayerInputBroadcast, ServerMessage, PLAYER_CONFIG_VALUES,
};
use crate::{ENVIRONMENT_ID_LEN, MATCH_ID_LEN, MATCH_KEY_LEN};

/// Bytes of the shared header: `type:u8, sequence:u32`.
pub const HEADER_SIZE: usize = 5;

/// A parsed client datagram: header sequence plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientDatagram {
    pub sequence: u32,
    pub message: ClientMessage,
}

/// A parsed server datagram: header sequence plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDatagram {
    pub sequence: u32,
    pub message: ServerMessage,
}

/// Bounds-checked little-endian cursor over a received buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_i16(&mut self) -> Result<i16, CodecError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a null-padded fixed-length string field.
    fn read_padded_string(&mut self, len: usize) -> Result<String, CodecError> {
        let raw = self.take(len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_i16(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Writes a string truncated to `len` bytes and zero-padded to exactly `len`.
fn write_padded_string(out: &mut Vec<u8>, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let copy = bytes.len().min(len);
    out.extend_from_slice(&bytes[..copy]);
    out.resize(out.len() + (len - copy), 0);
}

/// Parses a raw datagram body into a typed client message.
pub fn parse_client_message(buf: &[u8]) -> Result<ClientDatagram, CodecError> {
    let mut r = Reader::new(buf);
    let type_byte = r.read_u8()?;
    let sequence = r.read_u32()?;

    let message = match type_byte {
        ClientMessage::TYPE_NEW_CONNECTION => ClientMessage::NewConnection {
            version: r.read_u16()?,
            team_id: r.read_u16()?,
            player_index: r.read_u16()?,
            match_id: r.read_padded_string(MATCH_ID_LEN)?,
            key: r.read_padded_string(MATCH_KEY_LEN)?,
            environment_id: r.read_padded_string(ENVIRONMENT_ID_LEN)?,
        },
        ClientMessage::TYPE_INPUT => {
            let start_frame = r.read_u32()?;
            let client_frame = r.read_u32()?;
            let num_frames = r.read_u8()?;
            let num_checksums = r.read_u8()?;
            let mut input_per_frame = Vec::with_capacity(num_frames as usize);
            for _ in 0..num_frames {
                input_per_frame.push(r.read_u32()?);
            }
            let mut checksum_per_frame = Vec::with_capacity(num_checksums as usize);
            for _ in 0..num_checksums {
                checksum_per_frame.push(r.read_u32()?);
            }
            ClientMessage::Input {
                start_frame,
                client_frame,
                input_per_frame,
                checksum_per_frame,
            }
        }
        ClientMessage::TYPE_PLAYER_INPUT_ACK => {
            let num_players = r.read_u8()?;
            let mut ack_frame = Vec::with_capacity(num_players as usize);
            for _ in 0..num_players {
                ack_frame.push(r.read_u32()?);
            }
            ClientMessage::PlayerInputAck {
                ack_frame,
                server_message_sequence: r.read_u32()?,
            }
        }
        ClientMessage::TYPE_MATCH_RESULT => ClientMessage::MatchResult {
            num_players: r.read_u8()?,
            last_frame_checksum: r.read_u32()?,
            winning_team_index: r.read_u8()?,
        },
        ClientMessage::TYPE_QUALITY_DATA => ClientMessage::QualityData {
            server_message_sequence: r.read_u32()?,
        },
        ClientMessage::TYPE_DISCONNECTING => ClientMessage::Disconnecting {
            reason: r.read_u8()?,
        },
        ClientMessage::TYPE_PLAYER_DISCONNECTED_ACK => ClientMessage::PlayerDisconnectedAck {
            index: r.read_u8()?,
        },
        ClientMessage::TYPE_READY_TO_START_MATCH => ClientMessage::ReadyToStartMatch {
            ready: r.read_u8()?,
        },
        other => return Err(CodecError::UnknownType(other)),
    };

    Ok(ClientDatagram { sequence, message })
}

/// Serializes a client message with the given header sequence.
pub fn serialize_client_message(sequence: u32, message: &ClientMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + 16);
    out.push(message.type_byte());
    write_u32(&mut out, sequence);

    match message {
        ClientMessage::NewConnection {
            version,
            team_id,
            player_index,
            match_id,
            key,
            environment_id,
        } => {
            write_u16(&mut out, *version);
            write_u16(&mut out, *team_id);
            write_u16(&mut out, *player_index);
            write_padded_string(&mut out, match_id, MATCH_ID_LEN);
            write_padded_string(&mut out, key, MATCH_KEY_LEN);
            write_padded_string(&mut out, environment_id, ENVIRONMENT_ID_LEN);
        }
        ClientMessage::Input {
            start_frame,
            client_frame,
            input_per_frame,
            checksum_per_frame,
        } => {
            write_u32(&mut out, *start_frame);
            write_u32(&mut out, *client_frame);
            out.push(input_per_frame.len() as u8);
            out.push(checksum_per_frame.len() as u8);
            for v in input_per_frame {
                write_u32(&mut out, *v);
            }
            for v in checksum_per_frame {
                write_u32(&mut out, *v);
            }
        }
        ClientMessage::PlayerInputAck {
            ack_frame,
            server_message_sequence,
        } => {
            out.push(ack_frame.len() as u8);
            for v in ack_frame {
                write_u32(&mut out, *v);
            }
            write_u32(&mut out, *server_message_sequence);
        }
        ClientMessage::MatchResult {
            num_players,
            last_frame_checksum,
            winning_team_index,
        } => {
            out.push(*num_players);
            write_u32(&mut out, *last_frame_checksum);
            out.push(*winning_team_index);
        }
        ClientMessage::QualityData {
            server_message_sequence,
        } => {
            write_u32(&mut out, *server_message_sequence);
        }
        ClientMessage::Disconnecting { reason } => out.push(*reason),
        ClientMessage::PlayerDisconnectedAck { index } => out.push(*index),
        ClientMessage::ReadyToStartMatch { ready } => out.push(*ready),
    }

    out
}

/// Serializes a server message with the given header sequence.
///
/// `max_players` sizes the per-slot arrays of `PlayerInput`,
/// `PlayersStatus`, and `PlayersConfigurationData`; short source vectors are
/// padded with zeros, as the deployed clients expect.
pub fn serialize_server_message(
    sequence: u32,
    message: &ServerMessage,
    max_players: usize,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + 16);
    out.push(message.type_byte());
    write_u32(&mut out, sequence);

    match message {
        ServerMessage::NewConnectionReply {
            success,
            match_num_players,
            player_index,
            match_duration_in_frames,
            reserved: _,
            debug_mode,
        } => {
            out.push(*success);
            out.push(*match_num_players);
            out.push(*player_index);
            write_u32(&mut out, *match_duration_in_frames);
            out.push(0); // reserved, always zero on the wire
            out.push(*debug_mode);
        }
        ServerMessage::StartGame => {}
        ServerMessage::InputAck { ack_frame } => write_u32(&mut out, *ack_frame),
        ServerMessage::PlayerInput(b) => {
            out.push(b.num_players);
            for i in 0..max_players {
                write_u32(&mut out, b.start_frame.get(i).copied().unwrap_or(0));
            }
            for i in 0..max_players {
                out.push(b.num_frames.get(i).copied().unwrap_or(0));
            }
            write_u16(&mut out, b.num_predicted);
            write_u16(&mut out, b.num_zeroed);
            write_i16(&mut out, b.ping);
            write_i16(&mut out, b.loss_pct);
            write_i16(&mut out, encode_rift(b.rift));
            write_u32(&mut out, b.checksum_ack);
            for i in 0..max_players {
                let frames = b.num_frames.get(i).copied().unwrap_or(0) as usize;
                for f in 0..frames {
                    let v = b
                        .input_per_frame
                        .get(i)
                        .and_then(|inputs| inputs.get(f))
                        .copied()
                        .unwrap_or(0);
                    write_u32(&mut out, v);
                }
            }
        }
        ServerMessage::RequestQualityData { ping, loss_pct } => {
            write_i16(&mut out, *ping);
            write_i16(&mut out, *loss_pct);
        }
        ServerMessage::PlayersStatus { average_ping } => {
            out.push(max_players as u8);
            for i in 0..max_players {
                write_i16(&mut out, average_ping.get(i).copied().unwrap_or(0));
            }
        }
        ServerMessage::Kick { reason, param1 } => {
            write_u16(&mut out, *reason);
            write_u32(&mut out, *param1);
        }
        ServerMessage::ChecksumAck { ack_frame } => write_u32(&mut out, *ack_frame),
        ServerMessage::PlayersConfigurationData { config_values } => {
            out.push(max_players as u8);
            for i in 0..max_players {
                let v = config_values
                    .get(i)
                    .copied()
                    .unwrap_or(PLAYER_CONFIG_VALUES[i % PLAYER_CONFIG_VALUES.len()]);
                write_u16(&mut out, v);
            }
        }
        ServerMessage::PlayerDisconnected {
            player_index,
            should_ai_take_control,
            ai_take_control_frame,
            array_index,
        } => {
            out.push(*player_index);
            out.push(*should_ai_take_control);
            write_u32(&mut out, *ai_take_control_frame);
            write_u16(&mut out, *array_index);
        }
        ServerMessage::ChangePort { port } => write_u16(&mut out, *port),
    }

    out
}

/// Parses a raw (already decompressed) datagram body into a typed server
/// message. `max_players` sizes the fixed per-slot arrays.
pub fn parse_server_message(buf: &[u8], max_players: usize) -> Result<ServerDatagram, CodecError> {
    let mut r = Reader::new(buf);
    let type_byte = r.read_u8()?;
    let sequence = r.read_u32()?;

    let message = match type_byte {
        ServerMessage::TYPE_NEW_CONNECTION_REPLY => ServerMessage::NewConnectionReply {
            success: r.read_u8()?,
            match_num_players: r.read_u8()?,
            player_index: r.read_u8()?,
            match_duration_in_frames: r.read_u32()?,
            reserved: r.read_u8()?,
            debug_mode: r.read_u8()?,
        },
        ServerMessage::TYPE_START_GAME => ServerMessage::StartGame,
        ServerMessage::TYPE_INPUT_ACK => ServerMessage::InputAck {
            ack_frame: r.read_u32()?,
        },
        ServerMessage::TYPE_PLAYER_INPUT => {
            let num_players = r.read_u8()?;
            let mut start_frame = Vec::with_capacity(max_players);
            for _ in 0..max_players {
                start_frame.push(r.read_u32()?);
            }
            let mut num_frames = Vec::with_capacity(max_players);
            for _ in 0..max_players {
                num_frames.push(r.read_u8()?);
            }
            let num_predicted = r.read_u16()?;
            let num_zeroed = r.read_u16()?;
            let ping = r.read_i16()?;
            let loss_pct = r.read_i16()?;
            let rift = crate::messages::decode_rift(r.read_i16()?);
            let checksum_ack = r.read_u32()?;
            let mut input_per_frame = Vec::with_capacity(max_players);
            for &frames in &num_frames {
                let mut inputs = Vec::with_capacity(frames as usize);
                for _ in 0..frames {
                    inputs.push(r.read_u32()?);
                }
                input_per_frame.push(inputs);
            }
            ServerMessage::PlayerInput(PlayerInputBroadcast {
                num_players,
                start_frame,
                num_frames,
                num_predicted,
                num_zeroed,
                ping,
                loss_pct,
                rift,
                checksum_ack,
                input_per_frame,
            })
        }
        ServerMessage::TYPE_REQUEST_QUALITY_DATA => ServerMessage::RequestQualityData {
            ping: r.read_i16()?,
            loss_pct: r.read_i16()?,
        },
        ServerMessage::TYPE_PLAYERS_STATUS => {
            let _num_players = r.read_u8()?;
            let mut average_ping = Vec::with_capacity(max_players);
            for _ in 0..max_players {
                average_ping.push(r.read_i16()?);
            }
            ServerMessage::PlayersStatus { average_ping }
        }
        ServerMessage::TYPE_KICK => ServerMessage::Kick {
            reason: r.read_u16()?,
            param1: r.read_u32()?,
        },
        ServerMessage::TYPE_CHECKSUM_ACK => ServerMessage::ChecksumAck {
            ack_frame: r.read_u32()?,
        },
        ServerMessage::TYPE_PLAYERS_CONFIGURATION_DATA => {
            let _num_players = r.read_u8()?;
            let mut config_values = Vec::with_capacity(max_players);
            for _ in 0..max_players {
                config_values.push(r.read_u16()?);
            }
            ServerMessage::PlayersConfigurationData { config_values }
        }
        ServerMessage::TYPE_PLAYER_DISCONNECTED => ServerMessage::PlayerDisconnected {
            player_index: r.read_u8()?,
            should_ai_take_control: r.read_u8()?,
            ai_take_control_frame: r.read_u32()?,
            array_index: r.read_u16()?,
        },
        ServerMessage::TYPE_CHANGE_PORT => ServerMessage::ChangePort {
            port: r.read_u16()?,
        },
        other => return Err(CodecError::UnknownType(other)),
    };

    Ok(ServerDatagram { sequence, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_wire_size() {
        // 5 header + 2 + 2 + 2 + 25 + 45 + 25 = 106
        let msg = ClientMessage::NewConnection {
            version: 1,
            team_id: 0,
            player_index: 0,
            match_id: "m1".to_string(),
            key: "k".to_string(),
            environment_id: "dev".to_string(),
        };
        let bytes = serialize_client_message(7, &msg);
        assert_eq!(bytes.len(), 106);

        let parsed = parse_client_message(&bytes).unwrap();
        assert_eq!(parsed.sequence, 7);
        assert_eq!(parsed.message, msg);
    }

    #[test]
    fn test_client_messages_reparse_equal() {
        let messages = vec![
            ClientMessage::Input {
                start_frame: 10,
                client_frame: 14,
                input_per_frame: vec![0x11, 0, 0x33],
                checksum_per_frame: vec![0xDEAD_BEEF],
            },
            ClientMessage::PlayerInputAck {
                ack_frame: vec![42, 40],
                server_message_sequence: 900,
            },
            ClientMessage::MatchResult {
                num_players: 2,
                last_frame_checksum: 0xCAFE,
                winning_team_index: 1,
            },
            ClientMessage::QualityData {
                server_message_sequence: 55,
            },
            ClientMessage::Disconnecting { reason: 3 },
            ClientMessage::PlayerDisconnectedAck { index: 1 },
            ClientMessage::ReadyToStartMatch { ready: 1 },
        ];

        for (i, msg) in messages.into_iter().enumerate() {
            let bytes = serialize_client_message(i as u32 + 1, &msg);
            let parsed = parse_client_message(&bytes).unwrap();
            assert_eq!(parsed.sequence, i as u32 + 1);
            assert_eq!(parsed.message, msg);
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let buf = [200u8, 0, 0, 0, 0];
        assert_eq!(parse_client_message(&buf), Err(CodecError::UnknownType(200)));
        assert_eq!(
            parse_server_message(&buf, 2),
            Err(CodecError::UnknownType(200))
        );
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert_eq!(parse_client_message(&[2, 0, 0]), Err(CodecError::Truncated));

        // Input header claims three frames but carries none.
        let mut buf = vec![ClientMessage::TYPE_INPUT];
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.push(3);
        buf.push(0);
        assert_eq!(parse_client_message(&buf), Err(CodecError::Truncated));
    }

    #[test]
    fn test_player_input_body_length_formula() {
        let max_players = 2;
        let broadcast = PlayerInputBroadcast {
            num_players: 2,
            start_frame: vec![5, 9],
            num_frames: vec![3, 1],
            num_predicted: 1,
            num_zeroed: 0,
            ping: 32,
            loss_pct: 0,
            rift: -1.5,
            checksum_ack: 4,
            input_per_frame: vec![vec![7, 8, 9], vec![100]],
        };
        let total_frames: usize = broadcast.num_frames.iter().map(|&n| n as usize).sum();
        let bytes = serialize_server_message(1, &ServerMessage::PlayerInput(broadcast), max_players);

        let body_len = bytes.len() - HEADER_SIZE;
        assert_eq!(
            body_len,
            1 + 4 * max_players + max_players + 2 + 2 + 2 + 2 + 2 + 4 + 4 * total_frames
        );
    }

    #[test]
    fn test_player_input_round_trip() {
        let broadcast = PlayerInputBroadcast {
            num_players: 2,
            start_frame: vec![1, 31],
            num_frames: vec![2, 2],
            num_predicted: 0,
            num_zeroed: 2,
            ping: 48,
            loss_pct: 0,
            rift: 2.25,
            checksum_ack: 30,
            input_per_frame: vec![vec![4, 5], vec![0, 0]],
        };
        let msg = ServerMessage::PlayerInput(broadcast.clone());
        let bytes = serialize_server_message(17, &msg, 2);
        let parsed = parse_server_message(&bytes, 2).unwrap();

        assert_eq!(parsed.sequence, 17);
        let ServerMessage::PlayerInput(got) = parsed.message else {
            panic!("expected PlayerInput");
        };
        assert_eq!(got.start_frame, broadcast.start_frame);
        assert_eq!(got.num_frames, broadcast.num_frames);
        assert_eq!(got.input_per_frame, broadcast.input_per_frame);
        assert_eq!(got.checksum_ack, broadcast.checksum_ack);
        assert!((got.rift - broadcast.rift).abs() < 0.01);
    }

    #[test]
    fn test_player_input_pads_missing_slots() {
        // Four configured slots, only two populated: the rest serialize as
        // zeroed start frames and empty windows.
        let broadcast = PlayerInputBroadcast {
            num_players: 2,
            start_frame: vec![5, 9],
            num_frames: vec![1, 1],
            input_per_frame: vec![vec![11], vec![22]],
            ..Default::default()
        };
        let bytes = serialize_server_message(1, &ServerMessage::PlayerInput(broadcast), 4);
        let parsed = parse_server_message(&bytes, 4).unwrap();

        let ServerMessage::PlayerInput(got) = parsed.message else {
            panic!("expected PlayerInput");
        };
        assert_eq!(got.start_frame, vec![5, 9, 0, 0]);
        assert_eq!(got.num_frames, vec![1, 1, 0, 0]);
        assert_eq!(got.input_per_frame[2], Vec::<u32>::new());
    }

    #[test]
    fn test_players_configuration_table_modulo() {
        let msg = ServerMessage::PlayersConfigurationData {
            config_values: Vec::new(),
        };
        let bytes = serialize_server_message(3, &msg, 6);
        let parsed = parse_server_message(&bytes, 6).unwrap();

        let ServerMessage::PlayersConfigurationData { config_values } = parsed.message else {
            panic!("expected PlayersConfigurationData");
        };
        assert_eq!(config_values, vec![0, 257, 512, 769, 0, 257]);
    }

    #[test]
    fn test_new_connection_reply_reserved_byte_is_zero() {
        let msg = ServerMessage::NewConnectionReply {
            success: 1,
            match_num_players: 2,
            player_index: 0,
            match_duration_in_frames: 36000,
            reserved: 0xFF, // ignored on the wire
            debug_mode: 0,
        };
        let bytes = serialize_server_message(1, &msg, 2);
        assert_eq!(bytes[HEADER_SIZE + 7], 0);
    }

    #[test]
    fn test_server_control_messages_round_trip() {
        let messages = vec![
            ServerMessage::StartGame,
            ServerMessage::InputAck { ack_frame: 12 },
            ServerMessage::ChecksumAck { ack_frame: 9 },
            ServerMessage::RequestQualityData { ping: 31, loss_pct: 0 },
            ServerMessage::Kick { reason: 2, param1: 77 },
            ServerMessage::PlayerDisconnected {
                player_index: 1,
                should_ai_take_control: 1,
                ai_take_control_frame: 440,
                array_index: 1,
            },
            ServerMessage::ChangePort { port: 41235 },
        ];

        for msg in messages {
            let bytes = serialize_server_message(5, &msg, 2);
            let parsed = parse_server_message(&bytes, 2).unwrap();
            assert_eq!(parsed.message, msg);
        }
    }
}
