//! Typed client and server messages.
//!
//! Each direction is a tagged union over a closed set of payload shapes; the
//! tag doubles as the leading wire byte. Field order here mirrors the wire
//! layout in [`crate::codec`].

/// Fixed per-slot configuration words broadcast in `PlayersConfigurationData`,
/// indexed modulo the table size. Preserved for bit-compatibility with the
/// deployed clients.
pub const PLAYER_CONFIG_VALUES: [u16; 4] = [0, 257, 512, 769];

/// Messages a client may send to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Handshake carrying the match identity this endpoint wants to join.
    /// The string fields travel as null-padded fixed-length buffers.
    NewConnection {
        version: u16,
        team_id: u16,
        player_index: u16,
        match_id: String,
        key: String,
        environment_id: String,
    },

    /// A run of frame inputs starting at `start_frame`, plus the frame the
    /// client is currently simulating and any per-frame state checksums.
    Input {
        start_frame: u32,
        client_frame: u32,
        input_per_frame: Vec<u32>,
        checksum_per_frame: Vec<u32>,
    },

    /// Acknowledges the highest broadcast frame received per player, and
    /// echoes the server sequence number that triggered it (the RTT probe).
    PlayerInputAck {
        ack_frame: Vec<u32>,
        server_message_sequence: u32,
    },

    /// Final result report; the first arrival ends the match.
    MatchResult {
        num_players: u8,
        last_frame_checksum: u32,
        winning_team_index: u8,
    },

    /// Bare echo of a `RequestQualityData` probe.
    QualityData { server_message_sequence: u32 },

    /// The client is leaving.
    Disconnecting { reason: u8 },

    /// Confirms receipt of a `PlayerDisconnected` broadcast for slot `index`.
    PlayerDisconnectedAck { index: u8 },

    /// Ready-gate vote; `ready != 0` counts as ready.
    ReadyToStartMatch { ready: u8 },
}

impl ClientMessage {
    pub const TYPE_NEW_CONNECTION: u8 = 1;
    pub const TYPE_INPUT: u8 = 2;
    pub const TYPE_PLAYER_INPUT_ACK: u8 = 3;
    pub const TYPE_MATCH_RESULT: u8 = 4;
    pub const TYPE_QUALITY_DATA: u8 = 5;
    pub const TYPE_DISCONNECTING: u8 = 6;
    pub const TYPE_PLAYER_DISCONNECTED_ACK: u8 = 7;
    pub const TYPE_READY_TO_START_MATCH: u8 = 8;

    /// Wire tag for this message.
    pub fn type_byte(&self) -> u8 {
        match self {
            ClientMessage::NewConnection { .. } => Self::TYPE_NEW_CONNECTION,
            ClientMessage::Input { .. } => Self::TYPE_INPUT,
            ClientMessage::PlayerInputAck { .. } => Self::TYPE_PLAYER_INPUT_ACK,
            ClientMessage::MatchResult { .. } => Self::TYPE_MATCH_RESULT,
            ClientMessage::QualityData { .. } => Self::TYPE_QUALITY_DATA,
            ClientMessage::Disconnecting { .. } => Self::TYPE_DISCONNECTING,
            ClientMessage::PlayerDisconnectedAck { .. } => Self::TYPE_PLAYER_DISCONNECTED_ACK,
            ClientMessage::ReadyToStartMatch { .. } => Self::TYPE_READY_TO_START_MATCH,
        }
    }
}

/// One recipient-specific rollback broadcast: for every player slot, the
/// window of frame inputs the recipient has not acknowledged yet.
///
/// The per-slot vectors are always sized to the match's `max_players`; absent
/// players occupy zeroed slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerInputBroadcast {
    pub num_players: u8,
    pub start_frame: Vec<u32>,
    pub num_frames: Vec<u8>,
    pub num_predicted: u16,
    pub num_zeroed: u16,
    pub ping: i16,
    pub loss_pct: i16,
    pub rift: f32,
    pub checksum_ack: u32,
    pub input_per_frame: Vec<Vec<u32>>,
}

/// Messages the relay may send to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake outcome. `reserved` is emitted as zero by every deployed
    /// server build and kept for layout compatibility.
    NewConnectionReply {
        success: u8,
        match_num_players: u8,
        player_index: u8,
        match_duration_in_frames: u32,
        reserved: u8,
        debug_mode: u8,
    },

    /// All players are ready; simulation starts now.
    StartGame,

    /// Confirms intake of client inputs up to `ack_frame`.
    InputAck { ack_frame: u32 },

    /// The rollback window broadcast. The only compressed message on the wire.
    PlayerInput(PlayerInputBroadcast),

    /// RTT probe; the echo of its header sequence closes the measurement.
    RequestQualityData { ping: i16, loss_pct: i16 },

    /// Smoothed ping per player slot, sent once the ping phase completes.
    PlayersStatus { average_ping: Vec<i16> },

    /// Forcible removal with a reason code.
    Kick { reason: u16, param1: u32 },

    /// Confirms intake of state checksums up to `ack_frame`.
    ChecksumAck { ack_frame: u32 },

    /// Per-slot configuration words from [`PLAYER_CONFIG_VALUES`].
    PlayersConfigurationData { config_values: Vec<u16> },

    /// A peer left; remaining clients hand the slot to AI at the given frame
    /// and acknowledge with `array_index`.
    PlayerDisconnected {
        player_index: u8,
        should_ai_take_control: u8,
        ai_take_control_frame: u32,
        array_index: u16,
    },

    /// Directs the client to resend traffic to a different port.
    ChangePort { port: u16 },
}

impl ServerMessage {
    pub const TYPE_NEW_CONNECTION_REPLY: u8 = 1;
    pub const TYPE_START_GAME: u8 = 2;
    pub const TYPE_INPUT_ACK: u8 = 3;
    pub const TYPE_PLAYER_INPUT: u8 = 4;
    pub const TYPE_REQUEST_QUALITY_DATA: u8 = 6;
    pub const TYPE_PLAYERS_STATUS: u8 = 7;
    pub const TYPE_KICK: u8 = 8;
    pub const TYPE_CHECKSUM_ACK: u8 = 9;
    pub const TYPE_PLAYERS_CONFIGURATION_DATA: u8 = 10;
    pub const TYPE_PLAYER_DISCONNECTED: u8 = 11;
    pub const TYPE_CHANGE_PORT: u8 = 12;

    /// Wire tag for this message.
    pub fn type_byte(&self) -> u8 {
        match self {
            ServerMessage::NewConnectionReply { .. } => Self::TYPE_NEW_CONNECTION_REPLY,
            ServerMessage::StartGame => Self::TYPE_START_GAME,
            ServerMessage::InputAck { .. } => Self::TYPE_INPUT_ACK,
            ServerMessage::PlayerInput(_) => Self::TYPE_PLAYER_INPUT,
            ServerMessage::RequestQualityData { .. } => Self::TYPE_REQUEST_QUALITY_DATA,
            ServerMessage::PlayersStatus { .. } => Self::TYPE_PLAYERS_STATUS,
            ServerMessage::Kick { .. } => Self::TYPE_KICK,
            ServerMessage::ChecksumAck { .. } => Self::TYPE_CHECKSUM_ACK,
            ServerMessage::PlayersConfigurationData { .. } => {
                Self::TYPE_PLAYERS_CONFIGURATION_DATA
            }
            ServerMessage::PlayerDisconnected { .. } => Self::TYPE_PLAYER_DISCONNECTED,
            ServerMessage::ChangePort { .. } => Self::TYPE_CHANGE_PORT,
        }
    }

    /// Only rollback broadcasts go through the zero-suppression codec; the
    /// type byte alone identifies the compression policy on the wire.
    pub fn is_compressed(&self) -> bool {
        matches!(self, ServerMessage::PlayerInput(_))
    }
}

/// Encodes a rift estimate (frames) into the wire's hundredths-of-a-frame
/// `i16`, rounding half to even and saturating at the type bounds.
pub fn encode_rift(rift: f32) -> i16 {
    let scaled = (rift * 100.0).round_ties_even();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Inverse of [`encode_rift`], up to the 0.01-frame quantization.
pub fn decode_rift(raw: i16) -> f32 {
    raw as f32 / 100.0
}
