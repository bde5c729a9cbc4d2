//! UDP front end: datagram dispatch, the connection handshake, the ping
//! phase, and match lifecycle transitions.
//!
//! One task reads the socket and fans each datagram out to a handler task.
//! Every handler is total: a malformed or misaddressed packet is logged,
//! counted, and dropped without touching match state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use shared::codec::{parse_client_message, serialize_server_message};
use shared::compression::compress;
use shared::messages::{ClientMessage, ServerMessage};
use shared::{GAME_SERVER_PORT, MAX_PACKET_SIZE};
use tokio::net::UdpSocket;
use tokio::time::sleep;

use crate::config::MatchConfigProvider;
use crate::error::ServerError;
use crate::game_match::{MatchPhase, MatchState, DEFAULT_PING_PHASE_TOTAL};
use crate::player::PlayerInfo;
use crate::registry::{endpoint_key, Registries};
use crate::tick;

/// Tunables for one relay instance.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address the UDP socket binds to.
    pub bind_addr: String,
    /// Upper bound a match configuration may request for its player count.
    pub max_players_cap: usize,
    /// `RequestQualityData` bursts per ping phase.
    pub ping_phase_total: u32,
    /// Cadence of those bursts.
    pub ping_interval: Duration,
    /// Players silent for this long are treated as disconnected.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", GAME_SERVER_PORT),
            max_players_cap: 2,
            ping_phase_total: DEFAULT_PING_PHASE_TOTAL,
            ping_interval: Duration::from_millis(16),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Drop counters, reported at shutdown.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub dropped_datagrams: AtomicU64,
    pub send_failures: AtomicU64,
}

/// The authoritative relay: one UDP socket shared by every match.
pub struct RelayServer<P> {
    socket: Arc<UdpSocket>,
    pub registries: Registries,
    pub(crate) provider: P,
    pub(crate) config: ServerConfig,
    pub stats: RelayStats,
}

impl<P: MatchConfigProvider> RelayServer<P> {
    /// Binds the UDP socket. Bind failure is the one fatal startup error.
    pub async fn bind(config: ServerConfig, provider: P) -> Result<Arc<Self>, ServerError> {
        let socket = UdpSocket::bind(&config.bind_addr).await?;
        info!("Relay listening on {}", socket.local_addr()?);

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            registries: Registries::new(),
            provider,
            config,
            stats: RelayStats::default(),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receives datagrams until the socket fails terminally. Each datagram is
    /// handled on its own task so a slow config fetch never blocks intake.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut buf = [0u8; 2048];

        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            if len > MAX_PACKET_SIZE {
                self.stats.dropped_datagrams.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let data = buf[..len].to_vec();
            let server = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_datagram(&data, addr).await {
                    server.stats.dropped_datagrams.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropped datagram from {}: {}", addr, e);
                }
            });
        }
    }

    /// Parses and dispatches one datagram.
    async fn handle_datagram(
        self: &Arc<Self>,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let datagram = parse_client_message(data)?;
        let sequence = datagram.sequence;

        if let ClientMessage::NewConnection {
            version,
            player_index,
            match_id,
            key,
            ..
        } = &datagram.message
        {
            return self
                .handle_new_connection(addr, *version, *player_index, match_id, key)
                .await;
        }

        let endpoint = endpoint_key(&addr);
        let Some(player) = self.registries.players.find(&endpoint) else {
            debug!("Datagram from unknown endpoint {}", addr);
            self.stats.dropped_datagrams.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };
        let Some(game_match) = self.registries.matches.find(&player.match_id) else {
            return Ok(());
        };

        // Replays and reordered datagrams lose to the sequence watermark.
        {
            let mut s = player.state_mut();
            if sequence <= s.last_seq_recv {
                return Ok(());
            }
            s.last_seq_recv = sequence;
        }

        match datagram.message {
            ClientMessage::Input {
                start_frame,
                client_frame,
                input_per_frame,
                checksum_per_frame,
            } => {
                self.handle_input(
                    &game_match,
                    &player,
                    start_frame,
                    client_frame,
                    &input_per_frame,
                    &checksum_per_frame,
                )
                .await;
            }
            ClientMessage::PlayerInputAck {
                ack_frame,
                server_message_sequence,
            } => {
                player.merge_acked_frames(&ack_frame);
                player.record_ping_sample(server_message_sequence);
            }
            ClientMessage::QualityData {
                server_message_sequence,
            } => {
                player.record_ping_sample(server_message_sequence);
            }
            ClientMessage::ReadyToStartMatch { ready } => {
                self.handle_ready(&game_match, &player, ready != 0).await;
            }
            ClientMessage::MatchResult {
                winning_team_index, ..
            } => {
                info!(
                    "Match {} reported finished by player {} (winning team {})",
                    game_match.match_id, player.player_index, winning_team_index
                );
                self.finish_match(&game_match).await;
            }
            ClientMessage::Disconnecting { reason } => {
                info!(
                    "Player {} leaving match {} (reason {})",
                    player.player_index, game_match.match_id, reason
                );
                player.state_mut().disconnected = true;
                self.announce_disconnect(&game_match, &player).await;
            }
            ClientMessage::PlayerDisconnectedAck { index } => {
                self.handle_disconnected_ack(&game_match, &player, index as usize);
            }
            ClientMessage::NewConnection { .. } => unreachable!("handled above"),
        }

        Ok(())
    }

    /// Admits a connecting endpoint: resolves the match (fetching its
    /// configuration on first sight), creates the player entry, and starts
    /// the ping phase once the roster is full.
    async fn handle_new_connection(
        self: &Arc<Self>,
        addr: SocketAddr,
        version: u16,
        player_index: u16,
        match_id: &str,
        key: &str,
    ) -> Result<(), ServerError> {
        let endpoint = endpoint_key(&addr);
        debug!(
            "NewConnection v{} from {} for match {} (slot {})",
            version, addr, match_id, player_index
        );

        let game_match = match self.registries.matches.find(&match_id.to_string()) {
            Some(existing) => existing,
            None => {
                let Some(config) = self.provider.fetch_match_config(match_id, key).await else {
                    warn!("Config fetch failed for match {}", match_id);
                    self.send_handshake_failure(addr).await;
                    return Err(ServerError::ConfigFetch(match_id.to_string()));
                };

                let max_players = config.max_players as usize;
                if max_players == 0
                    || max_players > self.config.max_players_cap
                    || config.players.is_empty()
                {
                    warn!(
                        "Rejecting match {}: {} players configured (cap {})",
                        match_id, max_players, self.config.max_players_cap
                    );
                    self.send_handshake_failure(addr).await;
                    return Ok(());
                }

                info!(
                    "New match {} ({} players, {} frames)",
                    match_id, max_players, config.match_duration
                );
                let created = Arc::new(MatchState::new(
                    match_id.to_string(),
                    key.to_string(),
                    max_players,
                    config.match_duration,
                    self.config.ping_phase_total,
                ));
                // A racing handshake for the same match may have won while
                // the config fetch was in flight.
                self.registries
                    .matches
                    .find_or_insert(match_id.to_string(), created)
            }
        };

        if player_index as usize >= game_match.max_players {
            warn!(
                "Rejecting slot {} for match {}: only {} slots",
                player_index, match_id, game_match.max_players
            );
            self.send_handshake_failure(addr).await;
            return Ok(());
        }

        let player = match self.registries.players.find(&endpoint) {
            Some(existing) => existing,
            None => {
                if game_match.players.len() >= game_match.max_players {
                    warn!("Match {} is full, rejecting {}", match_id, addr);
                    self.send_handshake_failure(addr).await;
                    return Ok(());
                }
                let created = Arc::new(PlayerInfo::new(
                    addr,
                    match_id.to_string(),
                    player_index as usize,
                    game_match.max_players,
                ));
                game_match
                    .players
                    .insert_or_assign(endpoint.clone(), Arc::clone(&created));
                self.registries
                    .players
                    .insert_or_assign(endpoint, Arc::clone(&created));
                info!("Player {} joined match {}", player_index, match_id);
                created
            }
        };

        let reply = ServerMessage::NewConnectionReply {
            success: 1,
            match_num_players: game_match.max_players as u8,
            player_index: player.player_index as u8,
            match_duration_in_frames: game_match.duration_in_frames,
            reserved: 0,
            debug_mode: 0,
        };
        self.send_server_message(&game_match, &player, &reply).await;

        if game_match.players.len() == game_match.max_players
            && game_match.phase() == MatchPhase::Handshaking
        {
            game_match.set_phase(MatchPhase::PingPhase);
            self.spawn_ping_phase(&game_match);
        }

        Ok(())
    }

    /// Failed handshakes get a bare `success=0` reply; no state exists yet,
    /// so the header sequence is zero.
    async fn send_handshake_failure(&self, addr: SocketAddr) {
        let reply = ServerMessage::NewConnectionReply {
            success: 0,
            match_num_players: 0,
            player_index: 0,
            match_duration_in_frames: 0,
            reserved: 0,
            debug_mode: 0,
        };
        let bytes = serialize_server_message(0, &reply, 0);
        if let Err(e) = self.socket.send_to(&bytes, addr).await {
            self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to send handshake rejection to {}: {}", addr, e);
        }
    }

    /// Runs the ping phase as its own task: a fixed count of
    /// `RequestQualityData` bursts, then the configuration and status
    /// messages, then the ready gate.
    fn spawn_ping_phase(self: &Arc<Self>, game_match: &Arc<MatchState>) {
        info!("Starting ping phase for match {}", game_match.match_id);
        let server = Arc::clone(self);
        let game_match = Arc::clone(game_match);

        tokio::spawn(async move {
            let total = game_match.ping_phase_total;
            for _ in 0..total {
                if game_match.is_ended() {
                    return;
                }
                server.broadcast_request_quality(&game_match).await;
                game_match.runtime_mut().ping_phase_count += 1;
                sleep(server.config.ping_interval).await;
            }
            server.finish_ping_phase(&game_match).await;
        });
    }

    /// One `RequestQualityData` burst: every connected player gets a probe
    /// whose sequence is remembered for the RTT match on the way back.
    async fn broadcast_request_quality(&self, game_match: &MatchState) {
        for (_, player) in game_match.players.snapshot() {
            if player.is_disconnected() {
                continue;
            }
            let probe = ServerMessage::RequestQualityData {
                ping: player.ping_for_wire(),
                loss_pct: 0,
            };
            if let Some(sequence) = self.send_server_message(game_match, &player, &probe).await {
                player.pending_pings.insert_or_assign(sequence, Instant::now());
            }
        }
    }

    /// Ping discovery is done: publish the per-slot configuration words and
    /// smoothed pings, then wait on the ready gate.
    async fn finish_ping_phase(self: &Arc<Self>, game_match: &Arc<MatchState>) {
        info!("Ping phase complete for match {}", game_match.match_id);

        let mut average_ping = vec![0i16; game_match.max_players];
        for (_, player) in game_match.players.snapshot() {
            if let Some(slot) = average_ping.get_mut(player.player_index) {
                *slot = player.ping_for_wire();
            }
        }

        for (_, player) in game_match.players.snapshot() {
            if player.is_disconnected() {
                continue;
            }
            let config = ServerMessage::PlayersConfigurationData {
                config_values: Vec::new(), // serializer fills the fixed table
            };
            self.send_server_message(game_match, &player, &config).await;

            let status = ServerMessage::PlayersStatus {
                average_ping: average_ping.clone(),
            };
            self.send_server_message(game_match, &player, &status).await;
        }

        game_match.set_phase(MatchPhase::Ready);
        // Ready votes may have arrived during the ping phase.
        self.try_start_game(game_match).await;
    }

    async fn handle_ready(
        self: &Arc<Self>,
        game_match: &Arc<MatchState>,
        player: &PlayerInfo,
        ready: bool,
    ) {
        player.state_mut().ready = ready;
        debug!(
            "Player {} in match {} ready = {}",
            player.player_index, game_match.match_id, ready
        );
        self.try_start_game(game_match).await;
    }

    /// The ready gate: once the ping phase is over and every player has
    /// voted ready, broadcast `StartGame` and hand the match to its tick
    /// loop.
    pub(crate) async fn try_start_game(self: &Arc<Self>, game_match: &Arc<MatchState>) {
        if !game_match.all_ready() {
            return;
        }
        // Single transition: a racing ready vote and ping-phase completion
        // agree on one winner.
        {
            let mut rt = game_match.runtime_mut();
            if rt.phase != MatchPhase::Ready {
                return;
            }
            rt.phase = MatchPhase::Ticking;
        }
        info!("All players ready, starting match {}", game_match.match_id);

        for (_, player) in game_match.players.snapshot() {
            self.send_server_message(game_match, &player, &ServerMessage::StartGame)
                .await;
        }

        tick::spawn_tick_loop(Arc::clone(self), Arc::clone(game_match));
    }

    /// Intake for a client's input burst: merge into the frame history, mark
    /// liveness, and acknowledge both the inputs and any checksums.
    async fn handle_input(
        &self,
        game_match: &MatchState,
        player: &PlayerInfo,
        start_frame: u32,
        client_frame: u32,
        input_per_frame: &[u32],
        checksum_per_frame: &[u32],
    ) {
        game_match.merge_inputs(player.player_index, start_frame, input_per_frame);
        player.note_input(client_frame);

        if !input_per_frame.is_empty() {
            let ack = ServerMessage::InputAck {
                ack_frame: start_frame + input_per_frame.len() as u32 - 1,
            };
            self.send_server_message(game_match, player, &ack).await;
        }

        if !checksum_per_frame.is_empty() {
            let highest = start_frame + checksum_per_frame.len() as u32 - 1;
            let ack_frame = {
                let mut s = player.state_mut();
                s.checksum_ack_frame = s.checksum_ack_frame.max(highest);
                s.checksum_ack_frame
            };
            self.send_server_message(game_match, player, &ServerMessage::ChecksumAck { ack_frame })
                .await;
        }
    }

    /// Tells the remaining players a peer is gone and that AI should take the
    /// slot at the current frame.
    pub(crate) async fn announce_disconnect(&self, game_match: &MatchState, departed: &PlayerInfo) {
        {
            let mut s = departed.state_mut();
            if s.disconnect_announced {
                return;
            }
            s.disconnect_announced = true;
        }

        let notice = ServerMessage::PlayerDisconnected {
            player_index: departed.player_index as u8,
            should_ai_take_control: 1,
            ai_take_control_frame: game_match.current_frame(),
            array_index: departed.player_index as u16,
        };

        for (_, peer) in game_match.players.snapshot() {
            if peer.player_index == departed.player_index || peer.is_disconnected() {
                continue;
            }
            self.send_server_message(game_match, &peer, &notice).await;
        }
    }

    /// Records one peer's acknowledgement of a departure; once every
    /// remaining player has acknowledged, the departed entry leaves both
    /// registries (its slot stays reusable for AI takeover).
    fn handle_disconnected_ack(
        &self,
        game_match: &MatchState,
        acker: &PlayerInfo,
        departed_index: usize,
    ) {
        let Some(departed) = game_match.player_by_index(departed_index) else {
            return;
        };
        if !departed.is_disconnected() {
            return;
        }
        departed.state_mut().disconnect_acks.insert(acker.player_index);

        let acks = departed.state().disconnect_acks.clone();
        let mut all_acked = true;
        game_match.players.for_each_read(|_, peer| {
            if peer.player_index != departed_index
                && !peer.state().disconnected
                && !acks.contains(&peer.player_index)
            {
                all_acked = false;
            }
        });

        if all_acked {
            let key = endpoint_key(&departed.addr);
            game_match.players.erase(&key);
            self.registries.players.erase(&key);
            info!(
                "Player {} fully removed from match {}",
                departed_index, game_match.match_id
            );
        }
    }

    /// Ends a match exactly once: stops the tick loop, notifies the config
    /// service, and erases all registry entries. Safe to call from any path
    /// (result report, duration, mass disconnect).
    pub(crate) async fn finish_match(&self, game_match: &MatchState) {
        if !game_match.mark_ended() {
            return;
        }
        game_match.tick_running.store(false, Ordering::SeqCst);
        game_match.set_phase(MatchPhase::Ended);

        self.provider
            .end_match(&game_match.match_id, &game_match.key)
            .await;
        self.registries.remove_match(game_match);
        info!("Match {} torn down", game_match.match_id);
    }

    /// Serializes, optionally compresses, and transmits one message,
    /// stamping it with the match's next sequence number. Returns the
    /// sequence on success; send failures are logged and absorbed so the
    /// caller's loop continues.
    pub(crate) async fn send_server_message(
        &self,
        game_match: &MatchState,
        player: &PlayerInfo,
        message: &ServerMessage,
    ) -> Option<u32> {
        if player.is_disconnected() {
            return None;
        }

        let sequence = game_match.next_sequence();
        let raw = serialize_server_message(sequence, message, game_match.max_players);

        let bytes = if message.is_compressed() {
            match compress(&raw) {
                Ok(compressed) => compressed,
                Err(e) => {
                    error!(
                        "Failed to compress broadcast for player {}: {}",
                        player.player_index, e
                    );
                    return None;
                }
            }
        } else {
            raw
        };

        {
            let mut s = player.state_mut();
            s.last_seq_sent = sequence;
            s.last_sent_time = Instant::now();
        }

        if let Err(e) = self.socket.send_to(&bytes, player.addr).await {
            self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Send to player {} failed: {}", player.player_index, e);
            return None;
        }

        Some(sequence)
    }
}
