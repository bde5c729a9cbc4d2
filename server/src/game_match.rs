//! Authoritative per-match state: the lifecycle phase machine, frame
//! histories, outbound sequencing, and construction of the rollback window
//! broadcasts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use shared::messages::PlayerInputBroadcast;
use shared::TARGET_FRAME_TIME_MS;

use crate::player::PlayerInfo;
use crate::shared_map::SharedMap;

/// Floor of the variable tick interval.
pub const MIN_TICK_INTERVAL_MS: f32 = 8.0;

/// Ceiling of the variable tick interval.
pub const MAX_TICK_INTERVAL_MS: f32 = 64.0;

/// Milliseconds added to the tick interval per frame of mean rift. One frame
/// of rift nudging the loop by one millisecond converges without oscillating
/// at 60 Hz.
const RIFT_TICK_GAIN_MS: f32 = 1.0;

/// Most frames one broadcast may carry per player slot. A long backlog
/// (stall, reconnect) drains over successive ticks instead of landing as a
/// single burst, and the wire's `numFrames:u8` bound is never approached.
const MAX_FRAMES_PER_TICK: u32 = 30;

/// Number of `RequestQualityData` bursts before the ping phase completes.
pub const DEFAULT_PING_PHASE_TOTAL: u32 = 65;

/// Lifecycle of a match, from first handshake to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for the remaining players to connect.
    Handshaking,
    /// Broadcasting RTT probes to seed the ping EWMA.
    PingPhase,
    /// Ping discovery done; waiting on the ready gate.
    Ready,
    /// The tick loop is broadcasting frames.
    Ticking,
    /// Torn down; no further packets.
    Ended,
}

/// Fields mutated under the match's own reader/writer lock.
#[derive(Debug)]
pub struct MatchRuntime {
    pub phase: MatchPhase,
    /// The server's authoritative tick counter; never decreases.
    pub current_frame: u32,
    /// Recomputed from the smoothed rifts every tick.
    pub tick_interval_ms: f32,
    /// Monotonic counter stamped on every outbound message of this match.
    pub sequence_counter: u32,
    /// Completed `RequestQualityData` bursts.
    pub ping_phase_count: u32,
}

/// One active match.
pub struct MatchState {
    pub match_id: String,
    pub key: String,
    pub max_players: usize,
    pub duration_in_frames: u32,
    pub ping_phase_total: u32,
    /// Endpoint key -> player, at most `max_players` entries.
    pub players: SharedMap<String, Arc<PlayerInfo>>,
    /// Frame -> input for every player slot; sparse.
    pub inputs: Vec<SharedMap<u32, u32>>,
    runtime: RwLock<MatchRuntime>,
    /// Start/stop flag for the tick task; cleared cooperatively.
    pub tick_running: AtomicBool,
    ended: AtomicBool,
}

impl MatchState {
    pub fn new(
        match_id: String,
        key: String,
        max_players: usize,
        duration_in_frames: u32,
        ping_phase_total: u32,
    ) -> Self {
        Self {
            match_id,
            key,
            max_players,
            duration_in_frames,
            ping_phase_total,
            players: SharedMap::new(),
            inputs: (0..max_players).map(|_| SharedMap::new()).collect(),
            runtime: RwLock::new(MatchRuntime {
                phase: MatchPhase::Handshaking,
                current_frame: 0,
                tick_interval_ms: TARGET_FRAME_TIME_MS,
                sequence_counter: 0,
                ping_phase_count: 0,
            }),
            tick_running: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    pub fn runtime(&self) -> RwLockReadGuard<'_, MatchRuntime> {
        self.runtime.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn runtime_mut(&self) -> RwLockWriteGuard<'_, MatchRuntime> {
        self.runtime.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> MatchPhase {
        self.runtime().phase
    }

    pub fn set_phase(&self, phase: MatchPhase) {
        self.runtime_mut().phase = phase;
    }

    pub fn current_frame(&self) -> u32 {
        self.runtime().current_frame
    }

    /// Claims the next outbound sequence number. The caller holds no other
    /// lock, so per-match sequences are strictly increasing.
    pub fn next_sequence(&self) -> u32 {
        let mut rt = self.runtime_mut();
        rt.sequence_counter += 1;
        rt.sequence_counter
    }

    /// Advances the authoritative frame counter and returns the new frame.
    pub fn advance_frame(&self) -> u32 {
        let mut rt = self.runtime_mut();
        rt.current_frame += 1;
        rt.current_frame
    }

    /// Marks the match ended; returns true only for the first caller so
    /// teardown side effects run exactly once.
    pub fn mark_ended(&self) -> bool {
        !self.ended.swap(true, Ordering::SeqCst)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn player_by_index(&self, player_index: usize) -> Option<Arc<PlayerInfo>> {
        let mut found = None;
        self.players.for_each_read(|_, p| {
            if p.player_index == player_index {
                found = Some(Arc::clone(p));
            }
        });
        found
    }

    pub fn all_ready(&self) -> bool {
        if self.players.len() < self.max_players {
            return false;
        }
        let mut all = true;
        self.players.for_each_read(|_, p| {
            if !p.state().ready {
                all = false;
            }
        });
        all
    }

    pub fn all_disconnected(&self) -> bool {
        let mut all = !self.players.is_empty();
        self.players.for_each_read(|_, p| {
            if !p.state().disconnected {
                all = false;
            }
        });
        all
    }

    /// Merges a run of client inputs into the slot's frame history. Frames
    /// the client already submitted keep their value (re-sends from high-ping
    /// clients are the common case), but a frame the aggregator imputed
    /// yields to the real input and leaves `missed_inputs`.
    pub fn merge_inputs(&self, player_index: usize, start_frame: u32, inputs: &[u32]) {
        let Some(hist) = self.inputs.get(player_index) else {
            return;
        };
        let source = self.player_by_index(player_index);

        for (k, &input) in inputs.iter().enumerate() {
            let frame = start_frame.wrapping_add(k as u32);
            if hist.contains(&frame) {
                let was_imputed = source
                    .as_ref()
                    .is_some_and(|p| p.missed_inputs.erase(&frame));
                if was_imputed {
                    hist.insert_or_assign(frame, input);
                }
            } else {
                hist.insert_or_assign(frame, input);
            }
        }
    }

    /// Derives the next tick interval from the mean smoothed rift of the
    /// connected players. A positive mean (clients running hot) stretches the
    /// interval so laggards catch up; a negative mean shortens it, clamped to
    /// [8, 64] ms either way.
    pub fn compute_tick_interval(&self) -> f32 {
        let mut sum = 0.0f32;
        let mut count = 0u32;
        self.players.for_each_read(|_, p| {
            let s = p.state();
            if !s.disconnected {
                sum += s.smooth_rift;
                count += 1;
            }
        });

        let mean_rift = if count > 0 { sum / count as f32 } else { 0.0 };
        let interval = (TARGET_FRAME_TIME_MS + mean_rift * RIFT_TICK_GAIN_MS)
            .clamp(MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS);

        self.runtime_mut().tick_interval_ms = interval;
        interval
    }

    /// Builds the rollback window broadcast for one recipient.
    ///
    /// For every player slot the window covers `[acked+1 ..= current_frame]`,
    /// throttled to [`MAX_FRAMES_PER_TICK`] frames; a longer backlog goes out
    /// over the following ticks as acknowledgements advance. Frames nobody
    /// submitted are filled with the slot's last known input (counted in
    /// `num_predicted`) or zero when there is no prior input (counted in
    /// `num_zeroed`); every imputed frame lands in the slot player's
    /// `missed_inputs` and in the frame history so later broadcasts stay
    /// consistent.
    pub fn build_broadcast(&self, recipient: &PlayerInfo) -> PlayerInputBroadcast {
        let current_frame = self.current_frame();
        let (acked_frames, ping, rift, checksum_ack) = {
            let s = recipient.state();
            (
                s.acked_frames.clone(),
                s.smoothed_ping.round() as i16,
                s.smooth_rift,
                s.checksum_ack_frame,
            )
        };

        let mut start_frame = vec![0u32; self.max_players];
        let mut num_frames = vec![0u8; self.max_players];
        let mut input_per_frame = vec![Vec::new(); self.max_players];
        let mut num_predicted = 0u16;
        let mut num_zeroed = 0u16;

        for slot in 0..self.max_players {
            let acked = acked_frames.get(slot).copied().unwrap_or(0);
            start_frame[slot] = acked + 1;
            if current_frame <= acked {
                continue;
            }

            let window = (current_frame - acked).min(MAX_FRAMES_PER_TICK);
            let hist = self.inputs[slot].snapshot();
            let source = self.player_by_index(slot);

            // Last input known at or before the window start seeds prediction.
            let mut last_val = hist.range(..=acked).next_back().map(|(_, &v)| v);

            let mut sent = Vec::with_capacity(window as usize);
            for frame in (acked + 1)..=(acked + window) {
                match hist.get(&frame) {
                    Some(&v) => {
                        // Frames imputed on an earlier tick still count as
                        // substitutions toward this recipient.
                        if let Some(source) = &source {
                            if let Some(imputed) = source.missed_inputs.find(&frame) {
                                if imputed == 0 && last_val.is_none() {
                                    num_zeroed += 1;
                                } else {
                                    num_predicted += 1;
                                }
                            }
                        }
                        sent.push(v);
                        last_val = Some(v);
                    }
                    None => {
                        let v = match last_val {
                            Some(v) => {
                                num_predicted += 1;
                                v
                            }
                            None => {
                                num_zeroed += 1;
                                0
                            }
                        };
                        self.inputs[slot].insert_or_assign(frame, v);
                        if let Some(source) = &source {
                            source.missed_inputs.insert_or_assign(frame, v);
                        }
                        sent.push(v);
                    }
                }
            }

            num_frames[slot] = sent.len() as u8;
            input_per_frame[slot] = sent;
        }

        PlayerInputBroadcast {
            num_players: self.max_players as u8,
            start_frame,
            num_frames,
            num_predicted,
            num_zeroed,
            ping,
            loss_pct: 0,
            rift,
            checksum_ack,
            input_per_frame,
        }
    }

    /// Drops frames every player has acknowledged: slot `i` retains only
    /// frames above the minimum of `acked_frames[i]` across players, and the
    /// matching `missed_inputs` entries go with them.
    pub fn trim_acked_inputs(&self) {
        let players = self.players.snapshot();
        if players.is_empty() {
            return;
        }

        for slot in 0..self.max_players {
            let min_ack = players
                .values()
                .map(|p| p.state().acked_frames.get(slot).copied().unwrap_or(0))
                .min()
                .unwrap_or(0);

            self.inputs[slot].retain(|&frame, _| frame > min_ack);
            if let Some(source) = self.player_by_index(slot) {
                source.missed_inputs.retain(|&frame, _| frame > min_ack);
            }
        }
    }
}
