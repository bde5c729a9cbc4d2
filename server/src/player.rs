//! Per-endpoint player state: sequence watermarks, acknowledgement tracking,
//! latency smoothing, and the rift estimator.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use shared::TARGET_FRAME_TIME_MS;

use crate::shared_map::SharedMap;

/// EWMA weight for a fresh RTT sample.
const PING_ALPHA: f32 = 0.2;

/// EWMA weight for a fresh rift sample.
const RIFT_BETA: f32 = 0.1;

/// Rift estimates are clamped to this many frames either side of zero.
pub const MAX_RIFT_FRAMES: f32 = 10.0;

/// A single RTT sample is capped here before smoothing; anything slower is
/// indistinguishable from unplayable.
const PING_CAP_MS: f32 = 255.0;

/// Mutable per-player fields, guarded by the player's own reader/writer lock.
///
/// Lock order is always match before player; nothing here ever reaches back
/// into match state while the guard is held.
#[derive(Debug)]
pub struct PlayerState {
    /// Highest client header sequence seen; older datagrams are replays.
    pub last_seq_recv: u32,
    /// Sequence of the last message sent to this endpoint.
    pub last_seq_sent: u32,
    /// Highest frame this client has acknowledged receiving, per player slot.
    pub acked_frames: Vec<u32>,
    /// Has sent `ReadyToStartMatch`.
    pub ready: bool,
    /// Terminal flag; never cleared once set.
    pub disconnected: bool,
    /// Most recent raw RTT sample in milliseconds.
    pub raw_ping: f32,
    /// EWMA-smoothed RTT in milliseconds.
    pub smoothed_ping: f32,
    pub ping_initialized: bool,
    pub has_new_ping: bool,
    /// Clamped rift of the latest estimate, in frames.
    pub rift: f32,
    /// EWMA-smoothed rift, in frames.
    pub smooth_rift: f32,
    pub rift_init: bool,
    /// Frame the client last reported simulating.
    pub last_client_frame: u32,
    pub has_new_frame: bool,
    /// Highest frame for which a state checksum was accepted.
    pub checksum_ack_frame: u32,
    pub last_input_time: Instant,
    pub last_sent_time: Instant,
    /// Peer slots that acknowledged this player's departure broadcast.
    pub disconnect_acks: HashSet<usize>,
    /// The departure broadcast has gone out; don't repeat it.
    pub disconnect_announced: bool,
}

/// One connected endpoint. Shared between the global endpoint registry and
/// the owning match's player map; the entry lives as long as either holder.
#[derive(Debug)]
pub struct PlayerInfo {
    pub addr: SocketAddr,
    pub match_id: String,
    pub player_index: usize,
    /// Outbound sequence number of each in-flight RTT probe, keyed to its
    /// send time.
    pub pending_pings: SharedMap<u32, Instant>,
    /// Frames for which the aggregator substituted a predicted or zeroed
    /// input, keyed to the value it used.
    pub missed_inputs: SharedMap<u32, u32>,
    state: RwLock<PlayerState>,
}

impl PlayerInfo {
    pub fn new(addr: SocketAddr, match_id: String, player_index: usize, num_players: usize) -> Self {
        let now = Instant::now();
        Self {
            addr,
            match_id,
            player_index,
            pending_pings: SharedMap::new(),
            missed_inputs: SharedMap::new(),
            state: RwLock::new(PlayerState {
                last_seq_recv: 0,
                last_seq_sent: 0,
                acked_frames: vec![0; num_players],
                ready: false,
                disconnected: false,
                raw_ping: 0.0,
                smoothed_ping: 0.0,
                ping_initialized: false,
                has_new_ping: false,
                rift: 0.0,
                smooth_rift: 0.0,
                rift_init: false,
                last_client_frame: 0,
                has_new_frame: false,
                checksum_ack_frame: 0,
                last_input_time: now,
                last_sent_time: now,
                disconnect_acks: HashSet::new(),
                disconnect_announced: false,
            }),
        }
    }

    pub fn state(&self) -> RwLockReadGuard<'_, PlayerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, PlayerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_disconnected(&self) -> bool {
        self.state().disconnected
    }

    /// Smoothed ping rounded for the wire.
    pub fn ping_for_wire(&self) -> i16 {
        self.state().smoothed_ping.round() as i16
    }

    /// Records a fresh input burst: the client's current frame and the fact
    /// that it is still alive.
    pub fn note_input(&self, client_frame: u32) {
        let mut s = self.state_mut();
        s.last_client_frame = client_frame;
        s.has_new_frame = true;
        s.last_input_time = Instant::now();
    }

    /// Max-merges acknowledged frames; acks never move backwards.
    pub fn merge_acked_frames(&self, ack_frame: &[u32]) {
        let mut s = self.state_mut();
        for (slot, &acked) in ack_frame.iter().enumerate() {
            if slot >= s.acked_frames.len() {
                break;
            }
            if acked > s.acked_frames[slot] {
                s.acked_frames[slot] = acked;
            }
        }
    }

    /// Closes the RTT measurement opened by outbound sequence `sequence`, if
    /// one is pending, and folds it into the EWMA. Entries at or below the
    /// matched sequence are purged to bound memory.
    pub fn record_ping_sample(&self, sequence: u32) -> Option<f32> {
        let sent_at = self.pending_pings.find(&sequence)?;
        let rtt = (sent_at.elapsed().as_secs_f32() * 1000.0).min(PING_CAP_MS);

        {
            let mut s = self.state_mut();
            s.raw_ping = rtt;
            if s.ping_initialized {
                s.smoothed_ping = PING_ALPHA * rtt + (1.0 - PING_ALPHA) * s.smoothed_ping;
            } else {
                s.smoothed_ping = rtt;
                s.ping_initialized = true;
            }
            s.has_new_ping = true;
        }

        self.pending_pings.retain(|&seq, _| seq > sequence);
        Some(rtt)
    }

    /// Re-estimates the rift when both a fresh ping and a fresh client frame
    /// are available, consuming both flags.
    ///
    /// Half the smoothed RTT converts to frames of transit latency; the
    /// client "should" be at `current_frame + latency_frames`, and the rift
    /// is how far ahead of that it actually reports being.
    pub fn calc_rift(&self, current_frame: u32) {
        let mut s = self.state_mut();
        if !(s.has_new_ping && s.has_new_frame) {
            return;
        }

        let latency_frames = s.smoothed_ping * 0.5 / TARGET_FRAME_TIME_MS;
        let expected_client_frame = current_frame as f32 + latency_frames;
        let raw_rift = s.last_client_frame as f32 - expected_client_frame;
        let rift = raw_rift.clamp(-MAX_RIFT_FRAMES, MAX_RIFT_FRAMES);

        s.rift = rift;
        if s.rift_init {
            s.smooth_rift = RIFT_BETA * rift + (1.0 - RIFT_BETA) * s.smooth_rift;
        } else {
            s.smooth_rift = rift;
            s.rift_init = true;
        }

        s.has_new_ping = false;
        s.has_new_frame = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;

    fn test_player() -> PlayerInfo {
        PlayerInfo::new(
            "127.0.0.1:5000".parse().unwrap(),
            "m1".to_string(),
            0,
            2,
        )
    }

    #[test]
    fn test_first_ping_sample_sets_ewma_directly() {
        let player = test_player();
        player
            .pending_pings
            .insert_or_assign(10, Instant::now() - Duration::from_millis(50));

        let rtt = player.record_ping_sample(10).unwrap();
        assert!(rtt >= 50.0 && rtt < 80.0, "rtt {rtt}");

        let s = player.state();
        assert!(s.ping_initialized);
        assert!(s.has_new_ping);
        assert_approx_eq!(s.smoothed_ping, rtt, 0.001);
    }

    #[test]
    fn test_ping_ewma_blends_subsequent_samples() {
        let player = test_player();
        {
            let mut s = player.state_mut();
            s.ping_initialized = true;
            s.smoothed_ping = 100.0;
        }
        player
            .pending_pings
            .insert_or_assign(11, Instant::now() - Duration::from_millis(20));

        let rtt = player.record_ping_sample(11).unwrap();
        let expected = 0.2 * rtt + 0.8 * 100.0;
        assert_approx_eq!(player.state().smoothed_ping, expected, 0.001);
    }

    #[test]
    fn test_ping_match_purges_older_entries() {
        let player = test_player();
        let now = Instant::now();
        for seq in [5u32, 6, 7, 9] {
            player.pending_pings.insert_or_assign(seq, now);
        }

        player.record_ping_sample(7);

        assert!(!player.pending_pings.contains(&5));
        assert!(!player.pending_pings.contains(&6));
        assert!(!player.pending_pings.contains(&7));
        assert!(player.pending_pings.contains(&9));
    }

    #[test]
    fn test_unknown_sequence_is_ignored() {
        let player = test_player();
        assert!(player.record_ping_sample(99).is_none());
        assert!(!player.state().has_new_ping);
    }

    #[test]
    fn test_acked_frames_are_monotonic() {
        let player = test_player();
        player.merge_acked_frames(&[10, 20]);
        player.merge_acked_frames(&[5, 25]);

        let s = player.state();
        assert_eq!(s.acked_frames, vec![10, 25]);
    }

    #[test]
    fn test_acked_frames_ignores_extra_slots() {
        let player = test_player();
        player.merge_acked_frames(&[1, 2, 3, 4]);
        assert_eq!(player.state().acked_frames.len(), 2);
    }

    #[test]
    fn test_rift_needs_both_fresh_flags() {
        let player = test_player();
        {
            let mut s = player.state_mut();
            s.has_new_ping = true;
            s.has_new_frame = false;
        }
        player.calc_rift(100);
        assert!(!player.state().rift_init);
    }

    #[test]
    fn test_rift_first_sample_and_clamp() {
        let player = test_player();
        {
            let mut s = player.state_mut();
            s.smoothed_ping = 33.3334; // one frame of half-ping latency
            s.last_client_frame = 160;
            s.has_new_ping = true;
            s.has_new_frame = true;
        }

        // Client claims frame 160 against server frame 100: raw rift is
        // 160 - (100 + 1) = 59, clamped to the ±10 range.
        player.calc_rift(100);

        let s = player.state();
        assert!(s.rift_init);
        assert_approx_eq!(s.rift, MAX_RIFT_FRAMES, 0.001);
        assert_approx_eq!(s.smooth_rift, MAX_RIFT_FRAMES, 0.001);
        assert!(!s.has_new_ping);
        assert!(!s.has_new_frame);
    }

    #[test]
    fn test_rift_smoothing_blends_and_stays_bounded() {
        let player = test_player();
        {
            let mut s = player.state_mut();
            s.rift_init = true;
            s.smooth_rift = 2.0;
            s.smoothed_ping = 0.0;
            s.last_client_frame = 95;
            s.has_new_ping = true;
            s.has_new_frame = true;
        }

        // raw rift = 95 - 100 = -5
        player.calc_rift(100);

        let s = player.state();
        assert_approx_eq!(s.smooth_rift, 0.1 * -5.0 + 0.9 * 2.0, 0.001);
        assert!(s.smooth_rift.abs() <= MAX_RIFT_FRAMES);
    }

    #[test]
    fn test_note_input_marks_liveness() {
        let player = test_player();
        player.note_input(42);

        let s = player.state();
        assert_eq!(s.last_client_frame, 42);
        assert!(s.has_new_frame);
    }
}
