//! The per-match tick loop: variable-period frame advancement, rollback
//! window broadcasts, acknowledgement-driven trimming, and idle reaping.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use shared::messages::ServerMessage;
use tokio::time::sleep;

use crate::config::MatchConfigProvider;
use crate::game_match::MatchState;
use crate::network::RelayServer;

/// Starts the match's tick task unless one is already running.
pub fn spawn_tick_loop<P: MatchConfigProvider>(
    server: Arc<RelayServer<P>>,
    game_match: Arc<MatchState>,
) {
    if game_match.tick_running.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(async move {
        run_tick_loop(server, game_match).await;
    });
}

/// One match's broadcast loop. Each iteration derives the interval from the
/// smoothed rifts, sleeps it, advances the frame, and fans out one
/// `PlayerInput` per connected player. Clearing `tick_running` wakes the loop
/// at its next check; no packet goes out after that.
async fn run_tick_loop<P: MatchConfigProvider>(
    server: Arc<RelayServer<P>>,
    game_match: Arc<MatchState>,
) {
    info!("Tick loop started for match {}", game_match.match_id);

    while game_match.tick_running.load(Ordering::SeqCst) {
        let interval_ms = game_match.compute_tick_interval();
        sleep(Duration::from_secs_f32(interval_ms / 1000.0)).await;

        if !game_match.tick_running.load(Ordering::SeqCst) {
            break;
        }

        let frame = game_match.advance_frame();

        // Refresh rift estimates and reap idle players before building
        // anything against their state.
        let mut reaped = Vec::new();
        for (_, player) in game_match.players.snapshot() {
            player.calc_rift(frame);

            let timed_out = {
                let s = player.state();
                !s.disconnected && s.last_input_time.elapsed() > server.config.idle_timeout
            };
            if timed_out {
                info!(
                    "Player {} in match {} timed out",
                    player.player_index, game_match.match_id
                );
                player.state_mut().disconnected = true;
                reaped.push(player);
            }
        }
        for player in reaped {
            server.announce_disconnect(&game_match, &player).await;
        }

        if game_match.all_disconnected() {
            info!(
                "All players gone from match {}, stopping",
                game_match.match_id
            );
            server.finish_match(&game_match).await;
            break;
        }

        for (_, player) in game_match.players.snapshot() {
            if player.is_disconnected() {
                continue;
            }
            if !game_match.tick_running.load(Ordering::SeqCst) {
                break;
            }

            let broadcast = game_match.build_broadcast(&player);
            let message = ServerMessage::PlayerInput(broadcast);
            if let Some(sequence) = server
                .send_server_message(&game_match, &player, &message)
                .await
            {
                // Broadcast acks double as RTT samples.
                player.pending_pings.insert_or_assign(sequence, Instant::now());
            }
        }

        game_match.trim_acked_inputs();

        if frame >= game_match.duration_in_frames {
            info!(
                "Match {} reached its duration at frame {}",
                game_match.match_id, frame
            );
            server.finish_match(&game_match).await;
            break;
        }
    }

    game_match.tick_running.store(false, Ordering::SeqCst);
    debug!("Tick loop stopped for match {}", game_match.match_id);
}
