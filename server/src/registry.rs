//! Process-global lookup tables: matches by id, players by endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::game_match::MatchState;
use crate::player::PlayerInfo;
use crate::shared_map::SharedMap;

/// Canonical string key for a remote endpoint, `"ip:port"`.
pub fn endpoint_key(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// The two global registries. Entries are inserted by the handshake path and
/// erased by teardown; the tick loops only read.
#[derive(Default)]
pub struct Registries {
    pub matches: SharedMap<String, Arc<MatchState>>,
    pub players: SharedMap<String, Arc<PlayerInfo>>,
}

impl Registries {
    pub fn new() -> Self {
        Self {
            matches: SharedMap::new(),
            players: SharedMap::new(),
        }
    }

    /// Removes a finished match and every player it still holds from the
    /// global tables.
    pub fn remove_match(&self, game_match: &MatchState) {
        for key in game_match.players.snapshot().keys() {
            self.players.erase(key);
        }
        game_match.players.clear();
        for hist in &game_match.inputs {
            hist.clear();
        }
        self.matches.erase(&game_match.match_id);
    }
}
