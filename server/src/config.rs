//! Match configuration provider and end-of-match notifier.
//!
//! The relay never decides who belongs in a match: it asks an external HTTP
//! service once per first-seen match id, and tells the same service when the
//! match is over. Both calls carry the `{matchId, key}` pair as JSON.

use log::{error, warn};
use serde::Deserialize;

/// One player slot from the match configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfiguredPlayer {
    pub player_index: u16,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub is_host: bool,
}

/// Configuration for one match, as returned by the config service.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchConfig {
    pub max_players: u8,
    pub match_duration: u32,
    #[serde(default)]
    pub players: Vec<ConfiguredPlayer>,
}

/// Source of match configurations. The HTTP implementation is the production
/// one; tests inject their own.
pub trait MatchConfigProvider: Send + Sync + 'static {
    /// Fetches the configuration for `(match_id, key)`. `None` means the
    /// pair is unknown or the service is unreachable; the caller replies
    /// with a failed handshake and creates no state.
    fn fetch_match_config(
        &self,
        match_id: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Option<MatchConfig>> + Send;

    /// Best-effort end-of-match notification.
    fn end_match(
        &self,
        match_id: &str,
        key: &str,
    ) -> impl std::future::Future<Output = ()> + Send;
}

/// Talks to the config service over HTTP with JSON bodies.
pub struct HttpConfigProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConfigProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request_body(match_id: &str, key: &str) -> serde_json::Value {
        serde_json::json!({ "matchId": match_id, "key": key })
    }
}

impl MatchConfigProvider for HttpConfigProvider {
    async fn fetch_match_config(&self, match_id: &str, key: &str) -> Option<MatchConfig> {
        let url = format!("{}/register", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&Self::request_body(match_id, key))
            .send()
            .await;

        match response {
            Ok(resp) => match resp.json::<MatchConfig>().await {
                Ok(config) => Some(config),
                Err(e) => {
                    error!("Invalid match config for {}: {}", match_id, e);
                    None
                }
            },
            Err(e) => {
                error!("Failed to fetch match config from {}: {}", url, e);
                None
            }
        }
    }

    async fn end_match(&self, match_id: &str, key: &str) {
        let url = format!("{}/end_match", self.base_url);
        if let Err(e) = self
            .client
            .post(&url)
            .json(&Self::request_body(match_id, key))
            .send()
            .await
        {
            warn!("End-match notification for {} failed: {}", match_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_config_deserializes_service_response() {
        let json = r#"{
            "max_players": 2,
            "match_duration": 36000,
            "players": [
                { "player_index": 0, "ip": "10.0.0.1", "is_host": true },
                { "player_index": 1, "ip": "10.0.0.2", "is_host": false }
            ]
        }"#;

        let config: MatchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_players, 2);
        assert_eq!(config.match_duration, 36000);
        assert_eq!(config.players.len(), 2);
        assert!(config.players[0].is_host);
    }

    #[test]
    fn test_match_config_tolerates_missing_players() {
        let config: MatchConfig =
            serde_json::from_str(r#"{ "max_players": 2, "match_duration": 100 }"#).unwrap();
        assert!(config.players.is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let provider = HttpConfigProvider::new("http://config.local/".to_string());
        assert_eq!(provider.base_url, "http://config.local");
    }
}
