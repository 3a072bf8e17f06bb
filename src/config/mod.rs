//! Configuration management
//!
//! Every knob has a default so the server boots with no file at all;
//! a `sageline.toml` next to the binary or `SAGELINE__*` environment
//! variables override individual values.

use crate::application::media::MediaControllerConfig;
use crate::application::no_show::NoShowConfig;
use crate::application::settlement::SettlementConfig;
use crate::application::signaling::SignalingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub signaling: SignalingSettings,
    pub presence: PresenceSettings,
    pub no_show: NoShowSettings,
    pub settlement: SettlementSettings,
    pub wallet: WalletSettings,
    pub credentials: CredentialSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost/sageline".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    pub ringing_window_secs: u64,
    pub join_timeout_secs: u64,
    pub leave_timeout_secs: u64,
    pub toggle_debounce_ms: u64,
    /// Server-side expiry sweep cadence, for callers whose client vanished
    pub expiry_sweep_interval_secs: u64,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            ringing_window_secs: 45,
            join_timeout_secs: 10,
            leave_timeout_secs: 5,
            toggle_debounce_ms: 250,
            expiry_sweep_interval_secs: 15,
        }
    }
}

impl SignalingSettings {
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            ringing_window: Duration::from_secs(self.ringing_window_secs),
            media: MediaControllerConfig {
                join_timeout: Duration::from_secs(self.join_timeout_secs),
                leave_timeout: Duration::from_secs(self.leave_timeout_secs),
                toggle_debounce: Duration::from_millis(self.toggle_debounce_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    pub cache_ttl_secs: u64,
    pub away_sweep_interval_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            away_sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoShowSettings {
    pub warning_after_minutes: i64,
    pub cancel_after_minutes: i64,
    pub poll_interval_secs: u64,
}

impl Default for NoShowSettings {
    fn default() -> Self {
        Self {
            warning_after_minutes: 3,
            cancel_after_minutes: 5,
            poll_interval_secs: 30,
        }
    }
}

impl NoShowSettings {
    pub fn no_show_config(&self) -> NoShowConfig {
        NoShowConfig {
            warning_after: chrono::Duration::minutes(self.warning_after_minutes),
            cancel_after: chrono::Duration::minutes(self.cancel_after_minutes),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementSettings {
    pub max_attempts: u32,
    pub retry_backoff_secs: u64,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_secs: 5,
        }
    }
}

impl SettlementSettings {
    pub fn settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSettings {
    /// JSON-RPC endpoint of the wallet collaborator; empty means the
    /// in-process gateway (development)
    pub rpc_url: String,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub signing_secret: String,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            signing_secret: "dev-only-signing-secret".to_string(),
        }
    }
}

impl Config {
    /// Load from `sageline.toml` and `SAGELINE__*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("sageline").required(false))
            .add_source(config::Environment::with_prefix("SAGELINE").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.signaling.ringing_window_secs, 45);
        assert_eq!(config.no_show.cancel_after_minutes, 5);

        let signaling = config.signaling.signaling_config();
        assert_eq!(signaling.ringing_window, Duration::from_secs(45));

        let no_show = config.no_show.no_show_config();
        assert_eq!(no_show.warning_after, chrono::Duration::minutes(3));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }
}
