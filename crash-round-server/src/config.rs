//! Game Configuration
//!
//! Defaults mirror production values; every field can be overridden from a
//! `CRASH_*` environment variable.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::core::money::{Amount, Multiplier};

/// Default client seed used when nobody contributed one.
pub const DEFAULT_CLIENT_SEED: &str = "family";

/// A configuration the round driver cannot run with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("stake bounds must satisfy 0 < min_stake <= max_stake (got {min}..{max})")]
    StakeBounds { min: Amount, max: Amount },

    #[error("max_crash_point must be at least 1.00x (got {0})")]
    MaxCrashPoint(Multiplier),

    #[error("house_edge_bps must be below 10000 (got {0})")]
    HouseEdge(u32),
}

/// Round, ledger and transport configuration.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// WebSocket bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Multiplier clock period.
    pub tick_interval: Duration,
    /// Multiplier growth per tick in parts per million (3500 = 0.35%).
    pub growth_rate_ppm: u64,
    /// How long bets are accepted each round.
    pub betting_duration: Duration,
    /// Pause after the crash before the countdown starts.
    pub crash_pause: Duration,
    /// Countdown between rounds.
    pub countdown_duration: Duration,
    /// Countdown broadcast granularity.
    pub countdown_step: Duration,

    /// Extra attempts to store round analytics before refunding.
    pub analytics_max_retries: u32,
    /// Delay between analytics attempts.
    pub analytics_retry_delay: Duration,

    /// Queue backlog limit per operation kind.
    pub max_queue_backlog: usize,
    /// Smallest accepted stake.
    pub min_stake: Amount,
    /// Largest accepted stake.
    pub max_stake: Amount,

    /// Upper clamp for crash points.
    pub max_crash_point: Multiplier,
    /// House edge in basis points (100 = 1%).
    pub house_edge_bps: u32,
    /// Client seed contributors folded into one round.
    pub max_client_seeds: usize,
    /// Seed used when no player contributed one.
    pub default_client_seed: String,

    /// Number of past crash points kept for new connections.
    pub crash_history_len: usize,
    /// Broadcast channel capacity.
    pub event_buffer: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,

            tick_interval: Duration::from_millis(50),
            growth_rate_ppm: 3_500,
            betting_duration: Duration::from_secs(5),
            crash_pause: Duration::from_secs(2),
            countdown_duration: Duration::from_secs(4),
            countdown_step: Duration::from_millis(100),

            analytics_max_retries: 3,
            analytics_retry_delay: Duration::from_millis(200),

            max_queue_backlog: 1000,
            min_stake: Amount::from_units(10),
            max_stake: Amount::from_units(10_000),

            max_crash_point: Multiplier::from_whole(10_000),
            house_edge_bps: 100,
            max_client_seeds: 3,
            default_client_seed: DEFAULT_CLIENT_SEED.to_string(),

            crash_history_len: 16,
            event_buffer: 1024,
        }
    }
}

impl GameConfig {
    /// Defaults overridden by `CRASH_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<SocketAddr>("CRASH_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(n) = env_parse("CRASH_MAX_CONNECTIONS") {
            config.max_connections = n;
        }
        if let Some(ms) = env_parse("CRASH_TICK_MS") {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(ppm) = env_parse("CRASH_GROWTH_PPM") {
            config.growth_rate_ppm = ppm;
        }
        if let Some(ms) = env_parse("CRASH_BETTING_MS") {
            config.betting_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("CRASH_PAUSE_MS") {
            config.crash_pause = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("CRASH_COUNTDOWN_MS") {
            config.countdown_duration = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse("CRASH_ANALYTICS_RETRIES") {
            config.analytics_max_retries = n;
        }
        if let Some(n) = env_parse("CRASH_MAX_BACKLOG") {
            config.max_queue_backlog = n;
        }
        if let Some(v) = env_parse::<f64>("CRASH_MIN_STAKE").and_then(|v| Amount::from_decimal(v).ok()) {
            config.min_stake = v;
        }
        if let Some(v) = env_parse::<f64>("CRASH_MAX_STAKE").and_then(|v| Amount::from_decimal(v).ok()) {
            config.max_stake = v;
        }
        if let Some(bps) = env_parse("CRASH_HOUSE_EDGE_BPS") {
            config.house_edge_bps = bps;
        }

        config
    }

    /// Reject configurations the round driver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Zero("tick_interval"));
        }
        if self.growth_rate_ppm == 0 {
            return Err(ConfigError::Zero("growth_rate_ppm"));
        }
        if self.countdown_step.is_zero() {
            return Err(ConfigError::Zero("countdown_step"));
        }
        if !self.min_stake.is_positive() || self.min_stake > self.max_stake {
            return Err(ConfigError::StakeBounds {
                min: self.min_stake,
                max: self.max_stake,
            });
        }
        if self.max_crash_point < Multiplier::ONE {
            return Err(ConfigError::MaxCrashPoint(self.max_crash_point));
        }
        if self.house_edge_bps >= 10_000 {
            return Err(ConfigError::HouseEdge(self.house_edge_bps));
        }
        if self.max_queue_backlog == 0 {
            return Err(ConfigError::Zero("max_queue_backlog"));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GameConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.analytics_max_retries, 3);
        assert_eq!(config.max_client_seeds, 3);
        assert_eq!(config.max_crash_point, Multiplier::from_whole(10_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_stake_bounds() {
        let config = GameConfig {
            min_stake: Amount::from_units(500),
            max_stake: Amount::from_units(100),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::StakeBounds {
                min: Amount::from_units(500),
                max: Amount::from_units(100),
            })
        );
    }

    #[test]
    fn test_validate_rejects_full_house_edge() {
        let config = GameConfig {
            house_edge_bps: 10_000,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err, ConfigError::HouseEdge(10_000));
        assert_eq!(err.to_string(), "house_edge_bps must be below 10000 (got 10000)");
    }

    #[test]
    fn test_validate_names_zero_field() {
        let config = GameConfig {
            tick_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("tick_interval")));
    }
}
