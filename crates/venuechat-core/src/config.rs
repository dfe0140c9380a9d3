use std::time::Duration;

use crate::error::ConfigError;
use crate::timestamp::ChatTimestampFormatter;

/// Seconds between background chat reloads.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Days to look back when counting active chatters.
pub const DEFAULT_ACTIVE_WINDOW_DAYS: i64 = 7;

/// Longest active-chatter window accepted from the environment.
pub const MAX_ACTIVE_WINDOW_DAYS: i64 = 3650;

/// Parse attempts a record gets in purgatory before it is dropped.
pub const DEFAULT_PURGATORY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub poll_interval: Duration,
    pub active_window_days: i64,
    pub purgatory_max_attempts: u32,
    /// Offset of the server's wall clock from UTC, in minutes east.
    pub wire_utc_offset_minutes: i32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            active_window_days: DEFAULT_ACTIVE_WINDOW_DAYS,
            purgatory_max_attempts: DEFAULT_PURGATORY_ATTEMPTS,
            wire_utc_offset_minutes: 0,
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by `VENUECHAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("VENUECHAT_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_var("VENUECHAT_POLL_INTERVAL_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::invalid("VENUECHAT_POLL_INTERVAL_SECS", raw));
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("VENUECHAT_ACTIVE_WINDOW_DAYS") {
            let days: i64 = parse_var("VENUECHAT_ACTIVE_WINDOW_DAYS", &raw)?;
            if !(1..=MAX_ACTIVE_WINDOW_DAYS).contains(&days) {
                return Err(ConfigError::invalid("VENUECHAT_ACTIVE_WINDOW_DAYS", raw));
            }
            config.active_window_days = days;
        }

        if let Some(raw) = lookup("VENUECHAT_PURGATORY_ATTEMPTS") {
            let attempts: u32 = parse_var("VENUECHAT_PURGATORY_ATTEMPTS", &raw)?;
            if attempts == 0 {
                return Err(ConfigError::invalid("VENUECHAT_PURGATORY_ATTEMPTS", raw));
            }
            config.purgatory_max_attempts = attempts;
        }

        if let Some(raw) = lookup("VENUECHAT_WIRE_UTC_OFFSET_MINUTES") {
            config.wire_utc_offset_minutes = parse_var("VENUECHAT_WIRE_UTC_OFFSET_MINUTES", &raw)?;
        }

        config.formatter()?;
        Ok(config)
    }

    /// The active-chatter window, clamped to `0..=MAX_ACTIVE_WINDOW_DAYS`
    /// days for configs built by hand.
    pub fn active_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.active_window_days.clamp(0, MAX_ACTIVE_WINDOW_DAYS))
    }

    pub fn formatter(&self) -> Result<ChatTimestampFormatter, ConfigError> {
        ChatTimestampFormatter::with_offset_minutes(self.wire_utc_offset_minutes).ok_or_else(|| {
            ConfigError::invalid(
                "VENUECHAT_WIRE_UTC_OFFSET_MINUTES",
                self.wire_utc_offset_minutes.to_string(),
            )
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, raw))
}
