//! Allocator configuration.
//!
//! Read once from the environment when the process-wide allocator is first
//! touched:
//! - `CMALLOC_RETAIN_SLABS`: fully free slabs each size class keeps mapped
//!   before returning further empty slabs to the OS (default 1).
//! - `CMALLOC_EVENT_LOG`: capacity of the lifecycle event ring; 0 disables
//!   recording (default 128).
//! - `CMALLOC_REMAP`: whether large blocks may be resized with `mremap`
//!   (`on`/`off`, default on).

use thiserror::Error;

pub const ENV_RETAIN_SLABS: &str = "CMALLOC_RETAIN_SLABS";
pub const ENV_EVENT_LOG: &str = "CMALLOC_EVENT_LOG";
pub const ENV_REMAP: &str = "CMALLOC_REMAP";

/// Upper bound on the event ring so a bad value cannot reserve huge buffers.
pub const MAX_EVENT_LOG_CAPACITY: usize = 1 << 16;

/// Tunables for a `MallocState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub retain_empty_slabs: usize,
    pub event_log_capacity: usize,
    pub remap_large: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            retain_empty_slabs: 1,
            event_log_capacity: 128,
            remap_large: true,
        }
    }
}

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: expected a non-negative integer, got {value:?}")]
    InvalidCount { var: &'static str, value: String },
    #[error("{var}: expected on/off, got {value:?}")]
    InvalidSwitch { var: &'static str, value: String },
}

/// Parse a switch value (case-insensitive).
#[must_use]
pub fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" | "enabled" => Some(true),
        "off" | "false" | "0" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

fn parse_count(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidCount {
            var,
            value: raw.to_string(),
        })
}

impl AllocatorConfig {
    /// Builds a config from `lookup`, failing on the first malformed value.
    /// Unset variables keep their defaults.
    pub fn try_from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_RETAIN_SLABS) {
            config.retain_empty_slabs = parse_count(ENV_RETAIN_SLABS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_EVENT_LOG) {
            config.event_log_capacity =
                parse_count(ENV_EVENT_LOG, &raw)?.min(MAX_EVENT_LOG_CAPACITY);
        }
        if let Some(raw) = lookup(ENV_REMAP) {
            config.remap_large = parse_switch(&raw).ok_or(ConfigError::InvalidSwitch {
                var: ENV_REMAP,
                value: raw,
            })?;
        }
        Ok(config)
    }

    /// Like [`Self::try_from_lookup`], but each malformed value falls back to
    /// its default independently.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let single = |var: &'static str| {
            Self::try_from_lookup(|name| if name == var { lookup(name) } else { None })
        };
        Self {
            retain_empty_slabs: single(ENV_RETAIN_SLABS)
                .map_or(defaults.retain_empty_slabs, |c| c.retain_empty_slabs),
            event_log_capacity: single(ENV_EVENT_LOG)
                .map_or(defaults.event_log_capacity, |c| c.event_log_capacity),
            remap_large: single(ENV_REMAP).map_or(defaults.remap_large, |c| c.remap_large),
        }
    }

    /// Reads the process environment, reporting malformed values.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::try_from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the process environment; malformed values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = AllocatorConfig::default();
        assert_eq!(config.retain_empty_slabs, 1);
        assert_eq!(config.event_log_capacity, 128);
        assert!(config.remap_large);
        assert_eq!(AllocatorConfig::from_lookup(env(&[])), config);
    }

    #[test]
    fn parse_switch_values() {
        assert_eq!(parse_switch("on"), Some(true));
        assert_eq!(parse_switch("TRUE"), Some(true));
        assert_eq!(parse_switch(" yes "), Some(true));
        assert_eq!(parse_switch("1"), Some(true));
        assert_eq!(parse_switch("off"), Some(false));
        assert_eq!(parse_switch("No"), Some(false));
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
        assert_eq!(parse_switch(""), None);
    }

    #[test]
    fn reads_all_variables() {
        let config = AllocatorConfig::try_from_lookup(env(&[
            (ENV_RETAIN_SLABS, "0"),
            (ENV_EVENT_LOG, "16"),
            (ENV_REMAP, "off"),
        ]))
        .expect("valid config");
        assert_eq!(
            config,
            AllocatorConfig {
                retain_empty_slabs: 0,
                event_log_capacity: 16,
                remap_large: false,
            }
        );
    }

    #[test]
    fn event_log_capacity_is_clamped() {
        let config = AllocatorConfig::from_lookup(env(&[(ENV_EVENT_LOG, "99999999")]));
        assert_eq!(config.event_log_capacity, MAX_EVENT_LOG_CAPACITY);
    }

    #[test]
    fn strict_parse_reports_bad_values() {
        let err = AllocatorConfig::try_from_lookup(env(&[(ENV_RETAIN_SLABS, "-3")]))
            .expect_err("negative count rejected");
        assert_eq!(
            err,
            ConfigError::InvalidCount {
                var: ENV_RETAIN_SLABS,
                value: "-3".to_string(),
            }
        );
        assert!(err.to_string().contains(ENV_RETAIN_SLABS));

        let err = AllocatorConfig::try_from_lookup(env(&[(ENV_REMAP, "sometimes")]))
            .expect_err("unknown switch rejected");
        assert!(matches!(err, ConfigError::InvalidSwitch { var: ENV_REMAP, .. }));
    }

    #[test]
    fn loose_parse_falls_back_per_field() {
        let config = AllocatorConfig::from_lookup(env(&[
            (ENV_RETAIN_SLABS, "lots"),
            (ENV_EVENT_LOG, "4"),
            (ENV_REMAP, "bogus"),
        ]));
        assert_eq!(config.retain_empty_slabs, 1);
        assert_eq!(config.event_log_capacity, 4);
        assert!(config.remap_large);
    }
}
