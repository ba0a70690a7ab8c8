// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Defaults suit a single-process deployment. `from_env` overlays
//! `CADENCE_*` variables, typically loaded from `.env` by the binary.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::kit::error::CadenceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often schedules and wait deadlines are checked
    pub tick_interval_ms: u64,
    /// Step transitions allowed in one execute-until-suspension cycle
    pub max_steps_per_cycle: usize,
    pub dedupe_ttl_secs: u64,
    pub dedupe_capacity: usize,
    /// How late a schedule tick may fire before it counts as missed
    pub misfire_grace_secs: u64,
    /// Upper bound on catch-up runs for `missed: all` schedules
    pub max_backfill: usize,
    /// Persist runs as files under this directory instead of in memory
    pub state_dir: Option<PathBuf>,
    pub bind_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            max_steps_per_cycle: 1000,
            dedupe_ttl_secs: 86400,
            dedupe_capacity: 10000,
            misfire_grace_secs: 60,
            max_backfill: 100,
            state_dir: None,
            bind_port: 8080,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `CADENCE_*` environment variables
    pub fn from_env() -> Result<Self, CadenceError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns per variable name
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CadenceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        overlay(&lookup, "CADENCE_TICK_MS", &mut config.tick_interval_ms)?;
        overlay(&lookup, "CADENCE_MAX_STEPS", &mut config.max_steps_per_cycle)?;
        overlay(&lookup, "CADENCE_DEDUPE_TTL_SECS", &mut config.dedupe_ttl_secs)?;
        overlay(&lookup, "CADENCE_DEDUPE_CAPACITY", &mut config.dedupe_capacity)?;
        overlay(&lookup, "CADENCE_MISFIRE_GRACE_SECS", &mut config.misfire_grace_secs)?;
        overlay(&lookup, "CADENCE_MAX_BACKFILL", &mut config.max_backfill)?;
        overlay(&lookup, "CADENCE_PORT", &mut config.bind_port)?;
        if let Some(dir) = lookup("CADENCE_STATE_DIR").filter(|d| !d.trim().is_empty()) {
            config.state_dir = Some(PathBuf::from(dir));
        }

        if config.tick_interval_ms == 0 {
            return Err(CadenceError::config("CADENCE_TICK_MS must be greater than zero"));
        }
        if config.max_steps_per_cycle == 0 {
            return Err(CadenceError::config("CADENCE_MAX_STEPS must be greater than zero"));
        }
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn overlay<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), CadenceError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| CadenceError::config(format!("{} has invalid value '{}'", key, raw)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.misfire_grace_secs, 60);
    }

    #[test]
    fn test_overlay() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("CADENCE_TICK_MS", "250"),
            ("CADENCE_MAX_BACKFILL", "5"),
            ("CADENCE_STATE_DIR", "/var/lib/cadence"),
            ("CADENCE_PORT", "9090"),
        ]))
        .unwrap();

        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.max_backfill, 5);
        assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/cadence")));
        assert_eq!(config.bind_port, 9090);
    }

    #[test]
    fn test_malformed_values_fail() {
        let err = EngineConfig::from_lookup(lookup(&[("CADENCE_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));

        let err = EngineConfig::from_lookup(lookup(&[("CADENCE_TICK_MS", "0")])).unwrap_err();
        assert!(err.to_string().contains("CADENCE_TICK_MS"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig = serde_yaml::from_str("max_steps_per_cycle: 50").unwrap();
        assert_eq!(config.max_steps_per_cycle, 50);
        assert_eq!(config.bind_port, 8080);
    }
}
