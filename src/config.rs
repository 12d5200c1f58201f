use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Duration;

/// Engine tuning knobs. Defaults match the production salon deployment;
/// every field can be overridden through `SLOTWISE_*` environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Slot candidate step in minutes.
    pub granularity_min: u32,
    /// How long an unverified client's provisional booking holds its slot.
    pub hold_window_min: u32,
    /// Run the expired-hold sweep once every N inbound requests; 0 disables
    /// the opportunistic trigger (explicit sweeps still work).
    pub sweep_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            granularity_min: 20,
            hold_window_min: 10,
            sweep_every: 16,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            granularity_min: env_parse("SLOTWISE_GRANULARITY_MIN")
                .unwrap_or(defaults.granularity_min),
            hold_window_min: env_parse("SLOTWISE_HOLD_WINDOW_MIN")
                .unwrap_or(defaults.hold_window_min),
            sweep_every: env_parse("SLOTWISE_SWEEP_EVERY").unwrap_or(defaults.sweep_every),
        }
    }

    pub fn hold_window(&self) -> Duration {
        Duration::minutes(self.hold_window_min as i64)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.granularity_min, 20);
        assert_eq!(config.hold_window(), Duration::minutes(10));
        assert_eq!(config.sweep_every, 16);
    }
}
