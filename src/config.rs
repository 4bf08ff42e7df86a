use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = Config::default();
        assert_eq!(config.zones.ttl_ms, 60_000);
        assert_eq!(config.crossing.alert_cooldown_ms, 300_000);
        assert_eq!(config.crossing.post_return_cooldown_ms, 60_000);
        assert_eq!(config.crossing.inside_confirmations, 3);
        assert_eq!(config.movement.cooldown_ms, 120_000);
        assert_eq!(config.movement.release_buffer_ms, 1_000);
        assert_eq!(config.dispatch.retry_delay_ms, 5_000);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "crossing:\n  alert_cooldown_ms: 10000\n  post_return_cooldown_ms: 2000\n  inside_confirmations: 2\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.crossing.alert_cooldown_ms, 10_000);
        assert_eq!(config.crossing.inside_confirmations, 2);
        // untouched sections keep defaults
        assert_eq!(config.movement.cooldown_ms, 120_000);
        assert_eq!(config.zones.ttl_ms, 60_000);
    }
}
