//! Configuration, loaded the way `engine/cli/src/settings.rs` loads the
//! teacher's `CfSettings`: a TOML file merged with environment overrides via
//! the `config` crate. No CLI flag parsing here — RPC/CLI surfaces are an
//! explicit spec.md Non-goal; an embedding binary is expected to own that
//! and hand us a [`Settings`].

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Tunables from spec.md §6. None of these are invariants — they're
/// defaults an operator can override.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub min_epoch_duration_secs: u64,
    pub max_epoch_duration_secs: u64,
    pub history_limit: usize,
    pub quantum_checkpoint_interval_secs: u64,
    pub default_group_size: usize,
    pub group_quorum_numerator: u64,
    pub group_quorum_denominator: u64,
    pub chain_buffer_capacity: usize,
    pub signed_bundle_channel_capacity: usize,
    pub bundle_signable_magic: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_epoch_duration_secs: 10 * 60,
            max_epoch_duration_secs: 60 * 60,
            history_limit: 6,
            quantum_checkpoint_interval_secs: 3,
            default_group_size: 3,
            group_quorum_numerator: 2,
            group_quorum_denominator: 3,
            chain_buffer_capacity: 100,
            signed_bundle_channel_capacity: 10,
            bundle_signable_magic: "quasar-bundle".to_owned(),
        }
    }
}

impl Settings {
    /// Loads settings from `config_path` (if given) merged over built-in
    /// defaults, then over `QS_`-prefixed environment variables. Missing
    /// keys fall back to [`Settings::default`] via `#[serde(default)]`.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("QS").separator("__"));
        builder.build()?.try_deserialize()
    }

    pub fn min_epoch_duration(&self) -> Duration {
        Duration::from_secs(self.min_epoch_duration_secs)
    }

    pub fn max_epoch_duration(&self) -> Duration {
        Duration::from_secs(self.max_epoch_duration_secs)
    }

    pub fn quantum_checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.quantum_checkpoint_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let s = Settings::default();
        assert_eq!(s.min_epoch_duration(), Duration::from_secs(600));
        assert_eq!(s.max_epoch_duration(), Duration::from_secs(3600));
        assert_eq!(s.history_limit, 6);
        assert_eq!(s.quantum_checkpoint_interval(), Duration::from_secs(3));
        assert_eq!(s.default_group_size, 3);
        assert_eq!(s.chain_buffer_capacity, 100);
        assert_eq!(s.signed_bundle_channel_capacity, 10);
    }

    #[test]
    fn load_without_file_returns_defaults() {
        let s = Settings::load(None).unwrap();
        assert_eq!(s, Settings::default());
    }
}
