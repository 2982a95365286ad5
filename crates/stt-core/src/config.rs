//! `ConfigProvider`: the corrected replacement for the source's ad-hoc,
//! module-level environment reads (§9 design notes).
//!
//! All configuration is read via a `ConfigProvider` captured at session
//! start; changing the environment mid-process does not affect in-flight
//! sessions. `EnvConfigProvider` snapshots `std::env` once into an owned
//! struct at construction time — the composition root builds one instance
//! per process, and hands an `Arc<dyn ConfigProvider>` to every session it
//! creates.

use std::collections::HashMap;
use std::time::Duration;

/// Read-only configuration surface every component reads through, instead
/// of calling `std::env::var` inline.
pub trait ConfigProvider: Send + Sync {
    /// Raw string value for `key`, as it was snapshotted at construction.
    fn get(&self, key: &str) -> Option<&str>;

    /// `get` parsed as `u64` milliseconds, falling back to `default` if
    /// absent or unparseable.
    fn get_ms(&self, key: &str, default: u64) -> Duration {
        Duration::from_millis(
            self.get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default),
        )
    }

    fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key).and_then(|v| v.parse::<u32>().ok()).unwrap_or(default)
    }

    fn get_usize(&self, key: &str, default: usize) -> usize {
        self.get(key).and_then(|v| v.parse::<usize>().ok()).unwrap_or(default)
    }

    /// `<PROVIDER>_API_KEY`-style secret lookup; absence means the
    /// provider is unavailable (C7).
    fn provider_api_key(&self, provider_env_prefix: &str) -> Option<&str> {
        self.get(&format!("{provider_env_prefix}_API_KEY"))
    }
}

/// Concrete `ConfigProvider` that snapshots `std::env` once.
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    values: HashMap<String, String>,
}

impl EnvConfigProvider {
    /// Snapshot the current process environment. Subsequent calls to
    /// `std::env::set_var` elsewhere in the process have no effect on
    /// this instance or on any session built from it.
    #[must_use]
    pub fn snapshot() -> Self {
        Self {
            values: std::env::vars().collect(),
        }
    }

    /// Build from an explicit map — used by tests that want deterministic
    /// configuration without touching the real process environment.
    #[must_use]
    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_frozen_after_construction() {
        let mut map = HashMap::new();
        map.insert("VOICE_HISTORY_MAX_TURNS".to_string(), "10".to_string());
        let cfg = EnvConfigProvider::from_map(map);
        assert_eq!(cfg.get_usize("VOICE_HISTORY_MAX_TURNS", 5), 10);
        assert_eq!(cfg.get_usize("MISSING_KEY", 5), 5);
    }

    #[test]
    fn provider_api_key_uses_prefix_convention() {
        let mut map = HashMap::new();
        map.insert("DEEPGRAM_API_KEY".to_string(), "secret".to_string());
        let cfg = EnvConfigProvider::from_map(map);
        assert_eq!(cfg.provider_api_key("DEEPGRAM"), Some("secret"));
        assert_eq!(cfg.provider_api_key("OPENAI"), None);
    }
}
