use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

pub use audio_player::config::PlaybackConfig;

/// Engine tuning. Every field has a default, so partial TOML tables are fine.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub playback: PlaybackConfig,
    /// TCP connect timeout per resolved address.
    pub connect_timeout_ms: u64,
    /// Read/write timeout while exchanging preludes and capabilities.
    pub handshake_timeout_ms: u64,
    /// Number of resized cover images kept.
    pub cover_cache_entries: usize,
    /// Shared obfuscation key; must match the server's.
    pub xor_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 5_000,
            cover_cache_entries: 16,
            xor_key: None,
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.max(1))
    }

    pub(crate) fn key_bytes(&self) -> Option<Arc<[u8]>> {
        self.xor_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| Arc::from(k.as_bytes()))
    }
}
