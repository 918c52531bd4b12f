use serde::Deserialize;

/// Playback tuning parameters shared by decode/resample/output stages.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for queue sizing.
    pub buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
        }
    }
}
