use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use radio_types::{EncoderKind, PlaybackState, TrackMetadata};
use serde::Serialize;

/// Live playback details updated by the session worker.
#[derive(Debug, Default)]
pub(crate) struct SessionStatus {
    pub(crate) server: Option<String>,
    pub(crate) encoder: Option<EncoderKind>,
    pub(crate) sample_rate: Option<u32>,
    pub(crate) channels: Option<u16>,
    pub(crate) output_rate: Option<u32>,
    pub(crate) duration_ms: Option<u64>,
    pub(crate) played_frames: Option<Arc<AtomicU64>>,
    pub(crate) underrun_frames: Option<Arc<AtomicU64>>,
    pub(crate) underrun_events: Option<Arc<AtomicU64>>,
    /// Fragments dropped by the decoder over the whole session.
    pub(crate) corrupt_frames: Arc<AtomicU64>,
}

/// Point-in-time view for CLIs and diagnostics.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StatusSnapshot {
    pub state: PlaybackState,
    pub server: Option<String>,
    pub metadata: TrackMetadata,
    pub encoder: Option<EncoderKind>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub output_rate: Option<u32>,
    pub elapsed_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub underrun_frames: Option<u64>,
    pub underrun_events: Option<u64>,
    pub corrupt_frames: u64,
    pub volume: u8,
    pub output: &'static str,
}

impl SessionStatus {
    pub(crate) fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    pub(crate) fn snapshot(
        &self,
        state: PlaybackState,
        metadata: TrackMetadata,
        volume: u8,
        output: &'static str,
    ) -> StatusSnapshot {
        let elapsed_ms = match (self.played_frames.as_ref(), self.output_rate) {
            (Some(frames), Some(rate)) if rate > 0 => {
                Some(frames.load(Ordering::Relaxed).saturating_mul(1000) / rate as u64)
            }
            _ => None,
        };
        StatusSnapshot {
            state,
            server: self.server.clone(),
            metadata,
            encoder: self.encoder,
            sample_rate: self.sample_rate,
            channels: self.channels,
            output_rate: self.output_rate,
            elapsed_ms,
            duration_ms: self.duration_ms,
            underrun_frames: self.underrun_frames.as_ref().map(|v| v.load(Ordering::Relaxed)),
            underrun_events: self.underrun_events.as_ref().map(|v| v.load(Ordering::Relaxed)),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            volume,
            output,
        }
    }

    /// Reset per-track fields when a new track starts.
    pub(crate) fn clear_track(&mut self) {
        self.sample_rate = None;
        self.channels = None;
        self.output_rate = None;
        self.duration_ms = None;
        self.played_frames = None;
        self.underrun_frames = None;
        self.underrun_events = None;
    }

    pub(crate) fn clear_session(&mut self) {
        self.clear_track();
        self.server = None;
        self.encoder = None;
        self.corrupt_frames = Arc::new(AtomicU64::new(0));
    }
}
