//! Streaming radio client engine.
//!
//! An [`Engine`] owns at most one session: a TCP connection to a radio server whose
//! audio is decoded and played through an [`audio_player::output::OutputBackend`].
//! Control calls are synchronous and safe from any thread; metadata and cover art are
//! read from a snapshot that only changes when a new track becomes audible.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod cover;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetch;
pub mod playlist;
pub mod status;
pub mod transport;

mod session;

pub use config::EngineConfig;
pub use cover::CoverArt;
pub use engine::{Engine, NowPlaying};
pub use error::{EngineError, TransportError};
pub use events::EngineEvent;
pub use fetch::FetchedTrack;
pub use radio_types::{
    ALL_TRACKS_NAME, CoverSize, EncoderKind, PlaybackState, PlaylistEntry, Settings, TrackMetadata,
};
pub use status::StatusSnapshot;

/// Lock that survives a panicked holder; the guarded data stays consistent per field.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
