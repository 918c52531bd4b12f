//! Playback engine: state machine and snapshots over one session at a time.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use audio_player::output::{CpalBackend, OutputBackend, OutputControls};
use crossbeam_channel::Receiver;
use radio_proto::TrackHeader;
use radio_types::{CoverSize, EncoderKind, PlaybackState, PlaylistEntry, Settings, TrackMetadata};

use crate::config::EngineConfig;
use crate::cover::{CoverArt, CoverCache, SourceCover};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventHub};
use crate::fetch::{FetchedTrack, fetch_one_track};
use crate::playlist::{normalize_playlists, playlist_scope};
use crate::session::{self, SessionHandle, StartRequest};
use crate::status::{SessionStatus, StatusSnapshot};
use crate::transport::{Connection, ServerAddress};
use crate::lock;

pub const DEFAULT_VOLUME: u8 = u8::MAX;

/// The track currently audible, as one consistent snapshot.
#[derive(Clone, Debug)]
pub struct NowPlaying {
    pub metadata: TrackMetadata,
    pub length_secs: f64,
    pub encoder: Option<EncoderKind>,
    pub sample_rate: u32,
    pub channels: u16,
    pub(crate) cover: SourceCover,
}

/// State shared between the engine handle and its session threads.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) backend: Arc<dyn OutputBackend>,
    pub(crate) volume: Arc<AtomicU8>,
    pub(crate) status: Arc<Mutex<SessionStatus>>,
    state: AtomicU8,
    session_id: AtomicU64,
    track_seq: AtomicU64,
    now_playing: RwLock<Option<Arc<NowPlaying>>>,
    events: EventHub,
    covers: CoverCache,
}

impl Shared {
    fn state(&self) -> PlaybackState {
        PlaybackState::from_code(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, next: PlaybackState) {
        let prev = self.state.swap(next.code(), Ordering::SeqCst);
        if prev != next.code() {
            self.events.emit(EngineEvent::StateChanged(next));
        }
    }

    fn is_current(&self, id: u64) -> bool {
        self.session_id.load(Ordering::SeqCst) == id
    }

    fn now_playing(&self) -> Option<Arc<NowPlaying>> {
        self.now_playing.read().ok().and_then(|g| g.clone())
    }

    fn clear_track(&self) {
        if let Ok(mut g) = self.now_playing.write() {
            *g = None;
        }
        self.covers.clear();
    }

    /// Make `header` the audible track. Returns `false` if the session is stale.
    pub(crate) fn publish_track(
        &self,
        id: u64,
        header: &TrackHeader,
        cover: Vec<u8>,
        negotiated: CoverSize,
        controls: &OutputControls,
    ) -> bool {
        if !self.is_current(id) {
            return false;
        }
        let now = NowPlaying {
            metadata: header.metadata(),
            length_secs: header.length_secs(),
            encoder: header.encoder_kind(),
            sample_rate: header.sample_rate,
            channels: header.channels,
            cover: SourceCover {
                track_seq: self.track_seq.fetch_add(1, Ordering::SeqCst) + 1,
                bytes: Arc::from(cover),
                negotiated,
            },
        };
        {
            let mut status = lock(&self.status);
            status.clear_track();
            status.sample_rate = Some(now.sample_rate);
            status.channels = Some(now.channels);
            status.duration_ms = Some((now.length_secs * 1000.0) as u64);
            status.played_frames = Some(controls.played_frames.clone());
            status.underrun_frames = Some(controls.underrun_frames.clone());
            status.underrun_events = Some(controls.underrun_events.clone());
        }
        tracing::info!(
            title = %now.metadata.title,
            artist = %now.metadata.artist,
            album = %now.metadata.album,
            length_secs = now.length_secs,
            "now playing"
        );
        let metadata = now.metadata.clone();
        if let Ok(mut g) = self.now_playing.write() {
            *g = Some(Arc::new(now));
        }
        self.events.emit(EngineEvent::TrackChanged(metadata));
        true
    }

    /// Called by a session worker on exit; no-op once `stop` has replaced the session.
    pub(crate) fn end_session(&self, id: u64) {
        if !self.is_current(id) {
            return;
        }
        self.clear_track();
        lock(&self.status).clear_session();
        self.set_state(PlaybackState::NotStarted);
    }
}

#[derive(Default)]
struct Control {
    session: Option<SessionHandle>,
    last: Option<StartRequest>,
}

/// A streaming radio player.
///
/// All methods take `&self` and may be called from any thread. `start` returns once the
/// session thread is spawned; connection failures show up as the state falling back to
/// [`PlaybackState::NotStarted`].
pub struct Engine {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl Engine {
    pub fn new(config: EngineConfig, backend: Arc<dyn OutputBackend>) -> Self {
        let covers = CoverCache::new(config.cover_cache_entries);
        Self {
            shared: Arc::new(Shared {
                config,
                backend,
                volume: Arc::new(AtomicU8::new(DEFAULT_VOLUME)),
                status: SessionStatus::shared(),
                state: AtomicU8::new(PlaybackState::NotStarted.code()),
                session_id: AtomicU64::new(0),
                track_seq: AtomicU64::new(0),
                now_playing: RwLock::new(None),
                events: EventHub::default(),
                covers,
            }),
            control: Mutex::new(Control::default()),
        }
    }

    /// Engine playing through a CPAL device (`None` = system default).
    pub fn with_cpal(config: EngineConfig, device: Option<String>) -> Self {
        let backend = CpalBackend::new(device, config.playback.clone());
        Self::new(config, Arc::new(backend))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Begin streaming from `server`. Valid only from `NotStarted`.
    ///
    /// `playlist` of "" or "All tracks" streams the whole catalog.
    pub fn start(&self, server: &str, settings: Settings, playlist: &str) -> Result<(), EngineError> {
        let request = StartRequest {
            address: ServerAddress::parse(server)?,
            settings,
            playlist: playlist_scope(playlist),
        };
        let mut control = lock(&self.control);
        self.start_locked(&mut control, request)
    }

    fn start_locked(&self, control: &mut Control, request: StartRequest) -> Result<(), EngineError> {
        let state = self.shared.state();
        if state != PlaybackState::NotStarted {
            return Err(EngineError::InvalidStateTransition {
                operation: "start",
                state,
            });
        }
        // A session that died on its own is still parked here.
        if let Some(old) = control.session.take() {
            old.stop();
        }

        let id = session::next_session_id(&self.shared.session_id);
        lock(&self.shared.status).clear_session();
        self.shared.set_state(PlaybackState::Playing);
        match session::spawn(self.shared.clone(), id, request.clone()) {
            Ok(handle) => {
                control.session = Some(handle);
                control.last = Some(request);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn session thread");
                self.shared.end_session(id);
                Err(EngineError::Thread(e))
            }
        }
    }

    /// Flip between `Playing` and `Paused` without touching the session.
    pub fn toggle(&self) -> Result<PlaybackState, EngineError> {
        let control = lock(&self.control);
        let state = self.shared.state();
        let next = match state {
            PlaybackState::Playing => PlaybackState::Paused,
            PlaybackState::Paused => PlaybackState::Playing,
            PlaybackState::NotStarted => {
                return Err(EngineError::InvalidStateTransition {
                    operation: "toggle",
                    state,
                });
            }
        };
        if self
            .shared
            .state
            .compare_exchange(state.code(), next.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // The session ended underneath us.
            let state = self.shared.state();
            return Err(EngineError::InvalidStateTransition {
                operation: "toggle",
                state,
            });
        }
        if let Some(session) = control.session.as_ref() {
            session.set_paused(next == PlaybackState::Paused);
        }
        self.shared.events.emit(EngineEvent::StateChanged(next));
        tracing::info!(state = ?next, "playback toggled");
        Ok(next)
    }

    /// Tear down any session and return to `NotStarted`. Idempotent.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        self.stop_locked(&mut control);
    }

    fn stop_locked(&self, control: &mut Control) {
        // Invalidate first so a dying worker cannot publish or reset state.
        session::next_session_id(&self.shared.session_id);
        if let Some(session) = control.session.take() {
            session.stop();
            tracing::info!("session stopped");
        }
        self.shared.clear_track();
        lock(&self.shared.status).clear_session();
        self.shared.set_state(PlaybackState::NotStarted);
    }

    /// Reconnect with the previous `start` parameters; the server picks what plays.
    pub fn next(&self) -> Result<(), EngineError> {
        let mut control = lock(&self.control);
        let Some(request) = control.last.clone() else {
            return Err(EngineError::InvalidStateTransition {
                operation: "next",
                state: self.shared.state(),
            });
        };
        self.stop_locked(&mut control);
        self.start_locked(&mut control, request)
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Current track metadata; empty when nothing is playing.
    pub fn metadata(&self) -> TrackMetadata {
        self.shared
            .now_playing()
            .map(|n| n.metadata.clone())
            .unwrap_or_default()
    }

    /// Current track length in seconds; `0.0` when nothing is playing.
    pub fn track_length(&self) -> f64 {
        self.shared.now_playing().map(|n| n.length_secs).unwrap_or(0.0)
    }

    pub fn now_playing(&self) -> Option<Arc<NowPlaying>> {
        self.shared.now_playing()
    }

    /// Cover of the current track at `size`; empty if unavailable or `NoCover`.
    pub fn cover(&self, size: CoverSize) -> CoverArt {
        let now = self.shared.now_playing();
        self.shared.covers.get(now.as_ref().map(|n| &n.cover), size)
    }

    /// Cover handles handed out and not yet dropped.
    pub fn outstanding_covers(&self) -> usize {
        self.shared.covers.outstanding()
    }

    /// Query the server's playlists. Independent of any streaming session.
    pub fn list_playlists(&self, server: &str) -> Result<Vec<PlaylistEntry>, EngineError> {
        let address = ServerAddress::parse(server)?;
        let mut conn = Connection::open(&address, &self.shared.config)?;
        let raw = conn.request_playlists();
        conn.close();
        let entries = normalize_playlists(raw?);
        tracing::debug!(server = %address, count = entries.len(), "playlists listed");
        Ok(entries)
    }

    pub fn set_volume(&self, volume: u8) {
        self.shared.volume.store(volume, Ordering::Relaxed);
    }

    pub fn volume(&self) -> u8 {
        self.shared.volume.load(Ordering::Relaxed)
    }

    /// Receive state and track change notifications.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.state();
        let metadata = self.metadata();
        lock(&self.shared.status).snapshot(
            state,
            metadata,
            self.volume(),
            self.shared.backend.name(),
        )
    }

    /// Download exactly one track without playing it.
    pub fn fetch_track(
        &self,
        server: &str,
        settings: Settings,
        playlist: &str,
    ) -> Result<FetchedTrack, EngineError> {
        let address = ServerAddress::parse(server)?;
        Ok(fetch_one_track(
            &self.shared.config,
            &address,
            settings,
            playlist_scope(playlist).as_deref(),
        )?)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
