//! Session worker: one connection, a receive/decode thread and a playback thread.
//!
//! The receive thread decodes fragments into a per-track queue and hands each new
//! track to the playback thread through a one-slot channel. The playback thread
//! publishes a track's metadata only after the previous track has played out, so
//! metadata never runs ahead of what is audible.

use std::any::Any;
use std::net::{Shutdown, TcpStream};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use audio_player::decode::{FrameDecoder, StreamFormat, decoder_for};
use audio_player::output::OutputControls;
use audio_player::queue::{SampleQueue, capacity_for};
use crossbeam_channel::{Receiver, Sender};
use radio_proto::TrackHeader;
use radio_types::{CoverSize, Settings};

use crate::engine::Shared;
use crate::error::TransportError;
use crate::lock;
use crate::transport::{self, Connection, ServerAddress, ServerMessage};

/// Parameters of a `start`, kept for `next`.
#[derive(Clone, Debug)]
pub(crate) struct StartRequest {
    pub(crate) address: ServerAddress,
    pub(crate) settings: Settings,
    pub(crate) playlist: Option<String>,
}

/// Cross-thread switches for one session.
#[derive(Default)]
struct Signals {
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    socket: Mutex<Option<TcpStream>>,
    /// Queue the receive thread is currently filling.
    filling: Mutex<Option<Arc<SampleQueue>>>,
}

impl Signals {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Stop both threads: unblock socket reads and queue pushes.
    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(sock) = lock(&self.socket).take() {
            let _ = sock.shutdown(Shutdown::Both);
        }
        if let Some(queue) = lock(&self.filling).take() {
            queue.close();
            queue.clear();
        }
    }

    fn set_filling(&self, queue: Option<Arc<SampleQueue>>) {
        let previous = std::mem::replace(&mut *lock(&self.filling), queue);
        if let Some(previous) = previous {
            previous.close();
        }
        if self.is_cancelled() {
            if let Some(queue) = lock(&self.filling).take() {
                queue.close();
            }
        }
    }
}

pub(crate) struct SessionHandle {
    signals: Arc<Signals>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    pub(crate) fn set_paused(&self, paused: bool) {
        self.signals.paused.store(paused, Ordering::Relaxed);
    }

    /// Cancel the session and wait until both worker threads are gone.
    pub(crate) fn stop(self) {
        self.signals.cancel();
        let _ = self.join.join();
    }
}

/// A track handed from the receive thread to the playback thread.
struct PendingTrack {
    header: TrackHeader,
    cover: Vec<u8>,
    format: StreamFormat,
    queue: Arc<SampleQueue>,
    playable: bool,
}

/// Decoder state of the track currently being received.
struct ReceivingTrack {
    decoder: Option<Box<dyn FrameDecoder>>,
    queue: Arc<SampleQueue>,
    corrupt: u64,
}

pub(crate) fn spawn(
    shared: Arc<Shared>,
    id: u64,
    request: StartRequest,
) -> std::io::Result<SessionHandle> {
    let signals = Arc::new(Signals::default());
    let worker_signals = signals.clone();
    let join = thread::Builder::new()
        .name(format!("radio-session-{id}"))
        .spawn(move || {
            let _end = EndSession {
                shared: &shared,
                id,
                signals: &worker_signals,
            };
            let server = request.address.to_string();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                run_session(&shared, id, &worker_signals, request)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) if worker_signals.is_cancelled() => {
                    tracing::debug!(session = id, error = %e, "session ended after cancel");
                }
                Ok(Err(e)) => {
                    tracing::warn!(session = id, server = %server, error = %e, "session ended");
                }
                Err(payload) => {
                    tracing::error!(
                        session = id,
                        server = %server,
                        panic = %panic_message(payload),
                        "session worker panicked"
                    );
                }
            }
        })?;
    Ok(SessionHandle { signals, join })
}

/// Returns the engine to `NotStarted` however the session worker exits.
struct EndSession<'a> {
    shared: &'a Shared,
    id: u64,
    signals: &'a Signals,
}

impl Drop for EndSession<'_> {
    fn drop(&mut self) {
        self.signals.cancel();
        self.shared.end_session(self.id);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

fn run_session(
    shared: &Arc<Shared>,
    id: u64,
    signals: &Arc<Signals>,
    request: StartRequest,
) -> Result<(), TransportError> {
    let stream = transport::connect(&request.address, &shared.config)?;
    // Registered before the handshake so cancel() can abort a server that never answers.
    *lock(&signals.socket) = Some(stream.try_clone().map_err(TransportError::dropped)?);
    if signals.is_cancelled() {
        let _ = stream.shutdown(Shutdown::Both);
        return Ok(());
    }

    let mut conn = match Connection::handshake(&request.address, stream, &shared.config) {
        Ok(conn) => conn,
        Err(_) if signals.is_cancelled() => return Ok(()),
        Err(e) => return Err(e),
    };
    if signals.is_cancelled() {
        conn.close();
        return Ok(());
    }
    let settings = match conn.request_play(request.settings, request.playlist.as_deref()) {
        Ok(settings) => settings,
        Err(_) if signals.is_cancelled() => return Ok(()),
        Err(e) => return Err(e),
    };

    {
        let mut status = lock(&shared.status);
        status.server = Some(request.address.to_string());
        status.encoder = Some(settings.encoder);
    }
    tracing::info!(
        session = id,
        server = %request.address,
        encoder = settings.encoder.label(),
        playlist = request.playlist.as_deref().unwrap_or(""),
        "session started"
    );

    let (track_tx, track_rx) = crossbeam_channel::bounded::<PendingTrack>(1);
    let player = {
        let shared = shared.clone();
        let signals = signals.clone();
        thread::Builder::new()
            .name(format!("radio-playback-{id}"))
            .spawn(move || {
                let played = catch_unwind(AssertUnwindSafe(|| {
                    play_tracks(&shared, id, &signals, track_rx, settings.cover)
                }));
                if let Err(payload) = played {
                    tracing::error!(session = id, panic = %panic_message(payload), "playback thread panicked");
                    // The receive thread may be blocked on a queue nobody drains now.
                    signals.cancel();
                }
            })
            .map_err(|e| TransportError::dropped(format!("spawn playback thread: {e}")))?
    };

    let result = receive_loop(&mut conn, shared, signals, &track_tx);

    // Any exit from the receive loop ends playback immediately.
    signals.cancel();
    drop(track_tx);
    let _ = player.join();
    conn.close();
    result
}

fn receive_loop(
    conn: &mut Connection,
    shared: &Shared,
    signals: &Signals,
    track_tx: &Sender<PendingTrack>,
) -> Result<(), TransportError> {
    let buffer_seconds = shared.config.playback.buffer_seconds;
    let corrupt_total = lock(&shared.status).corrupt_frames.clone();
    let mut current: Option<ReceivingTrack> = None;

    loop {
        let message = match conn.next_message() {
            Ok(m) => m,
            Err(_) if signals.is_cancelled() => return Ok(()),
            Err(e) => return Err(e),
        };

        match message {
            ServerMessage::TrackStart { header, cover } => {
                let format = StreamFormat {
                    sample_rate: header.sample_rate,
                    channels: header.channels as usize,
                };
                let decoder = match header.encoder_kind() {
                    Some(kind) => decoder_for(kind, format, header.magic_cookie.as_deref())
                        .map_err(|e| {
                            tracing::warn!(error = %e, encoder = kind.label(), "track cannot be decoded, skipping its audio");
                        })
                        .ok(),
                    None => {
                        tracing::warn!(code = header.encoder, "track uses unknown encoder, skipping its audio");
                        None
                    }
                };

                let queue = Arc::new(SampleQueue::new(
                    format.channels,
                    capacity_for(format.sample_rate, format.channels.max(1), buffer_seconds),
                ));
                let playable = decoder.is_some();
                signals.set_filling(Some(queue.clone()));
                if !playable {
                    queue.close();
                }
                tracing::debug!(title = %header.title, rate = header.sample_rate, channels = header.channels, "track start received");

                let pending = PendingTrack {
                    header,
                    cover,
                    format,
                    queue: queue.clone(),
                    playable,
                };
                if track_tx.send(pending).is_err() {
                    return Ok(());
                }
                current = Some(ReceivingTrack {
                    decoder,
                    queue,
                    corrupt: 0,
                });
            }
            ServerMessage::Fragment(bytes) => {
                let Some(track) = current.as_mut() else {
                    tracing::debug!(len = bytes.len(), "fragment before first track dropped");
                    continue;
                };
                let Some(decoder) = track.decoder.as_mut() else {
                    continue;
                };
                match decoder.decode(&bytes) {
                    Ok(samples) => {
                        if !samples.is_empty()
                            && !track.queue.push_blocking(&samples)
                            && signals.is_cancelled()
                        {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        track.corrupt += 1;
                        corrupt_total.fetch_add(1, Ordering::Relaxed);
                        if track.corrupt == 1 {
                            tracing::warn!(error = %e, encoder = decoder.encoder().label(), "dropping undecodable frame");
                        } else {
                            tracing::debug!(error = %e, dropped = track.corrupt, "dropping undecodable frame");
                        }
                    }
                }
            }
            ServerMessage::Unknown(kind) => {
                tracing::debug!(kind, "ignoring unknown frame");
            }
        }
    }
}

fn play_tracks(
    shared: &Shared,
    id: u64,
    signals: &Signals,
    tracks: Receiver<PendingTrack>,
    negotiated_cover: CoverSize,
) {
    while let Ok(track) = tracks.recv() {
        if signals.is_cancelled() {
            break;
        }

        let controls = OutputControls::new(signals.paused.clone(), shared.volume.clone());
        if !shared.publish_track(id, &track.header, track.cover, negotiated_cover, &controls) {
            break;
        }
        if !track.playable {
            continue;
        }

        let output = match shared
            .backend
            .open(track.format, track.queue.clone(), controls)
        {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(error = %e, backend = shared.backend.name(), "failed to open audio output");
                signals.cancel();
                break;
            }
        };
        lock(&shared.status).output_rate = Some(output.output_rate());

        if !output.finish(&signals.cancel) {
            break;
        }
        tracing::debug!(title = %track.header.title, "track finished");
    }
}

/// Per-process counter so log lines can tell sessions apart.
pub(crate) fn next_session_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}
