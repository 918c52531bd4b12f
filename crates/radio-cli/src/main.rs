//! `radio`: command-line client for lonelyradio-style streaming servers.
//!
//! - `play`: stream and play, with interactive stdin controls.
//! - `playlists`: list the server's playlists.
//! - `download`: save one track as WAV.
//! - `devices`: list output devices.

mod cli;
mod config;
mod control;
mod wav;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use audio_player::output::NullBackend;
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use radio_engine::{Engine, EngineConfig, EngineEvent, PlaybackState, Settings};
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command};
use crate::config::CliConfig;
use crate::control::{Control, HELP};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,radio_engine=info")),
        )
        .init();

    let file = CliConfig::load_optional(args.config.as_deref())?;
    let engine_config = file.engine_config(&args);

    match &args.cmd {
        Command::Devices => {
            let host = cpal::default_host();
            for name in audio_player::device::list_output_devices(&host)? {
                println!("{name}");
            }
        }
        Command::Playlists { server } => {
            let server = file.server(server.as_deref())?;
            let engine = headless(engine_config, false);
            let list = engine
                .list_playlists(&server)
                .with_context(|| format!("list playlists from {server}"))?;
            for entry in list {
                println!("{}\t{}", entry.id, entry.name);
            }
        }
        Command::Download { stream, output } => {
            let server = file.server(stream.server.as_deref())?;
            let settings = file.settings(stream)?;
            let engine = headless(engine_config, false);
            let track = engine
                .fetch_track(&server, settings, &stream.playlist)
                .with_context(|| format!("download from {server}"))?;
            wav::write_track(output, &track)?;
            tracing::info!(
                title = %track.metadata.title,
                artist = %track.metadata.artist,
                frames = track.frames(),
                corrupt_frames = track.corrupt_frames,
                path = ?output,
                "track saved"
            );
        }
        Command::Play {
            stream,
            null_output,
            volume,
        } => {
            let server = file.server(stream.server.as_deref())?;
            let settings = file.settings(stream)?;
            let engine = if *null_output {
                headless(engine_config, true)
            } else {
                Engine::with_cpal(engine_config, file.device(&args))
            };
            if let Some(v) = volume {
                engine.set_volume(*v);
            }
            play(&engine, &server, settings, &stream.playlist)?;
        }
    }

    Ok(())
}

fn headless(config: EngineConfig, realtime: bool) -> Engine {
    Engine::new(config, Arc::new(NullBackend { realtime }))
}

fn play(engine: &Engine, server: &str, settings: Settings, playlist: &str) -> Result<()> {
    let events = engine.subscribe();
    let controls = control::spawn_stdin_reader();
    let interrupted = interrupt_channel()?;

    engine.start(server, settings, playlist)?;
    tracing::info!(
        server,
        encoder = settings.encoder.label(),
        playlist,
        "connecting"
    );
    eprintln!("{HELP}");

    let result = control_loop(engine, &events, &controls, &interrupted);
    engine.stop();
    result
}

fn control_loop(
    engine: &Engine,
    events: &Receiver<EngineEvent>,
    controls: &Receiver<Control>,
    interrupted: &Receiver<()>,
) -> Result<()> {
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(EngineEvent::TrackChanged(meta)) => {
                    println!("now playing: {} - {} [{}]", meta.artist, meta.title, meta.album);
                }
                // `next` passes through NotStarted on its way back to Playing.
                Ok(EngineEvent::StateChanged(PlaybackState::NotStarted))
                    if engine.state() == PlaybackState::NotStarted =>
                {
                    bail!("session ended");
                }
                Ok(EngineEvent::StateChanged(state)) => {
                    tracing::debug!(?state, "state changed");
                }
                Err(_) => bail!("engine event channel closed"),
            },
            recv(controls) -> control => match control {
                Ok(Control::Quit) | Err(_) => return Ok(()),
                Ok(Control::Toggle) => match engine.toggle() {
                    Ok(state) => println!("{state:?}"),
                    Err(e) => eprintln!("{e}"),
                },
                Ok(Control::Next) => engine.next()?,
                Ok(Control::Volume(v)) => engine.set_volume(v),
                Ok(Control::Status) => {
                    println!("{}", serde_json::to_string_pretty(&engine.status())?);
                }
            },
            recv(interrupted) -> _ => return Ok(()),
            default(Duration::from_secs(30)) => {
                let status = engine.status();
                tracing::debug!(
                    elapsed_ms = ?status.elapsed_ms,
                    underrun_frames = ?status.underrun_frames,
                    corrupt_frames = status.corrupt_frames,
                    "playback status"
                );
            }
        }
    }
}

fn interrupt_channel() -> Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("install Ctrl-C handler")?;
    Ok(rx)
}
