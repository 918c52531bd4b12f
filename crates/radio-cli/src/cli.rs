use std::path::PathBuf;

use clap::{Parser, Subcommand};
use radio_engine::{CoverSize, EncoderKind};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("RADIO_GIT_SHA"),
    ", ",
    env!("RADIO_BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "radio", version = VERSION, about = "Streaming radio client")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file; flags given here take precedence
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Resampler input chunk size in frames
    #[arg(long, global = true)]
    pub chunk_frames: Option<usize>,

    /// Playback callback refill cap (frames)
    #[arg(long, global = true)]
    pub refill_max_frames: Option<usize>,

    /// Per-track decode buffer in seconds
    #[arg(long, global = true)]
    pub buffer_seconds: Option<f32>,

    /// Stream obfuscation key shared with the server
    #[arg(long, global = true)]
    pub xor_key: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StreamArgs {
    /// Server address, e.g. lonelyradio://radio.example:5894
    pub server: Option<String>,

    /// Encoder to request: pcm16, pcm-float, flac, alac, vorbis, sea
    #[arg(long, short = 'e', value_parser = parse_encoder)]
    pub encoder: Option<EncoderKind>,

    /// Cover size: full, high, medium, low, min, none (or the pixel code)
    #[arg(long, value_parser = parse_cover)]
    pub cover: Option<CoverSize>,

    /// Playlist name; empty or "All tracks" plays everything
    #[arg(long, short = 'p', default_value = "")]
    pub playlist: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream from a server and play through the output device
    Play {
        #[command(flatten)]
        stream: StreamArgs,

        /// Discard audio instead of opening a device
        #[arg(long)]
        null_output: bool,

        /// Initial volume, 0-255
        #[arg(long)]
        volume: Option<u8>,
    },

    /// List the server's playlists
    Playlists {
        /// Server address
        server: Option<String>,
    },

    /// Download one track to a WAV file
    Download {
        #[command(flatten)]
        stream: StreamArgs,

        /// Output path (.wav)
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// List output devices
    Devices,
}

pub fn parse_encoder(value: &str) -> Result<EncoderKind, String> {
    if let Ok(code) = value.parse::<u8>() {
        return EncoderKind::from_code(code).ok_or_else(|| format!("unknown encoder code {code}"));
    }
    EncoderKind::from_label(value).ok_or_else(|| {
        let known: Vec<&str> = EncoderKind::ALL.iter().map(|e| e.label()).collect();
        format!("unknown encoder {value:?}, expected one of {}", known.join(", "))
    })
}

pub fn parse_cover(value: &str) -> Result<CoverSize, String> {
    if let Ok(code) = value.parse::<i32>() {
        return CoverSize::from_code(code).ok_or_else(|| format!("unknown cover size {code}"));
    }
    match value.trim().to_ascii_lowercase().as_str() {
        "full" => Ok(CoverSize::Full),
        "high" => Ok(CoverSize::High),
        "medium" => Ok(CoverSize::Medium),
        "low" => Ok(CoverSize::Low),
        "min" => Ok(CoverSize::Min),
        "none" | "no" => Ok(CoverSize::NoCover),
        other => Err(format!("unknown cover size {other:?}")),
    }
}
