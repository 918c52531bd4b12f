use std::path::Path;

use anyhow::{Context, Result, anyhow};
use radio_engine::{CoverSize, EncoderKind, EngineConfig, Settings};
use serde::Deserialize;

use crate::cli::{Args, StreamArgs, parse_cover, parse_encoder};

/// Contents of the optional `--config` file.
///
/// ```toml
/// server = "lonelyradio://radio.example"
/// encoder = "flac"
/// cover = "high"
///
/// [engine]
/// connect_timeout_ms = 3000
/// [engine.playback]
/// buffer_seconds = 4.0
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CliConfig {
    pub server: Option<String>,
    pub device: Option<String>,
    pub encoder: Option<String>,
    pub cover: Option<String>,
    pub engine: EngineConfig,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<CliConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Engine config with command-line overrides applied.
    pub fn engine_config(&self, args: &Args) -> EngineConfig {
        let mut cfg = self.engine.clone();
        if let Some(v) = args.chunk_frames {
            cfg.playback.chunk_frames = v;
        }
        if let Some(v) = args.refill_max_frames {
            cfg.playback.refill_max_frames = v;
        }
        if let Some(v) = args.buffer_seconds {
            cfg.playback.buffer_seconds = v;
        }
        if let Some(key) = args.xor_key.as_ref() {
            cfg.xor_key = Some(key.clone());
        }
        cfg
    }

    pub fn device(&self, args: &Args) -> Option<String> {
        args.device.clone().or_else(|| self.device.clone())
    }

    pub fn server(&self, flag: Option<&str>) -> Result<String> {
        flag.map(str::to_string)
            .or_else(|| self.server.clone())
            .ok_or_else(|| anyhow!("no server given on the command line or in the config file"))
    }

    pub fn settings(&self, stream: &StreamArgs) -> Result<Settings> {
        let encoder = match (stream.encoder, self.encoder.as_deref()) {
            (Some(e), _) => e,
            (None, Some(label)) => parse_encoder(label).map_err(|e| anyhow!("config: {e}"))?,
            (None, None) => EncoderKind::default(),
        };
        let cover = match (stream.cover, self.cover.as_deref()) {
            (Some(c), _) => c,
            (None, Some(label)) => parse_cover(label).map_err(|e| anyhow!("config: {e}"))?,
            (None, None) => CoverSize::default(),
        };
        Ok(Settings { encoder, cover })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;

    use super::*;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_partial_file_with_defaults() {
        let file = write_config(
            r#"
server = "tcp://radio.local"
encoder = "sea"

[engine]
connect_timeout_ms = 1500

[engine.playback]
buffer_seconds = 4.0
"#,
        );
        let cfg = CliConfig::load(file.path()).unwrap();
        assert_eq!(cfg.server.as_deref(), Some("tcp://radio.local"));
        assert_eq!(cfg.engine.connect_timeout_ms, 1500);
        assert_eq!(cfg.engine.playback.buffer_seconds, 4.0);
        assert_eq!(
            cfg.engine.playback.chunk_frames,
            EngineConfig::default().playback.chunk_frames
        );
    }

    #[test]
    fn flags_override_file() {
        let file = write_config("device = \"USB\"\nencoder = \"sea\"\n[engine.playback]\nchunk_frames = 512\n");
        let cfg = CliConfig::load(file.path()).unwrap();
        let args = Args::try_parse_from([
            "radio",
            "play",
            "--encoder",
            "pcm16",
            "--chunk-frames",
            "2048",
        ])
        .unwrap();

        assert_eq!(cfg.engine_config(&args).playback.chunk_frames, 2048);
        assert_eq!(cfg.device(&args).as_deref(), Some("USB"));
        let crate::cli::Command::Play { stream, .. } = &args.cmd else {
            panic!("expected play");
        };
        assert_eq!(cfg.settings(stream).unwrap().encoder, EncoderKind::Pcm16);
        assert!(cfg.server(stream.server.as_deref()).is_err());
    }

    #[test]
    fn bad_file_reports_path() {
        let file = write_config("engine = 3");
        let err = CliConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
    }
}
