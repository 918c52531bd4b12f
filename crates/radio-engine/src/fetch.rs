//! One-shot download of a single track, decoded to interleaved f32.

use audio_player::decode::{StreamFormat, decoder_for};
use radio_types::{EncoderKind, Settings, TrackMetadata};

use crate::config::EngineConfig;
use crate::error::TransportError;
use crate::transport::{Connection, ServerAddress, ServerMessage};

/// A fully received track.
#[derive(Clone, Debug)]
pub struct FetchedTrack {
    pub metadata: TrackMetadata,
    pub length_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoder: EncoderKind,
    pub cover: Vec<u8>,
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub corrupt_frames: u64,
}

impl FetchedTrack {
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            ch => self.samples.len() / ch as usize,
        }
    }
}

/// Receive the first track the server sends, then disconnect.
///
/// The track ends at the next track start. A connection dropped mid-track returns what
/// arrived so far; a drop before any audio is an error.
pub(crate) fn fetch_one_track(
    config: &EngineConfig,
    address: &ServerAddress,
    settings: Settings,
    playlist: Option<&str>,
) -> Result<FetchedTrack, TransportError> {
    let mut conn = Connection::open(address, config)?;
    let result = receive_track(&mut conn, settings, playlist);
    conn.close();
    result
}

fn receive_track(
    conn: &mut Connection,
    settings: Settings,
    playlist: Option<&str>,
) -> Result<FetchedTrack, TransportError> {
    let effective = conn.request_play(settings, playlist)?;

    let (header, cover) = loop {
        match conn.next_message()? {
            ServerMessage::TrackStart { header, cover } => break (header, cover),
            other => tracing::debug!(message = message_kind(&other), "skipping frame before track start"),
        }
    };

    let encoder = header.encoder_kind().unwrap_or(effective.encoder);
    let format = StreamFormat {
        sample_rate: header.sample_rate,
        channels: header.channels as usize,
    };
    let mut decoder = decoder_for(encoder, format, header.magic_cookie.as_deref())
        .map_err(|e| TransportError::dropped(format!("track not decodable: {e}")))?;

    let mut track = FetchedTrack {
        metadata: header.metadata(),
        length_secs: header.length_secs(),
        sample_rate: header.sample_rate,
        channels: header.channels,
        encoder,
        cover,
        samples: Vec::new(),
        corrupt_frames: 0,
    };
    tracing::info!(title = %track.metadata.title, encoder = encoder.label(), "downloading track");

    loop {
        match conn.next_message() {
            Ok(ServerMessage::Fragment(bytes)) => match decoder.decode(&bytes) {
                Ok(samples) => track.samples.extend_from_slice(&samples),
                Err(e) => {
                    track.corrupt_frames += 1;
                    tracing::debug!(error = %e, "dropping undecodable frame");
                }
            },
            Ok(ServerMessage::TrackStart { .. }) => break,
            Ok(ServerMessage::Unknown(kind)) => tracing::debug!(kind, "ignoring unknown frame"),
            Err(e) if !track.samples.is_empty() => {
                tracing::warn!(error = %e, frames = track.frames(), "connection ended mid-track, keeping partial audio");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(track)
}

fn message_kind(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::TrackStart { .. } => "track_start",
        ServerMessage::Fragment(_) => "fragment",
        ServerMessage::Unknown(_) => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_divides_by_channels() {
        let track = FetchedTrack {
            metadata: TrackMetadata::default(),
            length_secs: 0.0,
            sample_rate: 44_100,
            channels: 2,
            encoder: EncoderKind::Pcm16,
            cover: Vec::new(),
            samples: vec![0.0; 10],
            corrupt_frames: 0,
        };
        assert_eq!(track.frames(), 5);
        let mono_none = FetchedTrack { channels: 0, ..track };
        assert_eq!(mono_none.frames(), 0);
    }
}
