use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TCP port used when a server address omits one.
pub const DEFAULT_PORT: u16 = 5894;

/// Display name of the synthetic "no filter" playlist entry.
pub const ALL_TRACKS_NAME: &str = "All tracks";

/// A numeric code received from a peer that maps to no known variant.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} code {code}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: i64,
}

/// Audio encoding negotiated for a streaming session.
///
/// The numeric codes are part of the client/engine contract and never change.
/// Gaps (4..=6) belong to encoders the engine does not decode.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum EncoderKind {
    Pcm16 = 0,
    PcmFloat = 1,
    #[default]
    Flac = 2,
    Alac = 3,
    Vorbis = 7,
    Sea = 8,
}

impl EncoderKind {
    pub const ALL: [EncoderKind; 6] = [
        EncoderKind::Pcm16,
        EncoderKind::PcmFloat,
        EncoderKind::Flac,
        EncoderKind::Alac,
        EncoderKind::Vorbis,
        EncoderKind::Sea,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }

    /// Short label used in logs and CLI output.
    pub fn label(self) -> &'static str {
        match self {
            EncoderKind::Pcm16 => "pcm16",
            EncoderKind::PcmFloat => "pcm-float",
            EncoderKind::Flac => "flac",
            EncoderKind::Alac => "alac",
            EncoderKind::Vorbis => "vorbis",
            EncoderKind::Sea => "sea",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|e| e.label() == label)
    }

    /// Raw PCM encoders carry no decoder state between frames.
    pub fn is_stateless(self) -> bool {
        matches!(self, EncoderKind::Pcm16 | EncoderKind::PcmFloat)
    }
}

impl TryFrom<u8> for EncoderKind {
    type Error = UnknownCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(UnknownCode {
            kind: "encoder",
            code: code as i64,
        })
    }
}

impl From<EncoderKind> for u8 {
    fn from(value: EncoderKind) -> Self {
        value.code()
    }
}

/// Requested cover resolution (longest edge, pixels).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "i32", into = "i32")]
pub enum CoverSize {
    /// Original image as stored on the server.
    Full,
    #[default]
    High,
    Medium,
    Low,
    Min,
    /// Suppress cover transfer entirely.
    NoCover,
}

impl CoverSize {
    pub const ALL: [CoverSize; 6] = [
        CoverSize::Full,
        CoverSize::High,
        CoverSize::Medium,
        CoverSize::Low,
        CoverSize::Min,
        CoverSize::NoCover,
    ];

    pub fn code(self) -> i32 {
        match self {
            CoverSize::Full => 0,
            CoverSize::High => 768,
            CoverSize::Medium => 512,
            CoverSize::Low => 256,
            CoverSize::Min => 128,
            CoverSize::NoCover => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Target edge length, or `None` for [`CoverSize::Full`] and [`CoverSize::NoCover`].
    pub fn dimension(self) -> Option<u32> {
        match self {
            CoverSize::Full | CoverSize::NoCover => None,
            other => Some(other.code() as u32),
        }
    }

    pub fn is_suppressed(self) -> bool {
        self == CoverSize::NoCover
    }
}

impl TryFrom<i32> for CoverSize {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(UnknownCode {
            kind: "cover size",
            code: code as i64,
        })
    }
}

impl From<CoverSize> for i32 {
    fn from(value: CoverSize) -> Self {
        value.code()
    }
}

/// Engine playback state as observed by clients.
///
/// Codes match what existing clients decode: 2 = playing, 3 = paused, anything else
/// is treated as not started.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    NotStarted = 0,
    Playing = 2,
    Paused = 3,
}

impl PlaybackState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            _ => PlaybackState::NotStarted,
        }
    }

    pub fn is_active(self) -> bool {
        self != PlaybackState::NotStarted
    }
}

/// Now-playing metadata. Fields may be empty; compared by value to detect track changes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrackMetadata {
    pub title: String,
    pub album: String,
    pub artist: String,
}

impl TrackMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.album.is_empty() && self.artist.is_empty()
    }
}

/// One selectable playlist.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistEntry {
    /// Stable within one listing. `0` is "All tracks", `-1` is reserved as invalid.
    pub id: i64,
    pub name: String,
}

impl PlaylistEntry {
    pub const ALL_TRACKS_ID: i64 = 0;
    pub const INVALID_ID: i64 = -1;

    pub fn all_tracks() -> Self {
        Self {
            id: Self::ALL_TRACKS_ID,
            name: ALL_TRACKS_NAME.to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id != Self::INVALID_ID && !self.name.is_empty()
    }

    /// Whether this entry means "no playlist filter".
    pub fn is_all_tracks(&self) -> bool {
        self.id == Self::ALL_TRACKS_ID
    }
}

/// Per-session client settings sent to the server.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub encoder: EncoderKind,
    pub cover: CoverSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_codes_are_stable() {
        let codes: Vec<u8> = EncoderKind::ALL.iter().map(|e| e.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 7, 8]);
        assert_eq!(EncoderKind::from_code(4), None);
        assert_eq!(EncoderKind::from_code(8), Some(EncoderKind::Sea));
    }

    #[test]
    fn encoder_serializes_as_number() {
        let json = serde_json::to_string(&EncoderKind::Vorbis).unwrap();
        assert_eq!(json, "7");
        let parsed: EncoderKind = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, EncoderKind::Alac);
        assert!(serde_json::from_str::<EncoderKind>("5").is_err());
    }

    #[test]
    fn encoder_labels_parse_case_insensitive() {
        assert_eq!(EncoderKind::from_label(" FLAC "), Some(EncoderKind::Flac));
        assert_eq!(EncoderKind::from_label("pcm-float"), Some(EncoderKind::PcmFloat));
        assert_eq!(EncoderKind::from_label("opus"), None);
    }

    #[test]
    fn cover_size_codes_and_dimensions() {
        assert_eq!(CoverSize::NoCover.code(), -1);
        assert_eq!(CoverSize::from_code(512), Some(CoverSize::Medium));
        assert_eq!(CoverSize::from_code(300), None);
        assert_eq!(CoverSize::High.dimension(), Some(768));
        assert_eq!(CoverSize::Full.dimension(), None);
        assert!(CoverSize::NoCover.is_suppressed());
    }

    #[test]
    fn playback_state_decodes_like_clients() {
        assert_eq!(PlaybackState::from_code(2), PlaybackState::Playing);
        assert_eq!(PlaybackState::from_code(3), PlaybackState::Paused);
        assert_eq!(PlaybackState::from_code(1), PlaybackState::NotStarted);
        assert_eq!(PlaybackState::from_code(200), PlaybackState::NotStarted);
    }

    #[test]
    fn playlist_entry_sentinels() {
        let all = PlaylistEntry::all_tracks();
        assert!(all.is_all_tracks());
        assert!(all.is_valid());
        let invalid = PlaylistEntry {
            id: PlaylistEntry::INVALID_ID,
            name: "x".to_string(),
        };
        assert!(!invalid.is_valid());
    }
}
