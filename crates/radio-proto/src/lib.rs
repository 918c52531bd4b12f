//! Wire protocol shared by the engine and streaming servers.
//!
//! A single TCP connection carries either one playlist query or one streaming session.
//!
//! Connection format:
//! - prelude: 4 bytes "LRAD" + version u16 LE (client first, then server)
//! - server sends a `CAPABILITIES` frame
//! - client sends `PLAY_REQUEST` or `LIST_PLAYLISTS`
//! - then repeated frames:
//!   - kind: u8
//!   - len: u32 LE
//!   - payload: [u8; len]
//!
//! When an obfuscation key is configured, every byte after the prelude passes
//! through [`Obfuscated`].

use std::io::{self, Read, Write};
use std::sync::Arc;

use radio_types::{CoverSize, EncoderKind, Settings, TrackMetadata};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const MAGIC: [u8; 4] = *b"LRAD";
pub const VERSION: u16 = 1;

/// Upper bound for a single frame payload. Anything larger means the stream is out of sync.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Server → client: supported encoders.
    Capabilities = 0x01,
    /// Client → server: start streaming with the given settings.
    PlayRequest = 0x02,
    /// Client → server: request the playlist names.
    ListPlaylists = 0x03,
    /// Server → client: newline-delimited playlist names.
    PlaylistList = 0x04,

    /// Server → client: a new track begins (header JSON + cover bytes).
    TrackStart = 0x10,
    /// Server → client: one encoded audio frame.
    Fragment = 0x11,

    Error = 0x7F,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        let k = match b {
            0x01 => FrameKind::Capabilities,
            0x02 => FrameKind::PlayRequest,
            0x03 => FrameKind::ListPlaylists,
            0x04 => FrameKind::PlaylistList,
            0x10 => FrameKind::TrackStart,
            0x11 => FrameKind::Fragment,
            0x7F => FrameKind::Error,
            _ => return None,
        };
        Some(k)
    }
}

/// A frame as read off the wire. The kind stays raw so unknown frames can be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn kind(&self) -> Option<FrameKind> {
        FrameKind::from_u8(self.kind)
    }
}

/// Connection prelude: magic + version.
pub fn write_prelude(mut w: impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

/// Read and validate the connection prelude.
pub fn read_prelude(mut r: impl Read) -> io::Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }

    let mut ver = [0u8; 2];
    r.read_exact(&mut ver)?;
    let version = u16::from_le_bytes(ver);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version {version}"),
        ));
    }

    Ok(())
}

/// Write a frame header + payload.
pub fn write_frame(mut w: impl Write, kind: FrameKind, payload: &[u8]) -> io::Result<()> {
    let frame = encode_frame(kind, payload)?;
    w.write_all(&frame)?;
    Ok(())
}

/// Encode a frame into a single buffer (header + payload).
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> io::Result<Vec<u8>> {
    let len: u32 = payload
        .len()
        .try_into()
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;

    let mut out = Vec::with_capacity(1 + 4 + payload.len());
    out.push(kind as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Read a frame header and return `(raw kind, len)`.
///
/// Lengths above [`MAX_FRAME_LEN`] are rejected with `InvalidData`.
pub fn read_frame_header(mut r: impl Read) -> io::Result<(u8, u32)> {
    let mut kindb = [0u8; 1];
    r.read_exact(&mut kindb)?;

    let mut lenb = [0u8; 4];
    r.read_exact(&mut lenb)?;
    let len = u32::from_le_bytes(lenb);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }
    Ok((kindb[0], len))
}

/// Read one complete frame.
pub fn read_frame(mut r: impl Read) -> io::Result<RawFrame> {
    let (kind, len) = read_frame_header(&mut r)?;
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(RawFrame { kind, payload })
}

/// Encoders offered by a server.
///
/// Kept as raw codes so a newer server advertising unknown encoders still parses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub encoders: Vec<u8>,
}

impl Capabilities {
    pub fn new(encoders: &[EncoderKind]) -> Self {
        Self {
            encoders: encoders.iter().map(|e| e.code()).collect(),
        }
    }

    pub fn supports(&self, encoder: EncoderKind) -> bool {
        self.encoders.contains(&encoder.code())
    }
}

/// Session parameters sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayRequest {
    pub encoder: u8,
    pub cover: i32,
    /// `None` streams from the whole catalog.
    pub playlist: Option<String>,
}

impl PlayRequest {
    pub fn new(settings: Settings, playlist: Option<&str>) -> Self {
        Self {
            encoder: settings.encoder.code(),
            cover: settings.cover.code(),
            playlist: playlist
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        }
    }

    /// Typed settings, or `None` if either code is unknown.
    pub fn settings(&self) -> Option<Settings> {
        Some(Settings {
            encoder: EncoderKind::from_code(self.encoder)?,
            cover: CoverSize::from_code(self.cover)?,
        })
    }
}

/// Per-track header carried by `TRACK_START`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackHeader {
    pub title: String,
    pub album: String,
    pub artist: String,
    pub track_length_secs: u64,
    pub track_length_frac: f32,
    pub channels: u16,
    pub sample_rate: u32,
    pub encoder: u8,
    /// Decoder configuration (ALAC magic cookie).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magic_cookie: Option<Vec<u8>>,
}

impl TrackHeader {
    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            title: self.title.clone(),
            album: self.album.clone(),
            artist: self.artist.clone(),
        }
    }

    /// Track duration in seconds.
    pub fn length_secs(&self) -> f64 {
        let frac = if self.track_length_frac.is_finite() {
            self.track_length_frac.clamp(0.0, 1.0) as f64
        } else {
            0.0
        };
        self.track_length_secs as f64 + frac
    }

    pub fn encoder_kind(&self) -> Option<EncoderKind> {
        EncoderKind::from_code(self.encoder)
    }
}

pub fn encode_json<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> io::Result<T> {
    serde_json::from_slice(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Encode `TRACK_START` payload:
/// - header_len: u32 LE
/// - header:     JSON [`TrackHeader`]
/// - cover:      remaining bytes, JPEG (may be empty)
pub fn encode_track_start(header: &TrackHeader, cover: &[u8]) -> io::Result<Vec<u8>> {
    let json = encode_json(header)?;
    let json_len: u32 = json
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "track header too large"))?;
    let mut out = Vec::with_capacity(4 + json.len() + cover.len());
    out.extend_from_slice(&json_len.to_le_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(cover);
    Ok(out)
}

/// Decode `TRACK_START` payload into the header and the (possibly empty) cover bytes.
pub fn decode_track_start(payload: &[u8]) -> io::Result<(TrackHeader, Vec<u8>)> {
    if payload.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short TRACK_START"));
    }
    let json_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let rest = &payload[4..];
    if rest.len() < json_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "TRACK_START header length mismatch",
        ));
    }
    let header: TrackHeader = decode_json(&rest[..json_len])?;
    Ok((header, rest[json_len..].to_vec()))
}

/// Encode playlist names, one per line.
pub fn encode_playlist_list(names: &[String]) -> Vec<u8> {
    names.join("\n").into_bytes()
}

/// Split a `PLAYLIST_LIST` payload into raw lines.
///
/// Invalid UTF-8 is replaced rather than rejected; filtering is the caller's job.
pub fn decode_playlist_list(payload: &[u8]) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    String::from_utf8_lossy(payload)
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

/// Repeating-key XOR applied to the byte stream after the prelude.
#[derive(Debug, Clone)]
pub struct XorCipher {
    key: Arc<[u8]>,
    pos: usize,
}

impl XorCipher {
    /// Returns `None` for an empty key.
    pub fn new(key: Arc<[u8]>) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        Some(Self { key, pos: 0 })
    }

    pub fn apply(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b ^= self.key[self.pos];
            self.pos = (self.pos + 1) % self.key.len();
        }
    }
}

/// Stream wrapper that optionally XORs everything passing through it.
///
/// Read and write directions must use separate instances; each tracks its own key position.
#[derive(Debug)]
pub struct Obfuscated<S> {
    inner: S,
    cipher: Option<XorCipher>,
}

impl<S> Obfuscated<S> {
    pub fn new(inner: S, key: Option<Arc<[u8]>>) -> Self {
        Self {
            inner,
            cipher: key.and_then(XorCipher::new),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read> Read for Obfuscated<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.apply(&mut buf[..n]);
        }
        Ok(n)
    }
}

impl<S: Write> Write for Obfuscated<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.cipher.as_mut() {
            None => self.inner.write(buf),
            Some(cipher) => {
                // Key position must only advance for bytes that hit the wire, so write all.
                let mut scratch = buf.to_vec();
                cipher.apply(&mut scratch);
                self.inner.write_all(&scratch)?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn prelude_roundtrip_ok() {
        let mut buf = Vec::new();
        write_prelude(&mut buf).unwrap();
        let mut cur = Cursor::new(buf);
        read_prelude(&mut cur).unwrap();
    }

    #[test]
    fn prelude_rejects_bad_magic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"NOPE");
        buf.extend_from_slice(&VERSION.to_le_bytes());
        let mut cur = Cursor::new(buf);
        let err = read_prelude(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn prelude_rejects_bad_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&(VERSION + 1).to_le_bytes());
        let mut cur = Cursor::new(buf);
        let err = read_prelude(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_frame_returns_kind_and_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, FrameKind::Fragment, b"abc123").unwrap();

        let frame = read_frame(Cursor::new(buf)).unwrap();
        assert_eq!(frame.kind(), Some(FrameKind::Fragment));
        assert_eq!(frame.payload, b"abc123");
    }

    #[test]
    fn unknown_frame_kind_is_kept_raw() {
        let mut buf = vec![0x55];
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(b"zz");
        let frame = read_frame(Cursor::new(buf)).unwrap();
        assert_eq!(frame.kind, 0x55);
        assert_eq!(frame.kind(), None);
    }

    #[test]
    fn frame_header_rejects_oversized_len() {
        let mut buf = vec![FrameKind::Fragment as u8];
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let err = read_frame_header(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn track_start_carries_header_and_cover() {
        let header = TrackHeader {
            title: "Song".to_string(),
            album: "Album".to_string(),
            artist: "Artist".to_string(),
            track_length_secs: 183,
            track_length_frac: 0.5,
            channels: 2,
            sample_rate: 44_100,
            encoder: EncoderKind::Flac.code(),
            magic_cookie: None,
        };
        let payload = encode_track_start(&header, &[0xFF, 0xD8, 0xFF]).unwrap();
        let (decoded, cover) = decode_track_start(&payload).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(cover, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(decoded.length_secs(), 183.5);
        assert_eq!(decoded.encoder_kind(), Some(EncoderKind::Flac));
    }

    #[test]
    fn track_start_rejects_truncated_header() {
        let mut payload = 100u32.to_le_bytes().to_vec();
        payload.extend_from_slice(b"{}");
        let err = decode_track_start(&payload).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn length_secs_ignores_bad_fraction() {
        let header = TrackHeader {
            track_length_secs: 10,
            track_length_frac: f32::NAN,
            ..TrackHeader::default()
        };
        assert_eq!(header.length_secs(), 10.0);
    }

    #[test]
    fn playlist_list_splits_lines() {
        let payload = b"Rock\r\n\nJazz\n";
        assert_eq!(
            decode_playlist_list(payload),
            vec!["Rock".to_string(), "".to_string(), "Jazz".to_string(), "".to_string()]
        );
        assert!(decode_playlist_list(b"").is_empty());
    }

    #[test]
    fn play_request_drops_blank_playlist() {
        let req = PlayRequest::new(Settings::default(), Some("   "));
        assert_eq!(req.playlist, None);
        let req = PlayRequest::new(Settings::default(), Some(" Jazz "));
        assert_eq!(req.playlist.as_deref(), Some("Jazz"));
        assert_eq!(req.settings(), Some(Settings::default()));
    }

    #[test]
    fn capabilities_support_check() {
        let caps = Capabilities::new(&[EncoderKind::Pcm16, EncoderKind::Sea]);
        assert!(caps.supports(EncoderKind::Sea));
        assert!(!caps.supports(EncoderKind::Flac));
    }

    #[test]
    fn obfuscated_streams_are_symmetric() {
        let key: Arc<[u8]> = Arc::from(&b"k3y"[..]);
        let mut wire = Vec::new();
        {
            let mut w = Obfuscated::new(&mut wire, Some(key.clone()));
            write_frame(&mut w, FrameKind::Error, b"hello there").unwrap();
        }
        assert_ne!(&wire[5..], b"hello there");

        let r = Obfuscated::new(Cursor::new(wire), Some(key));
        let frame = read_frame(r).unwrap();
        assert_eq!(frame.kind(), Some(FrameKind::Error));
        assert_eq!(frame.payload, b"hello there");
    }

    #[test]
    fn empty_key_disables_obfuscation() {
        let mut wire = Vec::new();
        {
            let mut w = Obfuscated::new(&mut wire, Some(Arc::from(&b""[..])));
            w.write_all(b"plain").unwrap();
        }
        assert_eq!(wire, b"plain");
    }
}
