#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use audio_player::decode::StreamFormat;
use audio_player::fixtures;
use audio_player::output::{ActiveOutput, NullBackend, OutputBackend, OutputControls};
use audio_player::queue::SampleQueue;
use audio_player::sea::SeaEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use radio_proto::{
    Capabilities, FrameKind, Obfuscated, PlayRequest, TrackHeader, decode_json, encode_json,
    encode_playlist_list, encode_track_start, read_frame, read_prelude, write_frame, write_prelude,
};
use radio_types::EncoderKind;

pub struct MockTrack {
    pub header: TrackHeader,
    pub cover: Vec<u8>,
    pub fragments: Vec<Vec<u8>>,
}

impl MockTrack {
    /// Stereo PCM16 track of `frames` silent frames split into 4 fragments.
    pub fn pcm16(title: &str, frames: usize) -> Self {
        let bytes = vec![0u8; frames * 4];
        let chunk = (frames / 4).max(1) * 4;
        Self {
            header: TrackHeader {
                title: title.to_string(),
                album: "Album".to_string(),
                artist: "Artist".to_string(),
                track_length_secs: 12,
                track_length_frac: 0.5,
                channels: 2,
                sample_rate: 44_100,
                encoder: EncoderKind::Pcm16.code(),
                magic_cookie: None,
            },
            cover: Vec::new(),
            fragments: bytes.chunks(chunk).map(<[u8]>::to_vec).collect(),
        }
    }

    /// Stereo 44.1 kHz track of [`ENCODED_FRAMES`] frames in 4 fragments, encoded with `kind`.
    pub fn encoded(kind: EncoderKind, title: &str) -> Self {
        let format = StreamFormat {
            sample_rate: 44_100,
            channels: 2,
        };
        let per_fragment = ENCODED_FRAMES / 4;
        let ramp: Vec<i16> = (0..per_fragment)
            .flat_map(|f| (0..2).map(move |c| fixtures::ramp_sample(f, c)))
            .collect();

        let mut cookie = None;
        let fragments: Vec<Vec<u8>> = match kind {
            EncoderKind::Pcm16 => (0..4)
                .map(|_| ramp.iter().flat_map(|s| s.to_le_bytes()).collect())
                .collect(),
            EncoderKind::PcmFloat => (0..4)
                .map(|_| {
                    ramp.iter()
                        .flat_map(|&s| (s as f32 / 32768.0).to_le_bytes())
                        .collect()
                })
                .collect(),
            EncoderKind::Flac => (0..4)
                .map(|_| fixtures::flac_fragment(format, (per_fragment / 2) as u16, 2))
                .collect(),
            EncoderKind::Alac => {
                cookie = Some(fixtures::alac_cookie(format, 4096));
                (0..4)
                    .map(|_| fixtures::alac_packet(format, per_fragment as u32))
                    .collect()
            }
            EncoderKind::Vorbis => {
                // The first packet of each fragment only primes the decoder.
                let packets = per_fragment / fixtures::VORBIS_FRAMES_PER_PACKET + 1;
                (0..4)
                    .map(|_| fixtures::vorbis_fragment(format, packets))
                    .collect()
            }
            EncoderKind::Sea => {
                let mut enc = SeaEncoder::new(2);
                (0..4).map(|_| enc.encode_frame(&ramp).unwrap()).collect()
            }
        };

        let mut track = Self::pcm16(title, 0);
        track.header.encoder = kind.code();
        track.header.magic_cookie = cookie;
        track.fragments = fragments;
        track
    }

    pub fn with_cover(mut self, cover: Vec<u8>) -> Self {
        self.cover = cover;
        self
    }

    pub fn with_fragment(mut self, fragment: Vec<u8>) -> Self {
        self.fragments.push(fragment);
        self
    }

    pub fn with_fragment_at(mut self, index: usize, fragment: Vec<u8>) -> Self {
        self.fragments.insert(index, fragment);
        self
    }
}

/// Frames in every [`MockTrack::encoded`] track.
pub const ENCODED_FRAMES: usize = 2048;

pub struct Script {
    pub encoders: Vec<EncoderKind>,
    pub playlists: Vec<String>,
    pub tracks: Vec<MockTrack>,
    /// Keep the connection open after the last track until the client leaves.
    pub hold_open: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            encoders: EncoderKind::ALL.to_vec(),
            playlists: Vec::new(),
            tracks: vec![MockTrack::pcm16("First", 4096)],
            hold_open: true,
        }
    }
}

/// Loopback server speaking the radio wire protocol from a fixed script.
pub struct MockServer {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<PlayRequest>>>,
}

impl MockServer {
    pub fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(script);

        let conns = connections.clone();
        let reqs = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                conns.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                let reqs = reqs.clone();
                thread::spawn(move || {
                    let _ = serve(stream, &script, &reqs);
                });
            }
        });

        Self {
            addr,
            connections,
            requests,
        }
    }

    pub fn url(&self) -> String {
        format!("lonelyradio://{}", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PlayRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(
    stream: TcpStream,
    script: &Script,
    requests: &Mutex<Vec<PlayRequest>>,
) -> std::io::Result<()> {
    read_prelude(&stream)?;
    write_prelude(&stream)?;
    let mut reader = Obfuscated::new(stream.try_clone()?, None);
    let mut writer = Obfuscated::new(stream.try_clone()?, None);

    let caps = encode_json(&Capabilities::new(&script.encoders))?;
    write_frame(&mut writer, FrameKind::Capabilities, &caps)?;

    let request = read_frame(&mut reader)?;
    match request.kind() {
        Some(FrameKind::ListPlaylists) => {
            write_frame(
                &mut writer,
                FrameKind::PlaylistList,
                &encode_playlist_list(&script.playlists),
            )?;
            return Ok(());
        }
        Some(FrameKind::PlayRequest) => {
            requests.lock().unwrap().push(decode_json(&request.payload)?);
        }
        _ => return Ok(()),
    }

    for track in &script.tracks {
        let payload = encode_track_start(&track.header, &track.cover)?;
        write_frame(&mut writer, FrameKind::TrackStart, &payload)?;
        for fragment in &track.fragments {
            write_frame(&mut writer, FrameKind::Fragment, fragment)?;
        }
    }

    if script.hold_open {
        // Blocks until the client shuts the socket down.
        let mut sink = [0u8; 64];
        let mut raw = &stream;
        while raw.read(&mut sink)? > 0 {}
    }
    Ok(())
}

/// [`NullBackend`] that remembers each opened track's played-frame counter.
#[derive(Default)]
pub struct CountingBackend {
    inner: NullBackend,
    opened: Mutex<Vec<(StreamFormat, Arc<AtomicU64>)>>,
}

impl CountingBackend {
    /// Frames played per opened track, in open order.
    pub fn played_frames(&self) -> Vec<u64> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(_, played)| played.load(Ordering::Relaxed))
            .collect()
    }

    pub fn formats(&self) -> Vec<StreamFormat> {
        self.opened.lock().unwrap().iter().map(|(f, _)| *f).collect()
    }
}

impl OutputBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn open(
        &self,
        format: StreamFormat,
        queue: Arc<SampleQueue>,
        controls: OutputControls,
    ) -> anyhow::Result<Box<dyn ActiveOutput>> {
        self.opened
            .lock()
            .unwrap()
            .push((format, controls.played_frames.clone()));
        self.inner.open(format, queue, controls)
    }
}

/// Backend whose outputs blow up on open.
pub struct PanickingBackend;

impl OutputBackend for PanickingBackend {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn open(
        &self,
        _format: StreamFormat,
        _queue: Arc<SampleQueue>,
        _controls: OutputControls,
    ) -> anyhow::Result<Box<dyn ActiveOutput>> {
        panic!("output device vanished");
    }
}

/// Listener that accepts connections and never writes a byte.
pub struct SilentServer {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
}

impl SilentServer {
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let count = accepted.clone();
        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                count.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });
        Self { addr, accepted }
    }

    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200])));
    let mut out = Cursor::new(Vec::new());
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, 90))
        .unwrap();
    out.into_inner()
}

/// Address nothing listens on.
pub fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("tcp://{addr}")
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
