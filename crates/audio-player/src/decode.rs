//! Per-encoder frame decoders.
//!
//! Every encoder turns one network fragment into interleaved `f32` samples at the
//! track's native rate. Decoders are created per track via [`decoder_for`]:
//! - PCM16 / PCM-float reinterpret raw bytes
//! - FLAC / Vorbis fragments are self-contained streams probed by Symphonia
//! - ALAC keeps one Symphonia decoder alive for the whole track
//! - Sea keeps LMS predictor state between fragments

use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};

use radio_types::EncoderKind;
use symphonia::core::audio::{AudioBufferRef, Channels, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_ALAC, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::sea::SeaDecoder;

/// Why a fragment produced no audio.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The fragment is malformed; drop it and keep streaming.
    #[error("corrupt frame: {0}")]
    FrameCorrupt(String),
    /// The track cannot be decoded at all with the given parameters.
    #[error("unsupported stream: {0}")]
    Unsupported(String),
}

impl DecodeError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        DecodeError::FrameCorrupt(msg.into())
    }
}

/// Native PCM layout of a track as announced by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Stateful decoder for one track's fragments.
pub trait FrameDecoder: Send {
    fn encoder(&self) -> EncoderKind;

    /// Decode one fragment into interleaved samples.
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>, DecodeError>;
}

/// Build the decoder for one track.
pub fn decoder_for(
    encoder: EncoderKind,
    format: StreamFormat,
    magic_cookie: Option<&[u8]>,
) -> Result<Box<dyn FrameDecoder>, DecodeError> {
    if format.channels == 0 || format.sample_rate == 0 {
        return Err(DecodeError::Unsupported(format!(
            "invalid track format {}ch @ {}Hz",
            format.channels, format.sample_rate
        )));
    }
    let decoder: Box<dyn FrameDecoder> = match encoder {
        EncoderKind::Pcm16 => Box::new(Pcm16Decoder { format }),
        EncoderKind::PcmFloat => Box::new(PcmFloatDecoder { format }),
        EncoderKind::Flac => Box::new(ContainerDecoder {
            encoder,
            format,
            extension: "flac",
        }),
        EncoderKind::Vorbis => Box::new(ContainerDecoder {
            encoder,
            format,
            extension: "ogg",
        }),
        EncoderKind::Alac => Box::new(AlacDecoder::new(format, magic_cookie)?),
        EncoderKind::Sea => Box::new(SeaFrameDecoder {
            inner: SeaDecoder::new(format.channels),
        }),
    };
    Ok(decoder)
}

fn check_channels(samples: usize, channels: usize) -> Result<(), DecodeError> {
    if samples % channels != 0 {
        return Err(DecodeError::corrupt(format!(
            "{samples} samples do not divide into {channels} channels"
        )));
    }
    Ok(())
}

fn i16_to_f32(v: i16) -> f32 {
    (v as f32 / 32767.0).max(-1.0)
}

struct Pcm16Decoder {
    format: StreamFormat,
}

impl FrameDecoder for Pcm16Decoder {
    fn encoder(&self) -> EncoderKind {
        EncoderKind::Pcm16
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>, DecodeError> {
        if frame.len() % 2 != 0 {
            return Err(DecodeError::corrupt(format!(
                "pcm16 fragment has odd length {}",
                frame.len()
            )));
        }
        check_channels(frame.len() / 2, self.format.channels)?;
        Ok(frame
            .chunks_exact(2)
            .map(|b| i16_to_f32(i16::from_le_bytes([b[0], b[1]])))
            .collect())
    }
}

struct PcmFloatDecoder {
    format: StreamFormat,
}

impl FrameDecoder for PcmFloatDecoder {
    fn encoder(&self) -> EncoderKind {
        EncoderKind::PcmFloat
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>, DecodeError> {
        if frame.len() % 4 != 0 {
            return Err(DecodeError::corrupt(format!(
                "float fragment length {} not a multiple of 4",
                frame.len()
            )));
        }
        check_channels(frame.len() / 4, self.format.channels)?;
        frame
            .chunks_exact(4)
            .map(|b| {
                let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                if v.is_finite() {
                    Ok(v)
                } else {
                    Err(DecodeError::corrupt("non-finite float sample"))
                }
            })
            .collect()
    }
}

/// Fragments that are complete FLAC or Ogg streams on their own.
struct ContainerDecoder {
    encoder: EncoderKind,
    format: StreamFormat,
    extension: &'static str,
}

impl FrameDecoder for ContainerDecoder {
    fn encoder(&self) -> EncoderKind {
        self.encoder
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(frame.to_vec())), Default::default());
        let mut hint = Hint::new();
        hint.with_extension(self.extension);

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::corrupt(format!("{} probe: {e}", self.extension)))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| DecodeError::corrupt("fragment has no audio track"))?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::corrupt(format!("codec init: {e}")))?;

        let mut out = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) if out.is_empty() => {
                    return Err(DecodeError::corrupt(format!("read packet: {e}")));
                }
                Err(e) => {
                    tracing::debug!(error = %e, "fragment ended early");
                    break;
                }
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(decoded) => append_interleaved(decoded, self.format.channels, &mut out)?,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(error = e, "packet skipped");
                }
                Err(e) => return Err(DecodeError::corrupt(format!("decode: {e}"))),
            }
        }
        Ok(out)
    }
}

/// Raw ALAC packets decoded with a decoder configured once from the magic cookie.
struct AlacDecoder {
    decoder: Box<dyn Decoder>,
    channels: usize,
    ts: u64,
}

impl AlacDecoder {
    fn new(format: StreamFormat, magic_cookie: Option<&[u8]>) -> Result<Self, DecodeError> {
        let cookie = magic_cookie
            .filter(|c| !c.is_empty())
            .ok_or_else(|| DecodeError::Unsupported("alac track without magic cookie".into()))?;

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_ALAC)
            .with_sample_rate(format.sample_rate)
            .with_channels(channel_mask(format.channels))
            .with_extra_data(cookie.to_vec().into_boxed_slice());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(format!("alac init: {e}")))?;
        Ok(Self {
            decoder,
            channels: format.channels,
            ts: 0,
        })
    }
}

impl FrameDecoder for AlacDecoder {
    fn encoder(&self) -> EncoderKind {
        EncoderKind::Alac
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>, DecodeError> {
        let packet = Packet::new_from_slice(0, self.ts, 0, frame);
        let decoder = &mut self.decoder;
        let channels = self.channels;
        // Symphonia's ALAC decoder slices by the packet's own frame count and
        // panics when it exceeds the cookie's frame length.
        let decoded = catch_unwind(AssertUnwindSafe(move || -> Result<Vec<f32>, DecodeError> {
            let decoded = decoder
                .decode(&packet)
                .map_err(|e| DecodeError::corrupt(format!("alac: {e}")))?;
            let mut out = Vec::with_capacity(decoded.frames() * channels);
            append_interleaved(decoded, channels, &mut out)?;
            Ok(out)
        }))
        .unwrap_or_else(|_| Err(DecodeError::corrupt("alac: packet longer than the cookie allows")))?;
        self.ts += (decoded.len() / self.channels) as u64;
        Ok(decoded)
    }
}

struct SeaFrameDecoder {
    inner: SeaDecoder,
}

impl FrameDecoder for SeaFrameDecoder {
    fn encoder(&self) -> EncoderKind {
        EncoderKind::Sea
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>, DecodeError> {
        let pcm = self.inner.decode_frame(frame)?;
        Ok(pcm.into_iter().map(i16_to_f32).collect())
    }
}

fn append_interleaved(
    decoded: AudioBufferRef<'_>,
    channels: usize,
    out: &mut Vec<f32>,
) -> Result<(), DecodeError> {
    let spec = *decoded.spec();
    let got = spec.channels.count();
    if got != channels {
        return Err(DecodeError::corrupt(format!(
            "decoded {got} channels, track has {channels}"
        )));
    }
    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    buf.copy_interleaved_ref(decoded);
    out.extend_from_slice(buf.samples());
    Ok(())
}

fn channel_mask(channels: usize) -> Channels {
    let bits = if channels >= 32 {
        u32::MAX
    } else {
        (1u32 << channels) - 1
    };
    Channels::from_bits_truncate(bits)
}
