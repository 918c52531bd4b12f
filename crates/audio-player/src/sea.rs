//! Sea: LMS-predicted ADPCM codec used for low-bandwidth streaming.
//!
//! Frame layout (all integers little-endian):
//!
//! ```text
//! b'S' | version u8 | channels u8 | flags u8 | samples_per_channel u16
//! [flags & 1] per channel: history [i16; 4], weights [i16; 4]
//! slices: for each slice index, for each channel, one u64
//! ```
//!
//! Each slice packs a 4-bit scale factor index in the top bits followed by
//! twenty 3-bit quantized residuals, most significant first. Predictor state
//! carries over between frames, so a frame without state is only decodable
//! after one that had it.

use crate::decode::DecodeError;

pub const FRAME_MAGIC: u8 = b'S';
pub const FRAME_VERSION: u8 = 1;
pub const SLICE_LEN: usize = 20;
pub const LMS_LEN: usize = 4;
/// Largest frame the encoder produces, in samples per channel.
pub const MAX_FRAME_SAMPLES: usize = 256 * SLICE_LEN;

const HEADER_LEN: usize = 6;
const STATE_LEN: usize = LMS_LEN * 2 * 2;
const FLAG_HAS_STATE: u8 = 0x01;
/// Encoder re-sends predictor state every this many frames.
const STATE_INTERVAL: u64 = 16;

const SCALEFACTORS: [i32; 16] = [
    1, 7, 21, 45, 84, 138, 211, 304, 421, 562, 731, 928, 1157, 1419, 1715, 2048,
];
const DEQUANT_MULT: [f64; 8] = [0.75, -0.75, 2.5, -2.5, 4.5, -4.5, 7.0, -7.0];
/// Maps a rounded residual/scale ratio in -8..=8 to its 3-bit code.
const QUANT_TAB: [u8; 17] = [7, 7, 7, 5, 5, 3, 3, 1, 0, 0, 2, 2, 4, 4, 6, 6, 6];

fn dequant(sf: usize, code: usize) -> i32 {
    (SCALEFACTORS[sf] as f64 * DEQUANT_MULT[code]).round() as i32
}

fn clamp_i16(v: i32) -> i32 {
    v.clamp(i16::MIN as i32, i16::MAX as i32)
}

/// Per-channel sign-sign LMS predictor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lms {
    history: [i32; LMS_LEN],
    weights: [i32; LMS_LEN],
}

impl Default for Lms {
    fn default() -> Self {
        Self {
            history: [0; LMS_LEN],
            weights: [0, 0, -(1 << 13), 1 << 14],
        }
    }
}

impl Lms {
    fn predict(&self) -> i32 {
        let sum: i64 = self
            .history
            .iter()
            .zip(self.weights.iter())
            .map(|(h, w)| *h as i64 * *w as i64)
            .sum();
        (sum >> 13).clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    fn update(&mut self, sample: i32, residual: i32) {
        let delta = residual >> 4;
        for (w, h) in self.weights.iter_mut().zip(self.history.iter()) {
            *w = w.saturating_add(if *h < 0 { -delta } else { delta });
        }
        self.history.rotate_left(1);
        self.history[LMS_LEN - 1] = sample;
    }

    fn write(&self, out: &mut Vec<u8>) {
        for h in self.history {
            out.extend_from_slice(&(clamp_i16(h) as i16).to_le_bytes());
        }
        for w in self.weights {
            out.extend_from_slice(&(clamp_i16(w) as i16).to_le_bytes());
        }
    }

    fn read(bytes: &[u8]) -> Self {
        let mut lms = Lms {
            history: [0; LMS_LEN],
            weights: [0; LMS_LEN],
        };
        for i in 0..LMS_LEN {
            lms.history[i] = i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]) as i32;
            let off = 2 * (LMS_LEN + i);
            lms.weights[i] = i16::from_le_bytes([bytes[off], bytes[off + 1]]) as i32;
        }
        lms
    }

    fn normalized(&self) -> Self {
        Self {
            history: self.history.map(clamp_i16),
            weights: self.weights.map(clamp_i16),
        }
    }
}

/// Streaming Sea decoder; one instance per track.
#[derive(Debug)]
pub struct SeaDecoder {
    channels: usize,
    lms: Option<Vec<Lms>>,
}

impl SeaDecoder {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            lms: None,
        }
    }

    /// Decode one frame into interleaved i16 samples.
    pub fn decode_frame(&mut self, frame: &[u8]) -> Result<Vec<i16>, DecodeError> {
        if frame.len() < HEADER_LEN {
            return Err(DecodeError::corrupt("sea frame shorter than header"));
        }
        if frame[0] != FRAME_MAGIC {
            return Err(DecodeError::corrupt("sea frame magic mismatch"));
        }
        if frame[1] != FRAME_VERSION {
            return Err(DecodeError::corrupt(format!("sea frame version {}", frame[1])));
        }
        let channels = frame[2] as usize;
        if channels != self.channels {
            return Err(DecodeError::corrupt(format!(
                "sea frame has {channels} channels, track has {}",
                self.channels
            )));
        }
        let has_state = frame[3] & FLAG_HAS_STATE != 0;
        let samples = u16::from_le_bytes([frame[4], frame[5]]) as usize;
        let slices = samples.div_ceil(SLICE_LEN);

        let state_len = if has_state { STATE_LEN * channels } else { 0 };
        let expected = HEADER_LEN + state_len + slices * channels * 8;
        if frame.len() != expected {
            return Err(DecodeError::corrupt(format!(
                "sea frame length {} != expected {expected}",
                frame.len()
            )));
        }

        let mut pos = HEADER_LEN;
        if has_state {
            let mut lms = Vec::with_capacity(channels);
            for _ in 0..channels {
                lms.push(Lms::read(&frame[pos..pos + STATE_LEN]));
                pos += STATE_LEN;
            }
            self.lms = Some(lms);
        }
        let Some(lms) = self.lms.as_mut() else {
            return Err(DecodeError::corrupt("sea frame without predictor state"));
        };

        let mut out = vec![0i16; samples * channels];
        for slice_idx in 0..slices {
            let start = slice_idx * SLICE_LEN;
            let end = (start + SLICE_LEN).min(samples);
            for (ch, state) in lms.iter_mut().enumerate() {
                let mut word = [0u8; 8];
                word.copy_from_slice(&frame[pos..pos + 8]);
                pos += 8;
                let mut slice = u64::from_le_bytes(word);

                let sf = (slice >> 60) as usize;
                slice <<= 4;
                for s in start..end {
                    let code = (slice >> 61) as usize;
                    slice <<= 3;
                    let residual = dequant(sf, code);
                    let sample = clamp_i16(state.predict().saturating_add(residual));
                    state.update(sample, residual);
                    out[s * channels + ch] = sample as i16;
                }
            }
        }
        Ok(out)
    }
}

/// Sea encoder for servers and test fixtures.
#[derive(Debug)]
pub struct SeaEncoder {
    channels: usize,
    lms: Vec<Lms>,
    frames: u64,
}

impl SeaEncoder {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            lms: vec![Lms::default(); channels.max(1)],
            frames: 0,
        }
    }

    /// Encode interleaved i16 samples as one frame.
    pub fn encode_frame(&mut self, interleaved: &[i16]) -> Result<Vec<u8>, DecodeError> {
        let channels = self.channels;
        if interleaved.len() % channels != 0 {
            return Err(DecodeError::corrupt("sample count not a multiple of channels"));
        }
        let samples = interleaved.len() / channels;
        if samples > MAX_FRAME_SAMPLES {
            return Err(DecodeError::Unsupported(format!(
                "sea frame of {samples} samples exceeds {MAX_FRAME_SAMPLES}"
            )));
        }
        if channels > u8::MAX as usize {
            return Err(DecodeError::Unsupported(format!("{channels} channels")));
        }

        let with_state = self.frames % STATE_INTERVAL == 0;
        self.frames += 1;

        let slices = samples.div_ceil(SLICE_LEN);
        let state_len = if with_state { STATE_LEN * channels } else { 0 };
        let mut out = Vec::with_capacity(HEADER_LEN + state_len + slices * channels * 8);
        out.push(FRAME_MAGIC);
        out.push(FRAME_VERSION);
        out.push(channels as u8);
        out.push(if with_state { FLAG_HAS_STATE } else { 0 });
        out.extend_from_slice(&(samples as u16).to_le_bytes());

        if with_state {
            for lms in self.lms.iter_mut() {
                *lms = lms.normalized();
                lms.write(&mut out);
            }
        }

        for slice_idx in 0..slices {
            let start = slice_idx * SLICE_LEN;
            let end = (start + SLICE_LEN).min(samples);
            for ch in 0..channels {
                let input: Vec<i32> = (start..end)
                    .map(|s| interleaved[s * channels + ch] as i32)
                    .collect();
                let (word, lms) = encode_slice(&self.lms[ch], &input);
                self.lms[ch] = lms;
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        Ok(out)
    }
}

/// Try every scale factor and keep the one with the smallest squared error.
fn encode_slice(lms: &Lms, input: &[i32]) -> (u64, Lms) {
    let mut best: Option<(u64, u64, Lms)> = None;
    for sf in 0..SCALEFACTORS.len() {
        let mut state = *lms;
        let mut word = sf as u64;
        let mut error: u64 = 0;
        for &sample in input {
            let predicted = state.predict();
            let residual = sample as i64 - predicted as i64;
            let ratio = (residual as f64 / SCALEFACTORS[sf] as f64).round() as i32;
            let code = QUANT_TAB[(ratio.clamp(-8, 8) + 8) as usize] as usize;
            let dq = dequant(sf, code);
            let reconstructed = clamp_i16(predicted.saturating_add(dq));
            let diff = (sample - reconstructed) as i64;
            error = error.saturating_add((diff * diff) as u64);
            state.update(reconstructed, dq);
            word = (word << 3) | code as u64;
        }
        if best.as_ref().is_none_or(|(_, e, _)| error < *e) {
            // Short tail slices are left-aligned like full ones.
            let pad = (SLICE_LEN - input.len()) * 3;
            best = Some((word << pad, error, state));
        }
    }
    match best {
        Some((word, _, state)) => (word, state),
        None => (0, *lms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, channels: usize) -> Vec<i16> {
        (0..len)
            .flat_map(|i| {
                let v = ((i as f64 * 0.05).sin() * 12_000.0) as i16;
                (0..channels).map(move |c| if c == 0 { v } else { v / 2 })
            })
            .collect()
    }

    #[test]
    fn encodes_and_decodes_close_to_input() {
        let input = sine(400, 2);
        let mut enc = SeaEncoder::new(2);
        let mut dec = SeaDecoder::new(2);
        let frame = enc.encode_frame(&input).unwrap();
        let out = dec.decode_frame(&frame).unwrap();
        assert_eq!(out.len(), input.len());

        let max_err = input
            .iter()
            .zip(out.iter())
            .map(|(a, b)| (*a as i32 - *b as i32).abs())
            .max()
            .unwrap();
        assert!(max_err < 2_000, "max error {max_err}");
    }

    #[test]
    fn decoder_follows_encoder_across_stateless_frames() {
        let input = sine(900, 1);
        let mut enc = SeaEncoder::new(1);
        let mut dec = SeaDecoder::new(1);
        let mut decoded = Vec::new();
        for chunk in input.chunks(300) {
            let frame = enc.encode_frame(chunk).unwrap();
            decoded.extend(dec.decode_frame(&frame).unwrap());
        }
        assert_eq!(decoded.len(), input.len());
        let tail_err = (input[899] as i32 - decoded[899] as i32).abs();
        assert!(tail_err < 2_000);
    }

    #[test]
    fn partial_slice_is_decoded() {
        let input = sine(27, 1);
        let frame = SeaEncoder::new(1).encode_frame(&input).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + STATE_LEN + 2 * 8);
        let out = SeaDecoder::new(1).decode_frame(&frame).unwrap();
        assert_eq!(out.len(), 27);
    }

    #[test]
    fn frame_without_known_state_is_corrupt() {
        let input = sine(40, 1);
        let mut enc = SeaEncoder::new(1);
        let _first = enc.encode_frame(&input).unwrap();
        let second = enc.encode_frame(&input).unwrap();
        assert_eq!(second[3] & FLAG_HAS_STATE, 0);

        let err = SeaDecoder::new(1).decode_frame(&second).unwrap_err();
        assert!(matches!(err, DecodeError::FrameCorrupt(_)));
    }

    #[test]
    fn rejects_truncated_and_mismatched_frames() {
        let frame = SeaEncoder::new(2).encode_frame(&sine(40, 2)).unwrap();
        let mut dec = SeaDecoder::new(2);
        assert!(dec.decode_frame(&frame[..frame.len() - 1]).is_err());
        assert!(SeaDecoder::new(1).decode_frame(&frame).is_err());

        let mut bad = frame.clone();
        bad[0] = b'X';
        assert!(dec.decode_frame(&bad).is_err());
    }

    #[test]
    fn encoder_rejects_oversized_frames() {
        let input = vec![0i16; MAX_FRAME_SAMPLES + 1];
        assert!(matches!(
            SeaEncoder::new(1).encode_frame(&input),
            Err(DecodeError::Unsupported(_))
        ));
    }
}
