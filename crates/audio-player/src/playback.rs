//! CPAL output stream and its real-time callback.
//!
//! The callback refills a local buffer from the queue without blocking, maps channels
//! (mono↔stereo, best-effort otherwise), applies the volume gain and converts to the
//! device sample format. While paused it writes silence and leaves the queue untouched.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::output::OutputControls;
use crate::queue::{PopStrategy, SampleQueue};

/// Build a CPAL output stream that plays interleaved samples from `queue`.
///
/// `queue` must already be at the device sample rate.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    refill_max_frames: usize,
    controls: &OutputControls,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, refill_max_frames, controls),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, refill_max_frames, controls),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, refill_max_frames, controls),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, refill_max_frames, controls),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    refill_max_frames: usize,
    controls: &OutputControls,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = (config.channels as usize).max(1);
    let refill_max_frames = refill_max_frames.max(1);
    let queue = queue.clone();
    let controls = controls.clone();
    let mut local = LocalBuffer {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if controls.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let gain = volume_gain(controls.volume.load(Ordering::Relaxed));

            let frames = data.len() / dst_channels;
            let mut filled = 0usize;
            for frame in 0..frames {
                if local.pos >= local.src.len() {
                    local.pos = 0;
                    match queue.pop(PopStrategy::NonBlocking {
                        max_frames: refill_max_frames,
                    }) {
                        Some(v) => local.src = v,
                        None => {
                            local.src.clear();
                            controls.underrun_events.fetch_add(1, Ordering::Relaxed);
                            controls
                                .underrun_frames
                                .fetch_add((frames - frame) as u64, Ordering::Relaxed);
                            data[frame * dst_channels..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..dst_channels {
                    let sample = local.next_mapped(dst_channels, ch) * gain;
                    data[frame * dst_channels + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
                filled += 1;
            }

            if filled > 0 {
                controls.played_frames.fetch_add(filled as u64, Ordering::Relaxed);
            }
        },
        |err| tracing::warn!(error = %err, "output stream error"),
        None,
    )?;

    Ok(stream)
}

/// Linear gain for a 0..=255 volume.
pub fn volume_gain(volume: u8) -> f32 {
    volume as f32 / 255.0
}

/// Samples fetched from the queue but not yet written to the device.
struct LocalBuffer {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

impl LocalBuffer {
    /// Read one output sample for `dst_ch`; `pos` advances after the last destination channel.
    fn next_mapped(&mut self, dst_channels: usize, dst_ch: usize) -> f32 {
        if self.pos >= self.src.len() {
            return 0.0;
        }
        let start = self.pos;
        let get = |ch: usize| -> f32 {
            if ch < self.src_channels {
                self.src.get(start + ch).copied().unwrap_or(0.0)
            } else {
                0.0
            }
        };

        let out = match (self.src_channels, dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (1, _) => get(0),
            (src, _) => get(dst_ch.min(src.saturating_sub(1))),
        };

        if dst_ch + 1 == dst_channels {
            self.pos += self.src_channels;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(src_channels: usize, src: Vec<f32>) -> LocalBuffer {
        LocalBuffer {
            pos: 0,
            src_channels,
            src,
        }
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let mut b = buffer(1, vec![0.5, -0.5]);
        assert_eq!(b.next_mapped(2, 0), 0.5);
        assert_eq!(b.next_mapped(2, 1), 0.5);
        assert_eq!(b.next_mapped(2, 0), -0.5);
        assert_eq!(b.next_mapped(2, 1), -0.5);
        assert_eq!(b.next_mapped(2, 0), 0.0);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut b = buffer(2, vec![1.0, 0.0, 0.2, 0.4]);
        assert_eq!(b.next_mapped(1, 0), 0.5);
        assert!((b.next_mapped(1, 0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn extra_output_channels_repeat_last_source_channel() {
        let mut b = buffer(2, vec![0.1, 0.2]);
        assert_eq!(b.next_mapped(4, 0), 0.1);
        assert_eq!(b.next_mapped(4, 1), 0.2);
        assert_eq!(b.next_mapped(4, 2), 0.2);
        assert_eq!(b.next_mapped(4, 3), 0.2);
        assert_eq!(b.pos, 2);
    }

    #[test]
    fn volume_gain_spans_unit_range() {
        assert_eq!(volume_gain(0), 0.0);
        assert_eq!(volume_gain(255), 1.0);
        assert!((volume_gain(128) - 0.502).abs() < 0.01);
    }
}
