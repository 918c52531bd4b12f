//! Output backends.
//!
//! An [`OutputBackend`] opens one [`ActiveOutput`] per track. The output drains the
//! track's queue until the producer closes it and it runs dry, or until cancelled.
//! [`CpalBackend`] plays through a sound device; [`NullBackend`] discards samples
//! (headless runs and tests) while honoring pause.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::decode::StreamFormat;
use crate::queue::{PopStrategy, SampleQueue};
use crate::{device, playback, resample};

/// Shared knobs and counters between the engine and an output.
#[derive(Clone, Debug)]
pub struct OutputControls {
    /// When set, outputs write silence and do not drain the queue.
    pub paused: Arc<AtomicBool>,
    /// Linear volume, 0..=255.
    pub volume: Arc<AtomicU8>,
    /// Frames handed to the device (or discarded by the null sink).
    pub played_frames: Arc<AtomicU64>,
    pub underrun_frames: Arc<AtomicU64>,
    pub underrun_events: Arc<AtomicU64>,
}

impl OutputControls {
    pub fn new(paused: Arc<AtomicBool>, volume: Arc<AtomicU8>) -> Self {
        Self {
            paused,
            volume,
            played_frames: Arc::new(AtomicU64::new(0)),
            underrun_frames: Arc::new(AtomicU64::new(0)),
            underrun_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// A running output for one track.
///
/// Not required to be `Send`: device streams must be dropped on the thread that built them.
pub trait ActiveOutput {
    /// Sample rate actually delivered to the sink.
    fn output_rate(&self) -> u32;

    /// Block until the track's queue is closed and drained, or `cancel` is set.
    ///
    /// Returns `true` when the track played out completely.
    fn finish(self: Box<Self>, cancel: &AtomicBool) -> bool;
}

/// Factory for per-track outputs.
pub trait OutputBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(
        &self,
        format: StreamFormat,
        queue: Arc<SampleQueue>,
        controls: OutputControls,
    ) -> Result<Box<dyn ActiveOutput>>;
}

/// Plays through a CPAL device, resampling when the device cannot run at the track rate.
#[derive(Clone, Debug, Default)]
pub struct CpalBackend {
    /// Case-insensitive device name substring; `None` uses the default device.
    pub device: Option<String>,
    pub playback: PlaybackConfig,
}

impl CpalBackend {
    pub fn new(device: Option<String>, playback: PlaybackConfig) -> Self {
        Self { device, playback }
    }
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(
        &self,
        format: StreamFormat,
        queue: Arc<SampleQueue>,
        controls: OutputControls,
    ) -> Result<Box<dyn ActiveOutput>> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, self.device.as_deref())?;
        let supported = device::pick_output_config(&device, Some(format.sample_rate))?;
        let mut stream_config: cpal::StreamConfig = supported.config();
        if let Some(size) = device::pick_buffer_size(&supported) {
            stream_config.buffer_size = size;
        }
        let dst_rate = stream_config.sample_rate;

        let (dstq, resampler) = if dst_rate == format.sample_rate {
            (queue.clone(), None)
        } else {
            tracing::info!(from_hz = format.sample_rate, to_hz = dst_rate, "resampling");
            let (q, join) = resample::start_resampler(
                queue.clone(),
                format.sample_rate,
                dst_rate,
                resample::ResampleConfig {
                    chunk_frames: self.playback.chunk_frames,
                    buffer_seconds: self.playback.buffer_seconds,
                },
            )?;
            (q, Some(join))
        };

        let stream = playback::build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            &dstq,
            self.playback.refill_max_frames,
            &controls,
        )?;
        stream.play().context("start output stream")?;

        tracing::info!(
            device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
            rate_hz = dst_rate,
            channels = stream_config.channels,
            format = ?supported.sample_format(),
            "output opened"
        );

        Ok(Box::new(CpalOutput {
            _stream: stream,
            srcq: queue,
            dstq,
            resampler,
            rate: dst_rate,
        }))
    }
}

struct CpalOutput {
    _stream: cpal::Stream,
    srcq: Arc<SampleQueue>,
    dstq: Arc<SampleQueue>,
    resampler: Option<JoinHandle<()>>,
    rate: u32,
}

impl ActiveOutput for CpalOutput {
    fn output_rate(&self) -> u32 {
        self.rate
    }

    fn finish(self: Box<Self>, cancel: &AtomicBool) -> bool {
        let drained = self.dstq.wait_drained_or_cancel(cancel);
        if drained {
            // Let the device play out what the last callback copied.
            thread::sleep(Duration::from_millis(100));
        } else {
            self.srcq.close();
            self.dstq.close();
        }
        if let Some(join) = self.resampler {
            let _ = join.join();
        }
        drained
    }
}

/// Discards samples. With `realtime`, drains at the track rate so elapsed time is meaningful.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBackend {
    pub realtime: bool,
}

const NULL_CHUNK_FRAMES: usize = 1024;

impl OutputBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(
        &self,
        format: StreamFormat,
        queue: Arc<SampleQueue>,
        controls: OutputControls,
    ) -> Result<Box<dyn ActiveOutput>> {
        let stop = Arc::new(AtomicBool::new(false));
        let realtime = self.realtime;
        let rate = format.sample_rate;
        let q = queue.clone();
        let stop_flag = stop.clone();
        let join = thread::Builder::new()
            .name("null-output".into())
            .spawn(move || null_drain(&q, &controls, &stop_flag, realtime, rate))
            .context("spawn null output thread")?;

        Ok(Box::new(NullOutput {
            queue,
            stop,
            join,
            rate,
        }))
    }
}

fn null_drain(
    queue: &SampleQueue,
    controls: &OutputControls,
    stop: &AtomicBool,
    realtime: bool,
    rate: u32,
) {
    let tick = Duration::from_millis(5);
    while !stop.load(Ordering::Relaxed) {
        if controls.paused.load(Ordering::Relaxed) {
            thread::sleep(tick);
            continue;
        }
        match queue.pop(PopStrategy::NonBlocking {
            max_frames: NULL_CHUNK_FRAMES,
        }) {
            Some(samples) => {
                let frames = samples.len() / queue.channels();
                controls.played_frames.fetch_add(frames as u64, Ordering::Relaxed);
                if realtime && rate > 0 {
                    thread::sleep(Duration::from_secs_f64(frames as f64 / rate as f64));
                }
            }
            None if queue.is_closed() => break,
            None => {
                queue.wait_for_any(tick);
            }
        }
    }
}

struct NullOutput {
    queue: Arc<SampleQueue>,
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
    rate: u32,
}

impl ActiveOutput for NullOutput {
    fn output_rate(&self) -> u32 {
        self.rate
    }

    fn finish(self: Box<Self>, cancel: &AtomicBool) -> bool {
        let drained = self.queue.wait_drained_or_cancel(cancel);
        if !drained {
            self.queue.close();
        }
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.join.join();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> StreamFormat {
        StreamFormat {
            sample_rate: 8_000,
            channels: 2,
        }
    }

    fn controls() -> OutputControls {
        OutputControls::new(Arc::new(AtomicBool::new(false)), Arc::new(AtomicU8::new(255)))
    }

    #[test]
    fn null_output_drains_closed_queue() {
        let queue = Arc::new(SampleQueue::new(2, 4096));
        queue.push_blocking(&[0.0; 200]);
        queue.close();

        let ctl = controls();
        let out = NullBackend::default()
            .open(format(), queue.clone(), ctl.clone())
            .unwrap();
        assert_eq!(out.output_rate(), 8_000);
        assert!(out.finish(&AtomicBool::new(false)));
        assert_eq!(ctl.played_frames.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn null_output_holds_samples_while_paused() {
        let queue = Arc::new(SampleQueue::new(2, 4096));
        queue.push_blocking(&[0.0; 64]);
        let ctl = controls();
        ctl.paused.store(true, Ordering::Relaxed);

        let out = NullBackend::default()
            .open(format(), queue.clone(), ctl.clone())
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.len_frames(), 32);
        assert_eq!(ctl.played_frames.load(Ordering::Relaxed), 0);

        assert!(!out.finish(&AtomicBool::new(true)));
        assert!(queue.is_closed());
    }
}
