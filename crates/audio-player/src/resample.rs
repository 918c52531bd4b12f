//! Streaming resample stage.
//!
//! Converts a track's native rate to the output device rate with Rubato's async sinc
//! resampler on its own thread, reading one [`SampleQueue`] and filling another.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::queue::{PopStrategy, SampleQueue, capacity_for};

#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input chunk size in frames for the steady-state loop.
    pub chunk_frames: usize,
    /// Buffering (seconds) for the output queue.
    pub buffer_seconds: f32,
}

/// Start a resampler thread from `src_rate` to `dst_rate`.
///
/// The output queue is closed once `srcq` is closed and drained, or when `srcq`
/// reports closed early (cancel).
pub fn start_resampler(
    srcq: Arc<SampleQueue>,
    src_rate: u32,
    dst_rate: u32,
    cfg: ResampleConfig,
) -> Result<(Arc<SampleQueue>, JoinHandle<()>)> {
    let channels = srcq.channels();
    let dstq = Arc::new(SampleQueue::new(
        channels,
        capacity_for(dst_rate, channels, cfg.buffer_seconds),
    ));

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let chunk = cfg.chunk_frames.max(1);
    let ratio = dst_rate as f64 / src_rate.max(1) as f64;

    let out = dstq.clone();
    let join = thread::Builder::new()
        .name("resampler".into())
        .spawn(move || {
            let result = Async::<f32>::new_sinc(
                ratio,
                1.1,
                &params,
                chunk,
                channels,
                FixedAsync::Input,
            )
            .map_err(|e| anyhow!("resampler init {src_rate}Hz -> {dst_rate}Hz: {e}"))
            .and_then(|resampler| run(resampler, &srcq, &out, channels, chunk));
            if let Err(e) = result {
                tracing::error!(error = %e, "resampler stopped");
                // Unblock the producer; its samples have nowhere to go.
                srcq.close();
            }
            out.close();
        })
        .context("spawn resampler thread")?;

    Ok((dstq, join))
}

fn run(
    mut resampler: Async<f32>,
    srcq: &SampleQueue,
    dstq: &SampleQueue,
    channels: usize,
    chunk: usize,
) -> Result<()> {
    let mut out = vec![0.0f32; channels * chunk * 3];
    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    // Steady state: full chunks. Once closed, the tail is flushed as partial chunks.
    let mut tail = false;
    loop {
        let input = if tail {
            srcq.pop(PopStrategy::BlockingUpTo { max_frames: chunk })
        } else {
            srcq.pop(PopStrategy::BlockingExact { frames: chunk })
        };
        let Some(input) = input else {
            if tail {
                return Ok(());
            }
            tail = true;
            continue;
        };

        let frames = input.len() / channels;
        if frames == 0 {
            continue;
        }
        let input_adapter = InterleavedSlice::new(&input, channels, frames)
            .map_err(|e| anyhow!("interleaved input slice: {e}"))?;
        let out_frames = out.len() / channels;
        let mut output_adapter = InterleavedSlice::new_mut(&mut out, channels, out_frames)
            .map_err(|e| anyhow!("interleaved output slice: {e}"))?;

        indexing.partial_len = if frames < chunk { Some(frames) } else { None };
        let (_used, produced) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resample chunk: {e}"))?;

        if produced > 0 && !dstq.push_blocking(&out[..produced * channels]) {
            // Output closed by a cancel; nothing left to do.
            return Ok(());
        }
    }
}
