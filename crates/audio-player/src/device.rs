//! Output device discovery and selection on top of CPAL.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle.filter(|n| !n.trim().is_empty()) {
        let mut devices = host.output_devices().context("enumerate output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .map(|desc| matches_device_name(&desc.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("no output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))
}

/// Choose the output config closest to the track's sample rate.
///
/// Prefers the highest supported rate at or below `target_rate`; falls back to the lowest
/// rate above it. Ties are broken by sample format (float first).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = target_rate.is_none_or(|t| rate <= t);
        let rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate((below, rate, rank), (*b_below, *b_rate, *b_rank))
            }
        };
        if replace {
            best = Some((below, rate, rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("no supported output configs"))
}

/// Prefer a large fixed buffer when the device reports a range, capped to keep latency sane.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of all output devices on `host`.
pub fn list_output_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("enumerate output devices")?;
    let mut names = Vec::new();
    for d in devices {
        match d.description() {
            Ok(desc) => names.push(desc.name().to_string()),
            Err(e) => tracing::warn!(error = %e, "skipping device without description"),
        }
    }
    Ok(names)
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(t) => t.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Compare `(below_target, rate, format_rank)` tuples.
fn is_better_candidate(candidate: (bool, u32, u8), best: (bool, u32, u8)) -> bool {
    let (below, rate, rank) = candidate;
    let (b_below, b_rate, b_rank) = best;
    if below != b_below {
        below
    } else if rate != b_rate {
        // Below target: closer means higher. Above target: closer means lower.
        if below { rate > b_rate } else { rate < b_rate }
    } else {
        rank < b_rank
    }
}

pub(crate) fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}
