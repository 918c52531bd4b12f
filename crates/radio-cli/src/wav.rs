use std::path::Path;

use anyhow::{Context, Result, bail};
use hound::{SampleFormat, WavSpec, WavWriter};
use radio_engine::FetchedTrack;

/// Write the track as 16-bit PCM WAV.
pub fn write_track(path: &Path, track: &FetchedTrack) -> Result<()> {
    if track.channels == 0 || track.sample_rate == 0 {
        bail!(
            "track has no playable format ({} ch @ {} Hz)",
            track.channels,
            track.sample_rate
        );
    }
    let spec = WavSpec {
        channels: track.channels,
        sample_rate: track.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer =
        WavWriter::create(path, spec).with_context(|| format!("create {:?}", path))?;
    for &sample in &track.samples {
        writer
            .write_sample(to_i16(sample))
            .with_context(|| format!("write {:?}", path))?;
    }
    writer.finalize().with_context(|| format!("finalize {:?}", path))?;
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}
