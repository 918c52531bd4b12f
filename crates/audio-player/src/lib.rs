//! Audio decode and output stages shared by the radio engine and CLI.
//!
//! Data flows one way: encoded frame → [`decode`] → [`queue::SampleQueue`] →
//! optional [`resample`] stage → [`output`] backend (cpal callback or null sink).

pub mod config;
pub mod decode;
pub mod device;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod output;
pub mod playback;
pub mod queue;
pub mod resample;
pub mod sea;
