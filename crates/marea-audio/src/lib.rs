//! marea-audio: Audio output using cpal
//!
//! Low-latency interleaved Float32 output with fixed buffer sizes. The host
//! is chosen per platform (JACK on Linux, ASIO on Windows when present,
//! CoreAudio on macOS).

mod device;
mod error;
mod stream;

pub use device::*;
pub use error::*;
pub use stream::*;

use marea_core::{BufferSize, ChannelLayout, SampleRate};

/// Audio output configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: SampleRate,
    pub buffer_size: BufferSize,
    pub layout: ChannelLayout,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            buffer_size: BufferSize::Samples256,
            layout: ChannelLayout::Stereo,
        }
    }
}
