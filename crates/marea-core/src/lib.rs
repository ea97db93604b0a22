//! marea-core: Shared types, traits, and utilities for Marea
//!
//! This crate provides the foundational types used across all Marea crates.

mod buffer;
mod error;
mod fastmath;
mod sample;

pub use buffer::*;
pub use error::*;
pub use fastmath::*;
pub use sample::*;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_f32(self) -> f32 {
        self as u32 as f32
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            44100 => Some(Self::Hz44100),
            48000 => Some(Self::Hz48000),
            88200 => Some(Self::Hz88200),
            96000 => Some(Self::Hz96000),
            _ => None,
        }
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz44100
    }
}

/// Buffer size options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BufferSize {
    Samples64 = 64,
    Samples128 = 128,
    Samples256 = 256,
    Samples512 = 512,
    Samples1024 = 1024,
    Samples2048 = 2048,
}

impl BufferSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u32 as usize
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            64 => Some(Self::Samples64),
            128 => Some(Self::Samples128),
            256 => Some(Self::Samples256),
            512 => Some(Self::Samples512),
            1024 => Some(Self::Samples1024),
            2048 => Some(Self::Samples2048),
            _ => None,
        }
    }

    /// Calculate latency in milliseconds
    #[inline]
    pub fn latency_ms(self, sample_rate: SampleRate) -> f64 {
        (self.as_usize() as f64 / sample_rate.as_f64()) * 1000.0
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::Samples256
    }
}

/// Channel layout of a buffer or output bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Surround51, // L R C LFE Ls Rs
    Surround71, // L R C LFE Lss Rss Lrs Rrs
    Atmos,      // 7.1 bed plus 8 object slots
}

impl ChannelLayout {
    /// Number of channels for this layout
    pub fn channel_count(&self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Surround51 => 6,
            Self::Surround71 => 8,
            Self::Atmos => 16,
        }
    }

    pub fn from_channel_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            6 => Some(Self::Surround51),
            8 => Some(Self::Surround71),
            16 => Some(Self::Atmos),
            _ => None,
        }
    }

    /// Speaker positions in degrees (azimuth, elevation)
    ///
    /// LFE is placed below the listener as a virtual position; it is bass
    /// managed rather than panned. Atmos exposes its 7.1 bed only; object
    /// slots have no fixed loudspeaker position.
    pub fn speaker_positions(&self) -> &'static [(f64, f64)] {
        match self {
            Self::Mono => &[(0.0, 0.0)],
            Self::Stereo => &[(-30.0, 0.0), (30.0, 0.0)],
            Self::Surround51 => &[
                (-30.0, 0.0),  // L
                (30.0, 0.0),   // R
                (0.0, 0.0),    // C
                (0.0, -90.0),  // LFE
                (-110.0, 0.0), // Ls
                (110.0, 0.0),  // Rs
            ],
            Self::Surround71 | Self::Atmos => &[
                (-30.0, 0.0),  // L
                (30.0, 0.0),   // R
                (0.0, 0.0),    // C
                (0.0, -90.0),  // LFE
                (-90.0, 0.0),  // Lss
                (90.0, 0.0),   // Rss
                (-150.0, 0.0), // Lrs
                (150.0, 0.0),  // Rrs
            ],
        }
    }

    /// Index of the LFE channel, if the layout carries one
    pub fn lfe_index(&self) -> Option<usize> {
        match self {
            Self::Mono | Self::Stereo => None,
            _ => Some(3),
        }
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::Stereo
    }
}

/// Decibel value wrapper
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        if gain <= 0.0 {
            Self::NEG_INF
        } else {
            Self(20.0 * gain.log10())
        }
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        if self.0 <= -144.0 {
            0.0
        } else {
            10.0_f64.powf(self.0 / 20.0)
        }
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_latency() {
        let latency = BufferSize::Samples256.latency_ms(SampleRate::Hz44100);
        assert!((latency - 5.805).abs() < 0.01);

        let latency = BufferSize::Samples64.latency_ms(SampleRate::Hz44100);
        assert!((latency - 1.451).abs() < 0.01);
    }

    #[test]
    fn test_channel_layout_counts() {
        assert_eq!(ChannelLayout::Mono.channel_count(), 1);
        assert_eq!(ChannelLayout::Stereo.channel_count(), 2);
        assert_eq!(ChannelLayout::Surround51.channel_count(), 6);
        assert_eq!(ChannelLayout::Surround71.channel_count(), 8);
        assert_eq!(ChannelLayout::Atmos.channel_count(), 16);
    }

    #[test]
    fn test_layout_roundtrip() {
        for layout in [
            ChannelLayout::Mono,
            ChannelLayout::Stereo,
            ChannelLayout::Surround51,
            ChannelLayout::Surround71,
            ChannelLayout::Atmos,
        ] {
            assert_eq!(
                ChannelLayout::from_channel_count(layout.channel_count()),
                Some(layout)
            );
        }
    }

    #[test]
    fn test_decibels() {
        assert!((Decibels(-6.0).to_gain() - 0.5011872).abs() < 1e-6);
        assert!((Decibels::from_gain(2.0).0 - 6.0206).abs() < 1e-3);
        assert_eq!(Decibels::from_gain(0.0).to_gain(), 0.0);
    }

    #[test]
    fn test_sample_rate_from_u32() {
        assert_eq!(SampleRate::from_u32(44100), Some(SampleRate::Hz44100));
        assert_eq!(SampleRate::from_u32(12345), None);
    }
}
