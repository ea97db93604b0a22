//! marea-dsp: DSP processors for the Marea engine
//!
//! ## Primitives
//! - `biquad` - Direct-Form-I biquad filters (RBJ cookbook coefficients)
//! - `filters` - DC blocker, all-pass
//! - `delay` - Fractional delay line (linear/cubic interpolation)
//! - `clipper` - Soft clipper (hard, knee, tanh, sigmoid, polynomial)
//! - `convolution` - Direct and partitioned FFT convolution
//!
//! ## Processors
//! - `eq` - 8-band parametric EQ with per-channel state
//! - `dynamics` - Compressor / limiter / gate / expander with lookahead

pub mod biquad;
pub mod clipper;
pub mod convolution;
pub mod delay;
pub mod dynamics;
pub mod eq;
pub mod filters;

pub use biquad::{Biquad, BiquadCoeffs, FilterKind};
pub use clipper::{ClipCurve, SoftClipper};
pub use convolution::{ConvolutionEngine, FirFilter};
pub use delay::DelayLine;
pub use dynamics::{
    DetectionMode, DynamicsMode, DynamicsParams, DynamicsProcessor, EnvelopeFollower,
};
pub use eq::{EQ_BANDS, EqBandConfig, ParametricEq};
pub use filters::{AllPassFilter, DcBlocker};

use marea_core::Sample;

/// Trait for all DSP processors
pub trait Processor: Send {
    /// Reset processor state
    fn reset(&mut self);

    /// Get latency in samples
    fn latency(&self) -> usize {
        0
    }
}

/// Mono processor trait
pub trait MonoProcessor: Processor {
    /// Process a single sample
    fn process_sample(&mut self, input: Sample) -> Sample;

    /// Process a block of samples
    fn process_block(&mut self, buffer: &mut [Sample]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}

/// Stereo processor trait
pub trait StereoProcessor: Processor {
    /// Process a stereo sample pair
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample);

    /// Process stereo blocks
    fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        debug_assert_eq!(left.len(), right.len());
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process_sample(*l, *r);
        }
    }
}

/// Processor configuration for sample rate changes
pub trait ProcessorConfig {
    fn set_sample_rate(&mut self, sample_rate: f64);
}
