//! Biquad filter implementation using Direct Form I
//!
//! Coefficients follow the RBJ Audio EQ Cookbook and are normalized so that
//! a0 == 1 after calculation; only five coefficients are stored.

use std::f64::consts::PI;

use marea_core::Sample;

use crate::{MonoProcessor, Processor, ProcessorConfig};

/// Biquad filter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FilterKind {
    LowPass,
    HighPass,
    LowShelf,
    HighShelf,
    Peak,
    Notch,
    BandPass,
    AllPass,
}

/// Normalized biquad coefficients (a0 == 1)
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Calculate coefficients for the given kind
    ///
    /// `gain_db` only affects Peak and the shelving kinds.
    pub fn calculate(kind: FilterKind, freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            FilterKind::LowPass => (
                (1.0 - cos_omega) / 2.0,
                1.0 - cos_omega,
                (1.0 - cos_omega) / 2.0,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            FilterKind::HighPass => (
                (1.0 + cos_omega) / 2.0,
                -(1.0 + cos_omega),
                (1.0 + cos_omega) / 2.0,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            FilterKind::BandPass => (
                alpha,
                0.0,
                -alpha,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            FilterKind::Notch => (
                1.0,
                -2.0 * cos_omega,
                1.0,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            FilterKind::AllPass => (
                1.0 - alpha,
                -2.0 * cos_omega,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            FilterKind::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_omega,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_omega,
                1.0 - alpha / a,
            ),
            FilterKind::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
                    a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
                    (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha,
                )
            }
            FilterKind::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
                    a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
                    (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha,
                )
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Bypass (unity gain, no filtering)
    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Analytic magnitude response at the given frequency
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let cos_omega = omega.cos();
        let sin_omega = omega.sin();
        let cos_2omega = (2.0 * omega).cos();
        let sin_2omega = (2.0 * omega).sin();

        let real_num = self.b0 + self.b1 * cos_omega + self.b2 * cos_2omega;
        let imag_num = self.b1 * sin_omega + self.b2 * sin_2omega;

        let real_den = 1.0 + self.a1 * cos_omega + self.a2 * cos_2omega;
        let imag_den = self.a1 * sin_omega + self.a2 * sin_2omega;

        let den_mag_sq = real_den * real_den + imag_den * imag_den;
        if den_mag_sq > 1e-10 {
            ((real_num * real_num + imag_num * imag_num) / den_mag_sq).sqrt()
        } else {
            0.0
        }
    }

    /// Analytic phase response at the given frequency (radians)
    pub fn phase_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let cos_omega = omega.cos();
        let sin_omega = omega.sin();
        let cos_2omega = (2.0 * omega).cos();
        let sin_2omega = (2.0 * omega).sin();

        let real_num = self.b0 + self.b1 * cos_omega + self.b2 * cos_2omega;
        let imag_num = self.b1 * sin_omega + self.b2 * sin_2omega;

        let real_den = 1.0 + self.a1 * cos_omega + self.a2 * cos_2omega;
        let imag_den = self.a1 * sin_omega + self.a2 * sin_2omega;

        imag_num.atan2(real_num) - imag_den.atan2(real_den)
    }
}

/// Direct Form I biquad filter
///
/// Keeps two past input and two past output samples in f64 to avoid
/// accumulating quantization error across long cascades.
#[derive(Debug, Clone)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
    sample_rate: f64,
}

impl Biquad {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            coeffs: BiquadCoeffs::bypass(),
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            sample_rate,
        }
    }

    pub fn with_coeffs(coeffs: BiquadCoeffs, sample_rate: f64) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            sample_rate,
        }
    }

    #[inline]
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Recalculate coefficients for the given kind at the current sample rate
    pub fn configure(&mut self, kind: FilterKind, freq: f64, q: f64, gain_db: f64) {
        self.coeffs = BiquadCoeffs::calculate(kind, freq, q, gain_db, self.sample_rate);
    }

    pub fn set_lowpass(&mut self, freq: f64, q: f64) {
        self.configure(FilterKind::LowPass, freq, q, 0.0);
    }

    pub fn set_highpass(&mut self, freq: f64, q: f64) {
        self.configure(FilterKind::HighPass, freq, q, 0.0);
    }

    pub fn set_peak(&mut self, freq: f64, q: f64, gain_db: f64) {
        self.configure(FilterKind::Peak, freq, q, gain_db);
    }

    pub fn set_bypass(&mut self) {
        self.coeffs = BiquadCoeffs::bypass();
    }
}

impl Processor for Biquad {
    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

impl MonoProcessor for Biquad {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let x = input as f64;
        let y = self.coeffs.b0 * x + self.coeffs.b1 * self.x1 + self.coeffs.b2 * self.x2
            - self.coeffs.a1 * self.y1
            - self.coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y as Sample
    }
}

impl ProcessorConfig for Biquad {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_is_identity() {
        let mut filter = Biquad::new(48000.0);
        filter.set_bypass();

        let input = 0.5;
        let output = filter.process_sample(input);
        assert!((output - input).abs() < 1e-10);
    }

    #[test]
    fn test_coefficients_normalized() {
        // After calculation the stored coefficients are already divided by a0;
        // a peaking filter at unity gain must collapse to a pass-through.
        let coeffs = BiquadCoeffs::calculate(FilterKind::Peak, 1000.0, 1.0, 0.0, 48000.0);
        assert!((coeffs.b0 - 1.0).abs() < 1e-9);
        assert!((coeffs.b1 - coeffs.a1).abs() < 1e-9);
        assert!((coeffs.b2 - coeffs.a2).abs() < 1e-9);
    }

    #[test]
    fn test_lowpass_dc() {
        let mut filter = Biquad::new(48000.0);
        filter.set_lowpass(1000.0, 0.707);

        for _ in 0..1000 {
            filter.process_sample(1.0);
        }
        let output = filter.process_sample(1.0);
        assert!((output - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_highpass_dc() {
        let mut filter = Biquad::new(48000.0);
        filter.set_highpass(1000.0, 0.707);

        for _ in 0..1000 {
            filter.process_sample(1.0);
        }
        let output = filter.process_sample(1.0);
        assert!(output.abs() < 0.01);
    }

    #[test]
    fn test_peak_magnitude_at_center() {
        let coeffs = BiquadCoeffs::calculate(FilterKind::Peak, 1000.0, 1.0, 12.0, 44100.0);
        let mag_db = 20.0 * coeffs.magnitude_at(1000.0, 44100.0).log10();
        assert!((mag_db - 12.0).abs() < 0.1, "got {} dB", mag_db);

        // Far from center the peak has little effect
        let mag_db = 20.0 * coeffs.magnitude_at(20.0, 44100.0).log10();
        assert!(mag_db.abs() < 1.0);
    }

    #[test]
    fn test_allpass_magnitude_flat() {
        let coeffs = BiquadCoeffs::calculate(FilterKind::AllPass, 1000.0, 0.707, 0.0, 48000.0);
        for freq in [50.0, 200.0, 1000.0, 5000.0, 15000.0] {
            assert!((coeffs.magnitude_at(freq, 48000.0) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_reset_clears_history() {
        let mut filter = Biquad::new(48000.0);
        filter.set_lowpass(1000.0, 0.707);

        for _ in 0..100 {
            filter.process_sample(1.0);
        }

        filter.reset();

        assert_eq!(filter.x1, 0.0);
        assert_eq!(filter.y1, 0.0);
        assert_eq!(filter.y2, 0.0);
    }
}
