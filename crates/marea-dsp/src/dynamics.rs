//! Dynamics processing: compressor, limiter, gate, expander
//!
//! One processor covers all four modes with peak/RMS/hybrid detection, a
//! soft-knee static curve and an optional lookahead path. The lookahead ring
//! delays the audio while the detector sees the newest samples, so gain
//! reduction is scheduled before transients reach the output.

use marea_core::{Sample, db_to_linear, linear_to_db};

use crate::{Processor, ProcessorConfig};

/// Floor used for gate attenuation and the expander range
const FLOOR_DB: f32 = -80.0;

/// Longest supported lookahead; the ring is allocated for this up front so
/// lookahead changes never allocate on the audio thread.
const MAX_LOOKAHEAD_MS: f32 = 20.0;

/// Envelope follower with peak or RMS rectification
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    sample_rate: f64,
    attack_coeff: f64,
    release_coeff: f64,
    envelope: f64,
    rms_mode: bool,
}

impl EnvelopeFollower {
    pub fn new(sample_rate: f64) -> Self {
        let mut follower = Self {
            sample_rate,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            rms_mode: false,
        };
        follower.set_attack(10.0);
        follower.set_release(100.0);
        follower
    }

    /// Set attack time in milliseconds
    pub fn set_attack(&mut self, attack_ms: f64) {
        let attack_samples = attack_ms * 0.001 * self.sample_rate;
        self.attack_coeff = 1.0 - (-1.0 / attack_samples).exp();
    }

    /// Set release time in milliseconds
    pub fn set_release(&mut self, release_ms: f64) {
        let release_samples = release_ms * 0.001 * self.sample_rate;
        self.release_coeff = 1.0 - (-1.0 / release_samples).exp();
    }

    /// RMS mode squares the input and returns the root of the envelope
    pub fn set_rms_mode(&mut self, rms: bool) {
        self.rms_mode = rms;
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    #[inline(always)]
    pub fn process(&mut self, input: Sample) -> f32 {
        let rectified = if self.rms_mode {
            (input as f64) * (input as f64)
        } else {
            input.abs() as f64
        };

        let coeff = if rectified > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope += coeff * (rectified - self.envelope);

        if self.rms_mode {
            self.envelope.sqrt() as f32
        } else {
            self.envelope as f32
        }
    }

    pub fn current(&self) -> f32 {
        if self.rms_mode {
            self.envelope.sqrt() as f32
        } else {
            self.envelope as f32
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

/// Processing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum DynamicsMode {
    #[default]
    Compressor,
    Limiter,
    Gate,
    Expander,
}

/// Level detection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum DetectionMode {
    Peak,
    #[default]
    Rms,
    /// Maximum of the peak and RMS detectors
    Hybrid,
}

/// Full parameter set
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct DynamicsParams {
    pub mode: DynamicsMode,
    pub detection: DetectionMode,
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub knee_db: f32,
    pub makeup_db: f32,
    pub lookahead_ms: f32,
    pub lookahead_enabled: bool,
}

impl Default for DynamicsParams {
    fn default() -> Self {
        Self {
            mode: DynamicsMode::Compressor,
            detection: DetectionMode::Rms,
            threshold_db: -12.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            knee_db: 2.0,
            makeup_db: 0.0,
            lookahead_ms: 5.0,
            lookahead_enabled: false,
        }
    }
}

#[derive(Debug, Clone)]
struct ChannelState {
    peak_env: EnvelopeFollower,
    rms_env: EnvelopeFollower,
    /// Smoothed linear gain
    gain: f64,
    lookahead: Vec<Sample>,
    write_pos: usize,
}

impl ChannelState {
    fn new(sample_rate: f64, max_lookahead: usize) -> Self {
        let mut rms_env = EnvelopeFollower::new(sample_rate);
        rms_env.set_rms_mode(true);
        Self {
            peak_env: EnvelopeFollower::new(sample_rate),
            rms_env,
            gain: 1.0,
            lookahead: vec![0.0; max_lookahead],
            write_pos: 0,
        }
    }

    fn reset(&mut self) {
        self.peak_env.reset();
        self.rms_env.reset();
        self.gain = 1.0;
        self.lookahead.fill(0.0);
        self.write_pos = 0;
    }
}

/// Multi-mode dynamics processor
pub struct DynamicsProcessor {
    params: DynamicsParams,
    channels: Vec<ChannelState>,
    lookahead_samples: usize,
    gain_attack_coeff: f64,
    gain_release_coeff: f64,
    sample_rate: f64,

    // Block meters
    gain_reduction_db: f32,
    input_level: f32,
    output_level: f32,
}

impl DynamicsProcessor {
    pub fn new(sample_rate: f64, channels: usize) -> Self {
        let max_lookahead =
            ((MAX_LOOKAHEAD_MS as f64 * 0.001 * sample_rate) as usize).max(1);
        let mut processor = Self {
            params: DynamicsParams::default(),
            channels: (0..channels)
                .map(|_| ChannelState::new(sample_rate, max_lookahead))
                .collect(),
            lookahead_samples: 0,
            gain_attack_coeff: 0.0,
            gain_release_coeff: 0.0,
            sample_rate,
            gain_reduction_db: 0.0,
            input_level: 0.0,
            output_level: 0.0,
        };
        processor.apply_params(DynamicsParams::default());
        processor
    }

    pub fn params(&self) -> DynamicsParams {
        self.params
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Replace the whole parameter set (values clamped)
    pub fn apply_params(&mut self, params: DynamicsParams) {
        self.params = DynamicsParams {
            mode: params.mode,
            detection: params.detection,
            threshold_db: params.threshold_db.clamp(-60.0, 0.0),
            ratio: params.ratio.clamp(1.0, 100.0),
            attack_ms: params.attack_ms.clamp(0.01, 500.0),
            release_ms: params.release_ms.clamp(1.0, 5000.0),
            knee_db: params.knee_db.clamp(0.0, 24.0),
            makeup_db: params.makeup_db.clamp(-24.0, 24.0),
            lookahead_ms: params.lookahead_ms.clamp(0.0, MAX_LOOKAHEAD_MS),
            lookahead_enabled: params.lookahead_enabled,
        };
        self.update_coefficients();
    }

    pub fn set_mode(&mut self, mode: DynamicsMode) {
        self.params.mode = mode;
    }

    pub fn set_detection(&mut self, detection: DetectionMode) {
        self.params.detection = detection;
    }

    pub fn set_threshold(&mut self, db: f32) {
        self.params.threshold_db = db.clamp(-60.0, 0.0);
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.params.ratio = ratio.clamp(1.0, 100.0);
    }

    pub fn set_attack(&mut self, ms: f32) {
        self.params.attack_ms = ms.clamp(0.01, 500.0);
        self.update_coefficients();
    }

    pub fn set_release(&mut self, ms: f32) {
        self.params.release_ms = ms.clamp(1.0, 5000.0);
        self.update_coefficients();
    }

    pub fn set_knee(&mut self, db: f32) {
        self.params.knee_db = db.clamp(0.0, 24.0);
    }

    pub fn set_makeup(&mut self, db: f32) {
        self.params.makeup_db = db.clamp(-24.0, 24.0);
    }

    pub fn set_lookahead_ms(&mut self, ms: f32) {
        self.params.lookahead_ms = ms.clamp(0.0, MAX_LOOKAHEAD_MS);
        self.update_coefficients();
    }

    pub fn set_lookahead_enabled(&mut self, enabled: bool) {
        self.params.lookahead_enabled = enabled;
        self.update_coefficients();
    }

    /// Current gain reduction in dB (positive = reducing)
    pub fn gain_reduction_db(&self) -> f32 {
        self.gain_reduction_db
    }

    pub fn input_level(&self) -> f32 {
        self.input_level
    }

    pub fn output_level(&self) -> f32 {
        self.output_level
    }

    fn update_coefficients(&mut self) {
        let attack = self.params.attack_ms as f64;
        let release = self.params.release_ms as f64;
        for channel in &mut self.channels {
            channel.peak_env.set_attack(attack);
            channel.peak_env.set_release(release);
            channel.rms_env.set_attack(attack);
            channel.rms_env.set_release(release);
        }

        self.gain_attack_coeff = (-1.0 / (attack * 0.001 * self.sample_rate)).exp();
        self.gain_release_coeff = (-1.0 / (release * 0.001 * self.sample_rate)).exp();

        let ring_len = self
            .channels
            .first()
            .map(|c| c.lookahead.len())
            .unwrap_or(1);
        self.lookahead_samples = if self.params.lookahead_enabled {
            ((self.params.lookahead_ms as f64 * 0.001 * self.sample_rate).ceil() as usize)
                .clamp(1, ring_len)
        } else {
            0
        };
    }

    /// Static curve: gain in dB for an input level in dB
    fn static_gain_db(params: &DynamicsParams, input_db: f32) -> f32 {
        let thr = params.threshold_db;
        let knee = params.knee_db;
        let ratio = params.ratio;

        match params.mode {
            DynamicsMode::Compressor => {
                let half_knee = knee * 0.5;
                if input_db < thr - half_knee {
                    0.0
                } else if input_db > thr + half_knee || knee <= 0.0 {
                    -(input_db - thr) * (1.0 - 1.0 / ratio)
                } else {
                    let x = input_db - thr + half_knee;
                    -(x * x * (1.0 - 1.0 / ratio)) / (2.0 * knee)
                }
            }
            DynamicsMode::Limiter => {
                if input_db > thr {
                    -(input_db - thr)
                } else {
                    0.0
                }
            }
            DynamicsMode::Gate => {
                if input_db >= thr {
                    0.0
                } else if input_db <= thr - knee || knee <= 0.0 {
                    FLOOR_DB
                } else {
                    let t = (input_db - (thr - knee)) / knee;
                    FLOOR_DB * (1.0 - t * t)
                }
            }
            DynamicsMode::Expander => {
                if input_db >= thr {
                    0.0
                } else {
                    (-(thr - input_db) * (ratio - 1.0)).max(FLOOR_DB)
                }
            }
        }
    }

    /// Peak of the lookahead window (every sample still ahead of the output)
    #[inline]
    fn window_peak(channel: &ChannelState, window: usize) -> f32 {
        let mut peak = 0.0_f32;
        for i in 0..window {
            let index = (channel.write_pos + channel.lookahead.len() - 1 - i)
                % channel.lookahead.len();
            peak = peak.max(channel.lookahead[index].abs());
        }
        peak
    }

    #[inline]
    fn process_channel_sample(&mut self, channel_index: usize, input: Sample) -> Sample {
        let lookahead = self.lookahead_samples;
        let params = self.params;
        let mode = params.mode;
        let threshold_lin = db_to_linear(params.threshold_db);
        let makeup = db_to_linear(params.makeup_db);
        let gain_attack_coeff = self.gain_attack_coeff;
        let gain_release_coeff = self.gain_release_coeff;

        let channel = &mut self.channels[channel_index];

        // Lookahead tap: the output is the sample written `lookahead` ago;
        // the detector sees the newest material.
        let (delayed, detector_input) = if lookahead > 0 {
            let read_pos =
                (channel.write_pos + channel.lookahead.len() - lookahead)
                    % channel.lookahead.len();
            let delayed = channel.lookahead[read_pos];
            channel.lookahead[channel.write_pos] = input;
            channel.write_pos = (channel.write_pos + 1) % channel.lookahead.len();
            let window = Self::window_peak(channel, lookahead);
            (delayed, window)
        } else {
            (input, input.abs())
        };

        // Detect level
        let level = match params.detection {
            DetectionMode::Peak => channel.peak_env.process(detector_input),
            DetectionMode::Rms => channel.rms_env.process(detector_input),
            DetectionMode::Hybrid => {
                let peak = channel.peak_env.process(detector_input);
                let rms = channel.rms_env.process(detector_input);
                peak.max(rms)
            }
        };

        // Target gain from the static curve. The limiter ignores detector
        // ballistics on the way down so peaks never overshoot.
        let target_gain = if mode == DynamicsMode::Limiter {
            let instant = detector_input.max(level);
            if instant > threshold_lin {
                (threshold_lin / instant) as f64
            } else {
                1.0
            }
        } else {
            db_to_linear(Self::static_gain_db(&params, linear_to_db(level))) as f64
        };

        // Gain smoother: instant attack for the limiter, attack/release
        // ballistics otherwise.
        if mode == DynamicsMode::Limiter {
            if target_gain < channel.gain {
                channel.gain = target_gain;
            } else {
                channel.gain =
                    target_gain + gain_release_coeff * (channel.gain - target_gain);
            }
        } else {
            let coeff = if target_gain < channel.gain {
                gain_attack_coeff
            } else {
                gain_release_coeff
            };
            channel.gain = target_gain + coeff * (channel.gain - target_gain);
        }

        let mut output = delayed * channel.gain as f32;

        // The limiter clamps at the threshold regardless of smoothing state
        if mode == DynamicsMode::Limiter {
            output = output.clamp(-threshold_lin, threshold_lin);
        }

        output * makeup
    }

    fn update_meters(&mut self, input_peak: f32, output_peak: f32) {
        self.input_level = input_peak;
        self.output_level = output_peak;
        let min_gain = self
            .channels
            .iter()
            .map(|c| c.gain)
            .fold(1.0_f64, f64::min);
        self.gain_reduction_db = -linear_to_db(min_gain as f32).min(0.0);
    }

    /// Process a mono block in place
    pub fn process_mono_block(&mut self, buffer: &mut [Sample]) {
        let mut input_peak = 0.0_f32;
        let mut output_peak = 0.0_f32;
        for sample in buffer.iter_mut() {
            input_peak = input_peak.max(sample.abs());
            *sample = self.process_channel_sample(0, *sample);
            output_peak = output_peak.max(sample.abs());
        }
        self.update_meters(input_peak, output_peak);
    }

    /// Process a stereo block in place
    pub fn process_stereo_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        debug_assert_eq!(left.len(), right.len());
        let mut input_peak = 0.0_f32;
        let mut output_peak = 0.0_f32;
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            input_peak = input_peak.max(l.abs()).max(r.abs());
            *l = self.process_channel_sample(0, *l);
            *r = self.process_channel_sample(1, *r);
            output_peak = output_peak.max(l.abs()).max(r.abs());
        }
        self.update_meters(input_peak, output_peak);
    }
}

impl Processor for DynamicsProcessor {
    fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        self.gain_reduction_db = 0.0;
        self.input_level = 0.0;
        self.output_level = 0.0;
    }

    fn latency(&self) -> usize {
        self.lookahead_samples
    }
}

impl ProcessorConfig for DynamicsProcessor {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        let max_lookahead =
            ((MAX_LOOKAHEAD_MS as f64 * 0.001 * sample_rate) as usize).max(1);
        for channel in &mut self.channels {
            *channel = ChannelState::new(sample_rate, max_lookahead);
        }
        self.update_coefficients();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize, amplitude: f32) -> Vec<Sample> {
        (0..len)
            .map(|n| amplitude * (2.0 * std::f32::consts::PI * freq * n as f32 / sample_rate).sin())
            .collect()
    }

    fn peak(buffer: &[Sample]) -> f32 {
        buffer.iter().fold(0.0_f32, |acc, x| acc.max(x.abs()))
    }

    #[test]
    fn test_envelope_follower_tracks_level() {
        let mut env = EnvelopeFollower::new(44100.0);
        env.set_attack(1.0);
        env.set_release(50.0);

        let mut value = 0.0;
        for _ in 0..4410 {
            value = env.process(0.5);
        }
        assert!((value - 0.5).abs() < 1e-3);

        // Release decays slowly
        for _ in 0..100 {
            value = env.process(0.0);
        }
        assert!(value > 0.4);
    }

    #[test]
    fn test_rms_mode_of_sine() {
        let mut env = EnvelopeFollower::new(44100.0);
        env.set_rms_mode(true);
        env.set_attack(5.0);
        env.set_release(5.0);

        let signal = sine(1000.0, 44100.0, 44100, 0.5);
        let mut value = 0.0;
        for &x in &signal {
            value = env.process(x);
        }
        // RMS of a 0.5 sine is 0.3536
        assert!((value - 0.3536).abs() < 0.02, "rms {}", value);
    }

    #[test]
    fn test_compressor_static_gain() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 1);
        dynamics.apply_params(DynamicsParams {
            mode: DynamicsMode::Compressor,
            detection: DetectionMode::Rms,
            threshold_db: -12.0,
            ratio: 4.0,
            attack_ms: 1.0,
            release_ms: 50.0,
            knee_db: 0.0,
            makeup_db: 0.0,
            lookahead_ms: 0.0,
            lookahead_enabled: false,
        });

        // -6 dBFS sine
        let mut buffer = sine(1000.0, 44100.0, 44100, db_to_linear(-6.0));
        dynamics.process_mono_block(&mut buffer);

        let out_db = linear_to_db(peak(&buffer[22050..]));
        assert!(
            (-10.0..=-7.0).contains(&out_db),
            "steady-state level {} dB",
            out_db
        );
        assert!(dynamics.gain_reduction_db() > 1.0);
    }

    #[test]
    fn test_below_threshold_is_transparent() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 1);
        dynamics.apply_params(DynamicsParams {
            threshold_db: -12.0,
            knee_db: 0.0,
            ..Default::default()
        });

        let input = sine(1000.0, 44100.0, 8192, db_to_linear(-30.0));
        let mut buffer = input.clone();
        dynamics.process_mono_block(&mut buffer);

        let out = peak(&buffer[4096..]);
        let reference = peak(&input[4096..]);
        assert!((out - reference).abs() / reference < 0.01);
    }

    #[test]
    fn test_limiter_lookahead_catches_spike() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 1);
        dynamics.apply_params(DynamicsParams {
            mode: DynamicsMode::Limiter,
            detection: DetectionMode::Peak,
            threshold_db: -6.0,
            release_ms: 50.0,
            lookahead_ms: 5.0,
            lookahead_enabled: true,
            ..Default::default()
        });
        assert!(dynamics.latency() > 0);

        // Constant -12 dBFS with a single full-scale spike
        let base = db_to_linear(-12.0);
        let mut buffer = vec![base; 8192];
        buffer[4096] = 1.0;

        dynamics.process_mono_block(&mut buffer);
        // Flush the lookahead delay
        let mut tail = vec![0.0; dynamics.latency()];
        dynamics.process_mono_block(&mut tail);

        let ceiling = db_to_linear(-5.0);
        for (n, &x) in buffer.iter().chain(tail.iter()).enumerate() {
            assert!(
                x.abs() <= ceiling,
                "sample {} exceeded -5 dB: {}",
                n,
                linear_to_db(x.abs())
            );
        }
    }

    #[test]
    fn test_gate_silences_below_threshold() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 1);
        dynamics.apply_params(DynamicsParams {
            mode: DynamicsMode::Gate,
            detection: DetectionMode::Peak,
            threshold_db: -20.0,
            attack_ms: 0.1,
            release_ms: 5.0,
            knee_db: 0.0,
            ..Default::default()
        });

        let mut buffer = sine(1000.0, 44100.0, 44100, db_to_linear(-40.0));
        dynamics.process_mono_block(&mut buffer);

        let out_db = linear_to_db(peak(&buffer[22050..]));
        // -40 dB input through an -80 dB gate floor
        assert!(out_db < -100.0, "gated level {} dB", out_db);
    }

    #[test]
    fn test_gate_passes_above_threshold() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 1);
        dynamics.apply_params(DynamicsParams {
            mode: DynamicsMode::Gate,
            detection: DetectionMode::Peak,
            threshold_db: -20.0,
            knee_db: 0.0,
            ..Default::default()
        });

        let input = sine(1000.0, 44100.0, 44100, db_to_linear(-6.0));
        let mut buffer = input.clone();
        dynamics.process_mono_block(&mut buffer);

        let out = peak(&buffer[22050..]);
        assert!((out - peak(&input[22050..])).abs() < 0.05);
    }

    #[test]
    fn test_expander_reduces_quiet_signal() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 1);
        dynamics.apply_params(DynamicsParams {
            mode: DynamicsMode::Expander,
            detection: DetectionMode::Peak,
            threshold_db: -20.0,
            ratio: 2.0,
            attack_ms: 1.0,
            release_ms: 50.0,
            knee_db: 0.0,
            ..Default::default()
        });

        // -30 dB input, 10 dB below threshold: expansion pushes it towards -40
        let mut buffer = sine(1000.0, 44100.0, 44100, db_to_linear(-30.0));
        dynamics.process_mono_block(&mut buffer);

        let out_db = linear_to_db(peak(&buffer[22050..]));
        assert!(out_db < -35.0, "expanded level {} dB", out_db);
        assert!(out_db > -50.0, "expanded level {} dB", out_db);
    }

    #[test]
    fn test_makeup_gain_applied() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 1);
        dynamics.apply_params(DynamicsParams {
            threshold_db: -60.0,
            ratio: 1.0,
            makeup_db: 6.0,
            knee_db: 0.0,
            ..Default::default()
        });

        // Ratio 1 means no reduction; only makeup remains
        let input = sine(1000.0, 44100.0, 22050, 0.1);
        let mut buffer = input.clone();
        dynamics.process_mono_block(&mut buffer);

        let gain = peak(&buffer[11025..]) / peak(&input[11025..]);
        assert!((linear_to_db(gain) - 6.0).abs() < 0.2);
    }

    #[test]
    fn test_lookahead_reports_latency() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 2);
        assert_eq!(dynamics.latency(), 0);

        dynamics.set_lookahead_ms(5.0);
        dynamics.set_lookahead_enabled(true);
        // ceil(5 ms * 44.1) = 221
        assert_eq!(dynamics.latency(), 221);

        dynamics.set_lookahead_enabled(false);
        assert_eq!(dynamics.latency(), 0);
    }

    #[test]
    fn test_params_clamped() {
        let mut dynamics = DynamicsProcessor::new(44100.0, 1);
        dynamics.set_threshold(-120.0);
        dynamics.set_ratio(500.0);
        dynamics.set_lookahead_ms(100.0);

        let params = dynamics.params();
        assert_eq!(params.threshold_db, -60.0);
        assert_eq!(params.ratio, 100.0);
        assert_eq!(params.lookahead_ms, MAX_LOOKAHEAD_MS);
    }
}
