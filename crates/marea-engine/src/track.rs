//! Track slots and signal sources
//!
//! Tracks live in a fixed pool so activation and removal never allocate on
//! the audio thread. Each track carries its own oscillator phase, pink-noise
//! state, effect chain, and spatial renderer.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use marea_bridge::SignalKind;
use marea_core::{ChannelLayout, Sample, SineTable, wrap_phase};
use marea_spatial::{SpatialMath, SpatialProcessor, Vec3};

use crate::chain::EffectChain;

/// Size of the pre-allocated track pool
pub const MAX_TRACKS: usize = 32;

/// Paul Kellet's 7-state pink noise filter
///
/// Drives pink noise from a white noise input; the state is held per track
/// so two pink tracks never correlate.
#[derive(Debug, Clone, Default)]
pub struct PinkNoise {
    b: [f32; 7],
}

impl PinkNoise {
    #[inline]
    pub fn process(&mut self, white: f32) -> f32 {
        self.b[0] = 0.99886 * self.b[0] + white * 0.0555179;
        self.b[1] = 0.99332 * self.b[1] + white * 0.0750759;
        self.b[2] = 0.96900 * self.b[2] + white * 0.1538520;
        self.b[3] = 0.86650 * self.b[3] + white * 0.3104856;
        self.b[4] = 0.55000 * self.b[4] + white * 0.5329522;
        self.b[5] = -0.7616 * self.b[5] - white * 0.0168980;
        let pink = self.b.iter().sum::<f32>() + white * 0.5362;
        self.b[6] = white * 0.115926;
        pink * 0.11
    }

    pub fn reset(&mut self) {
        self.b = [0.0; 7];
    }
}

/// Opaque decoded-audio source
///
/// The decoder lives outside the core; it hands over Float32 frames at a
/// declared sample rate and channel count. `next_frame` returns false at end
/// of stream.
pub trait FrameSource: Send {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn next_frame(&mut self, frame: &mut [Sample; 2]) -> bool;
}

/// Pre-decoded clip, the common `FrameSource` used by the control side
pub struct DecodedClip {
    samples: Vec<Sample>,
    channels: u16,
    sample_rate: u32,
    cursor: usize,
}

impl DecodedClip {
    /// Interleaved samples (mono or stereo)
    pub fn new(samples: Vec<Sample>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.clamp(1, 2),
            sample_rate,
            cursor: 0,
        }
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl FrameSource for DecodedClip {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn next_frame(&mut self, frame: &mut [Sample; 2]) -> bool {
        let step = self.channels as usize;
        if self.cursor + step > self.samples.len() {
            return false;
        }
        if step == 1 {
            frame[0] = self.samples[self.cursor];
            frame[1] = self.samples[self.cursor];
        } else {
            frame[0] = self.samples[self.cursor];
            frame[1] = self.samples[self.cursor + 1];
        }
        self.cursor += step;
        true
    }
}

/// Decoder-backed playback state with nearest-neighbor rate fallback
struct DecodedState {
    source: Box<dyn FrameSource>,
    playing: bool,
    /// Input frames to consume per output frame
    step: f64,
    accumulator: f64,
    current: [Sample; 2],
}

impl DecodedState {
    fn new(source: Box<dyn FrameSource>, engine_rate: f32) -> Self {
        let step = source.sample_rate() as f64 / engine_rate as f64;
        Self {
            source,
            playing: true,
            step,
            // Primed so the very first output frame pulls input
            accumulator: 1.0 - step,
            current: [0.0; 2],
        }
    }

    #[inline]
    fn next(&mut self) -> (Sample, Sample) {
        if !self.playing {
            return (0.0, 0.0);
        }
        self.accumulator += self.step;
        while self.accumulator >= 1.0 {
            self.accumulator -= 1.0;
            if !self.source.next_frame(&mut self.current) {
                self.playing = false;
                self.current = [0.0; 2];
                break;
            }
        }
        (self.current[0], self.current[1])
    }
}

enum Source {
    Oscillator {
        kind: SignalKind,
        frequency: f32,
        phase: f32,
        pink: PinkNoise,
        rng: SmallRng,
    },
    Decoded(DecodedState),
}

/// One mixer track
pub struct Track {
    id: u32,
    name: String,
    active: bool,

    volume: f32,
    pan: f32,
    muted: bool,
    solo: bool,
    position: Vec3,

    source: Source,
    pub chain: EffectChain,
    pub spatial: SpatialProcessor,
}

impl Track {
    /// Build an inactive slot; names are fixed at pool construction so
    /// activation never allocates.
    pub fn slot(slot_index: usize, sample_rate: f64, layout: ChannelLayout) -> Self {
        Self {
            id: slot_index as u32,
            name: format!("Track {}", slot_index + 1),
            active: false,
            volume: 1.0,
            pan: 0.0,
            muted: false,
            solo: false,
            position: Vec3::ZERO,
            source: Source::Oscillator {
                kind: SignalKind::Sine,
                frequency: 440.0,
                phase: 0.0,
                pink: PinkNoise::default(),
                rng: SmallRng::seed_from_u64(0x9E37_79B9 ^ slot_index as u64),
            },
            chain: EffectChain::new(sample_rate),
            spatial: SpatialProcessor::new(sample_rate, layout),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Activate this slot for a test-signal source
    pub fn activate(&mut self, id: u32, signal: SignalKind, frequency: f32) {
        self.id = id;
        self.active = true;
        self.volume = 1.0;
        self.pan = 0.0;
        self.muted = false;
        self.solo = false;
        self.position = Vec3::ZERO;
        self.set_signal(signal, frequency);
        self.chain.reset();
        self.spatial.reset();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.solo = false;
        self.chain.reset();
        self.spatial.reset();
    }

    pub fn set_signal(&mut self, kind: SignalKind, frequency: f32) {
        let seed = 0x9E37_79B9 ^ self.id as u64;
        self.source = Source::Oscillator {
            kind,
            frequency: frequency.clamp(20.0, 20_000.0),
            phase: 0.0,
            pink: PinkNoise::default(),
            rng: SmallRng::seed_from_u64(seed),
        };
    }

    /// Install a decoded source (control side; not reachable from the queue)
    pub fn set_decoded_source(&mut self, source: Box<dyn FrameSource>, engine_rate: f32) {
        self.source = Source::Decoded(DecodedState::new(source, engine_rate));
    }

    /// True while a decoded source still delivers frames
    pub fn is_playing(&self) -> bool {
        match &self.source {
            Source::Oscillator { .. } => self.active,
            Source::Decoded(state) => state.playing,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 2.0);
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_solo(&self) -> bool {
        self.solo
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.spatial.set_source_position(position);
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.spatial.set_source_velocity(velocity);
    }

    /// Generate one stereo frame: source, then pan, volume, and the distance
    /// factor from the track position.
    #[inline]
    pub fn generate_frame(&mut self, sine: &SineTable, sample_rate: f32) -> (Sample, Sample) {
        let (raw_l, raw_r) = match &mut self.source {
            Source::Oscillator {
                kind,
                frequency,
                phase,
                pink,
                rng,
            } => {
                let sample = match kind {
                    SignalKind::Sine => sine.sin(*phase),
                    SignalKind::Square => {
                        if sine.sin(*phase) >= 0.0 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    SignalKind::Saw => *phase / std::f32::consts::PI - 1.0,
                    SignalKind::WhiteNoise => rng.random_range(-1.0..1.0),
                    SignalKind::PinkNoise => {
                        let white: f32 = rng.random_range(-1.0..1.0);
                        pink.process(white)
                    }
                };
                *phase = wrap_phase(
                    *phase + 2.0 * std::f32::consts::PI * *frequency / sample_rate,
                );
                (sample, sample)
            }
            Source::Decoded(state) => state.next(),
        };

        // Constant-power pan normalized to unity at center
        let (pan_l, pan_r) = marea_core::pan_gains(self.pan);
        let pan_scale = std::f32::consts::SQRT_2;
        let attenuation =
            SpatialMath::distance_attenuation(self.position.magnitude(), 1.0);
        let gain = self.volume * attenuation;

        (
            raw_l * pan_l * pan_scale * gain,
            raw_r * pan_r * pan_scale * gain,
        )
    }

    /// Clear all DSP state (transport stop)
    pub fn reset_dsp(&mut self) {
        if let Source::Oscillator { phase, pink, .. } = &mut self.source {
            *phase = 0.0;
            pink.reset();
        }
        self.chain.reset();
        self.spatial.reset();
    }
}
