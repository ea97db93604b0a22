//! Surround / 3D / binaural rendering
//!
//! One `SpatialProcessor` per track. The engine's master bus is stereo, so
//! every mode ultimately folds to L/R: BasicSurround passes through (its
//! matrices are exposed as the buffer-level up/downmix functions), Spatial3D
//! pans across the configured loudspeaker layout with constant-power gains
//! and folds the speakers down, BinauralHrtf convolves with per-ear impulse
//! responses plus explicit ITD/ILD. Environmental parameters are applied at
//! block boundaries only.

use std::sync::Arc;

use marea_core::{ChannelLayout, MultichannelBuffer, Sample, db_to_linear};
use marea_dsp::biquad::Biquad;
use marea_dsp::convolution::FirFilter;
use marea_dsp::delay::DelayLine;
use marea_dsp::{MonoProcessor, Processor};

use crate::hrtf::HrtfSet;
use crate::position::{SpatialMath, SphericalCoord, Vec3};
use crate::{SpatialError, SpatialResult};

/// Rendering mode, selectable per track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SpatialMode {
    #[default]
    BasicSurround,
    Spatial3D,
    BinauralHrtf,
    /// Accepted but rendered through the BasicSurround path
    Ambisonics,
}

impl SpatialMode {
    pub fn from_index(index: u32) -> Self {
        match index {
            1 => Self::Spatial3D,
            2 => Self::BinauralHrtf,
            3 => Self::Ambisonics,
            _ => Self::BasicSurround,
        }
    }
}

/// Environmental parameters, applied at block boundaries
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Environment {
    /// Room dimensions in meters
    pub room_size: Vec3,
    pub reverb_amount: f32,
    pub reverb_decay: f32,
    pub air_absorption_enabled: bool,
    pub humidity: f32,
    pub doppler_enabled: bool,
    pub speed_of_sound: f32,
    pub reference_distance: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            room_size: Vec3::new(10.0, 8.0, 3.0),
            reverb_amount: 0.2,
            reverb_decay: 1.5,
            air_absorption_enabled: true,
            humidity: 50.0,
            doppler_enabled: true,
            speed_of_sound: SpatialMath::SPEED_OF_SOUND,
            reference_distance: 1.0,
        }
    }
}

/// Headphone crossfeed: low-passed opposite-channel bleed
#[derive(Debug, Clone)]
pub struct Crossfeed {
    enabled: bool,
    amount: f32,
    filter_left: Biquad,
    filter_right: Biquad,
}

impl Crossfeed {
    pub fn new(sample_rate: f64) -> Self {
        let mut filter_left = Biquad::new(sample_rate);
        let mut filter_right = Biquad::new(sample_rate);
        filter_left.set_lowpass(700.0, 0.707);
        filter_right.set_lowpass(700.0, 0.707);
        Self {
            enabled: false,
            amount: 0.3,
            filter_left,
            filter_right,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_amount(&mut self, amount: f32) {
        self.amount = amount.clamp(0.0, 1.0);
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        if !self.enabled {
            return (left, right);
        }
        let bleed_into_left = self.filter_left.process_sample(right);
        let bleed_into_right = self.filter_right.process_sample(left);
        (
            left + bleed_into_left * self.amount,
            right + bleed_into_right * self.amount,
        )
    }

    pub fn reset(&mut self) {
        self.filter_left.reset();
        self.filter_right.reset();
    }
}

/// Per-track spatial renderer
pub struct SpatialProcessor {
    mode: SpatialMode,
    layout: ChannelLayout,
    sample_rate: f64,

    source_position: Vec3,
    source_velocity: Vec3,
    listener_position: Vec3,
    listener_forward: Vec3,
    listener_up: Vec3,
    listener_velocity: Vec3,
    environment: Environment,

    // Derived once per block
    relative: SphericalCoord,
    attenuation: f32,
    doppler_ratio: f32,
    speaker_gains: Vec<f32>,
    fold_left: Vec<f32>,
    fold_right: Vec<f32>,

    // Processing state
    air_filter: Biquad,
    doppler_line: DelayLine,
    doppler_delay: f32,

    hrtf: Arc<HrtfSet>,
    ear_left: FirFilter,
    ear_right: FirFilter,
    itd_line_left: DelayLine,
    itd_line_right: DelayLine,
    itd_delay_left: f32,
    itd_delay_right: f32,
    ild_gain_left: f32,
    ild_gain_right: f32,
    loaded_direction: Option<(f32, f32)>,

    pub crossfeed: Crossfeed,
}

/// Neutral Doppler delay; read rate modulation swings around this point
const DOPPLER_BASE_DELAY: f32 = 128.0;

impl SpatialProcessor {
    pub fn new(sample_rate: f64, layout: ChannelLayout) -> Self {
        let speakers = layout.speaker_positions().len();
        let (fold_left, fold_right) = stereo_fold_coefficients(layout);

        let mut air_filter = Biquad::new(sample_rate);
        air_filter.set_lowpass(20_000.0_f64.min(sample_rate * 0.45), 0.707);

        Self {
            mode: SpatialMode::BasicSurround,
            layout,
            sample_rate,
            source_position: Vec3::ZERO,
            source_velocity: Vec3::ZERO,
            listener_position: Vec3::ZERO,
            listener_forward: Vec3::FORWARD,
            listener_up: Vec3::UP,
            listener_velocity: Vec3::ZERO,
            environment: Environment::default(),
            relative: SphericalCoord::default(),
            attenuation: 1.0,
            doppler_ratio: 1.0,
            speaker_gains: vec![0.0; speakers],
            fold_left,
            fold_right,
            air_filter,
            doppler_line: DelayLine::new(4096),
            doppler_delay: DOPPLER_BASE_DELAY,
            hrtf: Arc::new(HrtfSet::synthetic_default(sample_rate as f32)),
            ear_left: FirFilter::new(crate::MAX_HRIR_TAPS),
            ear_right: FirFilter::new(crate::MAX_HRIR_TAPS),
            itd_line_left: DelayLine::new(64),
            itd_line_right: DelayLine::new(64),
            itd_delay_left: 0.0,
            itd_delay_right: 0.0,
            ild_gain_left: 1.0,
            ild_gain_right: 1.0,
            loaded_direction: None,
            crossfeed: Crossfeed::new(sample_rate),
        }
    }

    pub fn mode(&self) -> SpatialMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SpatialMode) {
        self.mode = mode;
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub fn set_source_position(&mut self, position: Vec3) {
        self.source_position = position;
    }

    pub fn set_source_velocity(&mut self, velocity: Vec3) {
        self.source_velocity = velocity;
    }

    pub fn set_listener_position(&mut self, position: Vec3) {
        self.listener_position = position;
    }

    /// Listener orientation; both vectors are normalized on write
    pub fn set_listener_orientation(&mut self, forward: Vec3, up: Vec3) {
        self.listener_forward = forward.normalize();
        self.listener_up = up.normalize();
    }

    pub fn set_listener_velocity(&mut self, velocity: Vec3) {
        self.listener_velocity = velocity;
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = environment;
    }

    pub fn set_room_size(&mut self, size: Vec3) {
        self.environment.room_size = size;
    }

    /// Swap in a new HRTF set, returning the previous one
    ///
    /// The same set is shared across tracks; swapping only moves reference
    /// counts, so it neither allocates nor frees on the audio thread as long
    /// as the caller keeps the returned handle alive.
    pub fn swap_hrtf(&mut self, set: Arc<HrtfSet>) -> Arc<HrtfSet> {
        let old = std::mem::replace(&mut self.hrtf, set);
        self.loaded_direction = None;
        old
    }

    pub fn relative_position(&self) -> SphericalCoord {
        self.relative
    }

    pub fn attenuation(&self) -> f32 {
        self.attenuation
    }

    /// Recompute everything derived from positions and environment
    ///
    /// Called once at the start of every block; parameter changes mid-block
    /// wait for the next one.
    pub fn begin_block(&mut self) {
        self.relative = SpatialMath::relative_position(
            self.source_position,
            self.listener_position,
            self.listener_forward,
            self.listener_up,
        );
        self.attenuation = SpatialMath::distance_attenuation(
            self.relative.distance,
            self.environment.reference_distance,
        );

        if self.environment.air_absorption_enabled {
            let cutoff = SpatialMath::air_absorption_cutoff(
                self.relative.distance,
                self.environment.humidity,
            ) as f64;
            self.air_filter
                .set_lowpass(cutoff.clamp(20.0, self.sample_rate * 0.45), 0.707);
        }

        self.doppler_ratio = if self.environment.doppler_enabled {
            SpatialMath::doppler_ratio(
                self.source_velocity,
                self.listener_velocity,
                self.listener_position - self.source_position,
                self.environment.speed_of_sound,
            )
        } else {
            1.0
        };

        self.update_speaker_gains();

        if self.mode == SpatialMode::BinauralHrtf {
            self.update_binaural_params();
        }
    }

    /// Constant-power gains across the layout's loudspeakers
    fn update_speaker_gains(&mut self) {
        let source = SphericalCoord::new(self.relative.azimuth, self.relative.elevation, 1.0)
            .to_cartesian();

        let lfe = self.layout.lfe_index();
        let mut total_power = 0.0_f32;
        for (i, &(az_deg, el_deg)) in self.layout.speaker_positions().iter().enumerate() {
            if Some(i) == lfe {
                self.speaker_gains[i] = 0.0;
                continue;
            }
            let speaker = SphericalCoord::new(
                (az_deg as f32).to_radians(),
                (el_deg as f32).to_radians(),
                1.0,
            )
            .to_cartesian();
            let gain = source.dot(&speaker).max(0.0);
            self.speaker_gains[i] = gain;
            total_power += gain * gain;
        }

        if total_power > 1e-10 {
            let scale = 1.0 / total_power.sqrt();
            for gain in &mut self.speaker_gains {
                *gain *= scale;
            }
        } else {
            // Source opposite every speaker: spread it evenly
            let count = self.speaker_gains.len().max(1);
            let gain = 1.0 / (count as f32).sqrt();
            for (i, g) in self.speaker_gains.iter_mut().enumerate() {
                *g = if Some(i) == lfe { 0.0 } else { gain };
            }
        }
    }

    fn update_binaural_params(&mut self) {
        let az_deg = self.relative.azimuth.to_degrees();
        let el_deg = self.relative.elevation.to_degrees();

        // Quantize so tiny position jitter does not thrash the FIR taps
        let quantized = ((az_deg / 5.0).round() * 5.0, (el_deg / 5.0).round() * 5.0);
        if self.loaded_direction != Some(quantized) {
            let pair = self.hrtf.nearest(az_deg, el_deg);
            self.ear_left.load(&pair.left);
            self.ear_right.load(&pair.right);
            self.loaded_direction = Some(quantized);
        }

        let itd =
            SpatialMath::interaural_time_difference(self.relative.azimuth, SpatialMath::HEAD_RADIUS);
        let itd_samples = (itd.abs() * self.sample_rate as f32).min(60.0);
        if itd >= 0.0 {
            // Source to the right: the left ear receives late
            self.itd_delay_left = itd_samples;
            self.itd_delay_right = 0.0;
        } else {
            self.itd_delay_left = 0.0;
            self.itd_delay_right = itd_samples;
        }

        let ild =
            SpatialMath::interaural_level_difference(self.relative.azimuth, self.relative.elevation);
        self.ild_gain_left = db_to_linear(-ild * 0.5);
        self.ild_gain_right = db_to_linear(ild * 0.5);
    }

    /// Render a stereo block in place
    pub fn process_stereo_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        debug_assert_eq!(left.len(), right.len());
        self.begin_block();

        match self.mode {
            SpatialMode::BasicSurround | SpatialMode::Ambisonics => {}
            SpatialMode::Spatial3D => self.process_spatial3d(left, right),
            SpatialMode::BinauralHrtf => self.process_binaural(left, right),
        }

        if self.crossfeed.is_enabled() {
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                (*l, *r) = self.crossfeed.process_sample(*l, *r);
            }
        }
    }

    fn process_spatial3d(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        let air = self.environment.air_absorption_enabled;
        let doppler = self.environment.doppler_enabled;
        let drift = 1.0 - self.doppler_ratio;
        let max_delay = (self.doppler_line.capacity() - 4) as f32;

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mut mono = (*l + *r) * 0.5 * self.attenuation;

            if air {
                mono = self.air_filter.process_sample(mono);
            }

            if doppler {
                self.doppler_line.write(mono);
                self.doppler_delay = (self.doppler_delay + drift).clamp(1.0, max_delay);
                mono = self.doppler_line.read_fractional(self.doppler_delay);
            }

            let mut out_l = 0.0;
            let mut out_r = 0.0;
            for (i, &gain) in self.speaker_gains.iter().enumerate() {
                let feed = mono * gain;
                out_l += feed * self.fold_left[i];
                out_r += feed * self.fold_right[i];
            }
            *l = out_l;
            *r = out_r;
        }
    }

    fn process_binaural(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mono = (*l + *r) * 0.5 * self.attenuation;

            let ear_l = self.ear_left.process_sample(mono);
            let ear_r = self.ear_right.process_sample(mono);

            self.itd_line_left.write(ear_l);
            self.itd_line_right.write(ear_r);
            let delayed_l = self.itd_line_left.read_fractional(self.itd_delay_left);
            let delayed_r = self.itd_line_right.read_fractional(self.itd_delay_right);

            *l = delayed_l * self.ild_gain_left;
            *r = delayed_r * self.ild_gain_right;
        }
    }

    pub fn reset(&mut self) {
        self.air_filter.reset();
        self.doppler_line.reset();
        self.doppler_delay = DOPPLER_BASE_DELAY;
        self.ear_left.reset();
        self.ear_right.reset();
        self.itd_line_left.reset();
        self.itd_line_right.reset();
        self.crossfeed.reset();
    }
}

/// Fold coefficients from a layout's speakers down to stereo
///
/// These follow the downmix matrix: front pairs map straight to L/R, the
/// center contributes 0.707 to both sides, surrounds map to their side, and
/// the LFE is dropped.
fn stereo_fold_coefficients(layout: ChannelLayout) -> (Vec<f32>, Vec<f32>) {
    match layout {
        ChannelLayout::Mono => (vec![std::f32::consts::FRAC_1_SQRT_2], vec![std::f32::consts::FRAC_1_SQRT_2]),
        ChannelLayout::Stereo => (vec![1.0, 0.0], vec![0.0, 1.0]),
        ChannelLayout::Surround51 => (
            vec![1.0, 0.0, 0.707, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.707, 0.0, 0.0, 1.0],
        ),
        ChannelLayout::Surround71 | ChannelLayout::Atmos => (
            vec![1.0, 0.0, 0.707, 0.0, 1.0, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.707, 0.0, 0.0, 1.0, 0.0, 1.0],
        ),
    }
}

/// Upmix a stereo buffer to a surround layout
///
/// Stereo to 5.1: FL=L, FR=R, C=(L+R)*0.707, LFE=0, BL=0.3*L, BR=0.3*R.
/// 7.1 feeds both surround pairs at 0.3; Atmos renders its 7.1 bed and
/// leaves the object slots silent.
pub fn stereo_to_surround(
    stereo: &MultichannelBuffer,
    layout: ChannelLayout,
) -> SpatialResult<MultichannelBuffer> {
    if stereo.layout() != ChannelLayout::Stereo {
        return Err(SpatialError::UnsupportedLayout(stereo.channel_count()));
    }
    if layout.channel_count() < 6 {
        return Err(SpatialError::UnsupportedLayout(layout.channel_count()));
    }

    let mut surround = MultichannelBuffer::new(layout, stereo.frames(), stereo.sample_rate());
    for frame in 0..stereo.frames() {
        let left = stereo.channel(0)[frame];
        let right = stereo.channel(1)[frame];
        let center = (left + right) * 0.707;

        surround.channel_mut(0)[frame] = left;
        surround.channel_mut(1)[frame] = right;
        surround.channel_mut(2)[frame] = center;
        surround.channel_mut(3)[frame] = 0.0;
        surround.channel_mut(4)[frame] = left * 0.3;
        surround.channel_mut(5)[frame] = right * 0.3;
        if layout.channel_count() >= 8 {
            surround.channel_mut(6)[frame] = left * 0.3;
            surround.channel_mut(7)[frame] = right * 0.3;
        }
    }
    Ok(surround)
}

/// Downmix a surround buffer to stereo
///
/// 5.1 to stereo: L = FL + 0.707*C + BL, R = FR + 0.707*C + BR. 7.1 and the
/// Atmos bed sum both surround pairs at unity.
pub fn surround_to_stereo(surround: &MultichannelBuffer) -> SpatialResult<MultichannelBuffer> {
    let channels = surround.channel_count();
    if channels < 6 {
        return Err(SpatialError::UnsupportedLayout(channels));
    }

    let mut stereo =
        MultichannelBuffer::new(ChannelLayout::Stereo, surround.frames(), surround.sample_rate());
    for frame in 0..surround.frames() {
        let center = surround.channel(2)[frame] * 0.707;
        let mut left = surround.channel(0)[frame] + center + surround.channel(4)[frame];
        let mut right = surround.channel(1)[frame] + center + surround.channel(5)[frame];
        if channels >= 8 {
            left += surround.channel(6)[frame];
            right += surround.channel(7)[frame];
        }
        stereo.channel_mut(0)[frame] = left;
        stereo.channel_mut(1)[frame] = right;
    }
    Ok(stereo)
}
