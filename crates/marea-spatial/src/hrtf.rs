//! HRIR storage and the built-in synthetic HRTF set
//!
//! Measured sets are loaded on the control side and published to the audio
//! thread by box swap. When nothing is loaded, a synthetic set generated on a
//! coarse direction grid stands in; it encodes only the direction-dependent
//! spectral shape, since the renderer applies ITD and ILD explicitly.

use marea_core::Sample;

use crate::{SpatialError, SpatialResult};

/// Maximum impulse length accepted at load time
pub const MAX_HRIR_TAPS: usize = 1024;

/// Left/right impulse response pair for one direction
#[derive(Debug, Clone)]
pub struct HrirPair {
    pub left: Vec<Sample>,
    pub right: Vec<Sample>,
    /// Azimuth in degrees
    pub azimuth: f32,
    /// Elevation in degrees
    pub elevation: f32,
}

impl HrirPair {
    pub fn new(
        left: Vec<Sample>,
        right: Vec<Sample>,
        azimuth: f32,
        elevation: f32,
    ) -> SpatialResult<Self> {
        if left.is_empty() || right.is_empty() {
            return Err(SpatialError::InvalidHrtf("empty impulse response".into()));
        }
        if left.len() != right.len() {
            return Err(SpatialError::InvalidHrtf(format!(
                "left/right length mismatch: {} vs {}",
                left.len(),
                right.len()
            )));
        }
        if left.len() > MAX_HRIR_TAPS {
            return Err(SpatialError::InvalidHrtf(format!(
                "impulse too long: {} taps (max {})",
                left.len(),
                MAX_HRIR_TAPS
            )));
        }
        Ok(Self {
            left,
            right,
            azimuth,
            elevation,
        })
    }

    pub fn length(&self) -> usize {
        self.left.len()
    }
}

/// A set of HRIR measurements queried by direction
#[derive(Debug, Clone)]
pub struct HrtfSet {
    hrirs: Vec<HrirPair>,
    filter_length: usize,
}

impl HrtfSet {
    /// Build a set from validated pairs
    pub fn from_pairs(pairs: Vec<HrirPair>) -> SpatialResult<Self> {
        if pairs.is_empty() {
            return Err(SpatialError::InvalidHrtf("no measurements".into()));
        }
        let filter_length = pairs.iter().map(HrirPair::length).max().unwrap_or(0);
        log::debug!(
            "hrtf set: {} measurements, {} taps",
            pairs.len(),
            filter_length
        );
        Ok(Self {
            hrirs: pairs,
            filter_length,
        })
    }

    /// Built-in synthetic set on a 30 degree azimuth / 45 degree elevation grid
    ///
    /// Each direction gets a 64-tap impulse: a unit main tap followed by a
    /// small decaying reflection whose position and level vary with azimuth,
    /// giving a mild direction-dependent comb color. Far-ear shadow beyond
    /// what the renderer's scalar ILD applies is deliberately not baked in.
    pub fn synthetic_default(sample_rate: f32) -> Self {
        let mut pairs = Vec::new();
        let mut azimuth = -180.0_f32;
        while azimuth <= 150.0 {
            for elevation in [-45.0_f32, 0.0, 45.0] {
                pairs.push(Self::synthetic_pair(azimuth, elevation, sample_rate));
            }
            azimuth += 30.0;
        }
        Self::from_pairs(pairs).expect("synthetic grid is never empty")
    }

    fn synthetic_pair(azimuth: f32, elevation: f32, sample_rate: f32) -> HrirPair {
        const TAPS: usize = 64;
        let mut left = vec![0.0; TAPS];
        let mut right = vec![0.0; TAPS];

        left[0] = 1.0;
        right[0] = 1.0;

        // Pinna-like reflection: ~0.15 ms base lag, pushed later on the far
        // side of the head and attenuated with elevation.
        let azimuth_rad = azimuth.to_radians();
        let base_lag = (0.00015 * sample_rate) as usize;
        let spread = (0.00008 * sample_rate * azimuth_rad.sin().abs()) as usize;
        let reflection_gain = 0.3 * (1.0 - elevation.abs() / 90.0);

        let left_lag = (base_lag + spread).min(TAPS - 1);
        let right_lag = base_lag.min(TAPS - 1);
        let (left_lag, right_lag) = if azimuth >= 0.0 {
            (left_lag, right_lag)
        } else {
            (right_lag, left_lag)
        };
        left[left_lag.max(1)] = reflection_gain;
        right[right_lag.max(1)] = reflection_gain;

        HrirPair {
            left,
            right,
            azimuth,
            elevation,
        }
    }

    /// Longest impulse in the set
    pub fn filter_length(&self) -> usize {
        self.filter_length
    }

    pub fn len(&self) -> usize {
        self.hrirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hrirs.is_empty()
    }

    /// Nearest measurement for a direction in degrees
    pub fn nearest(&self, azimuth: f32, elevation: f32) -> &HrirPair {
        let mut best = &self.hrirs[0];
        let mut best_score = f32::MAX;
        for pair in &self.hrirs {
            let mut az_diff = (pair.azimuth - azimuth).abs() % 360.0;
            if az_diff > 180.0 {
                az_diff = 360.0 - az_diff;
            }
            let el_diff = (pair.elevation - elevation).abs();
            let score = az_diff * az_diff + el_diff * el_diff;
            if score < best_score {
                best_score = score;
                best = pair;
            }
        }
        best
    }
}
