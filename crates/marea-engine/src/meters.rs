//! Lock-free metering and engine status
//!
//! All values cross the thread boundary as f32 bit patterns in atomics; the
//! audio callback writes, control threads read. Peak meters decay
//! monotonically between updates while the peak-hold value follows its own,
//! slower release constant.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::track::MAX_TRACKS;

#[inline]
fn load_f32(atomic: &AtomicU32) -> f32 {
    f32::from_bits(atomic.load(Ordering::Relaxed))
}

#[inline]
fn store_f32(atomic: &AtomicU32, value: f32) {
    atomic.store(value.to_bits(), Ordering::Relaxed);
}

/// Master bus meter values
#[derive(Debug, Default)]
pub struct MeterData {
    left_peak: AtomicU32,
    right_peak: AtomicU32,
    left_peak_hold: AtomicU32,
    right_peak_hold: AtomicU32,
    left_rms: AtomicU32,
    right_rms: AtomicU32,
    clipped: AtomicBool,
}

impl MeterData {
    pub fn left_peak(&self) -> f32 {
        load_f32(&self.left_peak)
    }

    pub fn right_peak(&self) -> f32 {
        load_f32(&self.right_peak)
    }

    pub fn left_peak_hold(&self) -> f32 {
        load_f32(&self.left_peak_hold)
    }

    pub fn right_peak_hold(&self) -> f32 {
        load_f32(&self.right_peak_hold)
    }

    pub fn left_rms(&self) -> f32 {
        load_f32(&self.left_rms)
    }

    pub fn right_rms(&self) -> f32 {
        load_f32(&self.right_rms)
    }

    pub fn is_clipped(&self) -> bool {
        self.clipped.load(Ordering::Relaxed)
    }

    pub fn reset_clip(&self) {
        self.clipped.store(false, Ordering::Relaxed);
    }

    /// Fold one block's peak/RMS into the meters
    ///
    /// `peak_decay` and `hold_decay` are per-block decay factors; the meter
    /// only ever moves down by decay or up to a louder block, never jumps
    /// upward spuriously.
    pub fn update_block(
        &self,
        peak_l: f32,
        peak_r: f32,
        rms_l: f32,
        rms_r: f32,
        peak_decay: f32,
        hold_decay: f32,
    ) {
        store_f32(&self.left_peak, (self.left_peak() * peak_decay).max(peak_l));
        store_f32(
            &self.right_peak,
            (self.right_peak() * peak_decay).max(peak_r),
        );
        store_f32(
            &self.left_peak_hold,
            (self.left_peak_hold() * hold_decay).max(peak_l),
        );
        store_f32(
            &self.right_peak_hold,
            (self.right_peak_hold() * hold_decay).max(peak_r),
        );
        store_f32(&self.left_rms, rms_l);
        store_f32(&self.right_rms, rms_r);

        if peak_l > 1.0 || peak_r > 1.0 {
            self.clipped.store(true, Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        store_f32(&self.left_peak, 0.0);
        store_f32(&self.right_peak, 0.0);
        store_f32(&self.left_peak_hold, 0.0);
        store_f32(&self.right_peak_hold, 0.0);
        store_f32(&self.left_rms, 0.0);
        store_f32(&self.right_rms, 0.0);
        self.reset_clip();
    }
}

/// Per-track meter slot
#[derive(Debug, Default)]
pub struct TrackMeters {
    peak: AtomicU32,
    rms: AtomicU32,
    gain_reduction_db: AtomicU32,
    cpu_percent: AtomicU32,
}

impl TrackMeters {
    pub fn peak(&self) -> f32 {
        load_f32(&self.peak)
    }

    pub fn rms(&self) -> f32 {
        load_f32(&self.rms)
    }

    pub fn gain_reduction_db(&self) -> f32 {
        load_f32(&self.gain_reduction_db)
    }

    pub fn cpu_percent(&self) -> f32 {
        load_f32(&self.cpu_percent)
    }

    pub fn set(&self, peak: f32, rms: f32, gain_reduction_db: f32, cpu_percent: f32) {
        store_f32(&self.peak, peak);
        store_f32(&self.rms, rms);
        store_f32(&self.gain_reduction_db, gain_reduction_db);
        store_f32(&self.cpu_percent, cpu_percent);
    }

    pub fn decay(&self, factor: f32) {
        store_f32(&self.peak, self.peak() * factor);
        store_f32(&self.rms, self.rms() * factor);
    }

    pub fn reset(&self) {
        self.set(0.0, 0.0, 0.0, 0.0);
    }
}

/// Status surface shared between the audio callback and control threads
#[derive(Debug)]
pub struct EngineShared {
    pub running: AtomicBool,
    master_volume: AtomicU32,
    pub meters: MeterData,
    pub track_meters: [TrackMeters; MAX_TRACKS],
    pub dropped_frames: AtomicU64,
    pub rejected_updates: AtomicU64,
    callback_load: AtomicU32,
    /// Total latency in samples: effect chains plus device buffering
    pub latency_samples: AtomicU64,
}

impl Default for EngineShared {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            master_volume: AtomicU32::new(1.0_f32.to_bits()),
            meters: MeterData::default(),
            track_meters: std::array::from_fn(|_| TrackMeters::default()),
            dropped_frames: AtomicU64::new(0),
            rejected_updates: AtomicU64::new(0),
            callback_load: AtomicU32::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }
}

impl EngineShared {
    pub fn master_volume(&self) -> f32 {
        load_f32(&self.master_volume)
    }

    /// Clamped to [0, 2]
    pub fn set_master_volume(&self, volume: f32) {
        store_f32(&self.master_volume, volume.clamp(0.0, 2.0));
    }

    pub fn callback_load_percent(&self) -> f32 {
        load_f32(&self.callback_load)
    }

    pub fn set_callback_load_percent(&self, load: f32) {
        store_f32(&self.callback_load, load);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_roundtrip() {
        let meters = MeterData::default();
        meters.update_block(0.75, 0.5, 0.3, 0.2, 1.0, 1.0);

        assert!((meters.left_peak() - 0.75).abs() < 1e-6);
        assert!((meters.right_peak() - 0.5).abs() < 1e-6);
        assert!((meters.left_rms() - 0.3).abs() < 1e-6);
        assert!(!meters.is_clipped());
    }

    #[test]
    fn test_peak_decays_monotonically() {
        let meters = MeterData::default();
        meters.update_block(1.0, 1.0, 0.5, 0.5, 1.0, 1.0);

        let mut previous = meters.left_peak();
        for _ in 0..10 {
            meters.update_block(0.0, 0.0, 0.0, 0.0, 0.9, 0.99);
            let current = meters.left_peak();
            assert!(current <= previous);
            previous = current;
        }
        // Hold decays slower than the main peak
        assert!(meters.left_peak_hold() > meters.left_peak());
    }

    #[test]
    fn test_clip_latches_until_reset() {
        let meters = MeterData::default();
        meters.update_block(1.5, 0.5, 0.5, 0.5, 1.0, 1.0);
        assert!(meters.is_clipped());

        meters.update_block(0.1, 0.1, 0.1, 0.1, 1.0, 1.0);
        assert!(meters.is_clipped());

        meters.reset_clip();
        assert!(!meters.is_clipped());
    }

    #[test]
    fn test_master_volume_clamped() {
        let shared = EngineShared::default();
        shared.set_master_volume(5.0);
        assert_eq!(shared.master_volume(), 2.0);
        shared.set_master_volume(-1.0);
        assert_eq!(shared.master_volume(), 0.0);
    }
}
