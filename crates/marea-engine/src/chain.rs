//! Effect chain host
//!
//! An ordered list of effect slots, each with a bypass flag, measured CPU
//! share, and reported latency. Effects dispatch per block through a tagged
//! enum; the string-keyed parameter surface exists only for the GUI boundary,
//! everything inside the engine uses the typed field selectors.

use std::time::Instant;

use marea_core::Sample;
use marea_dsp::{
    DetectionMode, DynamicsMode, DynamicsProcessor, FilterKind, ParametricEq, Processor,
};

/// Parameter descriptor for the GUI boundary
#[derive(Debug, Clone, Copy)]
pub struct ParamInfo {
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
}

const DYNAMICS_PARAMS: [ParamInfo; 10] = [
    ParamInfo { name: "mode", min: 0.0, max: 3.0 },
    ParamInfo { name: "detection", min: 0.0, max: 2.0 },
    ParamInfo { name: "threshold_db", min: -60.0, max: 0.0 },
    ParamInfo { name: "ratio", min: 1.0, max: 100.0 },
    ParamInfo { name: "attack_ms", min: 0.01, max: 500.0 },
    ParamInfo { name: "release_ms", min: 1.0, max: 5000.0 },
    ParamInfo { name: "knee_db", min: 0.0, max: 24.0 },
    ParamInfo { name: "makeup_db", min: -24.0, max: 24.0 },
    ParamInfo { name: "lookahead_ms", min: 0.0, max: 20.0 },
    ParamInfo { name: "lookahead_enabled", min: 0.0, max: 1.0 },
];

macro_rules! eq_band_params {
    ($($band:literal),*) => {
        [
            $(
                ParamInfo { name: concat!("band", $band, ".frequency"), min: 20.0, max: 20_000.0 },
                ParamInfo { name: concat!("band", $band, ".gain_db"), min: -24.0, max: 24.0 },
                ParamInfo { name: concat!("band", $band, ".q"), min: 0.1, max: 20.0 },
                ParamInfo { name: concat!("band", $band, ".kind"), min: 0.0, max: 7.0 },
                ParamInfo { name: concat!("band", $band, ".enabled"), min: 0.0, max: 1.0 },
            )*
        ]
    };
}

const EQ_PARAMS: [ParamInfo; 40] = eq_band_params!(0, 1, 2, 3, 4, 5, 6, 7);

/// Map a filter kind index from the parameter surface
pub fn filter_kind_from_index(index: u32) -> FilterKind {
    match index {
        0 => FilterKind::LowPass,
        1 => FilterKind::HighPass,
        2 => FilterKind::LowShelf,
        3 => FilterKind::HighShelf,
        5 => FilterKind::Notch,
        6 => FilterKind::BandPass,
        7 => FilterKind::AllPass,
        _ => FilterKind::Peak,
    }
}

pub fn dynamics_mode_from_index(index: u32) -> DynamicsMode {
    match index {
        1 => DynamicsMode::Limiter,
        2 => DynamicsMode::Gate,
        3 => DynamicsMode::Expander,
        _ => DynamicsMode::Compressor,
    }
}

pub fn detection_mode_from_index(index: u32) -> DetectionMode {
    match index {
        0 => DetectionMode::Peak,
        2 => DetectionMode::Hybrid,
        _ => DetectionMode::Rms,
    }
}

/// Tagged effect instance
pub enum TrackEffect {
    Eq(ParametricEq),
    Dynamics(DynamicsProcessor),
}

impl TrackEffect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq(_) => "ParametricEQ",
            Self::Dynamics(_) => "Dynamics",
        }
    }

    pub fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        match self {
            Self::Eq(eq) => eq.process_stereo_block(left, right),
            Self::Dynamics(dynamics) => dynamics.process_stereo_block(left, right),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Eq(eq) => eq.reset(),
            Self::Dynamics(dynamics) => dynamics.reset(),
        }
    }

    pub fn latency_samples(&self) -> usize {
        match self {
            Self::Eq(_) => 0,
            Self::Dynamics(dynamics) => dynamics.latency(),
        }
    }

    /// Enumerated parameter schema for this effect kind
    pub fn param_schema(&self) -> &'static [ParamInfo] {
        match self {
            Self::Eq(_) => &EQ_PARAMS,
            Self::Dynamics(_) => &DYNAMICS_PARAMS,
        }
    }

    /// String-keyed write, for the GUI boundary only
    pub fn set_param(&mut self, name: &str, value: f32) -> bool {
        match self {
            Self::Eq(eq) => {
                let Some((band, field)) = parse_band_param(name) else {
                    return false;
                };
                match field {
                    "frequency" => eq.set_band_frequency(band, value),
                    "gain_db" => eq.set_band_gain(band, value),
                    "q" => eq.set_band_q(band, value),
                    "kind" => eq.set_band_kind(band, filter_kind_from_index(value as u32)),
                    "enabled" => eq.set_band_enabled(band, value != 0.0),
                    _ => return false,
                }
                true
            }
            Self::Dynamics(dynamics) => {
                match name {
                    "mode" => dynamics.set_mode(dynamics_mode_from_index(value as u32)),
                    "detection" => {
                        dynamics.set_detection(detection_mode_from_index(value as u32))
                    }
                    "threshold_db" => dynamics.set_threshold(value),
                    "ratio" => dynamics.set_ratio(value),
                    "attack_ms" => dynamics.set_attack(value),
                    "release_ms" => dynamics.set_release(value),
                    "knee_db" => dynamics.set_knee(value),
                    "makeup_db" => dynamics.set_makeup(value),
                    "lookahead_ms" => dynamics.set_lookahead_ms(value),
                    "lookahead_enabled" => dynamics.set_lookahead_enabled(value != 0.0),
                    _ => return false,
                }
                true
            }
        }
    }

    /// String-keyed read, for the GUI boundary only
    pub fn get_param(&self, name: &str) -> Option<f32> {
        match self {
            Self::Eq(eq) => {
                let (band, field) = parse_band_param(name)?;
                let config = eq.band(band);
                match field {
                    "frequency" => Some(config.frequency),
                    "gain_db" => Some(config.gain_db),
                    "q" => Some(config.q),
                    "enabled" => Some(if config.enabled { 1.0 } else { 0.0 }),
                    _ => None,
                }
            }
            Self::Dynamics(dynamics) => {
                let params = dynamics.params();
                match name {
                    "threshold_db" => Some(params.threshold_db),
                    "ratio" => Some(params.ratio),
                    "attack_ms" => Some(params.attack_ms),
                    "release_ms" => Some(params.release_ms),
                    "knee_db" => Some(params.knee_db),
                    "makeup_db" => Some(params.makeup_db),
                    "lookahead_ms" => Some(params.lookahead_ms),
                    "lookahead_enabled" => {
                        Some(if params.lookahead_enabled { 1.0 } else { 0.0 })
                    }
                    _ => None,
                }
            }
        }
    }
}

fn parse_band_param(name: &str) -> Option<(usize, &str)> {
    let rest = name.strip_prefix("band")?;
    let (index, field) = rest.split_once('.')?;
    let band: usize = index.parse().ok()?;
    if band < marea_dsp::EQ_BANDS {
        Some((band, field))
    } else {
        None
    }
}

/// One slot in the chain
pub struct EffectSlot {
    pub effect: TrackEffect,
    pub bypassed: bool,
    cpu_percent: f32,
}

impl EffectSlot {
    pub fn new(effect: TrackEffect) -> Self {
        Self {
            effect,
            bypassed: true,
            cpu_percent: 0.0,
        }
    }

    pub fn cpu_percent(&self) -> f32 {
        self.cpu_percent
    }
}

/// Ordered effect chain for one track
///
/// Every track starts with an EQ followed by a dynamics processor, both
/// bypassed; bypass short-circuits, so an untouched chain is bit-exact.
pub struct EffectChain {
    slots: Vec<EffectSlot>,
    sample_rate: f64,
}

impl EffectChain {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            slots: vec![
                EffectSlot::new(TrackEffect::Eq(ParametricEq::new(sample_rate, 2))),
                EffectSlot::new(TrackEffect::Dynamics(DynamicsProcessor::new(
                    sample_rate,
                    2,
                ))),
            ],
            sample_rate,
        }
    }

    pub fn slots(&self) -> &[EffectSlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [EffectSlot] {
        &mut self.slots
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn eq_mut(&mut self) -> &mut ParametricEq {
        for slot in &mut self.slots {
            if let TrackEffect::Eq(eq) = &mut slot.effect {
                return eq;
            }
        }
        unreachable!("chain always carries an EQ slot")
    }

    pub fn dynamics_mut(&mut self) -> &mut DynamicsProcessor {
        for slot in &mut self.slots {
            if let TrackEffect::Dynamics(dynamics) = &mut slot.effect {
                return dynamics;
            }
        }
        unreachable!("chain always carries a dynamics slot")
    }

    pub fn dynamics(&self) -> &DynamicsProcessor {
        for slot in &self.slots {
            if let TrackEffect::Dynamics(dynamics) = &slot.effect {
                return dynamics;
            }
        }
        unreachable!("chain always carries a dynamics slot")
    }

    pub fn set_eq_bypassed(&mut self, bypassed: bool) {
        for slot in &mut self.slots {
            if matches!(slot.effect, TrackEffect::Eq(_)) {
                slot.bypassed = bypassed;
            }
        }
    }

    pub fn set_dynamics_bypassed(&mut self, bypassed: bool) {
        for slot in &mut self.slots {
            if matches!(slot.effect, TrackEffect::Dynamics(_)) {
                slot.bypassed = bypassed;
            }
        }
    }

    /// Process the chain in order, timing each effect's CPU share
    pub fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        let block_seconds = left.len() as f64 / self.sample_rate;
        for slot in &mut self.slots {
            if slot.bypassed {
                continue;
            }
            let started = Instant::now();
            slot.effect.process_block(left, right);
            let share = (started.elapsed().as_secs_f64() / block_seconds * 100.0) as f32;
            // One-pole smoothing so the GUI meter does not flicker
            slot.cpu_percent = slot.cpu_percent * 0.9 + share.min(100.0) * 0.1;
        }
    }

    /// Aggregate latency of the non-bypassed effects
    pub fn total_latency(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.bypassed)
            .map(|slot| slot.effect.latency_samples())
            .sum()
    }

    pub fn total_cpu_percent(&self) -> f32 {
        self.slots.iter().map(|slot| slot.cpu_percent).sum()
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.effect.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marea_dsp::DynamicsParams;

    #[test]
    fn test_default_chain_is_bit_exact() {
        let mut chain = EffectChain::new(44100.0);
        let input: Vec<Sample> = (0..256).map(|n| (n as f32 * 0.01).sin() * 0.5).collect();
        let mut left = input.clone();
        let mut right = input.clone();

        chain.process_block(&mut left, &mut right);
        assert_eq!(left, input);
        assert_eq!(right, input);
    }

    #[test]
    fn test_bypassed_effect_bit_exact_even_when_configured() {
        let mut chain = EffectChain::new(44100.0);
        chain.eq_mut().set_band_gain(3, 12.0);
        chain.eq_mut().set_band_enabled(3, true);
        // Slot stays bypassed

        let input: Vec<Sample> = (0..256).map(|n| (n as f32 * 0.02).sin()).collect();
        let mut left = input.clone();
        let mut right = input.clone();
        chain.process_block(&mut left, &mut right);
        assert_eq!(left, input);
    }

    #[test]
    fn test_chain_latency_tracks_lookahead() {
        let mut chain = EffectChain::new(44100.0);
        assert_eq!(chain.total_latency(), 0);

        chain.dynamics_mut().apply_params(DynamicsParams {
            lookahead_ms: 5.0,
            lookahead_enabled: true,
            ..Default::default()
        });
        // Still bypassed: reported aggregate stays zero
        assert_eq!(chain.total_latency(), 0);

        chain.set_dynamics_bypassed(false);
        assert_eq!(chain.total_latency(), 221);
    }

    #[test]
    fn test_param_schema_and_string_surface() {
        let mut chain = EffectChain::new(44100.0);

        let slot_schema = chain.slots()[0].effect.param_schema();
        assert_eq!(slot_schema.len(), 40);
        assert_eq!(slot_schema[0].name, "band0.frequency");

        let eq = &mut chain.slots_mut()[0].effect;
        assert!(eq.set_param("band2.gain_db", 6.0));
        assert_eq!(eq.get_param("band2.gain_db"), Some(6.0));
        assert!(!eq.set_param("band9.gain_db", 6.0));
        assert!(!eq.set_param("nonsense", 1.0));

        let dynamics = &mut chain.slots_mut()[1].effect;
        assert!(dynamics.set_param("threshold_db", -18.0));
        assert_eq!(dynamics.get_param("threshold_db"), Some(-18.0));
        assert_eq!(dynamics.param_schema().len(), 10);
    }

    #[test]
    fn test_effect_names() {
        let chain = EffectChain::new(44100.0);
        let names: Vec<_> = chain.slots().iter().map(|s| s.effect.name()).collect();
        assert_eq!(names, vec!["ParametricEQ", "Dynamics"]);
    }
}
