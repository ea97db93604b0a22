//! marea-engine: Real-time mixing engine
//!
//! The sound device drives a fixed-size callback that drains the parameter
//! queue, pulls every audible track through its effect chain and spatial
//! renderer, sums the result onto a stereo master bus, and publishes meters
//! through atomics. Control threads talk to the callback exclusively through
//! the `marea-bridge` queue and read state back from `EngineShared`.
//!
//! - `track` - track slots, test oscillators, decoded-frame sources
//! - `chain` - per-track effect chain host (EQ + dynamics)
//! - `meters` - lock-free meter and status atomics
//! - `graph` - the audio-side mix graph (callback body)
//! - `engine` - the control-side handle (device, transport, status surface)

mod chain;
mod engine;
mod graph;
mod meters;
mod track;

pub use chain::{EffectChain, EffectSlot, ParamInfo, TrackEffect};
pub use engine::{AudioEngine, EngineConfig};
pub use graph::{MAX_UPDATES_PER_BLOCK, MixGraph};
pub use meters::{EngineShared, MeterData, TrackMeters};
pub use track::{DecodedClip, FrameSource, MAX_TRACKS, PinkNoise, Track};
