//! marea-spatial: Spatial audio for the Marea engine
//!
//! - `position` - 3-vector / spherical math and the psychoacoustic helpers
//!   (distance attenuation, air absorption, Doppler, ITD, ILD)
//! - `hrtf` - HRIR storage, validation, and the built-in synthetic set
//! - `renderer` - per-track surround/3D/binaural rendering and crossfeed

mod error;
pub mod hrtf;
pub mod position;
pub mod renderer;

pub use error::*;
pub use hrtf::{HrirPair, HrtfSet, MAX_HRIR_TAPS};
pub use position::{SpatialMath, SphericalCoord, Vec3};
pub use renderer::{
    Crossfeed, Environment, SpatialMode, SpatialProcessor, stereo_to_surround,
    surround_to_stereo,
};
