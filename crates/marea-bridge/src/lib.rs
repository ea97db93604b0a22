//! marea-bridge: Lock-free GUI-to-audio parameter bridge
//!
//! A single-producer/single-consumer ring buffer carries plain-data
//! parameter updates from control threads into the audio callback. Large
//! payloads (HRTF sets) never travel through the ring; they are published by
//! reference-count swap through a dedicated handoff slot.

mod commands;
mod queue;

pub use commands::*;
pub use queue::*;
