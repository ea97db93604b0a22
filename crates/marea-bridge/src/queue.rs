//! Lock-free command queue and HRTF handoff
//!
//! Built on rtrb. The producer side never blocks: a full ring drops the
//! update and bumps a counter. The consumer side pops without allocating.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use marea_spatial::HrtfSet;

use crate::ParameterUpdate;

/// Command queue capacity (power of two)
pub const COMMAND_QUEUE_SIZE: usize = 4096;

/// Manages the SPSC channel between control and audio domains
pub struct CommandQueue {
    producer: Producer<ParameterUpdate>,
    consumer: Consumer<ParameterUpdate>,
    dropped: Arc<AtomicU64>,
    hrtf_handoff: Arc<HrtfHandoff>,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (producer, consumer) = RingBuffer::new(COMMAND_QUEUE_SIZE);
        Self {
            producer,
            consumer,
            dropped: Arc::new(AtomicU64::new(0)),
            hrtf_handoff: Arc::new(HrtfHandoff::default()),
        }
    }

    /// Split into the control-side and audio-side handles
    pub fn split(self) -> (ControlHandle, AudioHandle) {
        let control = ControlHandle {
            producer: self.producer,
            dropped: Arc::clone(&self.dropped),
            hrtf_handoff: Arc::clone(&self.hrtf_handoff),
        };
        let audio = AudioHandle {
            consumer: self.consumer,
            hrtf_handoff: self.hrtf_handoff,
        };
        (control, audio)
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Control-domain handle: enqueue updates, never block
pub struct ControlHandle {
    producer: Producer<ParameterUpdate>,
    dropped: Arc<AtomicU64>,
    hrtf_handoff: Arc<HrtfHandoff>,
}

impl ControlHandle {
    /// Enqueue an update; a full queue drops it and bumps the counter
    #[inline]
    pub fn send(&mut self, update: ParameterUpdate) -> bool {
        if self.producer.push(update).is_ok() {
            true
        } else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                log::warn!("parameter queue full; {} updates dropped so far", dropped);
            }
            false
        }
    }

    #[inline]
    pub fn has_space(&self) -> bool {
        !self.producer.is_full()
    }

    #[inline]
    pub fn available_space(&self) -> usize {
        self.producer.slots()
    }

    /// Updates dropped because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stage a new HRTF set, then enqueue `ParameterUpdate::HrtfConfig`
    ///
    /// Returns `false` (set not staged) while a previous staging has not been
    /// consumed yet.
    pub fn stage_hrtf(&mut self, set: Arc<HrtfSet>) -> bool {
        self.hrtf_handoff.stage(set)
    }

    /// Reclaim the set the audio side retired, releasing it on this thread
    pub fn reclaim_hrtf(&self) -> Option<Arc<HrtfSet>> {
        self.hrtf_handoff.reclaim()
    }
}

/// Audio-domain handle: drain updates without blocking or allocating
pub struct AudioHandle {
    consumer: Consumer<ParameterUpdate>,
    hrtf_handoff: Arc<HrtfHandoff>,
}

impl AudioHandle {
    /// Pop one update, if any
    #[inline]
    pub fn pop(&mut self) -> Option<ParameterUpdate> {
        self.consumer.pop().ok()
    }

    #[inline]
    pub fn has_commands(&self) -> bool {
        !self.consumer.is_empty()
    }

    /// Take the staged HRTF set and retire the current one
    ///
    /// The closure installs the new set and returns the old one, which is
    /// parked for the control side to release. If the retire slot is still
    /// occupied the exchange is skipped and retried on a later block.
    pub fn exchange_hrtf(
        &mut self,
        install: impl FnOnce(Arc<HrtfSet>) -> Arc<HrtfSet>,
    ) -> bool {
        self.hrtf_handoff.exchange(install)
    }
}

/// Two-slot handoff for HRTF sets
///
/// `staged` travels control -> audio, `retired` travels audio -> control.
/// The audio side only ever uses `try_lock`, so it cannot block on a
/// control-side stage or reclaim in progress.
#[derive(Default)]
pub struct HrtfHandoff {
    staged: Mutex<Option<Arc<HrtfSet>>>,
    retired: Mutex<Option<Arc<HrtfSet>>>,
}

impl HrtfHandoff {
    fn stage(&self, set: Arc<HrtfSet>) -> bool {
        let mut staged = self.staged.lock();
        if staged.is_some() {
            return false;
        }
        *staged = Some(set);
        true
    }

    fn reclaim(&self) -> Option<Arc<HrtfSet>> {
        self.retired.lock().take()
    }

    fn exchange(&self, install: impl FnOnce(Arc<HrtfSet>) -> Arc<HrtfSet>) -> bool {
        let Some(mut staged) = self.staged.try_lock() else {
            return false;
        };
        let Some(mut retired) = self.retired.try_lock() else {
            return false;
        };
        if retired.is_some() {
            // Control side has not reclaimed the previous set yet
            return false;
        }
        let Some(new_set) = staged.take() else {
            return false;
        };
        *retired = Some(install(new_set));
        true
    }
}
