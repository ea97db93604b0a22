//! Control-side engine handle
//!
//! Owns the device stream, the producer end of the parameter queue, and the
//! shared status atomics. The mix graph lives behind an `Arc<Mutex<_>>`
//! shared with the stream callback; the control side only locks it while the
//! stream is stopped (reset, source installation), so the audio-side lock is
//! uncontended in normal operation.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use marea_audio::{
    AudioConfig, AudioResult, AudioStream, get_default_output_device, get_output_device_by_name,
};
use marea_bridge::{
    CommandQueue, ControlHandle, ParameterUpdate, SignalKind, TransportCommand,
};
use marea_core::{BufferSize, ChannelLayout, CoreError, CoreResult, SampleRate, validate_block_size};
use marea_spatial::{HrirPair, HrtfSet, SpatialResult};

use crate::graph::MixGraph;
use crate::meters::EngineShared;
use crate::track::FrameSource;

/// Engine startup configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: SampleRate,
    pub buffer_size: BufferSize,
    pub layout: ChannelLayout,
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            buffer_size: BufferSize::Samples256,
            layout: ChannelLayout::Stereo,
            output_device: None,
        }
    }
}

impl EngineConfig {
    /// Build a config from raw numbers, rejecting unsupported values
    pub fn from_raw(sample_rate: u32, block_size: u32) -> CoreResult<Self> {
        let sample_rate = SampleRate::from_u32(sample_rate)
            .ok_or(CoreError::InvalidSampleRate(sample_rate))?;
        validate_block_size(block_size as usize)?;
        let buffer_size = BufferSize::from_u32(block_size)
            .ok_or(CoreError::InvalidBlockSize(block_size as usize))?;
        Ok(Self {
            sample_rate,
            buffer_size,
            layout: ChannelLayout::Stereo,
            output_device: None,
        })
    }

    fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.sample_rate,
            buffer_size: self.buffer_size,
            layout: self.layout,
        }
    }
}

/// The mixing engine, seen from the control domain
pub struct AudioEngine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    control: Mutex<ControlHandle>,
    graph: Arc<Mutex<MixGraph>>,
    stream: Mutex<Option<AudioStream>>,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Self {
        let shared = Arc::new(EngineShared::default());
        let (control, audio) = CommandQueue::new().split();
        let graph = MixGraph::new(&config.audio_config(), audio, Arc::clone(&shared));

        Self {
            config,
            shared,
            control: Mutex::new(control),
            graph: Arc::new(Mutex::new(graph)),
            stream: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open the output device and start the callback
    pub fn start(&self) -> AudioResult<()> {
        if self.shared.is_running() {
            return Ok(());
        }

        let device = match &self.config.output_device {
            Some(name) => get_output_device_by_name(name)?,
            None => get_default_output_device()?,
        };

        let graph = Arc::clone(&self.graph);
        let shared = Arc::clone(&self.shared);
        let callback = Box::new(move |data: &mut [f32]| {
            match graph.try_lock() {
                Some(mut graph) => graph.process_block(data),
                None => {
                    // Control side holds the graph: emit silence, count it
                    data.fill(0.0);
                    shared
                        .dropped_frames
                        .fetch_add((data.len() / 2) as u64, std::sync::atomic::Ordering::Relaxed);
                }
            }
        });

        let stream = AudioStream::new(&device, self.config.audio_config(), callback)?;
        stream.start()?;
        *self.stream.lock() = Some(stream);
        self.shared
            .running
            .store(true, std::sync::atomic::Ordering::Release);

        log::info!(
            "engine started: {} Hz, {} frames/block ({:.1} ms)",
            self.config.sample_rate.as_u32(),
            self.config.buffer_size.as_usize(),
            self.config
                .buffer_size
                .latency_ms(self.config.sample_rate),
        );
        Ok(())
    }

    /// Stop the stream, wait one callback period, then clear DSP state
    pub fn stop(&self) {
        if !self.shared.is_running() && self.stream.lock().is_none() {
            return;
        }

        self.shared
            .running
            .store(false, std::sync::atomic::Ordering::Release);

        if let Some(stream) = self.stream.lock().take() {
            if let Err(error) = stream.stop() {
                log::warn!("stream stop failed: {}", error);
            }
        }

        let period = Duration::from_secs_f64(
            self.config.buffer_size.as_usize() as f64 / self.config.sample_rate.as_f64(),
        );
        thread::sleep(period);

        self.graph.lock().reset_dsp();
        log::info!("engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    // ───────────────────────── parameter surface ─────────────────────────

    /// Enqueue a parameter update (non-blocking; false when dropped)
    pub fn send(&self, update: ParameterUpdate) -> bool {
        self.control.lock().send(update)
    }

    pub fn transport_start(&self) -> bool {
        self.send(ParameterUpdate::Transport(TransportCommand::Start))
    }

    pub fn transport_stop(&self) -> bool {
        self.send(ParameterUpdate::Transport(TransportCommand::Stop))
    }

    pub fn add_track(&self, track_id: u32, signal: SignalKind, frequency: f32) -> bool {
        self.send(ParameterUpdate::AddTrack {
            track_id,
            signal,
            frequency,
        })
    }

    pub fn remove_track(&self, track_id: u32) -> bool {
        self.send(ParameterUpdate::RemoveTrack { track_id })
    }

    /// Validate and publish an HRTF set
    ///
    /// Invalid sets are rejected here and the audio side keeps the previous
    /// one. A pending, not-yet-consumed load also rejects the new set.
    pub fn load_hrtf(&self, pairs: Vec<HrirPair>) -> SpatialResult<()> {
        let set = Arc::new(HrtfSet::from_pairs(pairs)?);
        let mut control = self.control.lock();
        // Release whatever the audio side retired earlier
        let _ = control.reclaim_hrtf();
        if !control.stage_hrtf(set) {
            return Err(marea_spatial::SpatialError::InvalidHrtf(
                "previous HRTF load still pending".into(),
            ));
        }
        control.send(ParameterUpdate::HrtfConfig);
        Ok(())
    }

    /// Reclaim retired HRTF memory; call periodically from the control loop
    pub fn poll_maintenance(&self) {
        let _ = self.control.lock().reclaim_hrtf();
    }

    /// Install a decoded source on a track
    ///
    /// Locks the graph briefly; prefer calling while the engine is stopped.
    pub fn set_track_source(&self, track_id: u32, source: Box<dyn FrameSource>) -> bool {
        let mut graph = self.graph.lock();
        let sample_rate = graph.sample_rate();
        match graph.track_mut(track_id) {
            Some(track) => {
                track.set_decoded_source(source, sample_rate);
                true
            }
            None => false,
        }
    }

    /// Drive one callback's worth of audio without a device
    ///
    /// `output` is interleaved stereo, at most one block long. Used by tests
    /// and offline health checks; a running device stream owns the graph
    /// lock, so only use this while the stream is stopped.
    pub fn render_block(&self, output: &mut [f32]) {
        self.graph.lock().process_block(output);
    }

    // ───────────────────────── status surface ─────────────────────────

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Direct handle to the mix graph
    ///
    /// Locking it while the stream runs steals blocks from the callback;
    /// meant for inspection while stopped and for offline drivers.
    pub fn graph_handle(&self) -> Arc<Mutex<MixGraph>> {
        Arc::clone(&self.graph)
    }

    pub fn master_peak(&self) -> (f32, f32) {
        (self.shared.meters.left_peak(), self.shared.meters.right_peak())
    }

    pub fn master_rms(&self) -> (f32, f32) {
        (self.shared.meters.left_rms(), self.shared.meters.right_rms())
    }

    pub fn dropped_frames(&self) -> u64 {
        self.shared
            .dropped_frames
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Updates dropped because the queue was full
    pub fn dropped_updates(&self) -> u64 {
        self.control.lock().dropped_count()
    }

    pub fn latency_samples(&self) -> u64 {
        self.shared
            .latency_samples
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn callback_load_percent(&self) -> f32 {
        self.shared.callback_load_percent()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_raw() {
        assert!(EngineConfig::from_raw(44_100, 256).is_ok());
        assert!(EngineConfig::from_raw(44_100, 64).is_ok());
        assert!(matches!(
            EngineConfig::from_raw(12_345, 256),
            Err(CoreError::InvalidSampleRate(12_345))
        ));
        assert!(matches!(
            EngineConfig::from_raw(44_100, 100),
            Err(CoreError::InvalidBlockSize(100))
        ));
    }

    #[test]
    fn test_engine_initial_state() {
        let engine = AudioEngine::with_defaults();
        assert!(!engine.is_running());
        assert_eq!(engine.master_peak(), (0.0, 0.0));
        assert_eq!(engine.dropped_frames(), 0);
        assert_eq!(engine.dropped_updates(), 0);
    }

    #[test]
    fn test_offline_transport_roundtrip() {
        let engine = AudioEngine::with_defaults();
        let block = engine.config().buffer_size.as_usize();
        let mut output = vec![0.0f32; block * 2];

        engine.add_track(0, SignalKind::Sine, 440.0);
        engine.transport_start();
        engine.render_block(&mut output);
        assert!(engine.is_running());
        assert!(output.iter().any(|&x| x != 0.0));

        engine.transport_stop();
        engine.render_block(&mut output);
        assert!(output.iter().all(|&x| x == 0.0));
    }
}
