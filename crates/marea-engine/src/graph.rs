//! Audio-side mix graph
//!
//! `process_block` is the body of the device callback: drain the parameter
//! queue (bounded), pull each audible track through its chain and spatial
//! renderer, sum onto the master bus, apply master volume, meter, and write
//! interleaved stereo. Everything it touches is pre-allocated; the only
//! synchronization is atomics and the SPSC queue.

use std::sync::Arc;
use std::time::Instant;

use marea_audio::AudioConfig;
use marea_bridge::{
    AudioHandle, DynamicsField, EqField, ParameterUpdate, TransportCommand,
};
use marea_core::{ChannelLayout, Sample, SineTable, flush_denormal};

use crate::chain::{detection_mode_from_index, dynamics_mode_from_index, filter_kind_from_index};
use crate::meters::EngineShared;
use crate::track::{MAX_TRACKS, Track};

/// Bound on queue work per callback
pub const MAX_UPDATES_PER_BLOCK: usize = 64;

/// Per-block peak meter decay base (applied per sample of block length)
const PEAK_DECAY_BASE: f32 = 0.9995;
/// Peak hold releases an order of magnitude slower
const HOLD_DECAY_BASE: f32 = 0.99995;

pub struct MixGraph {
    sample_rate: f32,
    block_size: usize,
    layout: ChannelLayout,
    device_latency: usize,

    tracks: Vec<Track>,
    solo_track: Option<u32>,
    solo_granted_this_block: bool,

    commands: AudioHandle,
    shared: Arc<EngineShared>,
    sine: SineTable,

    bus_left: Vec<Sample>,
    bus_right: Vec<Sample>,
    track_left: Vec<Sample>,
    track_right: Vec<Sample>,

    peak_decay: f32,
    hold_decay: f32,
}

impl MixGraph {
    pub fn new(config: &AudioConfig, commands: AudioHandle, shared: Arc<EngineShared>) -> Self {
        let sample_rate = config.sample_rate.as_f32();
        let block_size = config.buffer_size.as_usize();
        let layout = config.layout;

        let tracks = (0..MAX_TRACKS)
            .map(|slot| Track::slot(slot, sample_rate as f64, layout))
            .collect();

        Self {
            sample_rate,
            block_size,
            layout,
            device_latency: block_size,
            tracks,
            solo_track: None,
            solo_granted_this_block: false,
            commands,
            shared,
            sine: SineTable::new(),
            bus_left: vec![0.0; block_size],
            bus_right: vec![0.0; block_size],
            track_left: vec![0.0; block_size],
            track_right: vec![0.0; block_size],
            peak_decay: PEAK_DECAY_BASE.powi(block_size as i32),
            hold_decay: HOLD_DECAY_BASE.powi(block_size as i32),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_mut(&mut self, id: u32) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.is_active() && t.id() == id)
    }

    pub fn active_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_active()).count()
    }

    pub fn solo_track(&self) -> Option<u32> {
        self.solo_track
    }

    /// The device callback: fill an interleaved stereo buffer
    pub fn process_block(&mut self, output: &mut [f32]) {
        let started = Instant::now();
        let frames = (output.len() / 2).min(self.block_size);

        // 1. Drain pending updates, bounded per block
        self.solo_granted_this_block = false;
        for _ in 0..MAX_UPDATES_PER_BLOCK {
            match self.commands.pop() {
                Some(update) => self.apply_update(update),
                None => break,
            }
        }

        if !self.shared.is_running() || frames == 0 {
            output.fill(0.0);
            return;
        }

        // 2. Zero the master accumulators
        self.bus_left[..frames].fill(0.0);
        self.bus_right[..frames].fill(0.0);

        // 3. Per-track pull, in slot (insertion) order
        let solo = self.solo_track;
        let mut chain_latency = 0usize;
        for slot in 0..self.tracks.len() {
            if !self.tracks[slot].is_active() {
                self.shared.track_meters[slot].decay(self.peak_decay);
                continue;
            }

            let audible = match solo {
                Some(id) => self.tracks[slot].id() == id,
                None => !self.tracks[slot].is_muted(),
            };
            if !audible {
                self.shared.track_meters[slot].decay(self.peak_decay);
                continue;
            }

            let track = &mut self.tracks[slot];
            for i in 0..frames {
                let (l, r) = track.generate_frame(&self.sine, self.sample_rate);
                self.track_left[i] = l;
                self.track_right[i] = r;
            }

            track
                .chain
                .process_block(&mut self.track_left[..frames], &mut self.track_right[..frames]);
            track
                .spatial
                .process_stereo_block(&mut self.track_left[..frames], &mut self.track_right[..frames]);

            let mut peak = 0.0_f32;
            let mut sum_sq = 0.0_f32;
            for i in 0..frames {
                let l = self.track_left[i];
                let r = self.track_right[i];
                peak = peak.max(l.abs()).max(r.abs());
                sum_sq += (l * l + r * r) * 0.5;
                self.bus_left[i] += l;
                self.bus_right[i] += r;
            }

            chain_latency += track.chain.total_latency();
            self.shared.track_meters[slot].set(
                peak,
                (sum_sq / frames as f32).sqrt(),
                track.chain.dynamics().gain_reduction_db(),
                track.chain.total_cpu_percent(),
            );
        }

        // 4-6. Master gain, metering, interleaved write
        let master = self.shared.master_volume();
        let mut peak_l = 0.0_f32;
        let mut peak_r = 0.0_f32;
        let mut sum_sq_l = 0.0_f32;
        let mut sum_sq_r = 0.0_f32;
        for i in 0..frames {
            let l = flush_denormal(self.bus_left[i] * master);
            let r = flush_denormal(self.bus_right[i] * master);

            peak_l = peak_l.max(l.abs());
            peak_r = peak_r.max(r.abs());
            sum_sq_l += l * l;
            sum_sq_r += r * r;

            output[i * 2] = l;
            output[i * 2 + 1] = r;
        }
        // Device asked for more than one block: pad with silence and count it
        if output.len() > frames * 2 {
            output[frames * 2..].fill(0.0);
            self.shared
                .dropped_frames
                .fetch_add((output.len() / 2 - frames) as u64, std::sync::atomic::Ordering::Relaxed);
        }

        self.shared.meters.update_block(
            peak_l,
            peak_r,
            (sum_sq_l / frames as f32).sqrt(),
            (sum_sq_r / frames as f32).sqrt(),
            self.peak_decay,
            self.hold_decay,
        );

        self.shared
            .latency_samples
            .store((chain_latency + self.device_latency) as u64, std::sync::atomic::Ordering::Relaxed);

        // Callback load as percent of the block period
        let period = frames as f64 / self.sample_rate as f64;
        let elapsed = started.elapsed().as_secs_f64();
        let load = (elapsed / period * 100.0) as f32;
        let smoothed = self.shared.callback_load_percent() * 0.9 + load * 0.1;
        self.shared.set_callback_load_percent(smoothed);
        if elapsed > period {
            self.shared
                .dropped_frames
                .fetch_add(frames as u64, std::sync::atomic::Ordering::Relaxed);
        }
    }

    fn apply_update(&mut self, update: ParameterUpdate) {
        match update {
            ParameterUpdate::TrackPosition { track_id, position } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.set_position(position);
                }
            }
            ParameterUpdate::TrackVelocity { track_id, velocity } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.set_velocity(velocity);
                }
            }
            ParameterUpdate::TrackVolume { track_id, volume } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.set_volume(volume);
                }
            }
            ParameterUpdate::TrackPan { track_id, pan } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.set_pan(pan);
                }
            }
            ParameterUpdate::TrackMute { track_id, mute } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.set_muted(mute);
                }
            }
            ParameterUpdate::TrackSolo { track_id, solo } => self.set_solo(track_id, solo),
            ParameterUpdate::TrackSignal {
                track_id,
                signal,
                frequency,
            } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.set_signal(signal, frequency);
                }
            }
            ParameterUpdate::TrackSpatialMode { track_id, mode } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.spatial.set_mode(mode);
                }
            }

            ParameterUpdate::ListenerPosition { position } => {
                for track in self.tracks.iter_mut().filter(|t| t.is_active()) {
                    track.spatial.set_listener_position(position);
                }
            }
            ParameterUpdate::ListenerOrientation { forward, up } => {
                for track in self.tracks.iter_mut().filter(|t| t.is_active()) {
                    track.spatial.set_listener_orientation(forward, up);
                }
            }
            ParameterUpdate::ListenerVelocity { velocity } => {
                for track in self.tracks.iter_mut().filter(|t| t.is_active()) {
                    track.spatial.set_listener_velocity(velocity);
                }
            }
            ParameterUpdate::RoomSize { size } => {
                for track in self.tracks.iter_mut().filter(|t| t.is_active()) {
                    track.spatial.set_room_size(size);
                }
            }

            ParameterUpdate::EqBand {
                track_id,
                band,
                field,
                value,
            } => {
                if let Some(track) = self.track_mut(track_id) {
                    let eq = track.chain.eq_mut();
                    let band = band as usize;
                    match field {
                        EqField::Frequency => eq.set_band_frequency(band, value),
                        EqField::GainDb => eq.set_band_gain(band, value),
                        EqField::Q => eq.set_band_q(band, value),
                        EqField::Kind => {
                            eq.set_band_kind(band, filter_kind_from_index(value as u32))
                        }
                        EqField::Enabled => eq.set_band_enabled(band, value != 0.0),
                    }
                }
            }
            ParameterUpdate::EqBypass { track_id, bypassed } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.chain.set_eq_bypassed(bypassed);
                }
            }
            ParameterUpdate::DynamicsParam {
                track_id,
                field,
                value,
            } => {
                if let Some(track) = self.track_mut(track_id) {
                    let dynamics = track.chain.dynamics_mut();
                    match field {
                        DynamicsField::Mode => {
                            dynamics.set_mode(dynamics_mode_from_index(value as u32))
                        }
                        DynamicsField::Detection => {
                            dynamics.set_detection(detection_mode_from_index(value as u32))
                        }
                        DynamicsField::ThresholdDb => dynamics.set_threshold(value),
                        DynamicsField::Ratio => dynamics.set_ratio(value),
                        DynamicsField::AttackMs => dynamics.set_attack(value),
                        DynamicsField::ReleaseMs => dynamics.set_release(value),
                        DynamicsField::KneeDb => dynamics.set_knee(value),
                        DynamicsField::MakeupDb => dynamics.set_makeup(value),
                        DynamicsField::LookaheadMs => dynamics.set_lookahead_ms(value),
                        DynamicsField::LookaheadEnabled => {
                            dynamics.set_lookahead_enabled(value != 0.0)
                        }
                    }
                }
            }
            ParameterUpdate::DynamicsBypass { track_id, bypassed } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.chain.set_dynamics_bypassed(bypassed);
                }
            }

            ParameterUpdate::HrtfConfig => {
                let tracks = &mut self.tracks;
                self.commands.exchange_hrtf(|new_set| {
                    let mut retired = None;
                    for track in tracks.iter_mut() {
                        let old = track.spatial.swap_hrtf(Arc::clone(&new_set));
                        // Park the first old handle; the rest only drop
                        // reference counts while this one stays alive.
                        if retired.is_none() {
                            retired = Some(old);
                        }
                    }
                    retired.unwrap_or(new_set)
                });
            }
            ParameterUpdate::CrossfeedEnabled { track_id, enabled } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.spatial.crossfeed.set_enabled(enabled);
                }
            }
            ParameterUpdate::CrossfeedAmount { track_id, amount } => {
                if let Some(track) = self.track_mut(track_id) {
                    track.spatial.crossfeed.set_amount(amount);
                }
            }

            ParameterUpdate::MasterVolume { volume } => {
                self.shared.set_master_volume(volume);
            }
            ParameterUpdate::Transport(command) => match command {
                TransportCommand::Start => {
                    self.shared.running.store(true, std::sync::atomic::Ordering::Release);
                }
                TransportCommand::Stop => {
                    self.shared.running.store(false, std::sync::atomic::Ordering::Release);
                }
                TransportCommand::Reset => self.reset_dsp(),
            },

            ParameterUpdate::AddTrack {
                track_id,
                signal,
                frequency,
            } => self.add_track(track_id, signal, frequency),
            ParameterUpdate::RemoveTrack { track_id } => self.remove_track(track_id),
        }
    }

    fn add_track(&mut self, track_id: u32, signal: marea_bridge::SignalKind, frequency: f32) {
        if self.track_mut(track_id).is_some() {
            // Re-arming an existing id just swaps its signal
            if let Some(track) = self.track_mut(track_id) {
                track.set_signal(signal, frequency);
            }
            return;
        }
        match self.tracks.iter_mut().find(|t| !t.is_active()) {
            Some(slot) => slot.activate(track_id, signal, frequency),
            None => {
                self.shared
                    .rejected_updates
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    fn remove_track(&mut self, track_id: u32) {
        for (slot, track) in self.tracks.iter_mut().enumerate() {
            if track.is_active() && track.id() == track_id {
                track.deactivate();
                self.shared.track_meters[slot].reset();
            }
        }
        if self.solo_track == Some(track_id) {
            self.solo_track = None;
        }
    }

    /// Only one track may be solo; engaging solo on one clears the others.
    /// Within a block the first solo request seen wins; later requests in
    /// the same batch are dropped.
    fn set_solo(&mut self, track_id: u32, solo: bool) {
        if solo {
            if self.solo_granted_this_block {
                return;
            }
            self.solo_granted_this_block = true;
            for track in self.tracks.iter_mut().filter(|t| t.is_active()) {
                let is_target = track.id() == track_id;
                track.set_solo(is_target);
            }
            self.solo_track = Some(track_id);
        } else {
            if let Some(track) = self.track_mut(track_id) {
                track.set_solo(false);
            }
            if self.solo_track == Some(track_id) {
                self.solo_track = None;
            }
        }
    }

    /// Clear all DSP state; used by transport reset and engine stop
    pub fn reset_dsp(&mut self) {
        for track in &mut self.tracks {
            track.reset_dsp();
        }
        for meters in self.shared.track_meters.iter() {
            meters.reset();
        }
        self.shared.meters.reset();
    }
}
