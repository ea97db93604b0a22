//! Parameter update records
//!
//! Every record is plain data: integer ids, scalars, and small vectors. No
//! variant owns heap memory, so consuming a record in the audio callback
//! never frees or allocates.

use marea_spatial::{SpatialMode, Vec3};

/// Track id addressing the engine itself rather than a track
pub const TRACK_GLOBAL: u32 = u32::MAX;

/// Test signal kinds for track sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SignalKind {
    #[default]
    Sine,
    Square,
    Saw,
    WhiteNoise,
    PinkNoise,
}

/// EQ band field selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqField {
    Frequency,
    GainDb,
    Q,
    /// Value is a filter kind index
    Kind,
    /// Value != 0.0 enables the band
    Enabled,
}

/// Dynamics field selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicsField {
    /// Value is a mode index (compressor/limiter/gate/expander)
    Mode,
    /// Value is a detection index (peak/rms/hybrid)
    Detection,
    ThresholdDb,
    Ratio,
    AttackMs,
    ReleaseMs,
    KneeDb,
    MakeupDb,
    LookaheadMs,
    /// Value != 0.0 enables lookahead
    LookaheadEnabled,
}

/// Transport control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Start,
    Stop,
    Reset,
}

/// A single parameter update, produced by the control domain and consumed in
/// the audio callback
#[derive(Debug, Clone, Copy)]
pub enum ParameterUpdate {
    TrackPosition { track_id: u32, position: Vec3 },
    TrackVelocity { track_id: u32, velocity: Vec3 },
    TrackVolume { track_id: u32, volume: f32 },
    TrackPan { track_id: u32, pan: f32 },
    TrackMute { track_id: u32, mute: bool },
    TrackSolo { track_id: u32, solo: bool },
    TrackSignal { track_id: u32, signal: SignalKind, frequency: f32 },
    TrackSpatialMode { track_id: u32, mode: SpatialMode },

    ListenerPosition { position: Vec3 },
    ListenerOrientation { forward: Vec3, up: Vec3 },
    ListenerVelocity { velocity: Vec3 },
    RoomSize { size: Vec3 },

    EqBand { track_id: u32, band: u8, field: EqField, value: f32 },
    EqBypass { track_id: u32, bypassed: bool },
    DynamicsParam { track_id: u32, field: DynamicsField, value: f32 },
    DynamicsBypass { track_id: u32, bypassed: bool },

    /// A new HRTF set is waiting in the handoff slot
    HrtfConfig,
    CrossfeedEnabled { track_id: u32, enabled: bool },
    CrossfeedAmount { track_id: u32, amount: f32 },

    MasterVolume { volume: f32 },
    Transport(TransportCommand),

    AddTrack { track_id: u32, signal: SignalKind, frequency: f32 },
    RemoveTrack { track_id: u32 },
}

impl ParameterUpdate {
    /// Track targeted by this update, or `TRACK_GLOBAL`
    pub fn track_id(&self) -> u32 {
        match *self {
            Self::TrackPosition { track_id, .. }
            | Self::TrackVelocity { track_id, .. }
            | Self::TrackVolume { track_id, .. }
            | Self::TrackPan { track_id, .. }
            | Self::TrackMute { track_id, .. }
            | Self::TrackSolo { track_id, .. }
            | Self::TrackSignal { track_id, .. }
            | Self::TrackSpatialMode { track_id, .. }
            | Self::EqBand { track_id, .. }
            | Self::EqBypass { track_id, .. }
            | Self::DynamicsParam { track_id, .. }
            | Self::DynamicsBypass { track_id, .. }
            | Self::CrossfeedEnabled { track_id, .. }
            | Self::CrossfeedAmount { track_id, .. }
            | Self::AddTrack { track_id, .. }
            | Self::RemoveTrack { track_id } => track_id,
            _ => TRACK_GLOBAL,
        }
    }
}
