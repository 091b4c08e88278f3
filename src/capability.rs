//! The global capability catalog.
//!
//! Every interface kind an object may expose is one [`Capability`]. The enum
//! discriminant doubles as the dense capability index used by the per-class
//! lookup tables, replacing the hashed interface-id dispatch a C runtime
//! would need.

use crate::error::Result;
use crate::object::{Interface, MediaObject};
use std::sync::Arc;

/// A named, independently attachable set of operations an object may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Capability {
    EngineInfo = 0,
    Play = 1,
    Record = 2,
    BufferQueue = 3,
    MixOutput = 4,
    Volume = 5,
    MuteSolo = 6,
    Seek = 7,
    PlaybackRate = 8,
    Pitch = 9,
    Location = 10,
}

pub const CAPABILITY_COUNT: usize = 11;

impl Capability {
    pub const ALL: [Capability; CAPABILITY_COUNT] = [
        Capability::EngineInfo,
        Capability::Play,
        Capability::Record,
        Capability::BufferQueue,
        Capability::MixOutput,
        Capability::Volume,
        Capability::MuteSolo,
        Capability::Seek,
        Capability::PlaybackRate,
        Capability::Pitch,
        Capability::Location,
    ];

    /// Dense index of this capability in the global catalog.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Capability::EngineInfo => "EngineInfo",
            Capability::Play => "Play",
            Capability::Record => "Record",
            Capability::BufferQueue => "BufferQueue",
            Capability::MixOutput => "MixOutput",
            Capability::Volume => "Volume",
            Capability::MuteSolo => "MuteSolo",
            Capability::Seek => "Seek",
            Capability::PlaybackRate => "PlaybackRate",
            Capability::Pitch => "Pitch",
            Capability::Location => "Location",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a class relates to a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Exposed on every instance of the class.
    Implicit,
    /// Exposed only when requested at creation time.
    Optional,
    /// May be requested at creation time or added and removed at runtime.
    Dynamic,
    /// Listed for the class but not available in this build.
    Unavailable,
}

/// Builds the interface value for a capability on a freshly exposed object.
/// Runs with the object lock released; the hook may take it.
pub(crate) type InitHook = fn(&Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>>;

/// Tears interface state down on remove/destroy. Runs with the object lock
/// released.
pub(crate) type DeinitHook = fn(&Arc<dyn Interface>);

/// One registry row per capability kind.
pub struct CapabilitySpec {
    pub capability: Capability,
    pub(crate) init: Option<InitHook>,
    pub(crate) deinit: Option<DeinitHook>,
}

static ENGINE_INFO_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::EngineInfo,
    init: Some(crate::engine::init_engine_info),
    deinit: None,
};
static PLAY_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::Play,
    init: Some(crate::player::init_play),
    deinit: None,
};
static RECORD_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::Record,
    init: Some(crate::recorder::init_record),
    deinit: None,
};
static BUFFER_QUEUE_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::BufferQueue,
    init: Some(crate::buffer_queue::init_buffer_queue),
    deinit: None,
};
static MIX_OUTPUT_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::MixOutput,
    init: Some(crate::mixer::init_mix_output),
    deinit: None,
};
static VOLUME_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::Volume,
    init: Some(crate::volume::init_volume),
    deinit: None,
};
static MUTE_SOLO_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::MuteSolo,
    init: Some(crate::volume::init_mute_solo),
    deinit: None,
};
static SEEK_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::Seek,
    init: Some(crate::player::init_seek),
    deinit: None,
};
static PLAYBACK_RATE_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::PlaybackRate,
    init: Some(crate::player::init_playback_rate),
    deinit: None,
};
static PITCH_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::Pitch,
    init: Some(crate::player::init_pitch),
    deinit: None,
};
static LOCATION_SPEC: CapabilitySpec = CapabilitySpec {
    capability: Capability::Location,
    init: Some(crate::spatial::init_location),
    deinit: Some(crate::spatial::deinit_location),
};

/// The registry row for a capability kind.
pub fn spec(capability: Capability) -> &'static CapabilitySpec {
    match capability {
        Capability::EngineInfo => &ENGINE_INFO_SPEC,
        Capability::Play => &PLAY_SPEC,
        Capability::Record => &RECORD_SPEC,
        Capability::BufferQueue => &BUFFER_QUEUE_SPEC,
        Capability::MixOutput => &MIX_OUTPUT_SPEC,
        Capability::Volume => &VOLUME_SPEC,
        Capability::MuteSolo => &MUTE_SOLO_SPEC,
        Capability::Seek => &SEEK_SPEC,
        Capability::PlaybackRate => &PLAYBACK_RATE_SPEC,
        Capability::Pitch => &PITCH_SPEC,
        Capability::Location => &LOCATION_SPEC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_indices_are_dense() {
        for (i, cap) in Capability::ALL.iter().enumerate() {
            assert_eq!(cap.index(), i);
            assert_eq!(spec(*cap).capability, *cap);
        }
    }

    #[test]
    fn test_every_capability_has_an_initializer() {
        for cap in Capability::ALL {
            assert!(spec(cap).init.is_some(), "{cap} has no init hook");
        }
    }
}
