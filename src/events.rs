//! Event types and callback aliases for Resona

use crate::capability::Capability;
use crate::error::ResonaError;
use crate::object::ObjectState;
use std::sync::Arc;

/// Events delivered to an object's registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectEvent {
    /// A realize or resume requested with `async` completed.
    AsyncTermination {
        result: Result<(), ResonaError>,
        state: ObjectState,
    },
    /// An asynchronous `add_interface` completed.
    InterfaceAdded {
        capability: Capability,
        result: Result<(), ResonaError>,
    },
    /// An asynchronous `resume_interface` completed.
    InterfaceResumed {
        capability: Capability,
        result: Result<(), ResonaError>,
    },
}

impl ObjectEvent {
    pub fn result(&self) -> Result<(), ResonaError> {
        match self {
            Self::AsyncTermination { result, .. }
            | Self::InterfaceAdded { result, .. }
            | Self::InterfaceResumed { result, .. } => *result,
        }
    }

    pub fn capability(&self) -> Option<Capability> {
        match self {
            Self::InterfaceAdded { capability, .. } | Self::InterfaceResumed { capability, .. } => {
                Some(*capability)
            }
            _ => None,
        }
    }
}

/// Playback-position events dispatched by the mixer and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayEvent {
    HeadAtEnd,
    HeadAtMarker,
    HeadAtNewPos,
    HeadMoving,
    HeadStalled,
}

/// Mask bits selecting which [`PlayEvent`]s a play callback receives.
pub mod play_event_mask {
    pub const HEAD_AT_END: u32 = 1 << 0;
    pub const HEAD_AT_MARKER: u32 = 1 << 1;
    pub const HEAD_AT_NEW_POS: u32 = 1 << 2;
    pub const HEAD_MOVING: u32 = 1 << 3;
    pub const HEAD_STALLED: u32 = 1 << 4;
}

impl PlayEvent {
    /// The mask bit that enables this event.
    pub fn mask_bit(self) -> u32 {
        match self {
            Self::HeadAtEnd => play_event_mask::HEAD_AT_END,
            Self::HeadAtMarker => play_event_mask::HEAD_AT_MARKER,
            Self::HeadAtNewPos => play_event_mask::HEAD_AT_NEW_POS,
            Self::HeadMoving => play_event_mask::HEAD_MOVING,
            Self::HeadStalled => play_event_mask::HEAD_STALLED,
        }
    }
}

pub type ObjectCallback = Arc<dyn Fn(ObjectEvent) + Send + Sync>;
pub type PlayCallback = Arc<dyn Fn(PlayEvent) + Send + Sync>;
