//! # Resona
//!
//! An interface-oriented audio object runtime. Applications obtain typed
//! "capability" interfaces on opaque objects (players, recorders, output
//! mixes, the engine itself), feed PCM through per-player buffer queues, and
//! a pull-based mixer renders the interleaved output on demand.
//!
//! ## Quick Start
//!
//! ```no_run
//! use resona::*;
//! use std::sync::Arc;
//!
//! // The engine is an application-owned context
//! let engine = Engine::create(EngineOptions::default())?;
//! engine.realize(false)?;
//!
//! // An output mix collects the tracks of attached players
//! let mix = engine.create_output_mix(&[])?;
//! mix.realize(false)?;
//!
//! // A player sources from a buffer queue and sinks into the mix
//! let player = engine.create_audio_player(
//!     DataSource::BufferQueue {
//!         num_buffers: 2,
//!         format: PcmFormat::stereo(48000),
//!     },
//!     DataSink::OutputMix(mix.clone()),
//!     &[Capability::MuteSolo],
//! )?;
//! player.realize(false)?;
//!
//! // Capability dispatch hands out typed interfaces
//! let queue = player.get_interface::<BufferQueueInterface>()?;
//! let play = player.get_interface::<PlayInterface>()?;
//!
//! let frames: Arc<[i16]> = Arc::from(vec![0i16; 4096].as_slice());
//! queue.enqueue(frames)?;
//! play.set_play_state(PlayState::Playing);
//!
//! // The render context pulls the final mix
//! let mix_out = mix.get_interface::<MixOutputInterface>()?;
//! let mut output = vec![0i16; 1024];
//! mix_out.fill(&mut output);
//! # Ok::<(), ResonaError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`Engine`]**: application-owned context; creates all other objects
//!   and owns the worker pool and the periodic sync thread
//! - **[`ObjectOps`]**: the generic object surface — realize, capability
//!   dispatch, dynamic interface add/remove/resume, destroy
//! - **[`BufferQueueInterface`]**: FIFO of caller-owned PCM buffers
//!   bridging a producer to the mixer
//! - **[`MixOutputInterface`]**: pull-based render entry point
//! - **[`LocationInterface`]**: spatial position with lazy unit conversion
//!   performed by the deferred commit step
//!
//! ## Threading Model
//!
//! Object operations may be called from any application thread; every
//! object carries one lock for its multi-field state, and single-word
//! fields use atomics. The render context calls
//! [`MixOutputInterface::fill`], which never blocks on anything but the
//! per-object locks above. A small worker pool services asynchronous
//! interface operations, and one sync thread reconciles batched control
//! changes (gain recomputation, coordinate conversions) a few dozen times
//! per second.

pub mod buffer_queue;
pub mod capability;
pub mod class;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod mixer;
pub mod object;
pub mod player;
pub mod recorder;
pub mod spatial;
mod sync;
pub mod task_pool;
pub mod volume;

pub use buffer_queue::{BufferQueueInterface, QueueCallback, QueueState};
pub use capability::{Capability, CapabilitySpec, Relation};
pub use class::{ClassDescriptor, ClassEntry, ClassKind};
pub use config::{DataSink, DataSource, EngineOptions, PcmFormat};
pub use engine::{Engine, EngineInfoInterface, MAX_INSTANCE};
pub use error::{ResonaError, Result};
pub use events::{ObjectCallback, ObjectEvent, PlayCallback, PlayEvent, play_event_mask};
pub use mixer::{MAX_TRACKS, MixOutputInterface, OutputMix};
pub use object::{
    CapabilityState, Interface, InterfaceKind, MediaObject, ObjectOps, ObjectState,
};
pub use player::{
    AudioPlayer, PitchInterface, PlayInterface, PlayState, PlaybackRateInterface, SeekInterface,
};
pub use recorder::{
    AudioRecorder, RecordCallback, RecordEvent, RecordInterface, RecordState, record_event_mask,
};
pub use spatial::{
    Angles, Listener, LocationInterface, Orientation, Quat, Spherical, Vec3,
    cartesian_to_spherical, spherical_to_cartesian,
};
pub use task_pool::TaskPool;
pub use volume::{MuteSoloInterface, VolumeInterface};
