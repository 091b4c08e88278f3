//! The audio recorder object and its record interface.
//!
//! The recorder exposes the full transport surface, and its buffer queue is
//! the sink an application drains. Actual capture sits behind the platform
//! media boundary; this build carries no capture backend, so the queue is
//! only filled by platform glue when one is present.

use crate::capability::Capability;
use crate::class::AUDIO_RECORDER_CLASS;
use crate::config::{DataSink, DataSource, PcmFormat};
use crate::engine::Engine;
use crate::error::{ResonaError, Result};
use crate::object::{
    Interface, InterfaceKind, MediaObject, ObjectCore, finish_construct,
};
use crossbeam_utils::atomic::AtomicCell;
use std::sync::{Arc, Mutex};

/// Transport state of a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Stopped,
    Paused,
    Recording,
}

/// Events dispatched to a record callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEvent {
    HeadAtLimit,
    HeadAtMarker,
    HeadAtNewPos,
    HeadMoving,
    BufferFull,
}

/// Mask bits selecting which [`RecordEvent`]s a callback receives.
pub mod record_event_mask {
    pub const HEAD_AT_LIMIT: u32 = 1 << 0;
    pub const HEAD_AT_MARKER: u32 = 1 << 1;
    pub const HEAD_AT_NEW_POS: u32 = 1 << 2;
    pub const HEAD_MOVING: u32 = 1 << 3;
    pub const BUFFER_FULL: u32 = 1 << 4;
}

pub type RecordCallback = Arc<dyn Fn(RecordEvent) + Send + Sync>;

pub struct AudioRecorder {
    core: ObjectCore,
    format: PcmFormat,
    num_buffers: usize,
}

impl AudioRecorder {
    pub(crate) fn create(
        engine: &Arc<Engine>,
        source: DataSource,
        sink: DataSink,
        requested: &[Capability],
    ) -> Result<Arc<AudioRecorder>> {
        source.validate()?;
        sink.validate()?;
        match &source {
            DataSource::InputDevice { .. } => {}
            DataSource::BufferQueue { .. } => return Err(ResonaError::ContentUnsupported),
        }
        let (num_buffers, format) = match &sink {
            DataSink::BufferQueue {
                num_buffers,
                format,
            } => (*num_buffers, *format),
            DataSink::OutputMix(_) => return Err(ResonaError::ContentUnsupported),
        };
        let class = &AUDIO_RECORDER_CLASS;
        let exposed = class.exposed_mask(requested)?;
        let slot = engine.reserve_instance()?;
        let recorder = Arc::new(AudioRecorder {
            core: ObjectCore::new(
                class,
                Arc::downgrade(engine),
                exposed,
                engine.loss_of_control(),
            ),
            format,
            num_buffers,
        });
        let obj: Arc<dyn MediaObject> = recorder.clone();
        if let Err(e) = finish_construct(&obj, Some(slot)) {
            engine.abandon_instance(slot);
            return Err(e);
        }
        log::debug!("recorder {} created", recorder.core.instance_id());
        Ok(recorder)
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.num_buffers
    }
}

impl MediaObject for AudioRecorder {
    fn core(&self) -> &ObjectCore {
        &self.core
    }
}

struct RecordInner {
    /// Capture position in frames.
    position: u64,
    callback: Option<RecordCallback>,
}

/// Transport control for a recorder; mirrors the play interface.
pub struct RecordInterface {
    state: AtomicCell<RecordState>,
    event_mask: AtomicCell<u32>,
    marker: AtomicCell<Option<u64>>,
    update_period: AtomicCell<u64>,
    duration_limit: AtomicCell<Option<u64>>,
    inner: Mutex<RecordInner>,
}

impl Interface for RecordInterface {
    fn capability(&self) -> Capability {
        Capability::Record
    }
}

impl InterfaceKind for RecordInterface {
    const CAPABILITY: Capability = Capability::Record;
}

impl RecordInterface {
    fn new() -> Self {
        Self {
            state: AtomicCell::new(RecordState::Stopped),
            event_mask: AtomicCell::new(0),
            marker: AtomicCell::new(None),
            update_period: AtomicCell::new(0),
            duration_limit: AtomicCell::new(None),
            inner: Mutex::new(RecordInner {
                position: 0,
                callback: None,
            }),
        }
    }

    /// Change the transport state. Stopping rewinds the capture position.
    pub fn set_record_state(&self, state: RecordState) {
        let mut inner = self.inner.lock().unwrap();
        self.state.store(state);
        if state == RecordState::Stopped {
            inner.position = 0;
        }
    }

    pub fn record_state(&self) -> RecordState {
        self.state.load()
    }

    /// Capture position in frames.
    pub fn position(&self) -> u64 {
        self.inner.lock().unwrap().position
    }

    pub fn register_callback(&self, callback: Option<RecordCallback>) {
        self.inner.lock().unwrap().callback = callback;
    }

    pub fn set_event_mask(&self, mask: u32) {
        self.event_mask.store(mask);
    }

    pub fn event_mask(&self) -> u32 {
        self.event_mask.load()
    }

    pub fn set_marker(&self, frames: Option<u64>) {
        self.marker.store(frames);
    }

    pub fn marker(&self) -> Option<u64> {
        self.marker.load()
    }

    pub fn set_update_period(&self, frames: u64) {
        self.update_period.store(frames);
    }

    pub fn update_period(&self) -> u64 {
        self.update_period.load()
    }

    /// Stop capture automatically once this many frames were recorded.
    pub fn set_duration_limit(&self, frames: Option<u64>) {
        self.duration_limit.store(frames);
    }

    pub fn duration_limit(&self) -> Option<u64> {
        self.duration_limit.load()
    }
}

pub(crate) fn init_record(_obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    Ok(Arc::new(RecordInterface::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_rewinds_capture_position() {
        let record = RecordInterface::new();
        record.set_record_state(RecordState::Recording);
        {
            record.inner.lock().unwrap().position = 96;
        }
        record.set_record_state(RecordState::Stopped);
        assert_eq!(record.position(), 0);
        assert_eq!(record.record_state(), RecordState::Stopped);
    }

    #[test]
    fn test_duration_limit_roundtrip() {
        let record = RecordInterface::new();
        assert_eq!(record.duration_limit(), None);
        record.set_duration_limit(Some(48000));
        assert_eq!(record.duration_limit(), Some(48000));
    }
}
