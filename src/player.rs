//! The audio player object and its transport interface.
//!
//! A player pulls PCM from its buffer queue and delivers it to the output
//! mix named as its data sink. Attaching to the mix's track pool happens at
//! realize time; detaching at destroy.

use crate::buffer_queue::BufferQueueInterface;
use crate::capability::Capability;
use crate::class::AUDIO_PLAYER_CLASS;
use crate::config::{DataSink, DataSource, PcmFormat};
use crate::engine::Engine;
use crate::error::{ResonaError, Result};
use crate::events::{PlayCallback, play_event_mask};
use crate::mixer::OutputMix;
use crate::object::{
    Interface, InterfaceKind, MediaObject, ObjectCore, attr, finish_construct,
};
use crate::volume::{self, GainInputs, VolumeInterface};
use crossbeam_utils::atomic::AtomicCell;
use std::sync::{Arc, Mutex, Weak};

/// Transport state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Paused,
    Playing,
}

#[derive(Clone, Default)]
struct SinkBinding {
    mix: Weak<OutputMix>,
    track: Option<usize>,
}

pub struct AudioPlayer {
    core: ObjectCore,
    weak_self: Weak<AudioPlayer>,
    format: PcmFormat,
    num_buffers: usize,
    sink: Mutex<SinkBinding>,
    /// (mute mask, solo mask), one bit per channel
    channel_masks: Mutex<(u32, u32)>,
}

impl AudioPlayer {
    pub(crate) fn create(
        engine: &Arc<Engine>,
        source: DataSource,
        sink: DataSink,
        requested: &[Capability],
    ) -> Result<Arc<AudioPlayer>> {
        source.validate()?;
        sink.validate()?;
        let (num_buffers, format) = match &source {
            DataSource::BufferQueue {
                num_buffers,
                format,
            } => (*num_buffers, *format),
            DataSource::InputDevice { .. } => return Err(ResonaError::ContentUnsupported),
        };
        let mix = match &sink {
            DataSink::OutputMix(mix) => Arc::downgrade(mix),
            DataSink::BufferQueue { .. } => return Err(ResonaError::ContentUnsupported),
        };
        let class = &AUDIO_PLAYER_CLASS;
        let exposed = class.exposed_mask(requested)?;
        let slot = engine.reserve_instance()?;
        let player = Arc::new_cyclic(|weak| AudioPlayer {
            core: ObjectCore::new(
                class,
                Arc::downgrade(engine),
                exposed,
                engine.loss_of_control(),
            ),
            weak_self: weak.clone(),
            format,
            num_buffers,
            sink: Mutex::new(SinkBinding {
                mix,
                track: None,
            }),
            channel_masks: Mutex::new((0, 0)),
        });
        let obj: Arc<dyn MediaObject> = player.clone();
        if let Err(e) = finish_construct(&obj, Some(slot)) {
            engine.abandon_instance(slot);
            return Err(e);
        }
        log::debug!("player {} created", player.core.instance_id());
        Ok(player)
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.num_buffers
    }

    pub(crate) fn play_interface(&self) -> Option<Arc<PlayInterface>> {
        self.core.interface_of::<PlayInterface>()
    }

    pub(crate) fn channel_masks(&self) -> (u32, u32) {
        *self.channel_masks.lock().unwrap()
    }

    pub(crate) fn update_channel_masks(&self, f: impl FnOnce(&mut u32, &mut u32)) {
        {
            let mut masks = self.channel_masks.lock().unwrap();
            let (mute, solo) = &mut *masks;
            f(mute, solo);
        }
        self.core.mark_changed(attr::GAIN);
    }

    fn compute_gains(&self) -> [f32; 2] {
        let settings = self
            .core
            .interface_of::<VolumeInterface>()
            .map(|v| v.settings())
            .unwrap_or_default();
        let (mute_mask, solo_mask) = self.channel_masks();
        volume::track_gains(GainInputs {
            volume: settings,
            mute_mask,
            solo_mask,
            channels: self.format.channels,
        })
    }

    /// Recompute the cached track gains. Called from the sync pass when a
    /// gain-relevant control changed; never from the render path.
    pub(crate) fn refresh_gains(&self) {
        let gains = self.compute_gains();
        let binding = self.sink.lock().unwrap().clone();
        if let (Some(mix), Some(track)) = (binding.mix.upgrade(), binding.track) {
            mix.set_track_gains(track, gains);
        }
    }

    /// Reset the mixer-side read cursor after the queue was cleared.
    pub(crate) fn flush_track_cursor(&self) {
        let binding = self.sink.lock().unwrap().clone();
        if let (Some(mix), Some(track)) = (binding.mix.upgrade(), binding.track) {
            mix.flush_track(track);
        }
    }
}

impl MediaObject for AudioPlayer {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn realize_hook(&self) -> Result<()> {
        let this = self.weak_self.upgrade().ok_or(ResonaError::InternalError)?;
        let queue = self
            .core
            .interface_of::<BufferQueueInterface>()
            .ok_or(ResonaError::InternalError)?;
        let mix = {
            let binding = self.sink.lock().unwrap();
            binding.mix.upgrade().ok_or(ResonaError::ResourceError)?
        };
        let track = mix.attach(&this, queue, self.compute_gains())?;
        self.sink.lock().unwrap().track = Some(track);
        Ok(())
    }

    fn destroy_hook(&self) {
        let binding = {
            let mut binding = self.sink.lock().unwrap();
            let taken = binding.clone();
            binding.track = None;
            taken
        };
        if let (Some(mix), Some(track)) = (binding.mix.upgrade(), binding.track) {
            mix.detach(track);
        }
    }
}

struct PlayInner {
    /// Playback position in frames, advanced by the mixer.
    position: u64,
    callback: Option<PlayCallback>,
}

/// Transport control for a player.
///
/// The state itself sits in an atomic cell so the render path can read it
/// without taking a lock; the multi-field transitions (stop resets the
/// position) go through the interface mutex.
pub struct PlayInterface {
    state: AtomicCell<PlayState>,
    event_mask: AtomicCell<u32>,
    marker: AtomicCell<Option<u64>>,
    update_period: AtomicCell<u64>,
    inner: Mutex<PlayInner>,
}

impl Interface for PlayInterface {
    fn capability(&self) -> Capability {
        Capability::Play
    }
}

impl InterfaceKind for PlayInterface {
    const CAPABILITY: Capability = Capability::Play;
}

impl PlayInterface {
    fn new() -> Self {
        Self {
            state: AtomicCell::new(PlayState::Stopped),
            event_mask: AtomicCell::new(0),
            marker: AtomicCell::new(None),
            update_period: AtomicCell::new(0),
            inner: Mutex::new(PlayInner {
                position: 0,
                callback: None,
            }),
        }
    }

    /// Change the transport state. Stopping also rewinds the position;
    /// the two updates are observed atomically.
    pub fn set_play_state(&self, state: PlayState) {
        let mut inner = self.inner.lock().unwrap();
        self.state.store(state);
        if state == PlayState::Stopped {
            inner.position = 0;
        }
    }

    pub fn play_state(&self) -> PlayState {
        self.state.load()
    }

    /// Playback position in frames.
    pub fn position(&self) -> u64 {
        self.inner.lock().unwrap().position
    }

    /// Total duration in frames; unknown for a queue-fed stream.
    pub fn duration(&self) -> Option<u64> {
        None
    }

    pub fn register_callback(&self, callback: Option<PlayCallback>) {
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

    pub(crate) fn advance_position(&self, frames: u64) {
        self.inner.lock().unwrap().position += frames;
    }

    /// The callback to fire for a head-moving dispatch, if enabled.
    pub(crate) fn head_moving_callback(&self) -> Option<PlayCallback> {
        if self.event_mask.load() & play_event_mask::HEAD_MOVING == 0 {
            return None;
        }
        self.inner.lock().unwrap().callback.clone()
    }
}

#[derive(Debug, Clone, Copy)]
struct SeekSettings {
    position: u64,
    loop_enabled: bool,
    loop_start: u64,
    loop_end: Option<u64>,
}

/// Seek position and loop-region accessors.
pub struct SeekInterface {
    inner: Mutex<SeekSettings>,
}

impl Interface for SeekInterface {
    fn capability(&self) -> Capability {
        Capability::Seek
    }
}

impl InterfaceKind for SeekInterface {
    const CAPABILITY: Capability = Capability::Seek;
}

impl SeekInterface {
    pub fn set_position(&self, frames: u64) {
        self.inner.lock().unwrap().position = frames;
    }

    pub fn position(&self) -> u64 {
        self.inner.lock().unwrap().position
    }

    pub fn set_loop(&self, enabled: bool, start: u64, end: Option<u64>) -> Result<()> {
        if let Some(end) = end {
            if end <= start {
                return Err(ResonaError::ParameterInvalid);
            }
        }
        let mut s = self.inner.lock().unwrap();
        s.loop_enabled = enabled;
        s.loop_start = start;
        s.loop_end = end;
        Ok(())
    }

    pub fn loop_region(&self) -> (bool, u64, Option<u64>) {
        let s = self.inner.lock().unwrap();
        (s.loop_enabled, s.loop_start, s.loop_end)
    }
}

/// Pitch bounds in permille of the natural pitch.
pub const PITCH_RANGE: (i32, i32) = (500, 2000);

/// Pitch accessor.
pub struct PitchInterface {
    pitch: AtomicCell<i32>,
}

impl Interface for PitchInterface {
    fn capability(&self) -> Capability {
        Capability::Pitch
    }
}

impl InterfaceKind for PitchInterface {
    const CAPABILITY: Capability = Capability::Pitch;
}

impl PitchInterface {
    pub fn set_pitch(&self, permille: i32) -> Result<()> {
        if !(PITCH_RANGE.0..=PITCH_RANGE.1).contains(&permille) {
            return Err(ResonaError::ParameterInvalid);
        }
        self.pitch.store(permille);
        Ok(())
    }

    pub fn pitch(&self) -> i32 {
        self.pitch.load()
    }

    pub fn pitch_range(&self) -> (i32, i32) {
        PITCH_RANGE
    }
}

/// Playback-rate bounds in permille of real time.
pub const RATE_RANGE: (i32, i32) = (500, 2000);

/// Playback-rate accessor.
pub struct PlaybackRateInterface {
    rate: AtomicCell<i32>,
}

impl Interface for PlaybackRateInterface {
    fn capability(&self) -> Capability {
        Capability::PlaybackRate
    }
}

impl InterfaceKind for PlaybackRateInterface {
    const CAPABILITY: Capability = Capability::PlaybackRate;
}

impl PlaybackRateInterface {
    pub fn set_rate(&self, permille: i32) -> Result<()> {
        if !(RATE_RANGE.0..=RATE_RANGE.1).contains(&permille) {
            return Err(ResonaError::ParameterInvalid);
        }
        self.rate.store(permille);
        Ok(())
    }

    pub fn rate(&self) -> i32 {
        self.rate.load()
    }

    pub fn rate_range(&self) -> (i32, i32) {
        RATE_RANGE
    }
}

pub(crate) fn init_play(_obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    Ok(Arc::new(PlayInterface::new()))
}

pub(crate) fn init_seek(_obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    Ok(Arc::new(SeekInterface {
        inner: Mutex::new(SeekSettings {
            position: 0,
            loop_enabled: false,
            loop_start: 0,
            loop_end: None,
        }),
    }))
}

pub(crate) fn init_pitch(_obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    Ok(Arc::new(PitchInterface {
        pitch: AtomicCell::new(1000),
    }))
}

pub(crate) fn init_playback_rate(_obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    Ok(Arc::new(PlaybackRateInterface {
        rate: AtomicCell::new(1000),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_rewinds_position() {
        let play = PlayInterface::new();
        play.set_play_state(PlayState::Playing);
        play.advance_position(128);
        assert_eq!(play.position(), 128);

        play.set_play_state(PlayState::Paused);
        assert_eq!(play.position(), 128);

        play.set_play_state(PlayState::Stopped);
        assert_eq!(play.position(), 0);
    }

    #[test]
    fn test_head_moving_callback_gated_by_mask() {
        let play = PlayInterface::new();
        play.register_callback(Some(Arc::new(|_| {})));
        assert!(play.head_moving_callback().is_none());
        play.set_event_mask(play_event_mask::HEAD_MOVING);
        assert!(play.head_moving_callback().is_some());
    }

    #[test]
    fn test_pitch_and_rate_bounds() {
        let pitch = PitchInterface {
            pitch: AtomicCell::new(1000),
        };
        assert_eq!(pitch.set_pitch(2500), Err(ResonaError::ParameterInvalid));
        assert!(pitch.set_pitch(750).is_ok());
        assert_eq!(pitch.pitch(), 750);

        let rate = PlaybackRateInterface {
            rate: AtomicCell::new(1000),
        };
        assert_eq!(rate.set_rate(100), Err(ResonaError::ParameterInvalid));
        assert!(rate.set_rate(1500).is_ok());
        assert_eq!(rate.rate(), 1500);
    }

    #[test]
    fn test_seek_loop_validation() {
        let seek = SeekInterface {
            inner: Mutex::new(SeekSettings {
                position: 0,
                loop_enabled: false,
                loop_start: 0,
                loop_end: None,
            }),
        };
        assert_eq!(
            seek.set_loop(true, 100, Some(50)),
            Err(ResonaError::ParameterInvalid)
        );
        assert!(seek.set_loop(true, 100, Some(400)).is_ok());
        assert_eq!(seek.loop_region(), (true, 100, Some(400)));
    }
}
