//! The output mix object and its pull-based render interface.
//!
//! `fill` drains the buffer queue of every active, playing track, applies
//! the cached per-channel gains, and sums the result into one interleaved
//! stereo buffer. It never fails: anything that would be an error on the
//! render path becomes silence.

use crate::buffer_queue::BufferQueueInterface;
use crate::capability::Capability;
use crate::class::OUTPUT_MIX_CLASS;
use crate::engine::Engine;
use crate::error::{ResonaError, Result};
use crate::events::PlayEvent;
use crate::object::{Interface, InterfaceKind, MediaObject, ObjectCore, finish_construct};
use crate::player::{AudioPlayer, PlayState};
use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

/// Fixed size of the track pool; one bit per slot in the active mask.
pub const MAX_TRACKS: usize = 32;

/// Gains within this distance of unity take the plain-copy fast path.
const UNITY_TOLERANCE: f32 = 1e-3;

/// One mix input slot. Active iff its player link is set.
struct Track {
    player: Option<Weak<AudioPlayer>>,
    queue: Option<Arc<BufferQueueInterface>>,
    /// Front buffer currently being read, and the samples consumed from it.
    current: Option<Arc<[i16]>>,
    read_pos: usize,
    /// Cached per-channel gains, written by gain recomputation only.
    gains: [f32; 2],
}

impl Track {
    fn vacant() -> Self {
        Self {
            player: None,
            queue: None,
            current: None,
            read_pos: 0,
            gains: [1.0, 1.0],
        }
    }
}

struct MixState {
    active_mask: u32,
    tracks: Vec<Track>,
}

pub struct OutputMix {
    core: ObjectCore,
    state: Mutex<MixState>,
}

impl OutputMix {
    pub(crate) fn create(
        engine: &Arc<Engine>,
        requested: &[Capability],
    ) -> Result<Arc<OutputMix>> {
        let class = &OUTPUT_MIX_CLASS;
        let exposed = class.exposed_mask(requested)?;
        let slot = engine.reserve_instance()?;
        let mix = Arc::new(OutputMix {
            core: ObjectCore::new(
                class,
                Arc::downgrade(engine),
                exposed,
                engine.loss_of_control(),
            ),
            state: Mutex::new(MixState {
                active_mask: 0,
                tracks: (0..MAX_TRACKS).map(|_| Track::vacant()).collect(),
            }),
        });
        let obj: Arc<dyn MediaObject> = mix.clone();
        if let Err(e) = finish_construct(&obj, Some(slot)) {
            engine.abandon_instance(slot);
            return Err(e);
        }
        log::debug!("output mix {} created", mix.core.instance_id());
        Ok(mix)
    }

    /// Allocate a track slot for a realizing player. Lowest free bit wins.
    pub(crate) fn attach(
        &self,
        player: &Arc<AudioPlayer>,
        queue: Arc<BufferQueueInterface>,
        gains: [f32; 2],
    ) -> Result<usize> {
        let mut st = self.state.lock().unwrap();
        let avail = !st.active_mask;
        if avail == 0 {
            return Err(ResonaError::MemoryFailure);
        }
        let slot = avail.trailing_zeros() as usize;
        st.active_mask |= 1 << slot;
        st.tracks[slot] = Track {
            player: Some(Arc::downgrade(player)),
            queue: Some(queue),
            current: None,
            read_pos: 0,
            gains,
        };
        log::debug!("track {slot} attached");
        Ok(slot)
    }

    pub(crate) fn detach(&self, slot: usize) {
        let mut st = self.state.lock().unwrap();
        st.tracks[slot] = Track::vacant();
        st.active_mask &= !(1 << slot);
        log::debug!("track {slot} detached");
    }

    pub(crate) fn set_track_gains(&self, slot: usize, gains: [f32; 2]) {
        let mut st = self.state.lock().unwrap();
        if st.active_mask & (1 << slot) != 0 {
            st.tracks[slot].gains = gains;
        }
    }

    /// Drop the read cursor of a track whose queue was cleared.
    pub(crate) fn flush_track(&self, slot: usize) {
        let mut st = self.state.lock().unwrap();
        if st.active_mask & (1 << slot) != 0 {
            st.tracks[slot].current = None;
            st.tracks[slot].read_pos = 0;
        }
    }

    /// Render one buffer of interleaved stereo PCM. See
    /// [`MixOutputInterface::fill`] for the caller-facing contract.
    fn fill(&self, output: &mut [i16]) {
        // whole stereo frames only
        let len = output.len() & !1;
        let output = &mut output[..len];
        let mut st = self.state.lock().unwrap();
        let mut mix_has_data = false;
        let mut mask = st.active_mask;
        while mask != 0 {
            let slot = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            let track = &mut st.tracks[slot];
            let Some(player) = track.player.as_ref().and_then(Weak::upgrade) else {
                continue;
            };
            let Some(play) = player.play_interface() else {
                continue;
            };
            if play.play_state() != PlayState::Playing {
                continue;
            }
            let gains = track.gains;
            if gains[0] == 0.0 && gains[1] == 0.0 {
                // both channels muted: skip the input entirely
                continue;
            }
            let unity = (gains[0] - 1.0).abs() < UNITY_TOLERANCE
                && (gains[1] - 1.0).abs() < UNITY_TOLERANCE;
            let queue = track.queue.clone();
            let mut dst = 0usize;
            let mut contributed = false;
            let mut frames_consumed = 0u64;
            while dst < len {
                let avail = track
                    .current
                    .as_ref()
                    .map(|b| b.len() - track.read_pos)
                    .unwrap_or(0);
                let actual = (len - dst).min(avail) & !1;
                if avail > 0 && actual == 0 {
                    // a dangling sample cannot form a whole frame; retire
                    // the buffer rather than spin on it
                    track.current = None;
                    track.read_pos = 0;
                    if let Some(q) = queue.as_ref() {
                        if let Some(cb) = q.finish_front() {
                            cb(q);
                        }
                    }
                    continue;
                }
                if actual > 0 {
                    let src_buf = track.current.as_ref().unwrap();
                    let src = &src_buf[track.read_pos..track.read_pos + actual];
                    let dst_slice = &mut output[dst..dst + actual];
                    if mix_has_data {
                        for (j, (d, s)) in dst_slice.iter_mut().zip(src.iter()).enumerate() {
                            *d = d.saturating_add((*s as f32 * gains[j & 1]) as i16);
                        }
                    } else if unity {
                        dst_slice.copy_from_slice(src);
                    } else {
                        for (j, (d, s)) in dst_slice.iter_mut().zip(src.iter()).enumerate() {
                            *d = (*s as f32 * gains[j & 1]) as i16;
                        }
                    }
                    contributed = true;
                    dst += actual;
                    track.read_pos += actual;
                    frames_consumed += (actual / 2) as u64;
                    if track.read_pos == track.current.as_ref().map(|b| b.len()).unwrap_or(0) {
                        // front buffer fully consumed: retire it and tell
                        // the producer and the transport, once per buffer
                        track.current = None;
                        track.read_pos = 0;
                        if let Some(q) = queue.as_ref() {
                            if let Some(cb) = q.finish_front() {
                                cb(q);
                            }
                            if let Some(cb) = play.head_moving_callback() {
                                cb(PlayEvent::HeadMoving);
                            }
                        }
                    }
                    continue;
                }
                // need a fresh front buffer
                if let Some(q) = queue.as_ref() {
                    if let Some(buf) = q.front_buffer() {
                        track.current = Some(buf);
                        track.read_pos = 0;
                        continue;
                    }
                    // empty: one desperate refill attempt through the
                    // producer callback before declaring underflow
                    if let Some(cb) = q.callback() {
                        cb(q);
                        if let Some(buf) = q.front_buffer() {
                            track.current = Some(buf);
                            track.read_pos = 0;
                            continue;
                        }
                    }
                    log::debug!("track {slot}: underflow");
                }
                // underflow: clear the rest of this track's span so no
                // stale bytes survive, but only if it wrote anything
                if !mix_has_data && contributed {
                    output[dst..].fill(0);
                }
                break;
            }
            if let (Some(q), Some(_)) = (queue.as_ref(), track.current.as_ref()) {
                q.note_consumed(track.read_pos);
            }
            if contributed {
                mix_has_data = true;
                play.advance_position(frames_consumed);
            }
        }
        // nothing played: the whole buffer is silence
        if !mix_has_data {
            output.fill(0);
        }
    }
}

impl MediaObject for OutputMix {
    fn core(&self) -> &ObjectCore {
        &self.core
    }
}

/// Render-side interface of an output mix.
pub struct MixOutputInterface {
    mix: Weak<OutputMix>,
}

impl Interface for MixOutputInterface {
    fn capability(&self) -> Capability {
        Capability::MixOutput
    }
}

impl InterfaceKind for MixOutputInterface {
    const CAPABILITY: Capability = Capability::MixOutput;
}

impl MixOutputInterface {
    /// Fill `output` with the next interleaved stereo PCM block.
    ///
    /// Never fails; the requested length is rounded down to a whole frame
    /// and silence substitutes for missing data. Called from the render
    /// context; it must not be re-entered from a queue callback, and a
    /// callback fired here may only enqueue.
    pub fn fill(&self, output: &mut [i16]) {
        if let Some(mix) = self.mix.upgrade() {
            mix.fill(output);
        } else {
            output.fill(0);
        }
    }
}

pub(crate) fn init_mix_output(obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    let any: Arc<dyn Any + Send + Sync> = obj.clone();
    let mix = any
        .downcast::<OutputMix>()
        .map_err(|_| ResonaError::FeatureUnsupported)?;
    Ok(Arc::new(MixOutputInterface {
        mix: Arc::downgrade(&mix),
    }))
}
