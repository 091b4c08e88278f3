//! Circular queue of caller-owned PCM buffers.
//!
//! The queue stores (buffer, size) descriptors only; sample data is owned by
//! the producer and never copied on enqueue. The ring has one slot more than
//! its capacity so that `front == rear` unambiguously means empty.

use crate::capability::Capability;
use crate::error::{ResonaError, Result};
use crate::object::{Interface, InterfaceKind, MediaObject};
use crate::player::AudioPlayer;
use crate::recorder::AudioRecorder;
use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

/// Callback asking the producer for more data. Invoked after a buffer has
/// been fully consumed, and once per underflow as a last-chance refill; it
/// may enqueue zero or more buffers before returning, and must not do
/// anything else to the object graph.
pub type QueueCallback = Arc<dyn Fn(&BufferQueueInterface) + Send + Sync>;

/// Snapshot of queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueState {
    /// Buffers currently enqueued and not yet fully consumed.
    pub count: usize,
    /// Total buffers fully consumed since creation.
    pub play_index: u64,
}

struct QueueInner {
    /// capacity + 1 slots
    slots: Box<[Option<Arc<[i16]>>]>,
    front: usize,
    rear: usize,
    /// Samples consumed from the current front buffer.
    consumed: usize,
    count: usize,
    play_index: u64,
    callback: Option<QueueCallback>,
}

pub struct BufferQueueInterface {
    owner: Weak<dyn MediaObject>,
    capacity: usize,
    inner: Mutex<QueueInner>,
}

impl Interface for BufferQueueInterface {
    fn capability(&self) -> Capability {
        Capability::BufferQueue
    }
}

impl InterfaceKind for BufferQueueInterface {
    const CAPABILITY: Capability = Capability::BufferQueue;
}

impl BufferQueueInterface {
    pub(crate) fn new(owner: Weak<dyn MediaObject>, capacity: usize) -> Self {
        Self {
            owner,
            capacity,
            inner: Mutex::new(QueueInner {
                slots: (0..capacity + 1).map(|_| None).collect(),
                front: 0,
                rear: 0,
                consumed: 0,
                count: 0,
                play_index: 0,
                callback: None,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hand a buffer to the consumer. The buffer is not copied; the producer
    /// must not mutate it until it has been fully consumed. Fails with
    /// `BufferInsufficient` when the queue is full, leaving the queue
    /// untouched.
    pub fn enqueue(&self, buffer: Arc<[i16]>) -> Result<()> {
        if buffer.is_empty() {
            return Err(ResonaError::ParameterInvalid);
        }
        let mut q = self.inner.lock().unwrap();
        let new_rear = (q.rear + 1) % q.slots.len();
        if new_rear == q.front {
            return Err(ResonaError::BufferInsufficient);
        }
        let rear = q.rear;
        q.slots[rear] = Some(buffer);
        q.rear = new_rear;
        q.count += 1;
        Ok(())
    }

    /// Drop every queued buffer and reset the read position. Also resets the
    /// read cursor of an attached mixer track so the consumer does not keep
    /// reading a buffer the producer believes discarded.
    pub fn clear(&self) -> Result<()> {
        {
            let mut q = self.inner.lock().unwrap();
            for slot in q.slots.iter_mut() {
                *slot = None;
            }
            q.front = 0;
            q.rear = 0;
            q.consumed = 0;
            q.count = 0;
        }
        // reset the mixer-side cursor after releasing the queue lock; the
        // mixer always locks mix state before queue state
        if let Some(owner) = self.owner.upgrade() {
            let any: Arc<dyn Any + Send + Sync> = owner;
            if let Ok(player) = any.downcast::<AudioPlayer>() {
                player.flush_track_cursor();
            }
        }
        Ok(())
    }

    /// Snapshot of (count, play index).
    pub fn state(&self) -> QueueState {
        let q = self.inner.lock().unwrap();
        QueueState {
            count: q.count,
            play_index: q.play_index,
        }
    }

    /// Samples already consumed from the current front buffer.
    pub fn consumed_in_front(&self) -> usize {
        self.inner.lock().unwrap().consumed
    }

    /// Register (or clear) the producer callback. Should only be changed
    /// while the owning object's transport is stopped.
    pub fn register_callback(&self, callback: Option<QueueCallback>) -> Result<()> {
        self.inner.lock().unwrap().callback = callback;
        Ok(())
    }

    pub(crate) fn callback(&self) -> Option<QueueCallback> {
        self.inner.lock().unwrap().callback.clone()
    }

    /// Current front buffer, if any. The buffer stays queued until
    /// [`finish_front`](Self::finish_front).
    pub(crate) fn front_buffer(&self) -> Option<Arc<[i16]>> {
        let q = self.inner.lock().unwrap();
        if q.front == q.rear {
            None
        } else {
            q.slots[q.front].clone()
        }
    }

    /// Record partial consumption of the front buffer.
    pub(crate) fn note_consumed(&self, samples: usize) {
        self.inner.lock().unwrap().consumed = samples;
    }

    /// Retire the fully consumed front buffer and return the callback to
    /// fire for it, if one is registered.
    pub(crate) fn finish_front(&self) -> Option<QueueCallback> {
        let mut q = self.inner.lock().unwrap();
        if q.front == q.rear {
            log::warn!("finish_front on an empty queue");
            return None;
        }
        let front = q.front;
        q.slots[front] = None;
        q.front = (front + 1) % q.slots.len();
        q.count -= 1;
        q.play_index += 1;
        q.consumed = 0;
        q.callback.clone()
    }
}

/// Registry init hook. The queue capacity comes from the owning object's
/// data locator.
pub(crate) fn init_buffer_queue(
    obj: &Arc<dyn MediaObject>,
) -> Result<Arc<dyn Interface>> {
    let any: Arc<dyn Any + Send + Sync> = obj.clone();
    let (owner, capacity): (Weak<dyn MediaObject>, usize) = match any.downcast::<AudioPlayer>() {
        Ok(player) => {
            let capacity = player.queue_capacity();
            let weak: Weak<AudioPlayer> = Arc::downgrade(&player);
            (weak, capacity)
        }
        Err(any) => {
            let recorder = any
                .downcast::<AudioRecorder>()
                .map_err(|_| ResonaError::FeatureUnsupported)?;
            let capacity = recorder.queue_capacity();
            let weak: Weak<AudioRecorder> = Arc::downgrade(&recorder);
            (weak, capacity)
        }
    };
    Ok(Arc::new(BufferQueueInterface::new(owner, capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::AudioPlayer;

    fn queue(capacity: usize) -> BufferQueueInterface {
        let owner: Weak<AudioPlayer> = Weak::new();
        BufferQueueInterface::new(owner, capacity)
    }

    fn buf(samples: &[i16]) -> Arc<[i16]> {
        Arc::from(samples)
    }

    #[test]
    fn test_enqueue_rejects_empty_buffer() {
        let q = queue(2);
        assert_eq!(q.enqueue(buf(&[])), Err(ResonaError::ParameterInvalid));
    }

    #[test]
    fn test_capacity_and_fifo_order() {
        let q = queue(2);
        assert!(q.enqueue(buf(&[1, 1])).is_ok());
        assert!(q.enqueue(buf(&[2, 2])).is_ok());

        let before = q.state();
        assert_eq!(q.enqueue(buf(&[3, 3])), Err(ResonaError::BufferInsufficient));
        // a failed enqueue leaves the queue untouched
        assert_eq!(q.state(), before);
        assert_eq!(before.count, 2);

        // FIFO: buffers come back in enqueue order
        assert_eq!(q.front_buffer().unwrap()[0], 1);
        q.finish_front();
        assert_eq!(q.front_buffer().unwrap()[0], 2);

        // a successful dequeue frees exactly one slot
        assert!(q.enqueue(buf(&[4, 4])).is_ok());
        assert_eq!(q.enqueue(buf(&[5, 5])), Err(ResonaError::BufferInsufficient));

        q.finish_front();
        assert_eq!(q.front_buffer().unwrap()[0], 4);
        q.finish_front();
        assert!(q.front_buffer().is_none());
        assert_eq!(q.state(), QueueState { count: 0, play_index: 3 });
    }

    #[test]
    fn test_clear_resets_state() {
        let q = queue(3);
        q.enqueue(buf(&[1, 1])).unwrap();
        q.enqueue(buf(&[2, 2])).unwrap();
        q.note_consumed(1);
        q.clear().unwrap();
        assert_eq!(q.state(), QueueState { count: 0, play_index: 0 });
        assert_eq!(q.consumed_in_front(), 0);
        assert!(q.front_buffer().is_none());
        // the freed slots are usable again
        for i in 0..3 {
            assert!(q.enqueue(buf(&[i, i])).is_ok());
        }
        assert!(q.enqueue(buf(&[9, 9])).is_err());
    }

    #[test]
    fn test_callback_returned_on_finish() {
        let q = queue(1);
        q.register_callback(Some(Arc::new(|_q: &BufferQueueInterface| {})))
            .unwrap();
        q.enqueue(buf(&[1, 1])).unwrap();
        assert!(q.finish_front().is_some());
        assert_eq!(q.state().play_index, 1);
    }
}
