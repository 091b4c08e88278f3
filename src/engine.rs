//! The engine object: the application-owned context everything else hangs
//! off. It owns the bounded instance table, the worker pool for deferred
//! operations, and the periodic sync thread.

use crate::capability::{Capability, Relation};
use crate::class::{ClassKind, ENGINE_CLASS};
use crate::config::{DataSink, DataSource, EngineOptions};
use crate::error::{ResonaError, Result};
use crate::mixer::OutputMix;
use crate::object::{
    Interface, InterfaceKind, MediaObject, ObjectCore, ObjectOps, ObjectState, finish_construct,
};
use crate::player::AudioPlayer;
use crate::recorder::AudioRecorder;
use crate::spatial::Listener;
use crate::sync;
use crate::task_pool::{Task, TaskPool};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

/// Size of the per-engine instance table; one bit per slot.
pub const MAX_INSTANCE: usize = 32;

const fn slot_mask_all() -> u32 {
    if MAX_INSTANCE >= 32 {
        u32::MAX
    } else {
        (1u32 << MAX_INSTANCE) - 1
    }
}

struct InstanceTable {
    slots: Vec<Option<Weak<dyn MediaObject>>>,
    used: u32,
    /// Slots handed out to constructions still in flight.
    reserved: u32,
}

pub struct Engine {
    core: ObjectCore,
    weak_self: Weak<Engine>,
    options: EngineOptions,
    instances: Mutex<InstanceTable>,
    pool: Mutex<Option<TaskPool>>,
    sync_thread: Mutex<Option<JoinHandle<()>>>,
    sync_shutdown: Arc<AtomicBool>,
}

impl Engine {
    /// Create an engine in the unrealized state. Options apply at
    /// construction time only.
    pub fn create(options: EngineOptions) -> Result<Arc<Engine>> {
        let loss_of_control = options.loss_of_control;
        let engine = Arc::new_cyclic(|weak: &Weak<Engine>| Engine {
            core: ObjectCore::new(
                &ENGINE_CLASS,
                weak.clone(),
                ENGINE_CLASS.implicit_mask(),
                loss_of_control,
            ),
            weak_self: weak.clone(),
            options,
            instances: Mutex::new(InstanceTable {
                slots: (0..MAX_INSTANCE).map(|_| None).collect(),
                used: 0,
                reserved: 0,
            }),
            pool: Mutex::new(None),
            sync_thread: Mutex::new(None),
            sync_shutdown: Arc::new(AtomicBool::new(false)),
        });
        let obj: Arc<dyn MediaObject> = engine.clone();
        finish_construct(&obj, None)?;
        log::debug!("engine {} created", engine.core.instance_id());
        Ok(engine)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub(crate) fn loss_of_control(&self) -> bool {
        self.options.loss_of_control
    }

    fn ensure_realized(&self) -> Result<()> {
        if self.object_state() != ObjectState::Realized {
            return Err(ResonaError::PreconditionsViolated);
        }
        Ok(())
    }

    /// Create an audio player pulling from `source` and delivering into
    /// `sink`. `requested` selects optional and dynamic capabilities to
    /// expose at creation time.
    pub fn create_audio_player(
        self: &Arc<Self>,
        source: DataSource,
        sink: DataSink,
        requested: &[Capability],
    ) -> Result<Arc<AudioPlayer>> {
        self.ensure_realized()?;
        AudioPlayer::create(self, source, sink, requested)
    }

    pub fn create_audio_recorder(
        self: &Arc<Self>,
        source: DataSource,
        sink: DataSink,
        requested: &[Capability],
    ) -> Result<Arc<AudioRecorder>> {
        self.ensure_realized()?;
        AudioRecorder::create(self, source, sink, requested)
    }

    pub fn create_output_mix(
        self: &Arc<Self>,
        requested: &[Capability],
    ) -> Result<Arc<OutputMix>> {
        self.ensure_realized()?;
        OutputMix::create(self, requested)
    }

    pub fn create_listener(
        self: &Arc<Self>,
        requested: &[Capability],
    ) -> Result<Arc<Listener>> {
        self.ensure_realized()?;
        Listener::create(self, requested)
    }

    /// Claim a free instance-table slot for a construction in flight.
    /// The table never grows: exhaustion is an explicit error.
    pub(crate) fn reserve_instance(&self) -> Result<usize> {
        let mut table = self.instances.lock().unwrap();
        let avail = !(table.used | table.reserved) & slot_mask_all();
        if avail == 0 {
            log::warn!("instance table full ({MAX_INSTANCE} objects)");
            return Err(ResonaError::ResourceError);
        }
        let slot = avail.trailing_zeros() as usize;
        table.reserved |= 1 << slot;
        Ok(slot)
    }

    /// Expose a fully constructed object to the sync pass.
    pub(crate) fn publish_instance(&self, slot: usize, object: Weak<dyn MediaObject>) {
        let mut table = self.instances.lock().unwrap();
        table.reserved &= !(1 << slot);
        table.used |= 1 << slot;
        table.slots[slot] = Some(object);
    }

    /// Give a reserved slot back after a failed construction.
    pub(crate) fn abandon_instance(&self, slot: usize) {
        self.instances.lock().unwrap().reserved &= !(1 << slot);
    }

    pub(crate) fn release_instance(&self, slot: usize) {
        let mut table = self.instances.lock().unwrap();
        table.used &= !(1 << slot);
        table.reserved &= !(1 << slot);
        table.slots[slot] = None;
    }

    /// Objects currently alive in the table.
    pub(crate) fn live_instances(&self) -> Vec<Arc<dyn MediaObject>> {
        let table = self.instances.lock().unwrap();
        table
            .slots
            .iter()
            .filter_map(|s| s.as_ref().and_then(Weak::upgrade))
            .collect()
    }

    /// Number of live objects, engine excluded.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().unwrap().used.count_ones() as usize
    }

    /// Hand a task to the worker pool. False when the engine is not
    /// realized or is shutting down.
    pub(crate) fn submit_task(&self, task: Task) -> bool {
        let guard = self.pool.lock().unwrap();
        match &*guard {
            Some(pool) => pool.submit(task),
            None => false,
        }
    }

    /// Drive one reconcile pass immediately instead of waiting for the
    /// sync thread; useful for deterministic tests and deferred commits.
    pub fn reconcile_now(&self) {
        sync::reconcile(self);
    }
}

impl MediaObject for Engine {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn realize_hook(&self) -> Result<()> {
        let pool = TaskPool::new(self.options.task_queue_depth, self.options.worker_threads)?;
        *self.pool.lock().unwrap() = Some(pool);
        self.sync_shutdown.store(false, Ordering::SeqCst);
        let weak = self.weak_self.clone();
        let shutdown = self.sync_shutdown.clone();
        match std::thread::Builder::new()
            .name("resona-sync".into())
            .spawn(move || sync::run(weak, shutdown))
        {
            Ok(handle) => {
                *self.sync_thread.lock().unwrap() = Some(handle);
                Ok(())
            }
            Err(_) => {
                if let Some(pool) = self.pool.lock().unwrap().take() {
                    pool.shutdown();
                }
                Err(ResonaError::ResourceError)
            }
        }
    }

    fn destroy_hook(&self) {
        self.sync_shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sync_thread.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("sync thread panicked");
            }
        }
        if let Some(pool) = self.pool.lock().unwrap().take() {
            pool.shutdown();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy_hook();
    }
}

/// Engine configuration queries.
pub struct EngineInfoInterface {
    engine: Weak<Engine>,
}

impl Interface for EngineInfoInterface {
    fn capability(&self) -> Capability {
        Capability::EngineInfo
    }
}

impl InterfaceKind for EngineInfoInterface {
    const CAPABILITY: Capability = Capability::EngineInfo;
}

impl EngineInfoInterface {
    fn engine(&self) -> Result<Arc<Engine>> {
        self.engine.upgrade().ok_or(ResonaError::PreconditionsViolated)
    }

    pub fn thread_safe(&self) -> Result<bool> {
        Ok(self.engine()?.options.thread_safe)
    }

    pub fn loss_of_control(&self) -> Result<bool> {
        Ok(self.engine()?.options.loss_of_control)
    }

    /// Capabilities a class carries, with their relationship tags.
    pub fn supported_capabilities(&self, kind: ClassKind) -> Vec<(Capability, Relation)> {
        kind.descriptor()
            .entries
            .iter()
            .map(|e| (e.capability, e.relation))
            .collect()
    }

    /// Whether instances of a class can ever expose the capability.
    pub fn is_supported(&self, kind: ClassKind, capability: Capability) -> bool {
        kind.descriptor()
            .entry(capability)
            .is_some_and(|e| !matches!(e.relation, Relation::Unavailable))
    }
}

pub(crate) fn init_engine_info(obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    let any: Arc<dyn Any + Send + Sync> = obj.clone();
    let engine = any
        .downcast::<Engine>()
        .map_err(|_| ResonaError::FeatureUnsupported)?;
    Ok(Arc::new(EngineInfoInterface {
        engine: Arc::downgrade(&engine),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_realized_engine() {
        let engine = Engine::create(EngineOptions::default()).unwrap();
        assert_eq!(
            engine.create_output_mix(&[]).err(),
            Some(ResonaError::PreconditionsViolated)
        );
        engine.realize(false).unwrap();
        assert!(engine.create_output_mix(&[]).is_ok());
        engine.destroy();
    }

    #[test]
    fn test_instance_table_exhaustion_is_explicit() {
        let engine = Engine::create(EngineOptions::default()).unwrap();
        engine.realize(false).unwrap();

        let mut mixes = Vec::new();
        for _ in 0..MAX_INSTANCE {
            mixes.push(engine.create_output_mix(&[]).unwrap());
        }
        assert_eq!(
            engine.create_output_mix(&[]).err(),
            Some(ResonaError::ResourceError)
        );

        // destroying an object frees its slot for the next creation
        mixes.pop().unwrap().destroy();
        assert!(engine.create_output_mix(&[]).is_ok());
        engine.destroy();
    }

    #[test]
    fn test_engine_info_reports_options() {
        let engine = Engine::create(EngineOptions {
            thread_safe: false,
            loss_of_control: true,
            ..Default::default()
        })
        .unwrap();
        engine.realize(false).unwrap();
        let info = engine.get_interface::<EngineInfoInterface>().unwrap();
        assert_eq!(info.thread_safe(), Ok(false));
        assert_eq!(info.loss_of_control(), Ok(true));

        assert!(info.is_supported(ClassKind::AudioPlayer, Capability::Play));
        assert!(!info.is_supported(ClassKind::AudioRecorder, Capability::Location));
        assert!(!info.is_supported(ClassKind::OutputMix, Capability::Play));
        engine.destroy();
    }

    #[test]
    fn test_destroy_joins_threads_cleanly() {
        let engine = Engine::create(EngineOptions::default()).unwrap();
        engine.realize(false).unwrap();
        // a queued task must drain before shutdown completes
        let (tx, rx) = crossbeam_channel::bounded(1);
        assert!(engine.submit_task(Box::new(move || {
            let _ = tx.send(());
        })));
        engine.destroy();
        assert!(rx.try_recv().is_ok());
        assert!(!engine.submit_task(Box::new(|| {})));
    }
}
