//! The object runtime.
//!
//! Every audio object (engine, player, recorder, output mix, listener) is an
//! `Arc`-owned value embedding an [`ObjectCore`]: one mutex guarding the
//! lifecycle state and the per-capability interface registry. Capability
//! interfaces are polymorphic values held behind `Arc<dyn Interface>`, each
//! keeping a weak reference back to its owner; there is no offset arithmetic
//! anywhere in the dispatch path.
//!
//! Locking discipline: the core mutex is the exclusive tier and doubles as
//! the shared tier for multi-field snapshots. Single-word fields that
//! tolerate relaxed observation live in `AtomicCell`s inside the interface
//! structs. Class and interface hooks always run with the core mutex
//! released, so a hook may itself take the lock.

use crate::capability::{self, Capability, Relation};
use crate::class::ClassDescriptor;
use crate::engine::Engine;
use crate::error::{ResonaError, Result};
use crate::events::{ObjectCallback, ObjectEvent};
use std::any::Any;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use uuid::Uuid;

/// Changed-attribute bits, reconciled by the periodic sync pass.
pub(crate) mod attr {
    /// Gain-relevant control changed (volume, mute, solo, pan).
    pub const GAIN: u32 = 1 << 0;
}

/// Official lifecycle states visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Unrealized,
    Realized,
    Suspended,
}

/// Full lifecycle, including transitional states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Unrealized,
    Realizing,
    Realized,
    Suspended,
    Resuming,
    Destroyed,
}

impl Lifecycle {
    /// Transitional states are reported as the official state they will
    /// settle back into on failure.
    pub(crate) fn public(self) -> ObjectState {
        match self {
            Lifecycle::Unrealized | Lifecycle::Realizing | Lifecycle::Destroyed => {
                ObjectState::Unrealized
            }
            Lifecycle::Realized => ObjectState::Realized,
            Lifecycle::Suspended | Lifecycle::Resuming => ObjectState::Suspended,
        }
    }
}

/// Life-cycle of one capability slot on one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityState {
    /// Not requested at creation time, not added since.
    Uninitialized,
    /// Requested at creation time.
    Exposed,
    /// Asynchronous add accepted and queued; still cancellable.
    AddPending,
    /// Add init hook is running.
    Adding,
    /// Queued add was aborted before its hook ran.
    AddAborted,
    /// Dynamic add has completed.
    Added,
    /// Remove deinit hook is running.
    Removing,
    Suspended,
    /// Asynchronous resume accepted and queued; still cancellable.
    ResumePending,
    Resuming,
    /// Queued resume was aborted before it ran.
    ResumeAborted,
}

/// A capability interface exposed by an object.
pub trait Interface: Any + Send + Sync {
    fn capability(&self) -> Capability;
}

/// Implemented by each concrete interface type; ties the type to its
/// capability kind for typed lookup.
pub trait InterfaceKind: Interface + Sized {
    const CAPABILITY: Capability;
}

struct ObjectInner {
    lifecycle: Lifecycle,
    cap_states: Box<[CapabilityState]>,
    interfaces: Box<[Option<Arc<dyn Interface>>]>,
    /// Capabilities fetched at least once; diagnostic only.
    gotten_mask: u32,
    changed: u32,
    loss_of_control_mask: u32,
    callback: Option<ObjectCallback>,
    priority: i32,
    preemptable: bool,
}

/// Shared state embedded in every object.
pub struct ObjectCore {
    class: &'static ClassDescriptor,
    engine: Weak<Engine>,
    instance_id: Uuid,
    slot: OnceLock<usize>,
    self_ref: OnceLock<Weak<dyn MediaObject>>,
    inner: Mutex<ObjectInner>,
}

impl ObjectCore {
    pub(crate) fn new(
        class: &'static ClassDescriptor,
        engine: Weak<Engine>,
        exposed_mask: u32,
        loss_of_control: bool,
    ) -> Self {
        let n = class.interface_count();
        let cap_states = (0..n)
            .map(|i| {
                if exposed_mask & (1 << i) != 0 {
                    CapabilityState::Exposed
                } else {
                    CapabilityState::Uninitialized
                }
            })
            .collect();
        let interfaces = (0..n).map(|_| None).collect();
        Self {
            class,
            engine,
            instance_id: Uuid::new_v4(),
            slot: OnceLock::new(),
            self_ref: OnceLock::new(),
            inner: Mutex::new(ObjectInner {
                lifecycle: Lifecycle::Unrealized,
                cap_states,
                interfaces,
                gotten_mask: 0,
                changed: 0,
                loss_of_control_mask: if loss_of_control { !0 } else { 0 },
                callback: None,
                priority: 0,
                preemptable: false,
            }),
        }
    }

    pub fn class(&self) -> &'static ClassDescriptor {
        self.class
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub(crate) fn engine(&self) -> Option<Arc<Engine>> {
        self.engine.upgrade()
    }

    pub(crate) fn set_slot(&self, slot: usize) {
        let _ = self.slot.set(slot);
    }

    pub(crate) fn slot(&self) -> Option<usize> {
        self.slot.get().copied()
    }

    fn self_object(&self) -> Result<Arc<dyn MediaObject>> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .ok_or(ResonaError::InternalError)
    }

    /// Raise changed-attribute bits for the sync pass.
    pub(crate) fn mark_changed(&self, bits: u32) {
        self.inner.lock().unwrap().changed |= bits;
    }

    /// Swap out the accumulated changed-attribute bits.
    pub(crate) fn take_changed(&self) -> u32 {
        std::mem::take(&mut self.inner.lock().unwrap().changed)
    }

    /// Interface slot lookup that bypasses the lifecycle gate; used by the
    /// runtime itself (mixer, sync pass) where the object is known live.
    pub(crate) fn interface_at(&self, capability: Capability) -> Option<Arc<dyn Interface>> {
        let idx = self.class.entry_index(capability)?;
        self.inner.lock().unwrap().interfaces[idx].clone()
    }

    pub(crate) fn interface_of<I: InterfaceKind>(&self) -> Option<Arc<I>> {
        let itf = self.interface_at(I::CAPABILITY)?;
        let any: Arc<dyn Any + Send + Sync> = itf;
        any.downcast::<I>().ok()
    }
}

/// An object of the runtime: a class descriptor plus per-class hooks.
///
/// The hooks run with the object lock released. `realize_hook` may perform
/// expensive setup (attaching to a mix, opening a backing resource) and its
/// failure leaves the object unrealized.
pub trait MediaObject: Any + Send + Sync {
    fn core(&self) -> &ObjectCore;

    fn realize_hook(&self) -> Result<()> {
        Ok(())
    }

    fn resume_hook(&self) -> Result<()> {
        Ok(())
    }

    fn destroy_hook(&self) {}
}

/// Generic operations available on every object.
pub trait ObjectOps: MediaObject {
    /// Transition Unrealized -> Realized, running the class realize hook.
    ///
    /// The hook always runs before the call returns; `async_done` only
    /// selects whether the registered callback fires with an async
    /// termination event afterwards.
    fn realize(&self, async_done: bool) -> Result<()> {
        let core = self.core();
        {
            let mut inner = core.inner.lock().unwrap();
            if inner.lifecycle != Lifecycle::Unrealized {
                return Err(ResonaError::PreconditionsViolated);
            }
            inner.lifecycle = Lifecycle::Realizing;
        }
        let result = self.realize_hook();
        let callback = {
            let mut inner = core.inner.lock().unwrap();
            debug_assert_eq!(inner.lifecycle, Lifecycle::Realizing);
            inner.lifecycle = if result.is_ok() {
                Lifecycle::Realized
            } else {
                Lifecycle::Unrealized
            };
            inner.callback.clone()
        };
        if let Err(e) = result {
            log::warn!("{}: realize hook failed: {e}", core.class.name);
        }
        if async_done {
            if let Some(cb) = callback {
                cb(ObjectEvent::AsyncTermination {
                    result,
                    state: self.object_state(),
                });
            }
        }
        result
    }

    /// Transition Suspended -> Realized, running the class resume hook.
    fn resume(&self, async_done: bool) -> Result<()> {
        let core = self.core();
        {
            let mut inner = core.inner.lock().unwrap();
            if inner.lifecycle != Lifecycle::Suspended {
                return Err(ResonaError::PreconditionsViolated);
            }
            inner.lifecycle = Lifecycle::Resuming;
        }
        let result = self.resume_hook();
        let callback = {
            let mut inner = core.inner.lock().unwrap();
            debug_assert_eq!(inner.lifecycle, Lifecycle::Resuming);
            inner.lifecycle = if result.is_ok() {
                Lifecycle::Realized
            } else {
                Lifecycle::Suspended
            };
            inner.callback.clone()
        };
        if async_done {
            if let Some(cb) = callback {
                cb(ObjectEvent::AsyncTermination {
                    result,
                    state: self.object_state(),
                });
            }
        }
        result
    }

    /// The official lifecycle state.
    fn object_state(&self) -> ObjectState {
        self.core().inner.lock().unwrap().lifecycle.public()
    }

    /// Fetch a capability interface without knowing its concrete type.
    fn get_interface_by(&self, capability: Capability) -> Result<Arc<dyn Interface>> {
        let core = self.core();
        let Some(idx) = core.class.entry_index(capability) else {
            return Err(ResonaError::FeatureUnsupported);
        };
        let mut inner = core.inner.lock().unwrap();
        if inner.lifecycle != Lifecycle::Realized {
            return Err(ResonaError::PreconditionsViolated);
        }
        if matches!(core.class.entries[idx].relation, Relation::Unavailable) {
            return Err(ResonaError::FeatureUnsupported);
        }
        match inner.cap_states[idx] {
            CapabilityState::Exposed | CapabilityState::Added => {
                inner.gotten_mask |= 1 << idx;
                inner.interfaces[idx]
                    .clone()
                    .ok_or(ResonaError::InternalError)
            }
            _ => Err(ResonaError::FeatureUnsupported),
        }
    }

    /// Typed capability fetch: `player.get_interface::<PlayInterface>()`.
    fn get_interface<I: InterfaceKind>(&self) -> Result<Arc<I>> {
        let itf = self.get_interface_by(I::CAPABILITY)?;
        let any: Arc<dyn Any + Send + Sync> = itf;
        any.downcast::<I>().map_err(|_| ResonaError::InternalError)
    }

    /// Dynamically expose a capability the class carries as dynamic (or
    /// optional) but that was not requested at creation time.
    ///
    /// With `async_run` the init hook runs on a worker thread and completion
    /// is reported through the object callback.
    fn add_interface(&self, capability: Capability, async_run: bool) -> Result<()> {
        let core = self.core();
        let Some(idx) = core.class.entry_index(capability) else {
            return Err(ResonaError::FeatureUnsupported);
        };
        if matches!(core.class.entries[idx].relation, Relation::Unavailable) {
            return Err(ResonaError::FeatureUnsupported);
        }
        let obj = core.self_object()?;
        let mut inner = core.inner.lock().unwrap();
        match inner.cap_states[idx] {
            CapabilityState::Uninitialized => {}
            // adding an exposed or transitioning capability is a protocol error
            _ => return Err(ResonaError::PreconditionsViolated),
        }
        if async_run {
            inner.cap_states[idx] = CapabilityState::AddPending;
            drop(inner);
            let submitted = core
                .engine()
                .is_some_and(|e| e.submit_task(Box::new(move || handle_add(obj, capability))));
            if !submitted {
                // engine gone or pool rejected; restore the prior state
                let mut inner = core.inner.lock().unwrap();
                if matches!(
                    inner.cap_states[idx],
                    CapabilityState::AddPending | CapabilityState::AddAborted
                ) {
                    inner.cap_states[idx] = CapabilityState::Uninitialized;
                }
                return Err(ResonaError::ResourceError);
            }
            Ok(())
        } else {
            inner.cap_states[idx] = CapabilityState::Adding;
            drop(inner);
            // init hook runs with the lock released
            let result = run_init(&obj, capability);
            let mut inner = core.inner.lock().unwrap();
            debug_assert_eq!(inner.cap_states[idx], CapabilityState::Adding);
            match result {
                Ok(itf) => {
                    inner.interfaces[idx] = Some(itf);
                    inner.cap_states[idx] = CapabilityState::Added;
                    Ok(())
                }
                Err(e) => {
                    inner.cap_states[idx] = CapabilityState::Uninitialized;
                    Err(e)
                }
            }
        }
    }

    /// Remove a dynamically added capability, running its deinit hook.
    fn remove_interface(&self, capability: Capability) -> Result<()> {
        let core = self.core();
        let Some(idx) = core.class.entry_index(capability) else {
            return Err(ResonaError::PreconditionsViolated);
        };
        let mut inner = core.inner.lock().unwrap();
        match inner.cap_states[idx] {
            CapabilityState::Added | CapabilityState::Suspended => {
                inner.cap_states[idx] = CapabilityState::Removing;
                inner.gotten_mask &= !(1 << idx);
                let itf = inner.interfaces[idx].take();
                drop(inner);
                // deinit hook runs with the lock released
                if let (Some(deinit), Some(itf)) = (capability::spec(capability).deinit, itf) {
                    deinit(&itf);
                }
                let mut inner = core.inner.lock().unwrap();
                debug_assert_eq!(inner.cap_states[idx], CapabilityState::Removing);
                inner.cap_states[idx] = CapabilityState::Uninitialized;
                Ok(())
            }
            // not removable: implicit interfaces and anything mid-transition
            _ => Err(ResonaError::PreconditionsViolated),
        }
    }

    /// Resume a suspended capability.
    fn resume_interface(&self, capability: Capability, async_run: bool) -> Result<()> {
        let core = self.core();
        let Some(idx) = core.class.entry_index(capability) else {
            return Err(ResonaError::PreconditionsViolated);
        };
        let obj = core.self_object()?;
        let mut inner = core.inner.lock().unwrap();
        match inner.cap_states[idx] {
            CapabilityState::Suspended => {}
            _ => return Err(ResonaError::PreconditionsViolated),
        }
        if async_run {
            inner.cap_states[idx] = CapabilityState::ResumePending;
            drop(inner);
            let submitted = core
                .engine()
                .is_some_and(|e| e.submit_task(Box::new(move || handle_resume(obj, capability))));
            if !submitted {
                let mut inner = core.inner.lock().unwrap();
                if matches!(
                    inner.cap_states[idx],
                    CapabilityState::ResumePending | CapabilityState::ResumeAborted
                ) {
                    inner.cap_states[idx] = CapabilityState::Suspended;
                }
                return Err(ResonaError::ResourceError);
            }
            Ok(())
        } else {
            inner.cap_states[idx] = CapabilityState::Added;
            Ok(())
        }
    }

    /// Register (or clear) the object callback.
    fn register_callback(&self, callback: Option<ObjectCallback>) {
        self.core().inner.lock().unwrap().callback = callback;
    }

    fn set_priority(&self, priority: i32, preemptable: bool) {
        let mut inner = self.core().inner.lock().unwrap();
        inner.priority = priority;
        inner.preemptable = preemptable;
    }

    fn priority(&self) -> (i32, bool) {
        let inner = self.core().inner.lock().unwrap();
        (inner.priority, inner.preemptable)
    }

    /// Enable or disable the loss-of-control mask for the given capabilities.
    fn set_loss_of_control(&self, capabilities: &[Capability], enabled: bool) {
        let core = self.core();
        let mut bits = 0u32;
        for &cap in capabilities {
            if let Some(idx) = core.class.entry_index(cap) {
                bits |= 1 << idx;
            }
        }
        let mut inner = core.inner.lock().unwrap();
        if enabled {
            inner.loss_of_control_mask |= bits;
        } else {
            inner.loss_of_control_mask &= !bits;
        }
    }

    /// Abort queued asynchronous interface operations. Operations whose hook
    /// is already running are not interrupted.
    fn abort_async(&self) {
        let mut inner = self.core().inner.lock().unwrap();
        for st in inner.cap_states.iter_mut() {
            match *st {
                CapabilityState::AddPending => *st = CapabilityState::AddAborted,
                CapabilityState::ResumePending => *st = CapabilityState::ResumeAborted,
                _ => {}
            }
        }
    }

    /// Tear the object down: abort pending async work, withdraw from the
    /// engine instance table, run the deinit hook of every exposed
    /// capability in descriptor order, then the class destroy hook.
    ///
    /// Never fails and is idempotent; any further operation on the handle
    /// returns `PreconditionsViolated`.
    fn destroy(&self) {
        let core = self.core();
        let work = {
            let mut inner = core.inner.lock().unwrap();
            if inner.lifecycle == Lifecycle::Destroyed {
                return;
            }
            for st in inner.cap_states.iter_mut() {
                match *st {
                    CapabilityState::AddPending => *st = CapabilityState::AddAborted,
                    CapabilityState::ResumePending => *st = CapabilityState::ResumeAborted,
                    CapabilityState::Adding
                    | CapabilityState::Removing
                    | CapabilityState::Resuming => {
                        log::warn!(
                            "{}: destroy while an interface operation is active",
                            core.class.name
                        );
                    }
                    _ => {}
                }
            }
            inner.lifecycle = Lifecycle::Destroyed;
            inner.callback = None;
            let mut work = Vec::new();
            for (idx, entry) in core.class.entries.iter().enumerate() {
                if matches!(
                    inner.cap_states[idx],
                    CapabilityState::Exposed | CapabilityState::Added | CapabilityState::Suspended
                ) {
                    work.push((entry.capability, inner.interfaces[idx].take()));
                    inner.cap_states[idx] = CapabilityState::Uninitialized;
                }
            }
            work
        };
        // withdraw from the sync pass before tearing interfaces down
        if let Some(engine) = core.engine() {
            if let Some(slot) = core.slot() {
                engine.release_instance(slot);
            }
        }
        // hooks run with the lock released, like every other hook
        for (cap, itf) in work {
            if let (Some(deinit), Some(itf)) = (capability::spec(cap).deinit, itf) {
                deinit(&itf);
            }
        }
        self.destroy_hook();
        log::debug!("{} {} destroyed", core.class.name, core.instance_id);
    }

    /// Current state of one capability slot; diagnostic.
    fn capability_state(&self, capability: Capability) -> Option<CapabilityState> {
        let core = self.core();
        let idx = core.class.entry_index(capability)?;
        Some(core.inner.lock().unwrap().cap_states[idx])
    }

    /// Whether callers should expect `ControlLost` results on a capability.
    fn control_lost(&self, capability: Capability) -> bool {
        let core = self.core();
        match core.class.entry_index(capability) {
            Some(idx) => core.inner.lock().unwrap().loss_of_control_mask & (1 << idx) != 0,
            None => false,
        }
    }

    /// Whether a capability has been fetched at least once; diagnostic.
    fn interface_gotten(&self, capability: Capability) -> bool {
        let core = self.core();
        match core.class.entry_index(capability) {
            Some(idx) => core.inner.lock().unwrap().gotten_mask & (1 << idx) != 0,
            None => false,
        }
    }
}

impl<T: MediaObject + ?Sized> ObjectOps for T {}

fn run_init(obj: &Arc<dyn MediaObject>, capability: Capability) -> Result<Arc<dyn Interface>> {
    match capability::spec(capability).init {
        Some(init) => init(obj),
        None => Err(ResonaError::InternalError),
    }
}

/// Worker-thread half of an asynchronous `add_interface`.
pub(crate) fn handle_add(obj: Arc<dyn MediaObject>, capability: Capability) {
    let core = obj.core();
    let Some(idx) = core.class.entry_index(capability) else {
        return;
    };
    let proceed = {
        let mut inner = core.inner.lock().unwrap();
        match inner.cap_states[idx] {
            CapabilityState::AddPending => {
                inner.cap_states[idx] = CapabilityState::Adding;
                true
            }
            CapabilityState::AddAborted => {
                inner.cap_states[idx] = CapabilityState::Uninitialized;
                false
            }
            other => {
                log::warn!("unexpected state {other:?} in queued add of {capability}");
                return;
            }
        }
    };
    let (result, callback) = if proceed {
        // init hook runs with the lock released
        let result = run_init(&obj, capability);
        let mut inner = core.inner.lock().unwrap();
        debug_assert_eq!(inner.cap_states[idx], CapabilityState::Adding);
        let outcome = match result {
            Ok(itf) => {
                inner.interfaces[idx] = Some(itf);
                inner.cap_states[idx] = CapabilityState::Added;
                Ok(())
            }
            Err(e) => {
                inner.cap_states[idx] = CapabilityState::Uninitialized;
                Err(e)
            }
        };
        (outcome, inner.callback.clone())
    } else {
        let inner = core.inner.lock().unwrap();
        (Err(ResonaError::OperationAborted), inner.callback.clone())
    };
    if let Some(cb) = callback {
        cb(ObjectEvent::InterfaceAdded { capability, result });
    }
}

/// Worker-thread half of an asynchronous `resume_interface`.
pub(crate) fn handle_resume(obj: Arc<dyn MediaObject>, capability: Capability) {
    let core = obj.core();
    let Some(idx) = core.class.entry_index(capability) else {
        return;
    };
    let (result, callback) = {
        let mut inner = core.inner.lock().unwrap();
        let outcome = match inner.cap_states[idx] {
            CapabilityState::ResumePending => {
                inner.cap_states[idx] = CapabilityState::Added;
                Ok(())
            }
            CapabilityState::ResumeAborted => {
                inner.cap_states[idx] = CapabilityState::Suspended;
                Err(ResonaError::OperationAborted)
            }
            other => {
                log::warn!("unexpected state {other:?} in queued resume of {capability}");
                return;
            }
        };
        (outcome, inner.callback.clone())
    };
    if let Some(cb) = callback {
        cb(ObjectEvent::InterfaceResumed { capability, result });
    }
}

/// Wire a freshly constructed object into the runtime: record its self
/// reference, run the init hook of every capability exposed at creation
/// time, and publish it in the engine instance table.
pub(crate) fn finish_construct(obj: &Arc<dyn MediaObject>, slot: Option<usize>) -> Result<()> {
    let core = obj.core();
    let _ = core.self_ref.set(Arc::downgrade(obj));
    let exposed: Vec<(usize, Capability)> = {
        let inner = core.inner.lock().unwrap();
        core.class
            .entries
            .iter()
            .enumerate()
            .filter(|(i, _)| inner.cap_states[*i] == CapabilityState::Exposed)
            .map(|(i, e)| (i, e.capability))
            .collect()
    };
    for (idx, cap) in exposed {
        let itf = run_init(obj, cap)?;
        core.inner.lock().unwrap().interfaces[idx] = Some(itf);
    }
    if let Some(slot) = slot {
        core.set_slot(slot);
        if let Some(engine) = core.engine() {
            engine.publish_instance(slot, Arc::downgrade(obj));
        }
    }
    Ok(())
}

/// Test hook: force a capability slot into the suspended state.
#[cfg(test)]
pub(crate) fn suspend_capability_for_test(obj: &dyn MediaObject, capability: Capability) {
    let core = obj.core();
    if let Some(idx) = core.class.entry_index(capability) {
        core.inner.lock().unwrap().cap_states[idx] = CapabilityState::Suspended;
    }
}
