//! The periodic reconcile thread.
//!
//! Runs a few dozen times per second, walking the engine's instance table:
//! swaps out each object's changed-attribute bits, recomputes cached track
//! gains where a gain control changed, and drives the deferred-commit step
//! of every live location interface (unit conversions, queued rotations,
//! waiter wakeups).

use crate::engine::Engine;
use crate::object::{MediaObject, attr};
use crate::player::AudioPlayer;
use crate::spatial::LocationInterface;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub(crate) const SYNC_PERIOD: Duration = Duration::from_millis(50);

pub(crate) fn run(engine: Weak<Engine>, shutdown: Arc<AtomicBool>) {
    log::debug!("sync thread started");
    loop {
        std::thread::sleep(SYNC_PERIOD);
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Some(engine) = engine.upgrade() else {
            break;
        };
        reconcile(&engine);
    }
    log::debug!("sync thread exiting");
}

/// One reconcile pass over every live object.
pub(crate) fn reconcile(engine: &Engine) {
    for obj in engine.live_instances() {
        let changed = obj.core().take_changed();
        if changed & attr::GAIN != 0 {
            let any: Arc<dyn Any + Send + Sync> = obj.clone();
            if let Ok(player) = any.downcast::<AudioPlayer>() {
                player.refresh_gains();
            }
        }
        if let Some(location) = obj.core().interface_of::<LocationInterface>() {
            location.commit();
        }
    }
}
