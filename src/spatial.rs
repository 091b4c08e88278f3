//! Spatial location interface and the listener object.
//!
//! Position is kept in whichever unit the caller last supplied (Cartesian or
//! spherical); the other unit stays unknown until requested. A request marks
//! the unit and blocks on the interface condition variable; the periodic
//! commit step performs the conversion off the hot path and wakes every
//! waiter. Orientation works the same way with angles versus vectors, and
//! rotations are coalesced through a single pending slot.

use crate::capability::Capability;
use crate::class::LISTENER_CLASS;
use crate::engine::Engine;
use crate::error::{ResonaError, Result};
use crate::object::{
    Interface, InterfaceKind, MediaObject, ObjectCore, finish_construct,
};
use glam::EulerRot;
pub use glam::{Quat, Vec3};
use std::any::Any;
use std::sync::{Arc, Condvar, Mutex};

/// Spherical position: azimuth and elevation in radians, distance in meters.
/// Azimuth 0 faces -Z and grows toward +X; elevation grows upward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spherical {
    pub azimuth: f32,
    pub elevation: f32,
    pub distance: f32,
}

/// Orientation as a front vector and an approximate up ("above") vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub front: Vec3,
    pub above: Vec3,
}

impl Orientation {
    pub const DEFAULT: Orientation = Orientation {
        front: Vec3::NEG_Z,
        above: Vec3::Y,
    };
}

/// Orientation as heading/pitch/roll, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angles {
    pub heading: f32,
    pub pitch: f32,
    pub roll: f32,
}

pub fn spherical_to_cartesian(s: Spherical) -> Vec3 {
    let (sin_az, cos_az) = s.azimuth.sin_cos();
    let (sin_el, cos_el) = s.elevation.sin_cos();
    Vec3::new(
        s.distance * cos_el * sin_az,
        s.distance * sin_el,
        -s.distance * cos_el * cos_az,
    )
}

pub fn cartesian_to_spherical(v: Vec3) -> Spherical {
    let distance = v.length();
    if distance <= f32::EPSILON {
        return Spherical {
            azimuth: 0.0,
            elevation: 0.0,
            distance: 0.0,
        };
    }
    Spherical {
        azimuth: v.x.atan2(-v.z),
        elevation: (v.y / distance).clamp(-1.0, 1.0).asin(),
        distance,
    }
}

fn angles_to_vectors(a: Angles) -> Orientation {
    let q = Quat::from_euler(EulerRot::YXZ, a.heading, a.pitch, a.roll);
    Orientation {
        front: q * Vec3::NEG_Z,
        above: q * Vec3::Y,
    }
}

fn vectors_to_angles(o: Orientation) -> Angles {
    let front = o.front.normalize_or_zero();
    if front == Vec3::ZERO {
        return Angles {
            heading: 0.0,
            pitch: 0.0,
            roll: 0.0,
        };
    }
    let pitch = front.y.clamp(-1.0, 1.0).asin();
    let heading = (-front.x).atan2(-front.z);
    let zero_roll_above = angles_to_vectors(Angles {
        heading,
        pitch,
        roll: 0.0,
    })
    .above;
    let above = o.above.normalize_or_zero();
    let roll = if above == Vec3::ZERO {
        0.0
    } else {
        let sin = zero_roll_above.cross(above).dot(-front);
        let cos = zero_roll_above.dot(above);
        sin.atan2(cos)
    };
    Angles {
        heading,
        pitch,
        roll,
    }
}

struct LocationState {
    cartesian: Option<Vec3>,
    spherical: Option<Spherical>,
    cartesian_requested: bool,
    spherical_requested: bool,
    angles: Option<Angles>,
    vectors: Option<Orientation>,
    angles_requested: bool,
    vectors_requested: bool,
    pending_rotation: Option<(f32, Vec3)>,
    detached: bool,
}

/// Spatial position and orientation of an object.
pub struct LocationInterface {
    inner: Mutex<LocationState>,
    cond: Condvar,
}

impl Interface for LocationInterface {
    fn capability(&self) -> Capability {
        Capability::Location
    }
}

impl InterfaceKind for LocationInterface {
    const CAPABILITY: Capability = Capability::Location;
}

impl LocationInterface {
    fn new() -> Self {
        Self {
            inner: Mutex::new(LocationState {
                cartesian: Some(Vec3::ZERO),
                spherical: None,
                cartesian_requested: false,
                spherical_requested: false,
                angles: Some(Angles {
                    heading: 0.0,
                    pitch: 0.0,
                    roll: 0.0,
                }),
                vectors: None,
                angles_requested: false,
                vectors_requested: false,
                pending_rotation: None,
                detached: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn set_cartesian(&self, position: Vec3) -> Result<()> {
        if !position.is_finite() {
            return Err(ResonaError::ParameterInvalid);
        }
        let mut st = self.inner.lock().unwrap();
        st.cartesian = Some(position);
        st.spherical = None;
        Ok(())
    }

    pub fn set_spherical(&self, position: Spherical) -> Result<()> {
        if !position.azimuth.is_finite()
            || !position.elevation.is_finite()
            || !position.distance.is_finite()
            || position.distance < 0.0
        {
            return Err(ResonaError::ParameterInvalid);
        }
        let mut st = self.inner.lock().unwrap();
        st.spherical = Some(position);
        st.cartesian = None;
        Ok(())
    }

    /// Cartesian position; blocks until the commit step derives it when the
    /// caller last supplied spherical coordinates.
    pub fn cartesian(&self) -> Result<Vec3> {
        let mut st = self.inner.lock().unwrap();
        loop {
            if st.detached {
                return Err(ResonaError::OperationAborted);
            }
            if let Some(v) = st.cartesian {
                return Ok(v);
            }
            st.cartesian_requested = true;
            st = self.cond.wait(st).unwrap();
        }
    }

    /// Spherical position; blocks until derived when unknown.
    pub fn spherical(&self) -> Result<Spherical> {
        let mut st = self.inner.lock().unwrap();
        loop {
            if st.detached {
                return Err(ResonaError::OperationAborted);
            }
            if let Some(s) = st.spherical {
                return Ok(s);
            }
            st.spherical_requested = true;
            st = self.cond.wait(st).unwrap();
        }
    }

    /// Displace the Cartesian position, deriving it first if necessary.
    pub fn move_by(&self, delta: Vec3) -> Result<()> {
        if !delta.is_finite() {
            return Err(ResonaError::ParameterInvalid);
        }
        let mut st = self.inner.lock().unwrap();
        loop {
            if st.detached {
                return Err(ResonaError::OperationAborted);
            }
            if let Some(v) = st.cartesian {
                st.cartesian = Some(v + delta);
                st.spherical = None;
                return Ok(());
            }
            st.cartesian_requested = true;
            st = self.cond.wait(st).unwrap();
        }
    }

    pub fn set_orientation_angles(&self, angles: Angles) -> Result<()> {
        if !angles.heading.is_finite() || !angles.pitch.is_finite() || !angles.roll.is_finite() {
            return Err(ResonaError::ParameterInvalid);
        }
        let mut st = self.inner.lock().unwrap();
        st.angles = Some(angles);
        st.vectors = None;
        // an explicit orientation supersedes any queued rotation
        st.pending_rotation = None;
        self.cond.notify_all();
        Ok(())
    }

    pub fn set_orientation_vectors(&self, orientation: Orientation) -> Result<()> {
        if !orientation.front.is_finite() || !orientation.above.is_finite() {
            return Err(ResonaError::ParameterInvalid);
        }
        let mut st = self.inner.lock().unwrap();
        st.vectors = Some(orientation);
        st.angles = None;
        st.pending_rotation = None;
        self.cond.notify_all();
        Ok(())
    }

    /// Orientation vectors; blocks until derived when unknown.
    pub fn orientation_vectors(&self) -> Result<Orientation> {
        let mut st = self.inner.lock().unwrap();
        loop {
            if st.detached {
                return Err(ResonaError::OperationAborted);
            }
            if let Some(o) = st.vectors {
                return Ok(o);
            }
            st.vectors_requested = true;
            st = self.cond.wait(st).unwrap();
        }
    }

    /// Orientation angles; blocks until derived when unknown.
    pub fn orientation_angles(&self) -> Result<Angles> {
        let mut st = self.inner.lock().unwrap();
        loop {
            if st.detached {
                return Err(ResonaError::OperationAborted);
            }
            if let Some(a) = st.angles {
                return Ok(a);
            }
            st.angles_requested = true;
            st = self.cond.wait(st).unwrap();
        }
    }

    /// Queue a rotation of `theta` radians about `axis`, applied by the next
    /// commit step. A second rotation blocks until the first is consumed.
    pub fn rotate(&self, theta: f32, axis: Vec3) -> Result<()> {
        if !theta.is_finite() || !axis.is_finite() || axis == Vec3::ZERO {
            return Err(ResonaError::ParameterInvalid);
        }
        let mut st = self.inner.lock().unwrap();
        while st.pending_rotation.is_some() {
            if st.detached {
                return Err(ResonaError::OperationAborted);
            }
            st = self.cond.wait(st).unwrap();
        }
        if st.detached {
            return Err(ResonaError::OperationAborted);
        }
        st.pending_rotation = Some((theta, axis));
        Ok(())
    }

    /// The deferred commit step: consume the pending rotation, perform
    /// requested unit conversions, and wake all waiters. Driven by the
    /// engine's sync pass.
    pub(crate) fn commit(&self) {
        let mut st = self.inner.lock().unwrap();
        let mut changed = false;
        if let Some((theta, axis)) = st.pending_rotation.take() {
            let axis = axis.normalize_or_zero();
            if axis != Vec3::ZERO {
                let base = st
                    .vectors
                    .or_else(|| st.angles.map(angles_to_vectors))
                    .unwrap_or(Orientation::DEFAULT);
                let q = Quat::from_axis_angle(axis, theta);
                st.vectors = Some(Orientation {
                    front: q * base.front,
                    above: q * base.above,
                });
                st.angles = None;
            }
            changed = true;
        }
        if st.spherical_requested {
            if let Some(v) = st.cartesian {
                st.spherical = Some(cartesian_to_spherical(v));
                st.spherical_requested = false;
                changed = true;
            }
        }
        if st.cartesian_requested {
            if let Some(s) = st.spherical {
                st.cartesian = Some(spherical_to_cartesian(s));
                st.cartesian_requested = false;
                changed = true;
            }
        }
        if st.vectors_requested {
            if let Some(a) = st.angles {
                st.vectors = Some(angles_to_vectors(a));
                st.vectors_requested = false;
                changed = true;
            }
        }
        if st.angles_requested {
            if let Some(o) = st.vectors {
                st.angles = Some(vectors_to_angles(o));
                st.angles_requested = false;
                changed = true;
            }
        }
        if changed {
            self.cond.notify_all();
        }
    }

    /// Mark the interface removed; pending and future waits fail with
    /// `OperationAborted`.
    pub(crate) fn detach(&self) {
        let mut st = self.inner.lock().unwrap();
        st.detached = true;
        self.cond.notify_all();
    }
}

/// The listener object: the reference frame spatial sources are heard from.
pub struct Listener {
    core: ObjectCore,
}

impl Listener {
    pub(crate) fn create(
        engine: &Arc<Engine>,
        requested: &[Capability],
    ) -> Result<Arc<Listener>> {
        let class = &LISTENER_CLASS;
        let exposed = class.exposed_mask(requested)?;
        let slot = engine.reserve_instance()?;
        let listener = Arc::new(Listener {
            core: ObjectCore::new(
                class,
                Arc::downgrade(engine),
                exposed,
                engine.loss_of_control(),
            ),
        });
        let obj: Arc<dyn MediaObject> = listener.clone();
        if let Err(e) = finish_construct(&obj, Some(slot)) {
            engine.abandon_instance(slot);
            return Err(e);
        }
        Ok(listener)
    }
}

impl MediaObject for Listener {
    fn core(&self) -> &ObjectCore {
        &self.core
    }
}

pub(crate) fn init_location(_obj: &Arc<dyn MediaObject>) -> Result<Arc<dyn Interface>> {
    Ok(Arc::new(LocationInterface::new()))
}

pub(crate) fn deinit_location(itf: &Arc<dyn Interface>) {
    let any: Arc<dyn Any + Send + Sync> = itf.clone();
    if let Ok(location) = any.downcast::<LocationInterface>() {
        location.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn assert_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-4, "{a:?} != {b:?}");
    }

    #[test]
    fn test_spherical_cartesian_round_trip() {
        let s = Spherical {
            azimuth: 0.7,
            elevation: -0.3,
            distance: 4.5,
        };
        let back = cartesian_to_spherical(spherical_to_cartesian(s));
        assert!((back.azimuth - s.azimuth).abs() < 1e-4);
        assert!((back.elevation - s.elevation).abs() < 1e-4);
        assert!((back.distance - s.distance).abs() < 1e-4);

        // azimuth zero faces -Z
        assert_close(
            spherical_to_cartesian(Spherical {
                azimuth: 0.0,
                elevation: 0.0,
                distance: 2.0,
            }),
            Vec3::new(0.0, 0.0, -2.0),
        );
    }

    #[test]
    fn test_angles_vectors_round_trip() {
        let a = Angles {
            heading: 0.4,
            pitch: -0.2,
            roll: 0.9,
        };
        let back = vectors_to_angles(angles_to_vectors(a));
        assert!((back.heading - a.heading).abs() < 1e-4);
        assert!((back.pitch - a.pitch).abs() < 1e-4);
        assert!((back.roll - a.roll).abs() < 1e-4);
    }

    #[test]
    fn test_conversion_computed_by_commit() {
        let loc = LocationInterface::new();
        loc.set_spherical(Spherical {
            azimuth: 0.0,
            elevation: 0.0,
            distance: 3.0,
        })
        .unwrap();

        let loc = Arc::new(loc);
        let waiter = {
            let loc = loc.clone();
            std::thread::spawn(move || loc.cartesian())
        };
        // give the getter time to block on the unknown unit
        std::thread::sleep(Duration::from_millis(20));
        loc.commit();
        let v = waiter.join().unwrap().unwrap();
        assert_close(v, Vec3::new(0.0, 0.0, -3.0));
    }

    #[test]
    fn test_rotation_coalescing() {
        let loc = Arc::new(LocationInterface::new());
        loc.rotate(0.5, Vec3::Y).unwrap();

        // a second rotation must wait for the commit step to consume the first
        let second = {
            let loc = loc.clone();
            std::thread::spawn(move || loc.rotate(0.25, Vec3::Y))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!second.is_finished());
        loc.commit();
        second.join().unwrap().unwrap();

        // the second rotation is consumed by the next commit; both are
        // visible in the orientation vectors afterwards
        loc.commit();
        let o = loc.orientation_vectors().unwrap();
        assert_close(
            o.front,
            Vec3::new(-(0.75f32.sin()), 0.0, -(0.75f32.cos())),
        );
    }

    #[test]
    fn test_detach_aborts_waiters() {
        let loc = Arc::new(LocationInterface::new());
        loc.set_cartesian(Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let waiter = {
            let loc = loc.clone();
            std::thread::spawn(move || loc.spherical())
        };
        std::thread::sleep(Duration::from_millis(20));
        loc.detach();
        assert_eq!(
            waiter.join().unwrap(),
            Err(ResonaError::OperationAborted)
        );
    }
}
