//! Math types for PetalSound

pub use glam::{Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * (-Vec3::Z)
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn distance(&self, other: &Self) -> f32 {
        self.position.distance(other.position)
    }

    /// Rotate so that `forward()` points at `target`. A target on top of the
    /// pose leaves the rotation unchanged.
    pub fn look_at(&mut self, target: Vec3) {
        let to_target = target - self.position;
        if to_target.length_squared() <= f32::EPSILON {
            return;
        }
        self.rotation = Quat::from_rotation_arc(-Vec3::Z, to_target.normalize());
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Something in the host scene a sound or the listener can follow.
///
/// Queried once per update; only changes are pushed to the backend.
pub trait TransformSource: Send + Sync {
    fn derived_position(&self) -> Vec3;
    fn derived_orientation(&self) -> Quat;
}

/// A pose the host updates in place.
impl TransformSource for parking_lot::RwLock<Pose> {
    fn derived_position(&self) -> Vec3 {
        self.read().position
    }

    fn derived_orientation(&self) -> Quat {
        self.read().rotation
    }
}

/// Transform changes smaller than this are not pushed to the backend.
pub(crate) const TRANSFORM_EPSILON: f32 = 1.0e-5;

pub(crate) fn vec_changed(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() > TRANSFORM_EPSILON
}

pub(crate) fn quat_changed(a: Quat, b: Quat) -> bool {
    !a.abs_diff_eq(b, TRANSFORM_EPSILON)
}
