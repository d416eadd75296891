use crate::backend::{AudioBackend, ListenerParams};
use crate::math::{Pose, Quat, TransformSource, Vec3, quat_changed, vec_changed};
use std::sync::Arc;

/// The single point of view all sounds are heard from.
///
/// Manual setters push to the backend immediately. With a transform source
/// attached, [`update`](Self::update) follows it and only pushes on change.
pub(crate) struct Listener {
    pose: Pose,
    velocity: Vec3,
    master_gain: f32,
    transform: Option<Arc<dyn TransformSource>>,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            pose: Pose::identity(),
            velocity: Vec3::ZERO,
            master_gain: 1.0,
            transform: None,
        }
    }
}

impl Listener {
    pub fn position(&self) -> Vec3 {
        self.pose.position
    }

    pub fn orientation(&self) -> Quat {
        self.pose.rotation
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn params(&self) -> ListenerParams {
        ListenerParams {
            position: self.pose.position,
            velocity: self.velocity,
            forward: self.pose.forward(),
            up: self.pose.up(),
        }
    }

    pub fn set_position(&mut self, position: Vec3, backend: &mut dyn AudioBackend) {
        self.pose.position = position;
        backend.set_listener(&self.params());
    }

    pub fn set_orientation(&mut self, orientation: Quat, backend: &mut dyn AudioBackend) {
        self.pose.rotation = orientation.normalize();
        backend.set_listener(&self.params());
    }

    pub fn set_velocity(&mut self, velocity: Vec3, backend: &mut dyn AudioBackend) {
        self.velocity = velocity;
        backend.set_listener(&self.params());
    }

    pub fn look_at(&mut self, target: Vec3, backend: &mut dyn AudioBackend) {
        self.pose.look_at(target);
        backend.set_listener(&self.params());
    }

    pub fn set_master_gain(&mut self, gain: f32, backend: &mut dyn AudioBackend) {
        self.master_gain = gain.max(0.0);
        backend.set_master_gain(self.master_gain);
    }

    pub fn attach_transform(&mut self, source: Option<Arc<dyn TransformSource>>) {
        self.transform = source;
    }

    /// Follow the attached transform. Returns true if the backend was updated.
    pub fn update(&mut self, backend: &mut dyn AudioBackend) -> bool {
        let Some(source) = &self.transform else {
            return false;
        };
        let position = source.derived_position();
        let orientation = source.derived_orientation();
        if !vec_changed(position, self.pose.position)
            && !quat_changed(orientation, self.pose.rotation)
        {
            return false;
        }
        self.pose = Pose::new(position, orientation);
        backend.set_listener(&self.params());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareMixer;
    use parking_lot::RwLock;

    #[test]
    fn manual_setters_push_immediately() {
        let mut mixer = SoftwareMixer::new(48000, 2);
        let mut listener = Listener::default();
        listener.set_position(Vec3::new(1.0, 2.0, 3.0), &mut mixer);
        assert_eq!(mixer.listener().position, Vec3::new(1.0, 2.0, 3.0));

        listener.set_master_gain(0.5, &mut mixer);
        assert_eq!(mixer.master_gain(), 0.5);
    }

    #[test]
    fn transform_updates_are_change_gated() {
        let mut mixer = SoftwareMixer::new(48000, 2);
        let mut listener = Listener::default();
        let pose = Arc::new(RwLock::new(Pose::from_position(Vec3::new(0.0, 0.0, 5.0))));
        listener.attach_transform(Some(pose.clone()));

        assert!(listener.update(&mut mixer));
        assert!(!listener.update(&mut mixer));

        pose.write().look_at(Vec3::new(10.0, 0.0, 5.0));
        assert!(listener.update(&mut mixer));
        assert!(mixer.listener().forward.abs_diff_eq(Vec3::X, 1e-5));
    }

    #[test]
    fn no_transform_means_no_update() {
        let mut mixer = SoftwareMixer::new(48000, 2);
        let mut listener = Listener::default();
        assert!(!listener.update(&mut mixer));
    }
}
