use glam::Vec3;

/// Shared point a flock is constrained towards, typically following some
/// externally moved entity. Agents only ever read it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlockAnchor {
    position: Vec3,
}

impl FlockAnchor {
    pub fn new(position: Vec3) -> Self {
        Self { position }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn follow(&mut self, position: Vec3) {
        self.position = position;
    }
}
