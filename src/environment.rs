use std::collections::HashMap;
use std::ops::{BitAnd, BitOr};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::math::{normalize_or, EPSILON};
use crate::sensor::OverlapEvent;

/// Bit set of collision categories a query is interested in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryMask(pub u32);

impl CategoryMask {
    pub const NONE: CategoryMask = CategoryMask(0);
    pub const DEFAULT: CategoryMask = CategoryMask(1 << 0);
    pub const GROUND: CategoryMask = CategoryMask(1 << 6);
    pub const ALL: CategoryMask = CategoryMask(u32::MAX);

    pub fn intersects(self, other: CategoryMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for CategoryMask {
    type Output = CategoryMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        CategoryMask(self.0 | rhs.0)
    }
}

impl BitAnd for CategoryMask {
    type Output = CategoryMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        CategoryMask(self.0 & rhs.0)
    }
}

/// Ray query against whatever geometry surrounds the flock.
pub trait Environment {
    /// Nearest point hit along `direction` from `origin` within `max_distance`,
    /// considering only geometry in `mask`.
    fn cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: CategoryMask,
    ) -> Option<Vec3>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    /// Every point `p` with `normal · p == offset`.
    Plane { normal: Vec3, offset: f32 },
    Sphere { center: Vec3, radius: f32 },
    Aabb { min: Vec3, max: Vec3 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Collider {
    pub shape: Shape,
    pub category: CategoryMask,
}

impl Collider {
    pub fn ground(height: f32) -> Self {
        Self {
            shape: Shape::Plane {
                normal: Vec3::Y,
                offset: height,
            },
            category: CategoryMask::GROUND,
        }
    }

    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self {
            shape: Shape::Sphere {
                center,
                radius: radius.max(0.0),
            },
            category: CategoryMask::DEFAULT,
        }
    }

    pub fn aabb(a: Vec3, b: Vec3) -> Self {
        Self {
            shape: Shape::Aabb {
                min: a.min(b),
                max: a.max(b),
            },
            category: CategoryMask::DEFAULT,
        }
    }

    pub fn with_category(mut self, category: CategoryMask) -> Self {
        self.category = category;
        self
    }

    /// Distance along a unit `direction` to the first surface in front of
    /// `origin`. Rays starting inside a solid do not hit it.
    fn ray_distance(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
        match self.shape {
            Shape::Plane { normal, offset } => {
                let denom = normal.dot(direction);
                if denom.abs() <= EPSILON {
                    return None;
                }
                let t = (offset - normal.dot(origin)) / denom;
                (t >= 0.0).then_some(t)
            }
            Shape::Sphere { center, radius } => {
                let to_origin = origin - center;
                let c = to_origin.length_squared() - radius * radius;
                if c < 0.0 {
                    return None;
                }
                let b = to_origin.dot(direction);
                let discriminant = b * b - c;
                if discriminant < 0.0 {
                    return None;
                }
                let t = -b - discriminant.sqrt();
                (t >= 0.0).then_some(t)
            }
            Shape::Aabb { min, max } => {
                let mut t_near = f32::NEG_INFINITY;
                let mut t_far = f32::INFINITY;
                for axis in 0..3 {
                    let o = origin[axis];
                    let d = direction[axis];
                    if d.abs() <= EPSILON {
                        if o < min[axis] || o > max[axis] {
                            return None;
                        }
                        continue;
                    }
                    let t1 = (min[axis] - o) / d;
                    let t2 = (max[axis] - o) / d;
                    t_near = t_near.max(t1.min(t2));
                    t_far = t_far.min(t1.max(t2));
                }
                (t_near <= t_far && t_near >= 0.0).then_some(t_near)
            }
        }
    }

    fn overlaps_sphere(&self, center: Vec3, radius: f32) -> bool {
        match self.shape {
            Shape::Plane { normal, offset } => (normal.dot(center) - offset).abs() <= radius,
            Shape::Sphere {
                center: other,
                radius: other_radius,
            } => center.distance(other) <= radius + other_radius,
            Shape::Aabb { min, max } => center.clamp(min, max).distance(center) <= radius,
        }
    }
}

/// A fixed set of colliders, enough to give a flock something to avoid.
#[derive(Clone, Debug, Default)]
pub struct StaticWorld {
    colliders: Vec<Collider>,
}

impl StaticWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collider(mut self, collider: Collider) -> Self {
        self.add(collider);
        self
    }

    pub fn add(&mut self, mut collider: Collider) {
        if let Shape::Plane { normal, offset } = collider.shape {
            collider.shape = Shape::Plane {
                normal: normalize_or(normal, Vec3::Y),
                offset,
            };
        }
        self.colliders.push(collider);
    }

    pub fn clear(&mut self) {
        self.colliders.clear();
    }

    pub fn colliders(&self) -> &[Collider] {
        &self.colliders
    }

    /// Whether a probe sphere touches any collider in `mask`.
    pub fn overlaps(&self, center: Vec3, radius: f32, mask: CategoryMask) -> bool {
        self.colliders
            .iter()
            .filter(|collider| collider.category.intersects(mask))
            .any(|collider| collider.overlaps_sphere(center, radius))
    }
}

impl Environment for StaticWorld {
    fn cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: CategoryMask,
    ) -> Option<Vec3> {
        let direction = normalize_or(direction, Vec3::ZERO);
        if direction == Vec3::ZERO || max_distance <= 0.0 {
            return None;
        }

        self.colliders
            .iter()
            .filter(|collider| collider.category.intersects(mask))
            .filter_map(|collider| collider.ray_distance(origin, direction))
            .filter(|t| *t <= max_distance)
            .min_by(|a, b| a.total_cmp(b))
            .map(|t| origin + direction * t)
    }
}

/// Turns per-tick "is this probe volume touching anything" answers into the
/// enter/stay/exit stream a sensor consumes. A volume that starts touching
/// reports `Enter` followed by `Stay` in the same tick.
#[derive(Clone, Debug, Default)]
pub struct OverlapMonitor {
    overlapping: HashMap<AgentId, bool>,
}

impl OverlapMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, id: AgentId, now_overlapping: bool) -> &'static [OverlapEvent] {
        let was_overlapping = self.overlapping.insert(id, now_overlapping).unwrap_or(false);
        match (was_overlapping, now_overlapping) {
            (false, true) => &[OverlapEvent::Enter, OverlapEvent::Stay],
            (true, true) => &[OverlapEvent::Stay],
            (true, false) => &[OverlapEvent::Exit],
            (false, false) => &[],
        }
    }

    pub fn forget(&mut self, id: AgentId) {
        self.overlapping.remove(&id);
    }

    pub fn is_overlapping(&self, id: AgentId) -> bool {
        self.overlapping.get(&id).copied().unwrap_or(false)
    }

    /// Number of agents being tracked, overlapping or not.
    pub fn len(&self) -> usize {
        self.overlapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlapping.is_empty()
    }
}
