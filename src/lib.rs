//! Flock steering: agents blend cohesion, separation, alignment, an anchor
//! constraint and probe-based obstacle avoidance into a heading every tick,
//! and can break off to seek a target before rejoining the flock.
//!
//! [`Flock`] is the native entry point; [`Sim`] wraps one flock and a
//! [`StaticWorld`] for JS callers.

use glam::Vec3;
use wasm_bindgen::prelude::*;

pub mod agent;
pub mod anchor;
pub mod config;
pub mod environment;
pub mod error;
pub mod flock;
pub mod math;
pub mod sensor;

pub use agent::{
    Agent, AgentId, AvoidanceAccumulator, Mode, SiblingState, SteeringTerms, TickContext,
    TickOutcome,
};
pub use anchor::FlockAnchor;
pub use config::{FlockConfig, SensorConfig, SpawnConfig, SteeringConfig, UpdateOrder};
pub use environment::{CategoryMask, Collider, Environment, OverlapMonitor, Shape, StaticWorld};
pub use error::{FlockError, FlockResult};
pub use flock::{Flock, PoiId};
pub use sensor::{ObstacleSensor, OverlapEvent, Probe};

const CRUISE_HEIGHT: f32 = 12.0;
const SPAWN_ALTITUDE: (f32, f32) = (-8.0, 8.0);

#[wasm_bindgen]
pub struct Sim {
    flock: Flock,
    world: StaticWorld,
    width: f32,
    height: f32,
    seek_points: Vec<(AgentId, PoiId)>,
    positions: Vec<f32>,
    headings: Vec<f32>,
}

#[wasm_bindgen]
impl Sim {
    #[wasm_bindgen(constructor)]
    pub fn new(count: usize, seed: u32, width: f32, height: f32) -> Sim {
        let width = math::clamp_finite(width, 1.0, 1.0e5, 100.0);
        let height = math::clamp_finite(height, 1.0, 1.0e5, 100.0);
        let mut flock = Flock::new("sim", SteeringConfig::default(), u64::from(seed))
            .with_anchor(area_centre(width, height))
            .with_spawn_config(spawn_volume(width, height));
        flock.spawn(count);

        let mut sim = Sim {
            flock,
            world: StaticWorld::new().with_collider(Collider::ground(0.0)),
            width,
            height,
            seek_points: Vec::new(),
            positions: Vec::new(),
            headings: Vec::new(),
        };
        sim.sync_render_buffers();
        sim
    }

    /// Senses obstacles, then advances the flock by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        self.flock.sense(&self.world);
        for arrived in self.flock.tick(dt) {
            self.release_seek_point(arrived);
        }
        self.sync_render_buffers();
    }

    pub fn set_bounds(&mut self, width: f32, height: f32) {
        self.width = math::clamp_finite(width, 1.0, 1.0e5, self.width);
        self.height = math::clamp_finite(height, 1.0, 1.0e5, self.height);
        self.flock.set_anchor(area_centre(self.width, self.height));
    }

    pub fn count(&self) -> usize {
        self.flock.len()
    }

    pub fn set_anchor(&mut self, x: f32, y: f32, z: f32) {
        self.flock.set_anchor(Vec3::new(x, y, z));
    }

    /// Sends the `index`-th agent after a point. Returns false when there is
    /// no such agent.
    pub fn seek(&mut self, index: usize, x: f32, y: f32, z: f32) -> bool {
        let Some(id) = self.flock.agents().nth(index).map(Agent::id) else {
            return false;
        };
        let position = Vec3::new(x, y, z);
        let existing = self
            .seek_points
            .iter()
            .find(|(agent, _)| *agent == id)
            .map(|(_, point)| *point);
        let point = match existing {
            Some(point) => point,
            None => {
                let point = self.flock.add_point_of_interest(position);
                self.seek_points.push((id, point));
                point
            }
        };

        let assigned = self
            .flock
            .move_point_of_interest(point, position)
            .and_then(|()| self.flock.assign_target(id, point));
        if let Err(err) = assigned {
            log::warn!("could not send {} to seek: {}", id, err);
            return false;
        }
        true
    }

    pub fn seeking_count(&self) -> usize {
        self.flock
            .agents()
            .filter(|agent| agent.mode() == Mode::Seeking)
            .count()
    }

    pub fn add_obstacle(&mut self, x: f32, y: f32, z: f32, radius: f32) {
        self.world
            .add(Collider::sphere(Vec3::new(x, y, z), radius));
    }

    pub fn clear_obstacles(&mut self) {
        self.world.clear();
        self.world.add(Collider::ground(0.0));
    }

    pub fn set_weights(
        &mut self,
        cohesion: f32,
        separation: f32,
        alignment: f32,
        constrain: f32,
        avoidance: f32,
    ) {
        self.flock.set_config(SteeringConfig {
            cohesion_weight: cohesion,
            separation_weight: separation,
            alignment_weight: alignment,
            constrain_weight: constrain,
            avoidance_weight: avoidance,
            ..*self.flock.config()
        });
    }

    pub fn set_tuning(
        &mut self,
        separation_radius: f32,
        integration_rate: f32,
        arrival_threshold: f32,
        speed: f32,
    ) {
        self.flock.set_config(SteeringConfig {
            separation_radius,
            integration_rate,
            arrival_threshold,
            speed,
            ..*self.flock.config()
        });
    }

    /// Flat `[x, y, z, x, y, z, ...]` agent positions in arena order.
    pub fn positions(&self) -> Vec<f32> {
        self.positions.clone()
    }

    /// Flat unit headings, laid out like [`Sim::positions`].
    pub fn headings(&self) -> Vec<f32> {
        self.headings.clone()
    }
}

impl Sim {
    pub fn flock(&self) -> &Flock {
        &self.flock
    }

    pub fn world(&self) -> &StaticWorld {
        &self.world
    }

    fn release_seek_point(&mut self, id: AgentId) {
        if let Some(index) = self.seek_points.iter().position(|(agent, _)| *agent == id) {
            let (_, point) = self.seek_points.swap_remove(index);
            if let Err(err) = self.flock.remove_point_of_interest(point) {
                log::warn!("seek point for {} already gone: {}", id, err);
            }
        }
    }

    fn sync_render_buffers(&mut self) {
        self.positions.clear();
        self.headings.clear();
        for agent in self.flock.agents() {
            self.positions.extend_from_slice(&agent.position().to_array());
            self.headings.extend_from_slice(&agent.heading().to_array());
        }
    }
}

fn area_centre(width: f32, height: f32) -> Vec3 {
    Vec3::new(width * 0.5, CRUISE_HEIGHT, height * 0.5)
}

fn spawn_volume(width: f32, height: f32) -> SpawnConfig {
    SpawnConfig {
        volume_min: Vec3::new(-width * 0.5, SPAWN_ALTITUDE.0, -height * 0.5),
        volume_max: Vec3::new(width * 0.5, SPAWN_ALTITUDE.1, height * 0.5),
        ..SpawnConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_track_agents() {
        let mut sim = Sim::new(12, 3, 60.0, 40.0);
        assert_eq!(sim.count(), 12);
        assert_eq!(sim.positions().len(), 36);

        for _ in 0..30 {
            sim.step(1.0 / 60.0);
        }
        assert_eq!(sim.headings().len(), 36);
        assert!(sim.positions().iter().all(|v| v.is_finite()));
        for heading in sim.headings().chunks(3) {
            let len = Vec3::from_slice(heading).length();
            assert!((len - 1.0).abs() < 1.0e-4);
        }
    }

    #[test]
    fn seek_reuses_one_point_per_agent() {
        let mut sim = Sim::new(4, 9, 50.0, 50.0);
        assert!(sim.seek(1, 10.0, 5.0, 10.0));
        assert!(sim.seek(1, 20.0, 5.0, 10.0));
        assert!(!sim.seek(10, 0.0, 0.0, 0.0));
        assert_eq!(sim.seek_points.len(), 1);
        assert_eq!(sim.seeking_count(), 1);
    }

    #[test]
    fn seeking_agent_rejoins_flock() {
        let mut sim = Sim::new(1, 5, 50.0, 50.0);
        sim.set_anchor(0.0, 12.0, 0.0);
        let start = Vec3::from_slice(&sim.positions());
        assert!(sim.seek(0, start.x + 2.0, start.y, start.z));

        for _ in 0..600 {
            sim.step(1.0 / 60.0);
            if sim.seeking_count() == 0 {
                break;
            }
        }
        assert_eq!(sim.seeking_count(), 0);
        assert!(sim.seek_points.is_empty());
    }

    #[test]
    fn tuned_speed_applies_to_every_agent() {
        let mut sim = Sim::new(3, 2, 40.0, 40.0);
        sim.set_tuning(6.0, 3.0, 0.3, 0.0);
        let before = sim.positions();
        sim.step(1.0 / 60.0);
        assert_eq!(sim.positions(), before);

        sim.set_tuning(6.0, 3.0, 0.3, 12.0);
        assert_eq!(sim.flock().config().speed, 12.0);
        sim.step(1.0 / 60.0);
        for (a, b) in before.chunks(3).zip(sim.positions().chunks(3)) {
            let moved = Vec3::from_slice(a).distance(Vec3::from_slice(b));
            assert!((moved - 0.2).abs() < 1.0e-3);
        }
    }
}
