use std::fmt;

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::agent::{Agent, AgentId, SiblingState, TickContext, TickOutcome};
use crate::anchor::FlockAnchor;
use crate::config::{FlockConfig, SensorConfig, SpawnConfig, SteeringConfig, UpdateOrder};
use crate::environment::{Environment, OverlapMonitor, StaticWorld};
use crate::error::{FlockError, FlockResult};
use crate::math::{is_finite_vec, normalize_or};
use crate::sensor::{ObstacleSensor, OverlapEvent};

/// Handle to a point an agent can be sent to seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoiId(pub(crate) u32);

impl fmt::Display for PoiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "poi#{}", self.0)
    }
}

#[derive(Clone, Debug)]
struct Member {
    agent: Agent,
    sensor: ObstacleSensor,
}

/// Owns a group of sibling agents, their sensors, the shared anchor and the
/// points agents may seek. Arena order is the per-tick update order.
#[derive(Clone, Debug)]
pub struct Flock {
    name: String,
    config: SteeringConfig,
    sensor_config: SensorConfig,
    spawn_config: SpawnConfig,
    anchor: Option<FlockAnchor>,
    members: Vec<Member>,
    overlaps: OverlapMonitor,
    points: Vec<(PoiId, Vec3)>,
    next_agent: u32,
    next_point: u32,
    rng: ChaCha8Rng,
    tick_index: u64,
}

impl Flock {
    pub fn new(name: impl Into<String>, mut config: SteeringConfig, seed: u64) -> Self {
        config.sanitize();
        Self {
            name: name.into(),
            config,
            sensor_config: SensorConfig::default(),
            spawn_config: SpawnConfig::default(),
            anchor: None,
            members: Vec::new(),
            overlaps: OverlapMonitor::new(),
            points: Vec::new(),
            next_agent: 0,
            next_point: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick_index: 0,
        }
    }

    /// Like [`Flock::new`] with a seed drawn from the platform's entropy source.
    pub fn from_entropy(name: impl Into<String>, config: SteeringConfig) -> FlockResult<Self> {
        Ok(Self::new(name, config, entropy_seed()?))
    }

    pub fn from_config(config: &FlockConfig) -> FlockResult<Self> {
        let seed = match config.seed {
            Some(seed) => seed,
            None => entropy_seed()?,
        };
        Ok(Self::new(config.name.clone(), config.steering, seed)
            .with_sensor_config(config.sensor)
            .with_spawn_config(config.spawn))
    }

    pub fn with_anchor(mut self, position: Vec3) -> Self {
        self.anchor = Some(FlockAnchor::new(position));
        self
    }

    pub fn with_sensor_config(mut self, config: SensorConfig) -> Self {
        self.set_sensor_config(config);
        self
    }

    pub fn with_spawn_config(mut self, mut config: SpawnConfig) -> Self {
        config.sanitize();
        self.spawn_config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SteeringConfig {
        &self.config
    }

    pub fn set_config(&mut self, mut config: SteeringConfig) {
        config.sanitize();
        self.config = config;
    }

    pub fn sensor_config(&self) -> &SensorConfig {
        &self.sensor_config
    }

    pub fn set_sensor_config(&mut self, mut config: SensorConfig) {
        config.sanitize();
        self.sensor_config = config;
        for member in &mut self.members {
            member.sensor.set_config(config);
        }
    }

    pub fn tick_index(&self) -> u64 {
        self.tick_index
    }

    pub fn anchor(&self) -> Option<FlockAnchor> {
        self.anchor
    }

    pub fn set_anchor(&mut self, position: Vec3) {
        match &mut self.anchor {
            Some(anchor) => anchor.follow(position),
            None => self.anchor = Some(FlockAnchor::new(position)),
        }
    }

    pub fn clear_anchor(&mut self) {
        self.anchor = None;
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> + '_ {
        self.members.iter().map(|member| &member.agent)
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.member_index(id).map(|i| &self.members[i].agent)
    }

    pub fn sensor(&self, id: AgentId) -> Option<&ObstacleSensor> {
        self.member_index(id).map(|i| &self.members[i].sensor)
    }

    /// Spawns `count` agents around the anchor with random position and
    /// heading drawn from the flock's generator. They cruise at the flock
    /// speed.
    pub fn spawn(&mut self, count: usize) -> Vec<AgentId> {
        let origin = self.anchor.map_or(Vec3::ZERO, |anchor| anchor.position());
        let spawn = self.spawn_config;

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = Vec3::new(
                sample(&mut self.rng, spawn.volume_min.x, spawn.volume_max.x),
                sample(&mut self.rng, spawn.volume_min.y, spawn.volume_max.y),
                sample(&mut self.rng, spawn.volume_min.z, spawn.volume_max.z),
            );
            let extent = spawn.look_extent;
            let look = origin
                + Vec3::new(
                    sample(&mut self.rng, -extent, extent),
                    sample(&mut self.rng, -extent, extent),
                    sample(&mut self.rng, -extent, extent),
                );
            let position = origin + offset;
            let heading = normalize_or(look - position, Vec3::Z);
            ids.push(self.insert(position, heading));
        }

        log::info!("flock '{}' spawned {} agents", self.name, count);
        ids
    }

    /// Adds an agent cruising at the flock speed.
    pub fn insert(&mut self, position: Vec3, heading: Vec3) -> AgentId {
        let id = AgentId(self.next_agent);
        self.insert_agent(Agent::new(id, position, heading))
    }

    /// Adds an agent that keeps its own `speed` whatever the flock speed is.
    pub fn insert_with_speed(&mut self, position: Vec3, heading: Vec3, speed: f32) -> AgentId {
        let id = AgentId(self.next_agent);
        self.insert_agent(Agent::new(id, position, heading).with_speed(speed))
    }

    fn insert_agent(&mut self, agent: Agent) -> AgentId {
        let id = agent.id();
        self.next_agent += 1;
        self.members.push(Member {
            agent,
            sensor: ObstacleSensor::new(id, self.sensor_config),
        });
        id
    }

    /// Drops an agent, its sensor and its overlap state. Survivors keep their
    /// relative order and ids are never handed out again.
    pub fn remove(&mut self, id: AgentId) -> FlockResult<Agent> {
        let index = self.member_index(id).ok_or(FlockError::UnknownAgent(id))?;
        let member = self.members.remove(index);
        self.overlaps.forget(id);
        log::info!("flock '{}' removed {}", self.name, id);
        Ok(member.agent)
    }

    /// Gives an agent its own speed, or with `None` puts it back on the
    /// flock speed.
    pub fn set_speed(&mut self, id: AgentId, speed: Option<f32>) -> FlockResult<()> {
        self.member_mut(id)?.agent.set_speed(speed);
        Ok(())
    }

    pub fn add_point_of_interest(&mut self, position: Vec3) -> PoiId {
        let id = PoiId(self.next_point);
        self.next_point += 1;
        self.points.push((id, position));
        id
    }

    pub fn point_of_interest(&self, id: PoiId) -> Option<Vec3> {
        resolve_point(&self.points, id)
    }

    pub fn move_point_of_interest(&mut self, id: PoiId, position: Vec3) -> FlockResult<()> {
        let entry = self
            .points
            .iter_mut()
            .find(|(point, _)| *point == id)
            .ok_or(FlockError::UnknownPointOfInterest(id))?;
        entry.1 = position;
        Ok(())
    }

    /// Forgets a point. Agents still seeking it keep flying their last heading
    /// until given a new target or cleared.
    pub fn remove_point_of_interest(&mut self, id: PoiId) -> FlockResult<Vec3> {
        let index = self
            .points
            .iter()
            .position(|(point, _)| *point == id)
            .ok_or(FlockError::UnknownPointOfInterest(id))?;
        Ok(self.points.remove(index).1)
    }

    pub fn assign_target(&mut self, agent: AgentId, target: PoiId) -> FlockResult<()> {
        if resolve_point(&self.points, target).is_none() {
            return Err(FlockError::UnknownPointOfInterest(target));
        }
        self.member_mut(agent)?.agent.assign_target(target);
        Ok(())
    }

    pub fn clear_target(&mut self, agent: AgentId) -> FlockResult<()> {
        self.member_mut(agent)?.agent.clear_target();
        Ok(())
    }

    /// Delivers an overlap event to an agent's sensor, which probes `env` on
    /// `Stay`. Returns the number of probe hits.
    pub fn handle_overlap<E: Environment + ?Sized>(
        &mut self,
        id: AgentId,
        event: OverlapEvent,
        env: &E,
    ) -> FlockResult<usize> {
        let member = self.member_mut(id)?;
        Ok(member.sensor.handle(event, &mut member.agent, env))
    }

    /// Which agents' probe volumes touched geometry on the last [`Flock::sense`].
    pub fn overlaps(&self) -> &OverlapMonitor {
        &self.overlaps
    }

    /// Checks every agent's probe volume against `world` and feeds the
    /// resulting overlap events to the sensors. Returns the total probe hits.
    pub fn sense(&mut self, world: &StaticWorld) -> usize {
        let radius = self.sensor_config.probe_radius;
        let mask = self.sensor_config.mask;
        let mut hits = 0;
        for member in &mut self.members {
            let id = member.agent.id();
            let overlapping = world.overlaps(member.agent.position(), radius, mask);
            for event in self.overlaps.update(id, overlapping) {
                hits += member.sensor.handle(*event, &mut member.agent, world);
            }
        }
        hits
    }

    /// Advances every agent by `dt` seconds in arena order. Returns the agents
    /// that reached their target this tick.
    pub fn tick(&mut self, dt: f32) -> Vec<AgentId> {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.tick_index = self.tick_index.wrapping_add(1);

        let ctx_anchor = self.anchor.map(|anchor| anchor.position());
        let mut arrived = Vec::new();

        match self.config.update_order {
            UpdateOrder::InPlace => {
                for i in 0..self.members.len() {
                    let (before, rest) = self.members.split_at_mut(i);
                    let Some((member, after)) = rest.split_first_mut() else {
                        break;
                    };
                    let ctx = TickContext {
                        config: &self.config,
                        anchor: ctx_anchor,
                        target: member
                            .agent
                            .target()
                            .and_then(|poi| resolve_point(&self.points, poi)),
                    };
                    let siblings = before
                        .iter()
                        .chain(after.iter())
                        .map(|sibling| sibling.agent.sibling_state());
                    if member.agent.tick(dt, siblings, &ctx) == TickOutcome::Arrived {
                        arrived.push(member.agent.id());
                    }
                }
            }
            UpdateOrder::Snapshot => {
                let snapshot: Vec<SiblingState> = self
                    .members
                    .iter()
                    .map(|member| member.agent.sibling_state())
                    .collect();
                for member in &mut self.members {
                    let ctx = TickContext {
                        config: &self.config,
                        anchor: ctx_anchor,
                        target: member
                            .agent
                            .target()
                            .and_then(|poi| resolve_point(&self.points, poi)),
                    };
                    if member.agent.tick(dt, snapshot.iter().copied(), &ctx)
                        == TickOutcome::Arrived
                    {
                        arrived.push(member.agent.id());
                    }
                }
            }
        }

        self.debug_validate_state();
        arrived
    }

    fn member_index(&self, id: AgentId) -> Option<usize> {
        self.members.iter().position(|member| member.agent.id() == id)
    }

    fn member_mut(&mut self, id: AgentId) -> FlockResult<&mut Member> {
        self.members
            .iter_mut()
            .find(|member| member.agent.id() == id)
            .ok_or(FlockError::UnknownAgent(id))
    }

    fn debug_validate_state(&self) {
        if cfg!(debug_assertions) {
            for member in &self.members {
                let agent = &member.agent;
                debug_assert!(
                    is_finite_vec(agent.position()),
                    "{} has a non-finite position",
                    agent.id()
                );
                debug_assert!(
                    (agent.heading().length() - 1.0).abs() < 1.0e-3,
                    "{} heading is not unit length",
                    agent.id()
                );
            }
        }
    }
}

fn resolve_point(points: &[(PoiId, Vec3)], id: PoiId) -> Option<Vec3> {
    points
        .iter()
        .find(|(point, _)| *point == id)
        .map(|(_, position)| *position)
}

fn sample(rng: &mut ChaCha8Rng, min: f32, max: f32) -> f32 {
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}

fn entropy_seed() -> FlockResult<u64> {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).map_err(FlockError::Entropy)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Mode;

    fn flock() -> Flock {
        Flock::new("test", SteeringConfig::default(), 11).with_anchor(Vec3::new(0.0, 10.0, 0.0))
    }

    #[test]
    fn same_seed_spawns_same_flock() {
        let mut a = flock();
        let mut b = flock();
        a.spawn(8);
        b.spawn(8);

        for (left, right) in a.agents().zip(b.agents()) {
            assert_eq!(left.position(), right.position());
            assert_eq!(left.heading(), right.heading());
            assert_eq!(left.speed(), None);
        }
    }

    #[test]
    fn spawn_stays_inside_volume() {
        let mut flock = flock();
        flock.spawn(32);
        let spawn = SpawnConfig::default();
        let origin = Vec3::new(0.0, 10.0, 0.0);
        for agent in flock.agents() {
            let local = agent.position() - origin;
            assert!(local.cmpge(spawn.volume_min).all());
            assert!(local.cmplt(spawn.volume_max).all());
            assert!((agent.heading().length() - 1.0).abs() < 1.0e-5);
            assert_eq!(agent.cruise_speed(flock.config()), 6.0);
        }
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let mut flock = flock();
        let first = flock.insert(Vec3::ZERO, Vec3::X);
        let second = flock.insert(Vec3::ONE, Vec3::X);

        assert_eq!(flock.remove(first).unwrap().id(), first);
        assert!(matches!(flock.remove(first), Err(FlockError::UnknownAgent(_))));

        let third = flock.insert(Vec3::ZERO, Vec3::X);
        assert_ne!(third, first);
        assert_eq!(flock.len(), 2);
        assert!(flock.agent(second).is_some());
        assert!(flock.sensor(second).is_some());
        assert!(flock.sensor(first).is_none());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let mut flock = flock();
        let agent = flock.insert(Vec3::ZERO, Vec3::X);
        let point = flock.add_point_of_interest(Vec3::X);
        flock.remove_point_of_interest(point).unwrap();

        assert!(matches!(
            flock.assign_target(agent, point),
            Err(FlockError::UnknownPointOfInterest(_))
        ));
        assert_eq!(flock.agent(agent).unwrap().mode(), Mode::Flocking);
    }

    #[test]
    fn later_agents_see_moved_siblings_in_place() {
        let config = SteeringConfig {
            cohesion_weight: 1.0,
            separation_weight: 0.0,
            alignment_weight: 0.0,
            constrain_weight: 0.0,
            avoidance_weight: 0.0,
            integration_rate: 0.5,
            ..SteeringConfig::default()
        };
        let run = |order: UpdateOrder, reversed: bool| {
            let config = SteeringConfig {
                update_order: order,
                ..config
            };
            let mut flock = Flock::new("order", config, 0);
            let starts = [
                (Vec3::new(0.0, 0.0, 0.0), Vec3::Z),
                (Vec3::new(4.0, 0.0, 0.0), Vec3::Y),
            ];
            let ids: Vec<AgentId> = if reversed {
                starts.iter().rev().map(|(p, h)| flock.insert_with_speed(*p, *h, 1.0)).collect()
            } else {
                starts.iter().map(|(p, h)| flock.insert_with_speed(*p, *h, 1.0)).collect()
            };
            flock.tick(1.0);
            let mut out: Vec<Vec3> = ids
                .iter()
                .map(|id| flock.agent(*id).unwrap().position())
                .collect();
            if reversed {
                out.reverse();
            }
            out
        };

        let snapshot_forward = run(UpdateOrder::Snapshot, false);
        let snapshot_reversed = run(UpdateOrder::Snapshot, true);
        assert_eq!(snapshot_forward, snapshot_reversed);

        let in_place_forward = run(UpdateOrder::InPlace, false);
        let in_place_reversed = run(UpdateOrder::InPlace, true);
        assert_ne!(in_place_forward, in_place_reversed);
    }

    #[test]
    fn spawned_agents_reach_a_nearby_point() {
        let mut flock = Flock::new("slow", SteeringConfig::default(), 0);
        let ids = flock.spawn(200);

        for id in ids {
            let start = flock.agent(id).unwrap().position();
            let point = flock.add_point_of_interest(start + Vec3::new(2.0, 0.0, 0.0));
            flock.assign_target(id, point).unwrap();
        }
        let mut arrived = 0;
        for _ in 0..600 {
            arrived += flock.tick(1.0 / 60.0).len();
        }
        assert_eq!(arrived, 200);
        assert!(flock.agents().all(|agent| agent.mode() == Mode::Flocking));
    }

    #[test]
    fn flock_speed_moves_agents_without_their_own() {
        let config = SteeringConfig {
            cohesion_weight: 0.0,
            separation_weight: 0.0,
            alignment_weight: 0.0,
            constrain_weight: 0.0,
            avoidance_weight: 0.0,
            speed: 4.0,
            ..SteeringConfig::default()
        };
        let mut flock = Flock::new("cruise", config, 1);
        let cruising = flock.insert(Vec3::ZERO, Vec3::X);
        let own = flock.insert_with_speed(Vec3::ZERO, Vec3::Z, 1.0);

        flock.tick(0.5);
        assert!(flock.agent(cruising).unwrap().position().distance(Vec3::X * 2.0) < 1.0e-4);
        assert!(flock.agent(own).unwrap().position().distance(Vec3::Z * 0.5) < 1.0e-4);

        flock.set_speed(own, None).unwrap();
        flock.tick(0.5);
        assert!(flock.agent(own).unwrap().position().distance(Vec3::Z * 2.5) < 1.0e-4);
    }

    #[test]
    fn removal_forgets_overlap_state() {
        let world = StaticWorld::new().with_collider(crate::environment::Collider::ground(0.0));
        let mut flock = flock();
        let low = flock.insert(Vec3::new(0.0, 1.0, 0.0), Vec3::X);
        let high = flock.insert(Vec3::new(0.0, 50.0, 0.0), Vec3::X);
        flock.sense(&world);
        assert!(flock.overlaps().is_overlapping(low));
        assert_eq!(flock.overlaps().len(), 2);

        flock.remove(low).unwrap();
        assert!(!flock.overlaps().is_overlapping(low));
        assert_eq!(flock.overlaps().len(), 1);
        assert!(!flock.overlaps().is_overlapping(high));
    }

    #[test]
    fn overlap_for_unknown_agent_errors() {
        let mut flock = flock();
        let world = crate::environment::StaticWorld::new();
        assert!(flock
            .handle_overlap(AgentId(99), OverlapEvent::Stay, &world)
            .is_err());
    }
}
