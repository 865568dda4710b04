use std::fmt;

use glam::{Quat, Vec3};

use crate::config::{SteeringConfig, MAX_SPEED};
use crate::flock::PoiId;
use crate::math::{
    clamp_finite, is_finite_vec, look_rotation, mean_or_zero, normalize_or, normalize_or_zero,
    slerp_directions,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub(crate) u32);

impl AgentId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Flocking,
    Seeking,
}

/// Running sum of obstacle contributions since contact began. Written by the
/// owning agent's sensor, read and cleared by the agent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AvoidanceAccumulator {
    sum: Vec3,
    count: u32,
}

impl AvoidanceAccumulator {
    pub fn add(&mut self, contribution: Vec3) {
        self.sum += contribution;
        self.count += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn sum(&self) -> Vec3 {
        self.sum
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Unit direction of the mean contribution, zero without contact.
    pub fn direction(&self) -> Vec3 {
        normalize_or_zero(mean_or_zero(self.sum, self.count as usize))
    }
}

/// The parts of a sibling an agent reacts to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SiblingState {
    pub id: AgentId,
    pub position: Vec3,
    pub heading: Vec3,
}

/// Per-tick inputs that live outside the agent.
#[derive(Clone, Copy, Debug)]
pub struct TickContext<'a> {
    pub config: &'a SteeringConfig,
    pub anchor: Option<Vec3>,
    /// Resolved position of the agent's target, if it still exists.
    pub target: Option<Vec3>,
}

/// Each steering rule's unit direction plus their weighted sum.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SteeringTerms {
    pub cohesion: Vec3,
    pub separation: Vec3,
    pub alignment: Vec3,
    pub constrain: Vec3,
    pub avoidance: Vec3,
    pub blended: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Flocked,
    Seeking,
    /// Reached the target this tick and went back to flocking.
    Arrived,
}

#[derive(Clone, Debug)]
pub struct Agent {
    id: AgentId,
    position: Vec3,
    heading: Vec3,
    orientation: Quat,
    /// Own cruise speed; `None` follows [`SteeringConfig::speed`].
    speed: Option<f32>,
    mode: Mode,
    target: Option<PoiId>,
    avoidance: AvoidanceAccumulator,
}

impl Agent {
    pub fn new(id: AgentId, position: Vec3, heading: Vec3) -> Self {
        let heading = normalize_or(heading, Vec3::Z);
        Self {
            id,
            position,
            heading,
            orientation: look_rotation(heading),
            speed: None,
            mode: Mode::Flocking,
            target: None,
            avoidance: AvoidanceAccumulator::default(),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn heading(&self) -> Vec3 {
        self.heading
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.orientation * Vec3::X
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.set_speed(Some(speed));
        self
    }

    /// The agent's own speed, if it does not cruise at the flock speed.
    pub fn speed(&self) -> Option<f32> {
        self.speed
    }

    pub fn set_speed(&mut self, speed: Option<f32>) {
        self.speed = speed.map(|speed| clamp_finite(speed, 0.0, MAX_SPEED, 0.0));
    }

    /// Distance covered per second under `config`.
    pub fn cruise_speed(&self, config: &SteeringConfig) -> f32 {
        self.speed.unwrap_or(config.speed)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn target(&self) -> Option<PoiId> {
        self.target
    }

    pub fn avoidance(&self) -> &AvoidanceAccumulator {
        &self.avoidance
    }

    pub fn sibling_state(&self) -> SiblingState {
        SiblingState {
            id: self.id,
            position: self.position,
            heading: self.heading,
        }
    }

    pub fn assign_target(&mut self, target: PoiId) {
        log::debug!("{} seeking {}", self.id, target);
        self.target = Some(target);
        self.mode = Mode::Seeking;
    }

    pub fn clear_target(&mut self) {
        self.target = None;
        self.mode = Mode::Flocking;
    }

    /// Adds the offset from an obstacle contact to this agent.
    pub fn accumulate_avoidance(&mut self, point: Vec3) {
        self.avoidance.add(self.position - point);
    }

    pub fn reset_avoidance(&mut self) {
        self.avoidance.reset();
    }

    /// Evaluates every steering rule against `siblings` without moving.
    /// Siblings sharing this agent's id are skipped.
    pub fn steering<I>(
        &self,
        siblings: I,
        anchor: Option<Vec3>,
        config: &SteeringConfig,
    ) -> SteeringTerms
    where
        I: IntoIterator<Item = SiblingState>,
    {
        let separation_radius_sq = config.separation_radius * config.separation_radius;

        let mut position_sum = Vec3::ZERO;
        let mut heading_sum = Vec3::ZERO;
        let mut sibling_count = 0usize;
        let mut separation_sum = Vec3::ZERO;
        let mut separation_count = 0usize;

        for sibling in siblings {
            if sibling.id == self.id {
                continue;
            }
            sibling_count += 1;
            position_sum += sibling.position;
            heading_sum += sibling.heading;

            let away = self.position - sibling.position;
            if away.length_squared() < separation_radius_sq {
                separation_sum += away;
                separation_count += 1;
            }
        }

        let cohesion = if sibling_count == 0 {
            Vec3::ZERO
        } else {
            normalize_or_zero(mean_or_zero(position_sum, sibling_count) - self.position)
        };
        let separation = if separation_count == 0 {
            Vec3::ZERO
        } else {
            normalize_or_zero(separation_sum)
        };
        let alignment = normalize_or_zero(mean_or_zero(heading_sum, sibling_count));
        let constrain =
            anchor.map_or(Vec3::ZERO, |anchor| normalize_or_zero(anchor - self.position));
        let avoidance = self.avoidance.direction();

        let blended = cohesion * config.cohesion_weight
            + separation * config.separation_weight
            + alignment * config.alignment_weight
            + constrain * config.constrain_weight
            + avoidance * config.avoidance_weight;

        SteeringTerms {
            cohesion,
            separation,
            alignment,
            constrain,
            avoidance,
            blended,
        }
    }

    /// Advances this agent by one step of `dt` seconds.
    pub fn tick<I>(&mut self, dt: f32, siblings: I, ctx: &TickContext<'_>) -> TickOutcome
    where
        I: IntoIterator<Item = SiblingState>,
    {
        let blend = ctx.config.blend_factor(dt);
        let distance = self.cruise_speed(ctx.config) * dt;

        match self.mode {
            Mode::Flocking => {
                let terms = self.steering(siblings, ctx.anchor, ctx.config);
                let next = slerp_directions(self.heading, terms.blended, blend);
                self.integrate(next, distance);
                TickOutcome::Flocked
            }
            Mode::Seeking => {
                let desired = ctx
                    .target
                    .map_or(Vec3::ZERO, |target| normalize_or_zero(target - self.position));
                // Leans towards the target while smoothing through the prior heading.
                let next = slerp_directions(desired, self.heading, blend);
                self.integrate(next, distance);

                match ctx.target {
                    Some(target)
                        if self.position.distance(target) < ctx.config.arrival_threshold =>
                    {
                        log::debug!("{} reached {:?}, flocking again", self.id, self.target);
                        self.clear_target();
                        TickOutcome::Arrived
                    }
                    _ => TickOutcome::Seeking,
                }
            }
        }
    }

    fn integrate(&mut self, direction: Vec3, distance: f32) {
        self.heading = normalize_or(direction, self.heading);
        let step = self.heading * distance;
        if is_finite_vec(step) {
            self.position += step;
        }
        self.orientation = look_rotation(self.heading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn agent_at(id: u32, position: Vec3) -> Agent {
        Agent::new(AgentId(id), position, Vec3::X)
    }

    fn sibling(id: u32, position: Vec3, heading: Vec3) -> SiblingState {
        SiblingState {
            id: AgentId(id),
            position,
            heading,
        }
    }

    #[test]
    fn lonely_agent_only_feels_anchor_and_obstacles() {
        let mut agent = agent_at(0, Vec3::ZERO);
        agent.accumulate_avoidance(Vec3::new(0.0, -2.0, 0.0));
        let config = SteeringConfig::default();

        let terms = agent.steering(Vec::new(), Some(Vec3::new(0.0, 0.0, 5.0)), &config);

        assert_eq!(terms.cohesion, Vec3::ZERO);
        assert_eq!(terms.separation, Vec3::ZERO);
        assert_eq!(terms.alignment, Vec3::ZERO);
        assert_eq!(terms.constrain, Vec3::Z);
        assert_eq!(terms.avoidance, Vec3::Y);
        assert_eq!(
            terms.blended,
            Vec3::Z * config.constrain_weight + Vec3::Y * config.avoidance_weight
        );
    }

    #[test]
    fn separation_ignores_self_and_distant_siblings() {
        let agent = agent_at(0, Vec3::ZERO);
        let config = SteeringConfig {
            separation_radius: 2.0,
            ..SteeringConfig::default()
        };
        let siblings = vec![
            sibling(0, Vec3::new(0.5, 0.0, 0.0), Vec3::X),
            sibling(1, Vec3::new(2.0, 0.0, 0.0), Vec3::X),
            sibling(2, Vec3::new(0.0, 0.0, 9.0), Vec3::X),
        ];

        let terms = agent.steering(siblings, None, &config);
        assert_eq!(terms.separation, Vec3::ZERO);

        let close = vec![sibling(3, Vec3::new(1.0, 0.0, 0.0), Vec3::X)];
        let terms = agent.steering(close, None, &config);
        assert_eq!(terms.separation, -Vec3::X);
    }

    #[test]
    fn cohesion_and_alignment_average_siblings() {
        let agent = agent_at(0, Vec3::ZERO);
        let siblings = vec![
            sibling(1, Vec3::new(4.0, 0.0, 2.0), Vec3::Y),
            sibling(2, Vec3::new(4.0, 0.0, -2.0), Vec3::Z),
        ];

        let terms = agent.steering(siblings, None, &SteeringConfig::default());
        assert!(terms.cohesion.distance(Vec3::X) < 1.0e-6);
        assert!(terms.alignment.distance(Vec3::new(0.0, 1.0, 1.0).normalize()) < 1.0e-6);
        assert_eq!(terms.constrain, Vec3::ZERO);
    }

    #[test]
    fn only_constrain_weight_steers_to_anchor() {
        let agent = agent_at(0, Vec3::new(1.0, 2.0, 3.0));
        let config = SteeringConfig {
            cohesion_weight: 0.0,
            separation_weight: 0.0,
            alignment_weight: 0.0,
            constrain_weight: 1.0,
            avoidance_weight: 0.0,
            ..SteeringConfig::default()
        };
        let siblings = vec![sibling(1, Vec3::new(1.5, 2.0, 3.0), Vec3::Y)];

        let terms = agent.steering(siblings, Some(Vec3::new(-4.0, 2.0, 3.0)), &config);
        assert_eq!(terms.blended, terms.constrain);
        assert_eq!(terms.blended, -Vec3::X);
    }

    #[test]
    fn avoidance_is_mean_of_contributions() {
        let mut agent = agent_at(0, Vec3::ZERO);
        agent.accumulate_avoidance(Vec3::new(0.0, -1.0, 0.0));
        agent.accumulate_avoidance(Vec3::new(-3.0, 0.0, 0.0));

        assert_eq!(agent.avoidance().count(), 2);
        let expected = (Vec3::new(0.0, 1.0, 0.0) + Vec3::new(3.0, 0.0, 0.0)) / 2.0;
        assert!(agent.avoidance().direction().distance(expected.normalize()) < 1.0e-6);

        agent.reset_avoidance();
        assert_eq!(agent.avoidance().direction(), Vec3::ZERO);
        assert_eq!(agent.avoidance().count(), 0);
    }

    #[test]
    fn heading_stays_unit_after_degenerate_blend() {
        let mut agent = agent_at(0, Vec3::ZERO);
        let config = SteeringConfig {
            cohesion_weight: 0.0,
            separation_weight: 0.0,
            alignment_weight: 0.0,
            constrain_weight: 0.0,
            avoidance_weight: 0.0,
            ..SteeringConfig::default()
        };
        let ctx = TickContext {
            config: &config,
            anchor: None,
            target: None,
        };

        agent.tick(1.0, Vec::new(), &ctx);
        assert!(approx_eq!(f32, agent.heading().length(), 1.0, epsilon = 1.0e-5));
        assert!(agent.heading().distance(Vec3::X) < 1.0e-5);
        assert!(agent.position().distance(Vec3::X * 6.0) < 1.0e-4);
    }

    #[test]
    fn own_speed_overrides_flock_speed() {
        let config = SteeringConfig {
            speed: 2.0,
            ..SteeringConfig::default()
        };
        let mut agent = agent_at(0, Vec3::ZERO);
        assert_eq!(agent.cruise_speed(&config), 2.0);

        agent.set_speed(Some(f32::NAN));
        assert_eq!(agent.cruise_speed(&config), 0.0);
        agent.set_speed(Some(-3.0));
        assert_eq!(agent.speed(), Some(0.0));

        let mut fast = agent_at(1, Vec3::ZERO).with_speed(5.0);
        let ctx = TickContext {
            config: &config,
            anchor: None,
            target: None,
        };
        fast.tick(0.5, Vec::new(), &ctx);
        assert!(fast.position().distance(Vec3::X * 2.5) < 1.0e-4);

        fast.set_speed(None);
        fast.tick(0.5, Vec::new(), &ctx);
        assert!(fast.position().distance(Vec3::X * 3.5) < 1.0e-4);
    }

    #[test]
    fn orientation_follows_heading() {
        let mut agent = agent_at(0, Vec3::ZERO);
        let config = SteeringConfig::default();
        let ctx = TickContext {
            config: &config,
            anchor: Some(Vec3::new(0.0, 10.0, 0.0)),
            target: None,
        };
        for _ in 0..30 {
            agent.tick(1.0 / 60.0, Vec::new(), &ctx);
        }
        assert!(agent.forward().distance(agent.heading()) < 1.0e-4);
        assert!(agent.right().dot(agent.heading()).abs() < 1.0e-4);
        assert!(agent.up().dot(agent.heading()).abs() < 1.0e-4);
    }

    #[test]
    fn seeking_without_target_keeps_heading() {
        let mut agent = agent_at(0, Vec3::ZERO);
        agent.assign_target(PoiId(4));
        let config = SteeringConfig::default();
        let ctx = TickContext {
            config: &config,
            anchor: None,
            target: None,
        };

        assert_eq!(agent.tick(0.1, Vec::new(), &ctx), TickOutcome::Seeking);
        assert!(agent.heading().distance(Vec3::X) < 1.0e-5);
        assert_eq!(agent.mode(), Mode::Seeking);
    }

    #[test]
    fn arrival_returns_to_flocking() {
        let mut agent = agent_at(0, Vec3::ZERO);
        agent.assign_target(PoiId(1));
        assert_eq!(agent.mode(), Mode::Seeking);

        let config = SteeringConfig::default();
        let ctx = TickContext {
            config: &config,
            anchor: None,
            target: Some(Vec3::new(0.2, 0.0, 0.0)),
        };

        assert_eq!(agent.tick(0.0, Vec::new(), &ctx), TickOutcome::Arrived);
        assert_eq!(agent.mode(), Mode::Flocking);
        assert_eq!(agent.target(), None);
    }
}
