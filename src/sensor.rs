use glam::Vec3;

use crate::agent::{Agent, AgentId};
use crate::config::SensorConfig;
use crate::environment::Environment;

/// Overlap notifications for an agent's probe volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapEvent {
    Enter,
    /// Delivered once per tick while the volume keeps overlapping.
    Stay,
    Exit,
}

/// Probe rays, relative to the agent's orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    Forward,
    Up,
    Down,
    Left,
    Right,
}

impl Probe {
    pub const ALL: [Probe; 5] = [
        Probe::Forward,
        Probe::Up,
        Probe::Down,
        Probe::Left,
        Probe::Right,
    ];

    pub fn direction(self, agent: &Agent) -> Vec3 {
        match self {
            Probe::Forward => agent.forward(),
            Probe::Up => agent.up(),
            Probe::Down => -agent.up(),
            Probe::Left => -agent.right(),
            Probe::Right => agent.right(),
        }
    }
}

/// Short-range obstacle probe attached to one agent. Everything it learns goes
/// straight into its owner's avoidance accumulator.
#[derive(Clone, Copy, Debug)]
pub struct ObstacleSensor {
    owner: AgentId,
    config: SensorConfig,
}

impl ObstacleSensor {
    pub fn new(owner: AgentId, config: SensorConfig) -> Self {
        Self { owner, config }
    }

    pub fn owner(&self) -> AgentId {
        self.owner
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SensorConfig) {
        self.config = config;
    }

    /// Routes one overlap event. Returns how many probes hit geometry.
    pub fn handle<E: Environment + ?Sized>(
        &self,
        event: OverlapEvent,
        agent: &mut Agent,
        env: &E,
    ) -> usize {
        match event {
            OverlapEvent::Enter => 0,
            OverlapEvent::Stay => self.on_overlap_tick(agent, env),
            OverlapEvent::Exit => {
                self.on_overlap_end(agent);
                0
            }
        }
    }

    /// Casts every probe, feeding hits to the owner. A tick without any hit
    /// clears the owner's avoidance.
    pub fn on_overlap_tick<E: Environment + ?Sized>(&self, agent: &mut Agent, env: &E) -> usize {
        debug_assert_eq!(agent.id(), self.owner, "sensor driven with a foreign agent");

        let origin = agent.position();
        let mut hits = 0usize;
        for probe in Probe::ALL {
            let direction = probe.direction(agent);
            let hit = env.cast(
                origin,
                direction,
                self.config.probe_distance,
                self.config.mask,
            );
            if let Some(point) = hit {
                agent.accumulate_avoidance(point);
                hits += 1;
            }
        }

        if hits == 0 {
            agent.reset_avoidance();
        } else {
            log::trace!("{} probes hit {} surfaces", self.owner, hits);
        }
        hits
    }

    pub fn on_overlap_end(&self, agent: &mut Agent) {
        debug_assert_eq!(agent.id(), self.owner, "sensor driven with a foreign agent");
        agent.reset_avoidance();
    }
}
