use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::environment::CategoryMask;
use crate::error::FlockResult;
use crate::math::clamp_finite;

pub const MAX_WEIGHT: f32 = 100.0;
pub const MAX_SEPARATION_RADIUS: f32 = 1_000.0;
pub const MAX_INTEGRATION_RATE: f32 = 1_000.0;
pub const MAX_ARRIVAL_THRESHOLD: f32 = 100.0;
pub const MAX_SPEED: f32 = 1_000.0;
pub const MAX_PROBE_DISTANCE: f32 = 1_000.0;

/// How siblings are read while a flock advances one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrder {
    /// Agents later in the arena see siblings already moved this tick.
    #[default]
    InPlace,
    /// Every agent reads the state left by the previous completed tick.
    Snapshot,
}

/// Flat steering tuning shared by every agent of a flock.
///
/// Weights are accepted in `[0, MAX_WEIGHT]`; [`SteeringConfig::sanitize`]
/// clamps anything outside that range and replaces non-finite values with the
/// defaults.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    pub cohesion_weight: f32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub constrain_weight: f32,
    pub avoidance_weight: f32,
    pub separation_radius: f32,
    pub integration_rate: f32,
    pub arrival_threshold: f32,
    /// Cruise speed of agents without a speed of their own.
    pub speed: f32,
    pub update_order: UpdateOrder,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            cohesion_weight: 0.2,
            separation_weight: 6.0,
            alignment_weight: 1.0,
            constrain_weight: 2.0,
            avoidance_weight: 20.0,
            separation_radius: 6.0,
            integration_rate: 3.0,
            arrival_threshold: 0.3,
            speed: 6.0,
            update_order: UpdateOrder::InPlace,
        }
    }
}

impl SteeringConfig {
    pub fn sanitize(&mut self) {
        let d = Self::default();
        self.cohesion_weight = sanitized(
            "cohesion_weight",
            self.cohesion_weight,
            0.0,
            MAX_WEIGHT,
            d.cohesion_weight,
        );
        self.separation_weight = sanitized(
            "separation_weight",
            self.separation_weight,
            0.0,
            MAX_WEIGHT,
            d.separation_weight,
        );
        self.alignment_weight = sanitized(
            "alignment_weight",
            self.alignment_weight,
            0.0,
            MAX_WEIGHT,
            d.alignment_weight,
        );
        self.constrain_weight = sanitized(
            "constrain_weight",
            self.constrain_weight,
            0.0,
            MAX_WEIGHT,
            d.constrain_weight,
        );
        self.avoidance_weight = sanitized(
            "avoidance_weight",
            self.avoidance_weight,
            0.0,
            MAX_WEIGHT,
            d.avoidance_weight,
        );
        self.separation_radius = sanitized(
            "separation_radius",
            self.separation_radius,
            0.0,
            MAX_SEPARATION_RADIUS,
            d.separation_radius,
        );
        self.integration_rate = sanitized(
            "integration_rate",
            self.integration_rate,
            0.0,
            MAX_INTEGRATION_RATE,
            d.integration_rate,
        );
        self.arrival_threshold = sanitized(
            "arrival_threshold",
            self.arrival_threshold,
            0.0,
            MAX_ARRIVAL_THRESHOLD,
            d.arrival_threshold,
        );
        self.speed = sanitized("speed", self.speed, 0.0, MAX_SPEED, d.speed);
    }

    /// Slerp factor for one tick, always within `[0, 1]`.
    pub fn blend_factor(&self, dt: f32) -> f32 {
        clamp_finite(self.integration_rate * dt, 0.0, 1.0, 0.0)
    }
}

/// Probe rays cast by each agent's obstacle sensor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub probe_distance: f32,
    /// Radius of the volume that must overlap geometry before probes are cast.
    pub probe_radius: f32,
    pub mask: CategoryMask,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            probe_distance: 10.0,
            probe_radius: 10.0,
            mask: CategoryMask::GROUND | CategoryMask::DEFAULT,
        }
    }
}

impl SensorConfig {
    pub fn sanitize(&mut self) {
        self.probe_distance =
            sanitized("probe_distance", self.probe_distance, 0.0, MAX_PROBE_DISTANCE, 10.0);
        self.probe_radius =
            sanitized("probe_radius", self.probe_radius, 0.0, MAX_PROBE_DISTANCE, 10.0);
    }
}

/// Randomized starting state for freshly spawned agents. Positions are drawn
/// inside `[volume_min, volume_max)` relative to the flock anchor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    pub volume_min: Vec3,
    pub volume_max: Vec3,
    /// Half extent of the cube look points are drawn from.
    pub look_extent: f32,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            volume_min: Vec3::ZERO,
            volume_max: Vec3::new(80.0, 20.0, 80.0),
            look_extent: 1_000.0,
        }
    }
}

impl SpawnConfig {
    pub fn sanitize(&mut self) {
        let min = self.volume_min.min(self.volume_max);
        let max = self.volume_min.max(self.volume_max);
        self.volume_min = min;
        self.volume_max = max;
        self.look_extent = sanitized("look_extent", self.look_extent, 1.0, 1.0e6, 1_000.0);
    }
}

/// Everything a flock needs, as read from a TOML document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockConfig {
    pub name: String,
    pub seed: Option<u64>,
    pub steering: SteeringConfig,
    pub sensor: SensorConfig,
    pub spawn: SpawnConfig,
}

impl FlockConfig {
    pub fn from_toml_str(source: &str) -> FlockResult<Self> {
        let mut config: FlockConfig = toml::from_str(source)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.steering.sanitize();
        self.sensor.sanitize();
        self.spawn.sanitize();
    }
}

fn sanitized(field: &str, value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    let clamped = clamp_finite(value, min, max, fallback);
    if clamped != value {
        log::debug!("{field} = {value} outside [{min}, {max}], using {clamped}");
    }
    clamped
}
