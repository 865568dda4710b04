use thiserror::Error;

use crate::agent::AgentId;
use crate::flock::PoiId;

#[derive(Error, Debug)]
pub enum FlockError {
    #[error("Agent not found in flock: {0}")]
    UnknownAgent(AgentId),

    #[error("Point of interest not found in flock: {0}")]
    UnknownPointOfInterest(PoiId),

    #[error("Invalid flock configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Could not draw a random seed: {0}")]
    Entropy(getrandom::Error),
}

pub type FlockResult<T> = Result<T, FlockError>;
