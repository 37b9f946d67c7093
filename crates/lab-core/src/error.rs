//! Library error type

use thiserror::Error;

use crate::chaos::ChaosError;
use crate::pipeline::PipelineError;
use crate::scenario::ScenarioError;
use crate::terminal::CommandError;

#[derive(Debug, Error)]
pub enum LabError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Chaos(#[from] ChaosError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}
