//! Terminal command interpreter
//!
//! Parses a line of input and either answers it from a snapshot (built-ins,
//! filesystem, simulated tools) or hands back a `LabCommand` for the lab to
//! run against the engines.

mod fs;
mod history;
mod interpreter;
mod parse;
mod tools;

pub use fs::{VirtualFs, HOME};
pub use history::{CommandHistory, DEFAULT_HISTORY_CAPACITY};
pub use interpreter::Interpreter;
pub use parse::{parse_deploy, parse_flags, tokenize};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chaos::{ChaosError, ChaosScenario};
use crate::pipeline::{DeployRequest, PipelineError};

/// What a command prints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum CommandOutput {
    Text(String),
    Lines(Vec<String>),
    /// Clear the screen
    Clear,
    Empty,
}

impl CommandOutput {
    pub fn lines(&self) -> Vec<String> {
        match self {
            CommandOutput::Text(text) => text.lines().map(str::to_string).collect(),
            CommandOutput::Lines(lines) => lines.clone(),
            CommandOutput::Clear | CommandOutput::Empty => Vec::new(),
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, CommandOutput::Clear)
    }
}

/// Commands the interpreter forwards to the engines
#[derive(Debug, Clone, PartialEq)]
pub enum LabCommand {
    Deploy(DeployRequest),
    Promote,
    Rollback,
    Chaos(ChaosScenario),
    AutoChaos(bool),
    ShowHistory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Output(CommandOutput),
    Delegate(LabCommand),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("{0}: command not found")]
    NotFound(String),

    #[error("{verb}: {path}: No such file or directory")]
    NoSuchFile { verb: String, path: String },

    #[error("Error from server (NotFound): pods \"{0}\" not found")]
    PodNotFound(String),

    #[error("Error: release: not found")]
    ReleaseNotFound,

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("invalid value '{value}' for --{flag}: {reason}")]
    InvalidFlag {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Chaos(#[from] ChaosError),
}
