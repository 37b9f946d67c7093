//! Simulation engine for the DevOps lab
//!
//! This crate provides:
//! - A simulated cluster with traffic-weighted canary pods
//! - A deployment pipeline with a canary gate, promote and rollback
//! - Chaos experiments and the incident log
//! - Telemetry series and canary analysis
//! - A terminal command interpreter with persisted history
//! - Scenario loading
//!
//! `Lab` ties the pieces together and is the only type a front end needs.

pub mod canary;
pub mod chaos;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod lab;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod ring;
pub mod rng;
pub mod scenario;
pub mod state;
pub mod telemetry;
pub mod terminal;
pub mod timers;

pub use config::LabConfig;
pub use error::LabError;
pub use events::{EventBus, LabActivity, Notification, NotificationLevel};
pub use lab::{Execution, Lab};
pub use models::*;
pub use observability::{LabMetrics, StructuredLogger};
pub use scenario::{JsonFileScenarioSource, Scenario, ScenarioError, ScenarioSource, StaticScenarioSource};
pub use state::{LabSnapshot, ScenarioInfo};
pub use terminal::CommandOutput;
