//! Daemon hosting one lab session behind an HTTP API

pub mod api;
pub mod config;

pub use api::{create_router, AppState};
pub use config::LabdConfig;
