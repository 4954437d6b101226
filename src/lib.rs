pub mod api;
pub mod archive;
pub mod builder;
pub mod config;
pub mod error;
pub mod github;
pub mod job;
pub mod logging;
pub mod notification;
pub mod orchestrator;
pub mod publish;
pub mod runner;

use std::sync::Arc;

use crate::config::Config;
use crate::runner::BuildRunner;

pub struct AppState {
    pub config: Arc<Config>,
    pub runner: BuildRunner,
}

pub type SharedState = Arc<AppState>;
