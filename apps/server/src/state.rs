//! Shared application state.

use crate::config::Config;
use crate::repository::{FsProjectStore, ProjectRepository};
use lektor_validator::Pipeline;
use std::sync::Arc;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub projects: Arc<dyn ProjectRepository>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let projects = Arc::new(FsProjectStore::new(&config.storage.data_dir));
        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(Pipeline::new()),
            projects,
        })
    }
}
