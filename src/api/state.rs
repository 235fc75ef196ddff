use std::sync::Arc;

use crate::services::jobs::JobRunner;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
}

impl AppState {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self { runner }
    }
}
