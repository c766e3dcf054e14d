use std::sync::Arc;

use crate::config::AppConfig;
use crate::runs::RunExecutor;
use crate::storage::Pool;

/// Shared handles every handler receives through axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub executor: RunExecutor,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(pool: Pool, executor: RunExecutor, config: AppConfig) -> Self {
        Self {
            pool,
            executor,
            config: Arc::new(config),
        }
    }
}
