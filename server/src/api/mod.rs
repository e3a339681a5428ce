pub mod rest;

use crate::config::ServerConfig;
use crate::db::DbPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: DbPool, config: ServerConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }
}
