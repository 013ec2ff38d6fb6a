use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::DbPool;
use crate::infrastructure::storage::local::MediaStorage;
use crate::modules::transcode::coordinator::TranscodeCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub storage: MediaStorage,
    pub coordinator: Arc<TranscodeCoordinator>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        storage: MediaStorage,
        coordinator: Arc<TranscodeCoordinator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            storage,
            coordinator,
        }
    }
}
