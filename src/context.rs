use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::Config;
use crate::services::debounce::{DebounceConfig, DebounceCoordinator};
use crate::services::kv::{Kv, KvError, RedisKv};
use crate::services::queue::JobQueue;
use crate::services::storage::Storage;

/// Explicit bundle of the process-wide handles: database, KV store, content
/// storage, job queue, and the debounce coordinator built on top of them.
/// Passed to routes and workers instead of module-level singletons so tests
/// can assemble one from fakes.
#[derive(Clone)]
pub struct AppContext {
    pub db: DatabaseConnection,
    pub kv: Arc<dyn Kv>,
    pub storage: Arc<Storage>,
    pub queue: Arc<JobQueue>,
    pub debounce: Arc<DebounceCoordinator>,
    pub config: &'static Config,
}

impl AppContext {
    /// Wire up the production context. Fails fast when the KV endpoint is
    /// unreachable; a context without its KV cannot schedule clustering.
    pub async fn initialize(
        db: DatabaseConnection,
        config: &'static Config,
    ) -> Result<Self, KvError> {
        let kv: Arc<dyn Kv> = Arc::new(RedisKv::connect(&config.redis_url).await?);
        let storage = Arc::new(Storage::new(&config.storage_root));
        let queue = Arc::new(JobQueue::new(db.clone()));
        let debounce = Arc::new(DebounceCoordinator::new(
            kv.clone(),
            queue.clone(),
            DebounceConfig {
                debounce_ttl: config.cluster_debounce_ttl,
                retry_delay: config.cluster_retry_delay,
                max_retries: config.cluster_max_retries,
            },
        ));

        Ok(Self {
            db,
            kv,
            storage,
            queue,
            debounce,
            config,
        })
    }
}
