use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::services::kv::{Kv, KvError};

/// Headroom added to the job key TTL beyond the scheduled delay plus the
/// quiet window, so the key outlives a job that is merely slow to start.
const JOB_KEY_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DebounceError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("failed to schedule cluster job: {0}")]
    Schedule(String),
}

/// Sink for the delayed cluster job the coordinator arms once per burst.
/// Production enqueues onto the `cluster` queue; tests count invocations.
#[async_trait]
pub trait ClusterJobScheduler: Send + Sync {
    async fn schedule(
        &self,
        group_id: Uuid,
        job_id: Uuid,
        delay: Duration,
    ) -> Result<(), DebounceError>;
}

#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    /// Quiet window: reconciliation may start only after this long without
    /// an upload.
    pub debounce_ttl: Duration,
    /// Lead time of the delayed cluster job.
    pub retry_delay: Duration,
    /// Reschedules permitted while the burst is still hot before the job
    /// runs anyway.
    pub max_retries: u32,
}

/// Per-group single-flight debounce over three KV entries:
///
/// - `cluster:pending:<g>` marks a burst in progress, refreshed by every
///   upload.
/// - `cluster:job:<g>` marks that a delayed cluster job is armed; NX set so
///   exactly one notify per burst schedules.
/// - `cluster:count:<g>` counts uploads in the burst, diagnostics only.
///
/// Liveness rests on the job key's TTL: a worker that dies mid-flight leaves
/// the key to expire, after which the next upload arms a fresh job.
pub struct DebounceCoordinator {
    kv: Arc<dyn Kv>,
    scheduler: Arc<dyn ClusterJobScheduler>,
    config: DebounceConfig,
}

fn pending_key(group_id: Uuid) -> String {
    format!("cluster:pending:{}", group_id)
}

fn job_key(group_id: Uuid) -> String {
    format!("cluster:job:{}", group_id)
}

fn count_key(group_id: Uuid) -> String {
    format!("cluster:count:{}", group_id)
}

impl DebounceCoordinator {
    pub fn new(
        kv: Arc<dyn Kv>,
        scheduler: Arc<dyn ClusterJobScheduler>,
        config: DebounceConfig,
    ) -> Self {
        Self {
            kv,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> DebounceConfig {
        self.config
    }

    /// Record one upload: refresh the quiet window, bump the burst counter,
    /// and arm the delayed cluster job if nobody has yet. Three KV round
    /// trips and at most one enqueue; never blocks on reconciliation.
    pub async fn notify(&self, group_id: Uuid) -> Result<(), DebounceError> {
        let pending = pending_key(group_id);
        let count = count_key(group_id);
        let job = job_key(group_id);

        self.kv
            .set_ex(&pending, "1", self.config.debounce_ttl)
            .await?;
        let uploads = self.kv.incr(&count).await?;
        self.kv.expire(&count, self.config.debounce_ttl).await?;

        let job_id = Uuid::new_v4();
        let job_ttl = self.config.retry_delay + self.config.debounce_ttl + JOB_KEY_SLACK;
        if self.kv.set_nx_ex(&job, &job_id.to_string(), job_ttl).await? {
            debug!(
                "group {}: armed cluster job {} (burst upload #{})",
                group_id, job_id, uploads
            );
            if let Err(e) = self
                .scheduler
                .schedule(group_id, job_id, self.config.retry_delay)
                .await
            {
                // Disarm so the next upload can retry; the TTL would heal
                // this anyway, just slower.
                let _ = self.kv.del(&job).await;
                return Err(e);
            }
        } else {
            debug!(
                "group {}: cluster job already armed (burst upload #{})",
                group_id, uploads
            );
        }

        Ok(())
    }

    /// Whether the burst is still hot, i.e. an upload landed within the
    /// quiet window. Checked by the cluster worker before reconciling.
    pub async fn burst_active(&self, group_id: Uuid) -> Result<bool, DebounceError> {
        Ok(self.kv.get(&pending_key(group_id)).await?.is_some())
    }

    /// Drop the job and count keys after a successful reconciliation so the
    /// next upload starts a fresh cycle. Deliberately NOT called on failure:
    /// the job key's TTL is the recovery path there.
    pub async fn clear(&self, group_id: Uuid) -> Result<(), DebounceError> {
        self.kv.del(&job_key(group_id)).await?;
        self.kv.del(&count_key(group_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::MemoryKv;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingScheduler {
        scheduled: Mutex<Vec<(Uuid, Uuid, Duration)>>,
    }

    #[async_trait]
    impl ClusterJobScheduler for RecordingScheduler {
        async fn schedule(
            &self,
            group_id: Uuid,
            job_id: Uuid,
            delay: Duration,
        ) -> Result<(), DebounceError> {
            self.scheduled.lock().await.push((group_id, job_id, delay));
            Ok(())
        }
    }

    fn coordinator(
        config: DebounceConfig,
    ) -> (DebounceCoordinator, Arc<MemoryKv>, Arc<RecordingScheduler>) {
        let kv = Arc::new(MemoryKv::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let coordinator =
            DebounceCoordinator::new(kv.clone(), scheduler.clone(), config);
        (coordinator, kv, scheduler)
    }

    fn fast_config() -> DebounceConfig {
        DebounceConfig {
            debounce_ttl: Duration::from_secs(5),
            retry_delay: Duration::from_secs(3),
            max_retries: 2,
        }
    }

    #[tokio::test]
    async fn burst_schedules_exactly_one_job() {
        let (coordinator, kv, scheduler) = coordinator(fast_config());
        let group = Uuid::new_v4();

        for _ in 0..10 {
            coordinator.notify(group).await.unwrap();
        }

        let scheduled = scheduler.scheduled.lock().await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, group);
        assert_eq!(scheduled[0].2, Duration::from_secs(3));
        // Diagnostic counter saw every upload.
        assert_eq!(
            kv.get(&count_key(group)).await.unwrap().as_deref(),
            Some("10")
        );
    }

    #[tokio::test]
    async fn groups_debounce_independently() {
        let (coordinator, _kv, scheduler) = coordinator(fast_config());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        coordinator.notify(a).await.unwrap();
        coordinator.notify(b).await.unwrap();
        coordinator.notify(a).await.unwrap();

        assert_eq!(scheduler.scheduled.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn clear_rearms_the_next_burst() {
        let (coordinator, _kv, scheduler) = coordinator(fast_config());
        let group = Uuid::new_v4();

        coordinator.notify(group).await.unwrap();
        coordinator.clear(group).await.unwrap();
        coordinator.notify(group).await.unwrap();

        assert_eq!(scheduler.scheduled.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn job_key_lapse_rearms_without_clear() {
        let (coordinator, kv, scheduler) = coordinator(fast_config());
        let group = Uuid::new_v4();

        coordinator.notify(group).await.unwrap();
        // Stand in for the job key's TTL lapsing after a worker died
        // mid-flight; nothing else cleans up.
        kv.del(&job_key(group)).await.unwrap();
        coordinator.notify(group).await.unwrap();

        assert_eq!(scheduler.scheduled.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn burst_goes_quiet_after_ttl() {
        let config = DebounceConfig {
            debounce_ttl: Duration::from_millis(10),
            retry_delay: Duration::from_secs(3),
            max_retries: 2,
        };
        let (coordinator, _kv, _scheduler) = coordinator(config);
        let group = Uuid::new_v4();

        coordinator.notify(group).await.unwrap();
        assert!(coordinator.burst_active(group).await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!coordinator.burst_active(group).await.unwrap());
    }

    #[tokio::test]
    async fn scheduler_failure_disarms_the_job_key() {
        struct FailingScheduler;

        #[async_trait]
        impl ClusterJobScheduler for FailingScheduler {
            async fn schedule(
                &self,
                _group_id: Uuid,
                _job_id: Uuid,
                _delay: Duration,
            ) -> Result<(), DebounceError> {
                Err(DebounceError::Schedule("queue down".to_string()))
            }
        }

        let kv = Arc::new(MemoryKv::new());
        let coordinator = DebounceCoordinator::new(
            kv.clone(),
            Arc::new(FailingScheduler),
            fast_config(),
        );
        let group = Uuid::new_v4();

        assert!(coordinator.notify(group).await.is_err());
        // The job key must not stay armed with nothing scheduled.
        assert_eq!(kv.get(&job_key(group)).await.unwrap(), None);
    }
}
