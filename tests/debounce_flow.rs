//! Scenario tests for the upload-burst debounce protocol, run against the
//! in-memory KV and a recording scheduler instead of Redis and the jobs
//! table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use photo_timeline::services::debounce::{
    ClusterJobScheduler, DebounceConfig, DebounceCoordinator, DebounceError,
};
use photo_timeline::services::kv::MemoryKv;

#[derive(Default)]
struct RecordingScheduler {
    scheduled: Mutex<Vec<(Uuid, Uuid, Duration)>>,
}

impl RecordingScheduler {
    async fn count(&self) -> usize {
        self.scheduled.lock().await.len()
    }
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

fn build(
    config: DebounceConfig,
) -> (Arc<DebounceCoordinator>, Arc<RecordingScheduler>) {
    let scheduler = Arc::new(RecordingScheduler::default());
    let coordinator = Arc::new(DebounceCoordinator::new(
        Arc::new(MemoryKv::new()),
        scheduler.clone(),
        config,
    ));
    (coordinator, scheduler)
}

fn config_with_ttl(ttl: Duration) -> DebounceConfig {
    DebounceConfig {
        debounce_ttl: ttl,
        retry_delay: Duration::from_secs(3),
        max_retries: 2,
    }
}

#[tokio::test]
async fn concurrent_burst_schedules_a_single_job() {
    let (coordinator, scheduler) = build(config_with_ttl(Duration::from_secs(5)));
    let group = Uuid::new_v4();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.notify(group).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(scheduler.count().await, 1);
}

#[tokio::test]
async fn uploads_refresh_the_quiet_window() {
    let ttl = Duration::from_millis(60);
    let (coordinator, _scheduler) = build(config_with_ttl(ttl));
    let group = Uuid::new_v4();

    // Keep uploading at half the TTL: the window must never lapse.
    for _ in 0..5 {
        coordinator.notify(group).await.unwrap();
        tokio::time::sleep(ttl / 2).await;
        assert!(coordinator.burst_active(group).await.unwrap());
    }

    // Then go quiet for a full TTL: the burst ends.
    tokio::time::sleep(ttl * 2).await;
    assert!(!coordinator.burst_active(group).await.unwrap());
}

#[tokio::test]
async fn completed_cycle_arms_again_for_the_next_burst() {
    let (coordinator, scheduler) = build(config_with_ttl(Duration::from_secs(5)));
    let group = Uuid::new_v4();

    // Burst one: a job gets armed.
    coordinator.notify(group).await.unwrap();
    coordinator.notify(group).await.unwrap();
    assert_eq!(scheduler.count().await, 1);

    // Worker finishes reconciliation and clears the keys.
    coordinator.clear(group).await.unwrap();

    // Burst two arms a fresh job.
    coordinator.notify(group).await.unwrap();
    assert_eq!(scheduler.count().await, 2);

    let scheduled = scheduler.scheduled.lock().await;
    assert_ne!(scheduled[0].1, scheduled[1].1, "job ids are distinct per burst");
}

#[tokio::test]
async fn unrelated_groups_never_share_a_job() {
    let (coordinator, scheduler) = build(config_with_ttl(Duration::from_secs(5)));
    let groups: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    for group in &groups {
        for _ in 0..3 {
            coordinator.notify(*group).await.unwrap();
        }
    }

    let scheduled = scheduler.scheduled.lock().await;
    assert_eq!(scheduled.len(), groups.len());
    for group in &groups {
        assert_eq!(scheduled.iter().filter(|(g, _, _)| g == group).count(), 1);
    }
}
