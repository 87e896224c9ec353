use std::path::PathBuf;
use std::time::Duration;

use sea_orm::EntityTrait;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::entities::{job, photo};
use crate::services::debounce::DebounceError;
use crate::services::exif::{self, ExtractError};
use crate::services::queue::{
    ClusterGroupJob, ProcessPhotoJob, JOB_CLUSTER_GROUP, JOB_PROCESS_PHOTO,
};
use crate::services::repo;
use crate::services::storage::StorageKind;
use crate::services::thumbs;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Attempts per photo before the failure is recorded on the row and the
/// photo ships with null metadata.
const MAX_PROCESS_ATTEMPTS: i32 = 3;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Debounce(#[from] DebounceError),
}

enum JobOutcome {
    Completed,
    Rescheduled(Duration),
}

/// Queue poller. One instance serves one queue; run several processes (or
/// tasks) against `default` for throughput, at least one against `cluster`.
pub struct Worker {
    ctx: AppContext,
    queue_name: String,
}

impl Worker {
    pub fn new(ctx: AppContext, queue_name: impl Into<String>) -> Self {
        Self {
            ctx,
            queue_name: queue_name.into(),
        }
    }

    pub async fn run(&self) {
        info!("worker started on queue {}", self.queue_name);

        if let Err(e) = self.ctx.queue.recover_stuck(&self.queue_name).await {
            error!("failed to recover stuck jobs: {}", e);
        }

        loop {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => sleep(POLL_INTERVAL).await,
                Err(e) => {
                    error!("worker error: {}", e);
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Claim and run one job. Returns whether a job was found; callers poll
    /// again immediately after work and back off when the queue is empty.
    pub async fn step(&self) -> Result<bool, WorkerError> {
        let Some(claimed) = self.ctx.queue.claim_next(&self.queue_name).await? else {
            return Ok(false);
        };

        let budget = self.job_timeout(&claimed);
        let started = std::time::Instant::now();

        match tokio::time::timeout(budget, self.handle(&claimed)).await {
            Ok(Ok(JobOutcome::Completed)) => {
                info!(
                    "job {} ({}) completed, took {:.2?}",
                    claimed.id,
                    claimed.name,
                    started.elapsed()
                );
                self.ctx.queue.complete(claimed).await?;
            }
            Ok(Ok(JobOutcome::Rescheduled(delay))) => {
                info!(
                    "job {} ({}) rescheduled, next run in {:?}",
                    claimed.id, claimed.name, delay
                );
                self.ctx.queue.reschedule(claimed, delay).await?;
            }
            Ok(Err(e)) => {
                error!("job {} ({}) failed: {}", claimed.id, claimed.name, e);
                self.ctx.queue.fail(claimed, &e.to_string()).await?;
            }
            Err(_) => {
                // Dropping the handler future rolls back its transaction and
                // releases any advisory lock with it.
                error!(
                    "job {} ({}) timed out after {:?}",
                    claimed.id, claimed.name, budget
                );
                self.ctx
                    .queue
                    .fail(claimed, &format!("timed out after {:?}", budget))
                    .await?;
            }
        }

        Ok(true)
    }

    fn job_timeout(&self, claimed: &job::Model) -> Duration {
        if claimed.name == JOB_CLUSTER_GROUP {
            self.ctx.config.cluster_job_timeout
        } else {
            self.ctx.config.process_job_timeout
        }
    }

    async fn handle(&self, claimed: &job::Model) -> Result<JobOutcome, WorkerError> {
        match claimed.name.as_str() {
            JOB_PROCESS_PHOTO => self.handle_process_photo(claimed).await,
            JOB_CLUSTER_GROUP => self.handle_cluster_group(claimed).await,
            other => {
                warn!("dropping job {} with unknown name {}", claimed.id, other);
                Ok(JobOutcome::Completed)
            }
        }
    }

    /// Extract metadata, generate the thumbnail, persist, and poke the
    /// debounce window. Idempotent: an already-processed photo is acked
    /// without touching anything.
    async fn handle_process_photo(&self, claimed: &job::Model) -> Result<JobOutcome, WorkerError> {
        let payload: ProcessPhotoJob = serde_json::from_value(claimed.payload.clone())?;

        let Some(photo) = photo::Entity::find_by_id(payload.photo_id)
            .one(&self.ctx.db)
            .await?
        else {
            warn!("photo {} not found, dropping job", payload.photo_id);
            return Ok(JobOutcome::Completed);
        };
        if photo.processed {
            debug!("photo {} already processed", photo.id);
            return Ok(JobOutcome::Completed);
        }

        match self.process_photo(&photo).await {
            Ok(()) => Ok(JobOutcome::Completed),
            Err(e) if claimed.attempts + 1 < MAX_PROCESS_ATTEMPTS => {
                let delay = Duration::from_secs(2u64 << claimed.attempts.max(0) as u32);
                warn!(
                    "photo {} processing failed (attempt {}), retrying in {:?}: {}",
                    photo.id,
                    claimed.attempts + 1,
                    delay,
                    e
                );
                Ok(JobOutcome::Rescheduled(delay))
            }
            Err(e) => {
                error!(
                    "photo {} processing failed permanently after {} attempts: {}",
                    photo.id,
                    claimed.attempts + 1,
                    e
                );
                repo::mark_processing_failed(&self.ctx.db, photo.id, &e.to_string()).await?;
                // Still clusterable: the photo lands in the default meeting.
                self.ctx.debounce.notify(photo.group_id).await?;
                Ok(JobOutcome::Completed)
            }
        }
    }

    async fn process_photo(&self, photo: &photo::Model) -> Result<(), WorkerError> {
        let path = PathBuf::from(&photo.original_path);
        let mime = photo.mime.clone();
        let metadata =
            tokio::task::spawn_blocking(move || exif::extract_metadata(&path, &mime)).await??;

        // Thumbnails are best-effort: a decode failure leaves thumb_path
        // null and the photo otherwise fully processed.
        let thumb_source = PathBuf::from(&photo.original_path);
        let max_edge = self.ctx.config.thumb_max_edge;
        match tokio::task::spawn_blocking(move || thumbs::make_thumbnail(&thumb_source, max_edge))
            .await?
        {
            Ok(bytes) => {
                match self
                    .ctx
                    .storage
                    .write(StorageKind::Thumb, &photo.content_hash, Some("jpg"), &bytes)
                {
                    Ok(thumb_path) => {
                        repo::set_thumb_path(
                            &self.ctx.db,
                            photo.id,
                            &thumb_path.display().to_string(),
                        )
                        .await?;
                    }
                    Err(e) => warn!("failed to store thumbnail for {}: {}", photo.id, e),
                }
            }
            Err(e) => warn!("thumbnail generation failed for {}: {}", photo.id, e),
        }

        repo::update_photo_metadata(&self.ctx.db, photo.id, &metadata).await?;
        self.ctx.debounce.notify(photo.group_id).await?;

        info!(
            "processed photo {} (shot_at: {:?}, gps: {})",
            photo.id,
            metadata.shot_at,
            metadata.gps.is_some()
        );
        Ok(())
    }

    /// Run the group reconciliation armed by the debounce coordinator. If
    /// uploads are still arriving the job pushes itself out by the retry
    /// delay, up to the retry cap; past the cap it reconciles anyway so a
    /// never-quiet group still makes progress.
    async fn handle_cluster_group(&self, claimed: &job::Model) -> Result<JobOutcome, WorkerError> {
        let payload: ClusterGroupJob = serde_json::from_value(claimed.payload.clone())?;
        let debounce_config = self.ctx.debounce.config();

        if self.ctx.debounce.burst_active(payload.group_id).await? {
            if (claimed.attempts as u32) < debounce_config.max_retries {
                debug!(
                    "group {}: burst still active, rescheduling cluster job {}",
                    payload.group_id, payload.job_id
                );
                return Ok(JobOutcome::Rescheduled(debounce_config.retry_delay));
            }
            info!(
                "group {}: burst still active after {} retries, reconciling anyway",
                payload.group_id, claimed.attempts
            );
        }

        repo::recluster_group(&self.ctx.db, payload.group_id, self.ctx.config.meeting_gap())
            .await?;

        // Only on success: a failed run leaves cluster:job:<g> in place so
        // its TTL, not user action, is what heals the scheduler.
        self.ctx.debounce.clear(payload.group_id).await?;
        Ok(JobOutcome::Completed)
    }
}
