use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::entities::job;
use crate::services::debounce::{ClusterJobScheduler, DebounceError};

pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_CLUSTER: &str = "cluster";

pub const JOB_PROCESS_PHOTO: &str = "process_photo";
pub const JOB_CLUSTER_GROUP: &str = "cluster_group";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessPhotoJob {
    pub photo_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterGroupJob {
    pub group_id: Uuid,
    /// Debounce token from `cluster:job:<group_id>`, carried for log
    /// correlation between the coordinator and the worker.
    pub job_id: Uuid,
}

/// Database-backed job queue. Jobs are rows claimed with
/// `FOR UPDATE SKIP LOCKED` so any number of workers can poll the same
/// queue without double-delivery; a future `run_at` realizes delayed
/// enqueue.
#[derive(Clone)]
pub struct JobQueue {
    db: DatabaseConnection,
}

impl JobQueue {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, sea_orm::DbErr> {
        self.enqueue_delayed(queue, name, payload, Duration::ZERO).await
    }

    pub async fn enqueue_delayed(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<Uuid, sea_orm::DbErr> {
        let now = Utc::now();
        let run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
        let id = Uuid::new_v4();

        job::ActiveModel {
            id: Set(id),
            queue: Set(queue.to_string()),
            name: Set(name.to_string()),
            payload: Set(payload),
            status: Set(STATUS_PENDING.to_string()),
            run_at: Set(run_at),
            attempts: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        Ok(id)
    }

    /// Claim the oldest due job on `queue`, marking it `processing`. Returns
    /// None when nothing is due. The row lock is held only for the claim
    /// transaction, never across the job's actual work.
    pub async fn claim_next(&self, queue: &str) -> Result<Option<job::Model>, sea_orm::DbErr> {
        let txn = self.db.begin().await?;

        let job_opt = job::Entity::find()
            .filter(job::Column::Queue.eq(queue))
            .filter(job::Column::Status.eq(STATUS_PENDING))
            .filter(job::Column::RunAt.lte(Utc::now()))
            .order_by_asc(job::Column::RunAt)
            .order_by_asc(job::Column::CreatedAt)
            .limit(1)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await?;

        let Some(model) = job_opt else {
            txn.commit().await?;
            return Ok(None);
        };

        let mut active: job::ActiveModel = model.into();
        active.status = Set(STATUS_PROCESSING.to_string());
        active.updated_at = Set(Utc::now());
        let claimed = active.update(&txn).await?;

        txn.commit().await?;
        Ok(Some(claimed))
    }

    pub async fn complete(&self, model: job::Model) -> Result<(), sea_orm::DbErr> {
        let mut active: job::ActiveModel = model.into();
        active.status = Set(STATUS_COMPLETED.to_string());
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn fail(&self, model: job::Model, error: &str) -> Result<(), sea_orm::DbErr> {
        let mut active: job::ActiveModel = model.into();
        active.status = Set(STATUS_FAILED.to_string());
        active.last_error = Set(Some(error.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;
        Ok(())
    }

    /// Put a claimed job back as pending with a fresh delay, bumping its
    /// attempt counter. Used for debounce reschedules and retriable
    /// processing failures; the job keeps its id.
    pub async fn reschedule(
        &self,
        model: job::Model,
        delay: Duration,
    ) -> Result<(), sea_orm::DbErr> {
        let attempts = model.attempts;
        let mut active: job::ActiveModel = model.into();
        active.status = Set(STATUS_PENDING.to_string());
        active.run_at = Set(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        active.attempts = Set(attempts + 1);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;
        Ok(())
    }

    /// Reset jobs left `processing` by a dead worker back to pending. Safe
    /// because every handler is idempotent; run once at worker startup.
    pub async fn recover_stuck(&self, queue: &str) -> Result<u64, sea_orm::DbErr> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                sea_orm::sea_query::Expr::value(STATUS_PENDING),
            )
            .col_expr(
                job::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .filter(job::Column::Queue.eq(queue))
            .filter(job::Column::Status.eq(STATUS_PROCESSING))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(
                "recovered {} stuck jobs on queue {} (reset to pending)",
                result.rows_affected, queue
            );
        }
        Ok(result.rows_affected)
    }
}

#[async_trait]
impl ClusterJobScheduler for JobQueue {
    async fn schedule(
        &self,
        group_id: Uuid,
        job_id: Uuid,
        delay: Duration,
    ) -> Result<(), DebounceError> {
        let payload = serde_json::to_value(ClusterGroupJob { group_id, job_id })
            .expect("cluster job payload serializes");
        self.enqueue_delayed(QUEUE_CLUSTER, JOB_CLUSTER_GROUP, payload, delay)
            .await
            .map_err(|e| DebounceError::Schedule(e.to_string()))?;
        Ok(())
    }
}
