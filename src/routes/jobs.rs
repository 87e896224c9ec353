use axum::{
    extract::{Query, State},
    response::Json,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::AppContext;
use crate::entities::job::{self, Entity as Job};
use crate::error::AppError;
use crate::pagination::Pagination;

#[derive(Deserialize)]
pub struct JobFilter {
    pub status: Option<String>,
    pub queue: Option<String>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub status: String,
    pub payload: serde_json::Value,
    pub run_at: chrono::DateTime<chrono::Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<job::Model> for JobResponse {
    fn from(model: job::Model) -> Self {
        Self {
            id: model.id,
            queue: model.queue,
            name: model.name,
            status: model.status,
            payload: model.payload,
            run_at: model.run_at,
            attempts: model.attempts,
            last_error: model.last_error,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: u64,
}

/// Operational visibility into the background queues: filter by status
/// (pending, processing, completed, failed) and queue name.
pub async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<JobListResponse>, AppError> {
    let mut query = Job::find().order_by_desc(job::Column::CreatedAt);

    if let Some(status) = filter.status {
        query = query.filter(job::Column::Status.eq(status));
    }
    if let Some(queue) = filter.queue {
        query = query.filter(job::Column::Queue.eq(queue));
    }

    let total = query.clone().count(&ctx.db).await?;
    let jobs = query
        .offset(filter.pagination.offset())
        .limit(filter.pagination.limit())
        .all(&ctx.db)
        .await?;

    Ok(Json(JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
    }))
}
