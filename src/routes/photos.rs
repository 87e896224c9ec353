use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::AppContext;
use crate::entities::photo::{self, Entity as Photo};
use crate::error::AppError;
use crate::pagination::Pagination;

#[derive(Deserialize)]
pub struct PhotoFilter {
    pub group_id: Uuid,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Serialize)]
pub struct PhotoResponse {
    pub id: Uuid,
    pub group_id: Uuid,
    pub uploader_id: Uuid,
    pub meeting_id: Option<Uuid>,
    pub thumb_path: Option<String>,
    pub mime: String,
    pub size_bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub shot_at: Option<chrono::DateTime<chrono::Utc>>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

impl From<photo::Model> for PhotoResponse {
    fn from(model: photo::Model) -> Self {
        Self {
            id: model.id,
            group_id: model.group_id,
            uploader_id: model.uploader_id,
            meeting_id: model.meeting_id,
            thumb_path: model.thumb_path,
            mime: model.mime,
            size_bytes: model.size_bytes,
            width: model.width,
            height: model.height,
            shot_at: model.shot_at,
            gps_lat: model.gps_lat,
            gps_lon: model.gps_lon,
            camera_make: model.camera_make,
            camera_model: model.camera_model,
            processed: model.processed,
            processing_error: model.processing_error,
            uploaded_at: model.uploaded_at,
        }
    }
}

#[derive(Serialize)]
pub struct PhotoListResponse {
    pub photos: Vec<PhotoResponse>,
    pub total: u64,
}

pub async fn list_photos(
    State(ctx): State<AppContext>,
    Query(filter): Query<PhotoFilter>,
) -> Result<Json<PhotoListResponse>, AppError> {
    let query = Photo::find().filter(photo::Column::GroupId.eq(filter.group_id));

    let total = query.clone().count(&ctx.db).await?;
    let photos = query
        .order_by_desc(photo::Column::UploadedAt)
        .offset(filter.pagination.offset())
        .limit(filter.pagination.limit())
        .all(&ctx.db)
        .await?;

    Ok(Json(PhotoListResponse {
        photos: photos.into_iter().map(PhotoResponse::from).collect(),
        total,
    }))
}

pub async fn get_photo(
    State(ctx): State<AppContext>,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<PhotoResponse>, AppError> {
    let photo = Photo::find_by_id(photo_id)
        .one(&ctx.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Photo not found".to_string()))?;

    Ok(Json(photo.into()))
}
