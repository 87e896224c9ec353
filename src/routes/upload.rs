use axum::{
    extract::{Multipart, State},
    response::Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::AppError;
use crate::services::ingest::{self, IngestStatus};

#[derive(Serialize)]
pub struct PhotoUploadResponse {
    id: Uuid,
    status: IngestStatus,
}

/// Multipart upload: `group_id` and `uploader_id` text fields plus a `file`
/// field. Authorization is the caller's concern; this handler trusts the
/// ids it is given.
pub async fn upload_photo(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<PhotoUploadResponse>, AppError> {
    let mut group_id: Option<Uuid> = None;
    let mut uploader_id: Option<Uuid> = None;
    let mut file: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::BadRequest("Invalid multipart data".to_string()))?
    {
        match field.name() {
            Some("group_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| AppError::BadRequest("Invalid group_id field".to_string()))?;
                group_id = Some(
                    raw.parse()
                        .map_err(|_| AppError::BadRequest("group_id is not a UUID".to_string()))?,
                );
            }
            Some("uploader_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| AppError::BadRequest("Invalid uploader_id field".to_string()))?;
                uploader_id = Some(
                    raw.parse().map_err(|_| {
                        AppError::BadRequest("uploader_id is not a UUID".to_string())
                    })?,
                );
            }
            Some("file") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(|_| {
                    AppError::InternalServerError("Failed to read file bytes".to_string())
                })?;
                file = Some((data.to_vec(), content_type));
            }
            _ => {}
        }
    }

    let group_id =
        group_id.ok_or_else(|| AppError::BadRequest("Missing group_id field".to_string()))?;
    let uploader_id =
        uploader_id.ok_or_else(|| AppError::BadRequest("Missing uploader_id field".to_string()))?;
    let (bytes, mime) =
        file.ok_or_else(|| AppError::BadRequest("No file field found".to_string()))?;

    let outcome = ingest::ingest_photo(&ctx, group_id, uploader_id, &bytes, &mime).await?;

    Ok(Json(PhotoUploadResponse {
        id: outcome.photo_id,
        status: outcome.status,
    }))
}
