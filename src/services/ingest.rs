use sea_orm::EntityTrait;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::entities::group;
use crate::error::AppError;
use crate::services::queue::{ProcessPhotoJob, JOB_PROCESS_PHOTO, QUEUE_DEFAULT};
use crate::services::repo::{self, NewPhoto};
use crate::services::storage::{sha256_hex, StorageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Accepted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestOutcome {
    pub photo_id: Uuid,
    pub status: IngestStatus,
}

/// File extension under which an accepted mime type is stored.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/tiff" => Some("tif"),
        "image/heic" => Some("heic"),
        "image/heif" => Some("heif"),
        _ => None,
    }
}

/// Synchronous half of the pipeline: validate, hash, persist the original,
/// insert the row, enqueue background processing, poke the debounce window.
/// Returns as soon as the row is durable; extraction and clustering are
/// entirely background concerns.
pub async fn ingest_photo(
    ctx: &AppContext,
    group_id: Uuid,
    uploader_id: Uuid,
    bytes: &[u8],
    declared_mime: &str,
) -> Result<IngestOutcome, AppError> {
    if bytes.is_empty() {
        return Err(AppError::BadRequest("Empty upload".to_string()));
    }
    if bytes.len() > ctx.config.max_upload_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "File too large. Maximum size: {} bytes",
            ctx.config.max_upload_bytes
        )));
    }
    let Some(ext) = extension_for_mime(declared_mime) else {
        return Err(AppError::BadRequest(format!(
            "Unsupported media type: {}",
            declared_mime
        )));
    };

    if group::Entity::find_by_id(group_id)
        .one(&ctx.db)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("Group not found".to_string()));
    }

    let content_hash = sha256_hex(bytes);
    let original_path = ctx
        .storage
        .write(StorageKind::Original, &content_hash, Some(ext), bytes)
        .map_err(|e| AppError::InternalServerError(format!("Failed to store upload: {}", e)))?;

    let (photo, inserted) = repo::insert_photo_if_absent(
        &ctx.db,
        NewPhoto {
            group_id,
            uploader_id,
            content_hash,
            original_path: original_path.display().to_string(),
            mime: declared_mime.to_string(),
            size_bytes: bytes.len() as i64,
        },
    )
    .await?;

    if !inserted {
        info!("group {}: duplicate upload of photo {}", group_id, photo.id);
        return Ok(IngestOutcome {
            photo_id: photo.id,
            status: IngestStatus::Duplicate,
        });
    }

    let payload = serde_json::to_value(ProcessPhotoJob { photo_id: photo.id })
        .expect("process job payload serializes");
    ctx.queue
        .enqueue(QUEUE_DEFAULT, JOB_PROCESS_PHOTO, payload)
        .await?;

    // KV hiccups must not fail an upload whose row is already durable; the
    // process worker notifies again once metadata lands.
    if let Err(e) = ctx.debounce.notify(group_id).await {
        warn!("group {}: debounce notify failed at ingest: {}", group_id, e);
    }

    info!(
        "group {}: accepted photo {} ({} bytes)",
        group_id, photo.id, bytes.len()
    );
    Ok(IngestOutcome {
        photo_id: photo.id,
        status: IngestStatus::Accepted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_supported_image_mimes() {
        assert_eq!(extension_for_mime("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for_mime("image/png"), Some("png"));
        assert_eq!(extension_for_mime("image/tiff"), Some("tif"));
        assert_eq!(extension_for_mime("image/heic"), Some("heic"));
        assert_eq!(extension_for_mime("image/heif"), Some("heif"));
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(extension_for_mime("image/gif"), None);
        assert_eq!(extension_for_mime("video/mp4"), None);
        assert_eq!(extension_for_mime("application/octet-stream"), None);
        assert_eq!(extension_for_mime(""), None);
    }
}
