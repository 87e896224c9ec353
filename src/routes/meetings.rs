use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use sea_orm::sea_query::NullOrdering;
use sea_orm::{ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::AppContext;
use crate::entities::meeting::{self, Entity as Meeting};
use crate::entities::photo;
use crate::error::AppError;
use crate::routes::photos::PhotoResponse;

#[derive(Deserialize)]
pub struct MeetingFilter {
    pub group_id: Uuid,
}

#[derive(Serialize)]
pub struct MeetingResponse {
    pub id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub is_default: bool,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub meeting_date: Option<chrono::NaiveDate>,
    pub photo_count: i32,
    pub track: Option<serde_json::Value>,
    pub bbox_north: Option<f64>,
    pub bbox_south: Option<f64>,
    pub bbox_east: Option<f64>,
    pub bbox_west: Option<f64>,
}

impl From<meeting::Model> for MeetingResponse {
    fn from(model: meeting::Model) -> Self {
        let is_default = model.is_default();
        Self {
            id: model.id,
            group_id: model.group_id,
            title: model.title,
            is_default,
            start_time: model.start_time,
            end_time: model.end_time,
            meeting_date: model.meeting_date,
            photo_count: model.photo_count,
            track: model.track,
            bbox_north: model.bbox_north,
            bbox_south: model.bbox_south,
            bbox_east: model.bbox_east,
            bbox_west: model.bbox_west,
        }
    }
}

#[derive(Serialize)]
pub struct MeetingDetailResponse {
    #[serde(flatten)]
    pub meeting: MeetingResponse,
    pub photos: Vec<PhotoResponse>,
}

/// Meetings of a group in timeline order; the default meeting, which has no
/// start time, sorts last.
pub async fn list_meetings(
    State(ctx): State<AppContext>,
    Query(filter): Query<MeetingFilter>,
) -> Result<Json<Vec<MeetingResponse>>, AppError> {
    let meetings = Meeting::find()
        .filter(meeting::Column::GroupId.eq(filter.group_id))
        .order_by_with_nulls(meeting::Column::StartTime, Order::Asc, NullOrdering::Last)
        .all(&ctx.db)
        .await?;

    Ok(Json(meetings.into_iter().map(MeetingResponse::from).collect()))
}

pub async fn get_meeting(
    State(ctx): State<AppContext>,
    Path(meeting_id): Path<Uuid>,
) -> Result<Json<MeetingDetailResponse>, AppError> {
    let meeting = Meeting::find_by_id(meeting_id)
        .one(&ctx.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Meeting not found".to_string()))?;

    let photos = photo::Entity::find()
        .filter(photo::Column::MeetingId.eq(meeting.id))
        .order_by_with_nulls(photo::Column::ShotAt, Order::Asc, NullOrdering::Last)
        .order_by_asc(photo::Column::Id)
        .all(&ctx.db)
        .await?;

    Ok(Json(MeetingDetailResponse {
        meeting: meeting.into(),
        photos: photos.into_iter().map(PhotoResponse::from).collect(),
    }))
}
