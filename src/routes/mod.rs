mod home;
mod jobs;
mod meetings;
pub mod photos;
mod upload;

use axum::{
    routing::{get, post},
    Router,
};

use crate::context::AppContext;

pub fn create_routes(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(home::root))
        .route("/upload", post(upload::upload_photo))
        .route("/photos", get(photos::list_photos))
        .route("/photos/{photo_id}", get(photos::get_photo))
        .route("/meetings", get(meetings::list_meetings))
        .route("/meetings/{meeting_id}", get(meetings::get_meeting))
        .route("/jobs", get(jobs::list_jobs))
        .with_state(ctx)
}
