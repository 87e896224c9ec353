use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Timelike, Utc};
use sea_orm::sea_query::{Expr, NullOrdering, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbBackend, DbErr, EntityTrait, Order, QueryFilter, QueryOrder, Set, Statement,
    TransactionTrait,
};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::entities::meeting::{self, DEFAULT_MEETING_TITLE};
use crate::entities::photo;
use crate::services::cluster::{cluster_photos, Cluster, PhotoPoint};
use crate::services::exif::PhotoMetadata;

/// Fields the ingest path knows before background processing runs.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub group_id: Uuid,
    pub uploader_id: Uuid,
    pub content_hash: String,
    pub original_path: String,
    pub mime: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub meetings: usize,
    pub default_meeting: bool,
    pub clustered_photos: usize,
}

/// Insert a photo row unless `(group_id, content_hash)` already exists.
/// Returns the row and whether this call created it. Concurrent uploads of
/// the same bytes race on the unique index; the loser re-reads the winner's
/// row, so both callers observe the same photo id.
pub async fn insert_photo_if_absent(
    db: &DatabaseConnection,
    new: NewPhoto,
) -> Result<(photo::Model, bool), DbErr> {
    if let Some(existing) = find_by_content_hash(db, new.group_id, &new.content_hash).await? {
        return Ok((existing, false));
    }

    let now = Utc::now();
    let id = Uuid::new_v4();
    let active = photo::ActiveModel {
        id: Set(id),
        group_id: Set(new.group_id),
        uploader_id: Set(new.uploader_id),
        meeting_id: Set(None),
        content_hash: Set(new.content_hash.clone()),
        original_path: Set(new.original_path),
        thumb_path: Set(None),
        mime: Set(new.mime),
        size_bytes: Set(new.size_bytes),
        width: Set(None),
        height: Set(None),
        shot_at: Set(None),
        gps_lat: Set(None),
        gps_lon: Set(None),
        camera_make: Set(None),
        camera_model: Set(None),
        processed: Set(false),
        processing_error: Set(None),
        uploaded_at: Set(now),
        updated_at: Set(now),
    };

    let inserted = photo::Entity::insert(active)
        .on_conflict(
            OnConflict::columns([photo::Column::GroupId, photo::Column::ContentHash])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    if inserted == 0 {
        let existing = find_by_content_hash(db, new.group_id, &new.content_hash)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("photo vanished after conflict".to_string()))?;
        return Ok((existing, false));
    }

    let model = photo::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("photo vanished after insert".to_string()))?;
    Ok((model, true))
}

pub async fn find_by_content_hash(
    db: &DatabaseConnection,
    group_id: Uuid,
    content_hash: &str,
) -> Result<Option<photo::Model>, DbErr> {
    photo::Entity::find()
        .filter(photo::Column::GroupId.eq(group_id))
        .filter(photo::Column::ContentHash.eq(content_hash))
        .one(db)
        .await
}

/// Persist extracted metadata and flip the row to processed, clearing any
/// earlier processing error. One statement, so concurrent readers see
/// either the raw or the fully-processed row.
pub async fn update_photo_metadata(
    db: &DatabaseConnection,
    photo_id: Uuid,
    metadata: &PhotoMetadata,
) -> Result<(), DbErr> {
    let active = photo::ActiveModel {
        id: Set(photo_id),
        shot_at: Set(metadata.shot_at),
        gps_lat: Set(metadata.gps.map(|(lat, _)| lat)),
        gps_lon: Set(metadata.gps.map(|(_, lon)| lon)),
        width: Set(metadata.width.map(|w| w as i32)),
        height: Set(metadata.height.map(|h| h as i32)),
        camera_make: Set(metadata.camera_make.clone()),
        camera_model: Set(metadata.camera_model.clone()),
        processed: Set(true),
        processing_error: Set(None),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(())
}

/// Record a permanent processing failure. The photo stays visible with null
/// metadata and will be routed to the group's default meeting.
pub async fn mark_processing_failed(
    db: &DatabaseConnection,
    photo_id: Uuid,
    error: &str,
) -> Result<(), DbErr> {
    let active = photo::ActiveModel {
        id: Set(photo_id),
        processed: Set(true),
        processing_error: Set(Some(error.to_string())),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(())
}

pub async fn set_thumb_path(
    db: &DatabaseConnection,
    photo_id: Uuid,
    thumb_path: &str,
) -> Result<(), DbErr> {
    let active = photo::ActiveModel {
        id: Set(photo_id),
        thumb_path: Set(Some(thumb_path.to_string())),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(())
}

/// All photos of a group in clustering order: `shot_at` ascending with
/// nulls last, photo id as the tiebreaker.
pub async fn list_group_photos_ordered<C: ConnectionTrait>(
    conn: &C,
    group_id: Uuid,
) -> Result<Vec<photo::Model>, DbErr> {
    photo::Entity::find()
        .filter(photo::Column::GroupId.eq(group_id))
        .order_by_with_nulls(photo::Column::ShotAt, Order::Asc, NullOrdering::Last)
        .order_by_asc(photo::Column::Id)
        .all(conn)
        .await
}

/// Transaction-scoped advisory lock on the group. Postgres releases it at
/// commit or rollback; a second reconciler for the same group blocks here
/// until the first finishes.
pub async fn acquire_group_lock(
    txn: &DatabaseTransaction,
    group_id: Uuid,
) -> Result<(), DbErr> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock($1)",
        [group_lock_key(group_id).into()],
    ))
    .await?;
    Ok(())
}

/// Stable 64-bit lock key for a group id.
pub fn group_lock_key(group_id: Uuid) -> i64 {
    let digest = Sha256::digest(group_id.as_bytes());
    i64::from_be_bytes(digest[0..8].try_into().expect("digest has 8 bytes"))
}

/// Find or create the group's catch-all meeting for photos without a
/// timestamp. Idempotent; at most one such meeting exists per group.
pub async fn ensure_default_meeting<C: ConnectionTrait>(
    conn: &C,
    group_id: Uuid,
) -> Result<meeting::Model, DbErr> {
    if let Some(existing) = meeting::Entity::find()
        .filter(meeting::Column::GroupId.eq(group_id))
        .filter(meeting::Column::Title.eq(DEFAULT_MEETING_TITLE))
        .one(conn)
        .await?
    {
        return Ok(existing);
    }

    let now = Utc::now();
    let active = meeting::ActiveModel {
        id: Set(Uuid::new_v4()),
        group_id: Set(group_id),
        title: Set(DEFAULT_MEETING_TITLE.to_string()),
        start_time: Set(None),
        end_time: Set(None),
        meeting_date: Set(None),
        photo_count: Set(0),
        track: Set(None),
        bbox_north: Set(None),
        bbox_south: Set(None),
        bbox_east: Set(None),
        bbox_west: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    active.insert(conn).await
}

/// Derive the human-readable title for a non-default meeting from its start
/// time, e.g. `"2024-06-10 Afternoon"`. Can never collide with the default
/// meeting sentinel.
pub fn meeting_title(start: DateTime<Utc>) -> String {
    let part = match start.hour() {
        5..=11 => "Morning",
        12..=16 => "Afternoon",
        17..=20 => "Evening",
        _ => "Night",
    };
    format!("{} {}", start.format("%Y-%m-%d"), part)
}

/// Recompute the meeting partition for a group and persist the diff.
///
/// Runs under the group's advisory lock in a single transaction:
/// 1. snapshot the group's photos in clustering order,
/// 2. cluster the timestamped ones,
/// 3. match desired clusters to existing meetings by member overlap
///    (>= 50 % of the desired member set) so meeting ids survive where the
///    grouping is stable,
/// 4. route processed photos without a timestamp to the default meeting,
/// 5. delete meetings that ended up empty.
///
/// Running it twice in a row yields the same meeting set.
pub async fn recluster_group(
    db: &DatabaseConnection,
    group_id: Uuid,
    gap: chrono::Duration,
) -> Result<ReconcileSummary, DbErr> {
    let txn = db.begin().await?;
    acquire_group_lock(&txn, group_id).await?;

    let photos = list_group_photos_ordered(&txn, group_id).await?;

    let mut dated = Vec::new();
    let mut undated = Vec::new();
    for p in &photos {
        match p.shot_at {
            Some(shot_at) => dated.push(PhotoPoint {
                id: p.id,
                shot_at,
                gps: match (p.gps_lat, p.gps_lon) {
                    (Some(lat), Some(lon)) => Some((lat, lon)),
                    _ => None,
                },
            }),
            None if p.processed => undated.push(p.id),
            // Still in flight; gets a meeting once the process worker has
            // filled its metadata.
            None => {}
        }
    }

    let clusters = cluster_photos(dated, gap);

    let existing = meeting::Entity::find()
        .filter(meeting::Column::GroupId.eq(group_id))
        .all(&txn)
        .await?;
    let (mut defaults, non_default): (Vec<_>, Vec<_>) =
        existing.into_iter().partition(|m| m.is_default());
    let default_existing = if defaults.is_empty() {
        None
    } else {
        Some(defaults.remove(0))
    };
    // Any further default rows violate the one-default-per-group rule;
    // they go out with the stale set.
    let mut stale_ids: Vec<Uuid> = defaults.iter().map(|m| m.id).collect();

    let mut current_members: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for p in &photos {
        if let Some(mid) = p.meeting_id {
            current_members.entry(mid).or_default().insert(p.id);
        }
    }

    let assignments = match_meetings(&clusters, &non_default, &current_members);

    let now = Utc::now();
    let mut kept: HashSet<Uuid> = HashSet::new();
    for (cluster, reused) in clusters.iter().zip(&assignments) {
        let meeting_id = reused.unwrap_or_else(Uuid::new_v4);
        kept.insert(meeting_id);
        upsert_meeting(&txn, group_id, meeting_id, cluster, reused.is_some(), now).await?;

        photo::Entity::update_many()
            .col_expr(photo::Column::MeetingId, Expr::value(meeting_id))
            .col_expr(photo::Column::UpdatedAt, Expr::value(now))
            .filter(photo::Column::Id.is_in(cluster.members.clone()))
            .exec(&txn)
            .await?;
    }

    let default_meeting = if undated.is_empty() {
        if let Some(stale) = default_existing {
            meeting::Entity::delete_by_id(stale.id).exec(&txn).await?;
        }
        false
    } else {
        let default_meeting = match default_existing {
            Some(existing) => existing,
            None => ensure_default_meeting(&txn, group_id).await?,
        };
        photo::Entity::update_many()
            .col_expr(photo::Column::MeetingId, Expr::value(default_meeting.id))
            .col_expr(photo::Column::UpdatedAt, Expr::value(now))
            .filter(photo::Column::Id.is_in(undated.clone()))
            .exec(&txn)
            .await?;

        let mut active: meeting::ActiveModel = default_meeting.into();
        active.photo_count = Set(undated.len() as i32);
        active.updated_at = Set(now);
        active.update(&txn).await?;
        true
    };

    // Meetings the new partition no longer needs; emptied in this same
    // transaction, so they must go now (photo FKs were repointed above).
    stale_ids.extend(
        non_default
            .iter()
            .map(|m| m.id)
            .filter(|id| !kept.contains(id)),
    );
    if !stale_ids.is_empty() {
        meeting::Entity::delete_many()
            .filter(meeting::Column::Id.is_in(stale_ids))
            .exec(&txn)
            .await?;
    }

    txn.commit().await?;

    let summary = ReconcileSummary {
        meetings: clusters.len(),
        default_meeting,
        clustered_photos: clusters.iter().map(|c| c.members.len()).sum(),
    };
    info!(
        "group {}: reconciled {} meetings over {} photos (default meeting: {})",
        group_id, summary.meetings, summary.clustered_photos, summary.default_meeting
    );
    Ok(summary)
}

/// Greedy overlap matching: a desired cluster reuses an existing meeting id
/// when at least half of the cluster's members already sit in that meeting.
/// Largest overlaps claim first and each existing meeting is reused at most
/// once, keeping meeting URLs stable across incremental re-clusters.
fn match_meetings(
    clusters: &[Cluster],
    non_default: &[meeting::Model],
    current_members: &HashMap<Uuid, HashSet<Uuid>>,
) -> Vec<Option<Uuid>> {
    let mut candidates: Vec<(usize, usize, Uuid)> = Vec::new();
    for (idx, cluster) in clusters.iter().enumerate() {
        let desired: HashSet<Uuid> = cluster.members.iter().copied().collect();
        for existing in non_default {
            let Some(members) = current_members.get(&existing.id) else {
                continue;
            };
            let overlap = desired.intersection(members).count();
            if overlap > 0 && overlap * 2 >= desired.len() {
                candidates.push((overlap, idx, existing.id));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut assignments: Vec<Option<Uuid>> = vec![None; clusters.len()];
    let mut used: HashSet<Uuid> = HashSet::new();
    for (_, idx, meeting_id) in candidates {
        if assignments[idx].is_none() && !used.contains(&meeting_id) {
            assignments[idx] = Some(meeting_id);
            used.insert(meeting_id);
        }
    }
    assignments
}

async fn upsert_meeting(
    txn: &DatabaseTransaction,
    group_id: Uuid,
    meeting_id: Uuid,
    cluster: &Cluster,
    exists: bool,
    now: chrono::DateTime<Utc>,
) -> Result<(), DbErr> {
    let track = if cluster.track.is_empty() {
        None
    } else {
        Some(serde_json::to_value(
            cluster
                .track
                .iter()
                .map(|(lat, lon)| vec![*lat, *lon])
                .collect::<Vec<_>>(),
        )
        .expect("track serializes"))
    };

    let mut active = meeting::ActiveModel {
        id: Set(meeting_id),
        group_id: Set(group_id),
        title: Set(meeting_title(cluster.start)),
        start_time: Set(Some(cluster.start)),
        end_time: Set(Some(cluster.end)),
        meeting_date: Set(Some(cluster.start.date_naive())),
        photo_count: Set(cluster.members.len() as i32),
        track: Set(track),
        bbox_north: Set(cluster.bbox.map(|b| b.north)),
        bbox_south: Set(cluster.bbox.map(|b| b.south)),
        bbox_east: Set(cluster.bbox.map(|b| b.east)),
        bbox_west: Set(cluster.bbox.map(|b| b.west)),
        created_at: Set(now),
        updated_at: Set(now),
    };

    if exists {
        active.created_at = sea_orm::ActiveValue::NotSet;
        active.update(txn).await?;
    } else {
        active.insert(txn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meeting_row(id: Uuid) -> meeting::Model {
        meeting::Model {
            id,
            group_id: Uuid::new_v4(),
            title: "2024-06-10 Morning".to_string(),
            start_time: None,
            end_time: None,
            meeting_date: None,
            photo_count: 0,
            track: None,
            bbox_north: None,
            bbox_south: None,
            bbox_east: None,
            bbox_west: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cluster_of(members: Vec<Uuid>) -> Cluster {
        let start = Utc.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap();
        Cluster {
            start,
            end: start,
            members,
            track: Vec::new(),
            bbox: None,
        }
    }

    #[test]
    fn lock_key_is_stable_per_group() {
        let group = Uuid::new_v4();
        assert_eq!(group_lock_key(group), group_lock_key(group));
        assert_ne!(group_lock_key(group), group_lock_key(Uuid::new_v4()));
    }

    #[test]
    fn titles_follow_the_start_hour() {
        let date = |h| Utc.with_ymd_and_hms(2024, 6, 10, h, 0, 0).unwrap();
        assert_eq!(meeting_title(date(9)), "2024-06-10 Morning");
        assert_eq!(meeting_title(date(15)), "2024-06-10 Afternoon");
        assert_eq!(meeting_title(date(19)), "2024-06-10 Evening");
        assert_eq!(meeting_title(date(23)), "2024-06-10 Night");
        assert_eq!(meeting_title(date(2)), "2024-06-10 Night");
    }

    #[test]
    fn title_never_collides_with_default_sentinel() {
        for hour in 0..24 {
            let start = Utc.with_ymd_and_hms(2024, 6, 10, hour, 0, 0).unwrap();
            assert_ne!(meeting_title(start), DEFAULT_MEETING_TITLE);
        }
    }

    #[test]
    fn majority_overlap_preserves_meeting_id() {
        let photos: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let existing = meeting_row(Uuid::new_v4());
        let mut current = HashMap::new();
        current.insert(
            existing.id,
            photos[0..3].iter().copied().collect::<HashSet<_>>(),
        );

        // Cluster keeps 3 of its 4 members from the existing meeting.
        let clusters = vec![cluster_of(photos.clone())];
        let assignments = match_meetings(&clusters, &[existing.clone()], &current);
        assert_eq!(assignments, vec![Some(existing.id)]);
    }

    #[test]
    fn minority_overlap_gets_a_fresh_id() {
        let photos: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let existing = meeting_row(Uuid::new_v4());
        let mut current = HashMap::new();
        current.insert(
            existing.id,
            photos[0..1].iter().copied().collect::<HashSet<_>>(),
        );

        // Only 1 of 4 members carried over: below the 50% bar.
        let clusters = vec![cluster_of(photos)];
        let assignments = match_meetings(&clusters, &[existing], &current);
        assert_eq!(assignments, vec![None]);
    }

    #[test]
    fn each_existing_meeting_is_reused_at_most_once() {
        // A meeting split in two: both halves fully overlap the old meeting,
        // but only the larger half may keep its id.
        let first: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let second: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let existing = meeting_row(Uuid::new_v4());
        let mut current = HashMap::new();
        current.insert(
            existing.id,
            first.iter().chain(second.iter()).copied().collect::<HashSet<_>>(),
        );

        let clusters = vec![cluster_of(first), cluster_of(second)];
        let assignments = match_meetings(&clusters, &[existing.clone()], &current);
        assert_eq!(assignments[0], Some(existing.id));
        assert_eq!(assignments[1], None);
    }
}
