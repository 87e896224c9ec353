use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// One photo as the cluster engine sees it: identity, a known timestamp, and
/// an optional GPS fix. Photos without a timestamp never reach the engine;
/// they are routed to the group's default meeting by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotoPoint {
    pub id: Uuid,
    pub shot_at: DateTime<Utc>,
    pub gps: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// A contiguous run of photos with no interior gap larger than the meeting
/// gap. `members` and `track` are in `(shot_at, id)` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub members: Vec<Uuid>,
    pub track: Vec<(f64, f64)>,
    pub bbox: Option<Bbox>,
}

/// Single-pass gap clustering. Sorts by `(shot_at, id)` for deterministic
/// output, then starts a new cluster whenever the gap to the previous photo
/// exceeds `gap`. Pure: no I/O, same input always yields the same clusters.
pub fn cluster_photos(mut photos: Vec<PhotoPoint>, gap: Duration) -> Vec<Cluster> {
    if photos.is_empty() {
        return Vec::new();
    }

    photos.sort_by(|a, b| a.shot_at.cmp(&b.shot_at).then(a.id.cmp(&b.id)));

    let mut clusters = Vec::new();
    let mut current = vec![photos[0]];

    for window in photos.windows(2) {
        let (prev, next) = (window[0], window[1]);
        if next.shot_at - prev.shot_at > gap {
            clusters.push(finish_cluster(std::mem::take(&mut current)));
            current.push(next);
        } else {
            current.push(next);
        }
    }
    clusters.push(finish_cluster(current));

    clusters
}

fn finish_cluster(members: Vec<PhotoPoint>) -> Cluster {
    let start = members.first().expect("cluster is never empty").shot_at;
    let end = members.last().expect("cluster is never empty").shot_at;
    let track: Vec<(f64, f64)> = members.iter().filter_map(|p| p.gps).collect();
    let bbox = bbox_of(&track);

    Cluster {
        start,
        end,
        members: members.into_iter().map(|p| p.id).collect(),
        track,
        bbox,
    }
}

fn bbox_of(track: &[(f64, f64)]) -> Option<Bbox> {
    let (first, rest) = track.split_first()?;
    let mut bbox = Bbox {
        north: first.0,
        south: first.0,
        east: first.1,
        west: first.1,
    };
    for (lat, lon) in rest {
        bbox.north = bbox.north.max(*lat);
        bbox.south = bbox.south.min(*lat);
        bbox.east = bbox.east.max(*lon);
        bbox.west = bbox.west.min(*lon);
    }
    Some(bbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, h, m, 0).unwrap()
    }

    fn point(h: u32, m: u32) -> PhotoPoint {
        PhotoPoint {
            id: Uuid::new_v4(),
            shot_at: at(h, m),
            gps: None,
        }
    }

    fn gap_hours(h: i64) -> Duration {
        Duration::hours(h)
    }

    #[test]
    fn empty_input_yields_no_clusters() {
        assert!(cluster_photos(Vec::new(), gap_hours(4)).is_empty());
    }

    #[test]
    fn single_photo_is_its_own_cluster() {
        let p = point(10, 0);
        let clusters = cluster_photos(vec![p], gap_hours(4));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![p.id]);
        assert_eq!(clusters[0].start, clusters[0].end);
    }

    #[test]
    fn day_gap_creates_two_meetings() {
        // 24h apart with a 4h gap: two clusters of one photo each.
        let a = PhotoPoint {
            id: Uuid::new_v4(),
            shot_at: Utc.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap(),
            gps: None,
        };
        let b = PhotoPoint {
            id: Uuid::new_v4(),
            shot_at: Utc.with_ymd_and_hms(2024, 6, 11, 10, 0, 0).unwrap(),
            gps: None,
        };
        let clusters = cluster_photos(vec![b, a], gap_hours(4));
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![a.id]);
        assert_eq!(clusters[1].members, vec![b.id]);
    }

    #[test]
    fn interior_gap_just_over_threshold_splits() {
        // 10:00, 10:30, 15:00 with a 4h gap. 10:30 -> 15:00 is 4.5h, so the
        // afternoon photo starts a second cluster.
        let photos = vec![point(10, 0), point(10, 30), point(15, 0)];
        let clusters = cluster_photos(photos.clone(), gap_hours(4));
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![photos[0].id, photos[1].id]);
        assert_eq!(clusters[1].members, vec![photos[2].id]);
        assert_eq!(clusters[0].start, at(10, 0));
        assert_eq!(clusters[0].end, at(10, 30));
    }

    #[test]
    fn gap_exactly_at_threshold_stays_together() {
        let photos = vec![point(10, 0), point(14, 0)];
        let clusters = cluster_photos(photos, gap_hours(4));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 2);
    }

    #[test]
    fn burst_collapses_to_one_cluster() {
        // Ten photos 30s apart.
        let photos: Vec<PhotoPoint> = (0..10)
            .map(|k| PhotoPoint {
                id: Uuid::new_v4(),
                shot_at: Utc.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap()
                    + Duration::seconds(30 * k),
                gps: None,
            })
            .collect();
        let clusters = cluster_photos(photos.clone(), gap_hours(4));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 10);
        assert_eq!(clusters[0].start, at(10, 0));
        assert_eq!(
            clusters[0].end,
            Utc.with_ymd_and_hms(2024, 6, 10, 10, 4, 30).unwrap()
        );
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let shot_at = at(12, 0);
        let mut ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let photos: Vec<PhotoPoint> = ids
            .iter()
            .map(|id| PhotoPoint {
                id: *id,
                shot_at,
                gps: None,
            })
            .collect();

        let clusters = cluster_photos(photos, gap_hours(4));
        ids.sort();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, ids);
    }

    #[test]
    fn purity_no_interior_gap_exceeds_threshold() {
        let gap = gap_hours(4);
        // Irregular spacing crossing the threshold twice.
        let minutes = [0i64, 20, 50, 300, 310, 620, 640, 641];
        let photos: Vec<PhotoPoint> = minutes
            .iter()
            .map(|m| PhotoPoint {
                id: Uuid::new_v4(),
                shot_at: at(0, 0) + Duration::minutes(*m),
                gps: None,
            })
            .collect();
        let by_id: std::collections::HashMap<Uuid, DateTime<Utc>> =
            photos.iter().map(|p| (p.id, p.shot_at)).collect();

        let clusters = cluster_photos(photos, gap);

        for cluster in &clusters {
            for pair in cluster.members.windows(2) {
                assert!(by_id[&pair[1]] - by_id[&pair[0]] <= gap);
            }
        }
        for pair in clusters.windows(2) {
            assert!(pair[1].start - pair[0].end > gap);
        }
    }

    #[test]
    fn track_and_bbox_come_from_gps_members_in_time_order() {
        let a = PhotoPoint {
            id: Uuid::new_v4(),
            shot_at: at(10, 0),
            gps: Some((37.5665, 126.9780)),
        };
        let b = PhotoPoint {
            id: Uuid::new_v4(),
            shot_at: at(10, 10),
            gps: None,
        };
        let c = PhotoPoint {
            id: Uuid::new_v4(),
            shot_at: at(10, 20),
            gps: Some((37.5796, 126.9770)),
        };

        let clusters = cluster_photos(vec![c, a, b], gap_hours(4));
        assert_eq!(clusters.len(), 1);
        assert_eq!(
            clusters[0].track,
            vec![(37.5665, 126.9780), (37.5796, 126.9770)]
        );
        let bbox = clusters[0].bbox.unwrap();
        assert_eq!(bbox.north, 37.5796);
        assert_eq!(bbox.south, 37.5665);
        assert_eq!(bbox.east, 126.9780);
        assert_eq!(bbox.west, 126.9770);
    }

    #[test]
    fn no_gps_means_no_bbox() {
        let clusters = cluster_photos(vec![point(10, 0)], gap_hours(4));
        assert!(clusters[0].track.is_empty());
        assert!(clusters[0].bbox.is_none());
    }
}
