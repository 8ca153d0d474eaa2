use malsync_core::{AniListEntry, MalListStatus, MediaListStatus};
use serde::Serialize;

/// Watch status shared by both services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Watching,
    Completed,
    OnHold,
    Dropped,
    PlanToWatch,
}

impl WatchStatus {
    pub fn from_anilist(status: MediaListStatus) -> Option<Self> {
        match status {
            MediaListStatus::Current | MediaListStatus::Repeating => Some(Self::Watching),
            MediaListStatus::Completed => Some(Self::Completed),
            MediaListStatus::Paused => Some(Self::OnHold),
            MediaListStatus::Dropped => Some(Self::Dropped),
            MediaListStatus::Planning => Some(Self::PlanToWatch),
            MediaListStatus::Unknown => None,
        }
    }

    pub fn from_mal(status: &str) -> Option<Self> {
        match status {
            "watching" => Some(Self::Watching),
            "completed" => Some(Self::Completed),
            "on_hold" => Some(Self::OnHold),
            "dropped" => Some(Self::Dropped),
            "plan_to_watch" => Some(Self::PlanToWatch),
            _ => None,
        }
    }

    pub fn as_mal_str(self) -> &'static str {
        match self {
            Self::Watching => "watching",
            Self::Completed => "completed",
            Self::OnHold => "on_hold",
            Self::Dropped => "dropped",
            Self::PlanToWatch => "plan_to_watch",
        }
    }

    /// Never yields `REPEATING`; rewatching is carried by the rewatch count.
    pub fn to_anilist(self) -> MediaListStatus {
        match self {
            Self::Watching => MediaListStatus::Current,
            Self::Completed => MediaListStatus::Completed,
            Self::OnHold => MediaListStatus::Paused,
            Self::Dropped => MediaListStatus::Dropped,
            Self::PlanToWatch => MediaListStatus::Planning,
        }
    }
}

/// Maps an AniList score onto the 0-10 scale. AniList reports whatever scale
/// the user picked, so anything above 10 is read as a 100-point score.
pub fn score_from_anilist(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    let raw = raw.clamp(0.0, 100.0);
    let scaled = if raw > 10.0 { raw / 10.0 } else { raw };
    scaled.round() as u8
}

/// Inverse of [`score_from_anilist`] for the 100-point scale. A canonical 1
/// egresses as 10 and reads back as 10.
pub fn score_to_anilist(score: u8) -> f64 {
    match score.min(10) {
        0 => 0.0,
        s => f64::from(s) * 10.0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalEntry {
    pub status: Option<WatchStatus>,
    pub score: u8,
    pub progress: u32,
    pub rewatch_count: u32,
    pub is_rewatching: bool,
    pub title: String,
}

impl CanonicalEntry {
    pub fn from_anilist(entry: &AniListEntry) -> Self {
        Self {
            status: entry.status.and_then(WatchStatus::from_anilist),
            score: score_from_anilist(entry.score),
            progress: entry.progress,
            rewatch_count: entry.repeat,
            is_rewatching: entry.status == Some(MediaListStatus::Repeating),
            title: entry.title.clone(),
        }
    }

    pub fn from_mal(title: &str, status: &MalListStatus) -> Self {
        Self {
            status: status.status.as_deref().and_then(WatchStatus::from_mal),
            score: status.score.min(10),
            progress: status.num_episodes_watched,
            rewatch_count: status.num_times_rewatched,
            is_rewatching: status.is_rewatching,
            title: title.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WatchStatus; 5] = [
        WatchStatus::Watching,
        WatchStatus::Completed,
        WatchStatus::OnHold,
        WatchStatus::Dropped,
        WatchStatus::PlanToWatch,
    ];

    #[test]
    fn status_maps_round_trip_through_both_services() {
        for status in ALL {
            assert_eq!(WatchStatus::from_mal(status.as_mal_str()), Some(status));
            assert_eq!(WatchStatus::from_anilist(status.to_anilist()), Some(status));
        }
    }

    #[test]
    fn repeating_reads_as_watching() {
        assert_eq!(
            WatchStatus::from_anilist(MediaListStatus::Repeating),
            Some(WatchStatus::Watching)
        );
        assert_eq!(WatchStatus::from_anilist(MediaListStatus::Unknown), None);
        assert_eq!(WatchStatus::from_mal("rewatching"), None);
        assert_eq!(WatchStatus::from_mal(""), None);
    }

    #[test]
    fn score_ingest_handles_both_scales() {
        assert_eq!(score_from_anilist(0.0), 0);
        assert_eq!(score_from_anilist(7.0), 7);
        assert_eq!(score_from_anilist(7.5), 8);
        assert_eq!(score_from_anilist(85.0), 9);
        assert_eq!(score_from_anilist(84.0), 8);
        assert_eq!(score_from_anilist(100.0), 10);
        assert_eq!(score_from_anilist(250.0), 10);
        assert_eq!(score_from_anilist(-3.0), 0);
        assert_eq!(score_from_anilist(f64::NAN), 0);
    }

    #[test]
    fn score_round_trips_outside_the_ambiguous_point() {
        for s in std::iter::once(0).chain(2..=10) {
            assert_eq!(score_from_anilist(score_to_anilist(s)), s, "score {s}");
        }
        // 1 becomes 10 on the 100-point scale and reads back as 10.
        assert_eq!(score_from_anilist(score_to_anilist(1)), 10);
    }

    #[test]
    fn score_ingest_is_a_fixed_point_on_its_output() {
        for raw in 0..=100 {
            let once = score_from_anilist(f64::from(raw));
            assert_eq!(score_from_anilist(f64::from(once)), once);
        }
    }

    #[test]
    fn anilist_entry_marks_rewatching_only_for_repeating() {
        let mut entry = AniListEntry {
            media_id: 1,
            mal_id: Some(10),
            title: "Title".into(),
            status: Some(MediaListStatus::Repeating),
            score: 90.0,
            progress: 3,
            repeat: 1,
        };
        let canonical = CanonicalEntry::from_anilist(&entry);
        assert_eq!(canonical.status, Some(WatchStatus::Watching));
        assert!(canonical.is_rewatching);
        assert_eq!(canonical.score, 9);

        entry.status = Some(MediaListStatus::Current);
        assert!(!CanonicalEntry::from_anilist(&entry).is_rewatching);
    }
}
