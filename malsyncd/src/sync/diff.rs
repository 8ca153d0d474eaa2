use malsync_core::MalListUpdate;

use super::normalize::CanonicalEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffReason {
    New,
    Status,
    Score,
    Progress,
    Rewatch,
}

/// Reasons the target must be written to match `source`. Empty means the two
/// sides already agree.
pub fn diff(source: &CanonicalEntry, target: Option<&CanonicalEntry>) -> Vec<DiffReason> {
    let Some(target) = target else {
        return vec![DiffReason::New];
    };

    let mut reasons = Vec::new();
    // An underivable source status never forces a write.
    if source.status.is_some() && source.status != target.status {
        reasons.push(DiffReason::Status);
    }
    if source.score != target.score {
        reasons.push(DiffReason::Score);
    }
    if source.progress != target.progress {
        reasons.push(DiffReason::Progress);
    }
    if source.rewatch_count > 0 && source.rewatch_count != target.rewatch_count {
        reasons.push(DiffReason::Rewatch);
    }
    reasons
}

pub fn mal_update(source: &CanonicalEntry) -> MalListUpdate {
    let rewatched = source.rewatch_count > 0;
    MalListUpdate {
        status: source.status.map(|s| s.as_mal_str().to_string()),
        score: Some(source.score),
        num_watched_episodes: Some(source.progress),
        num_times_rewatched: rewatched.then_some(source.rewatch_count),
        is_rewatching: rewatched.then_some(source.is_rewatching),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::normalize::WatchStatus;

    fn entry(status: Option<WatchStatus>, score: u8, progress: u32, rewatch: u32) -> CanonicalEntry {
        CanonicalEntry {
            status,
            score,
            progress,
            rewatch_count: rewatch,
            is_rewatching: false,
            title: "Title".into(),
        }
    }

    #[test]
    fn missing_counterpart_is_new() {
        let source = entry(Some(WatchStatus::Watching), 0, 0, 0);
        assert_eq!(diff(&source, None), vec![DiffReason::New]);
    }

    #[test]
    fn equal_entries_need_no_write() {
        let source = entry(Some(WatchStatus::Completed), 8, 12, 1);
        let target = source.clone();
        assert!(diff(&source, Some(&target)).is_empty());
    }

    #[test]
    fn title_and_rewatch_flag_do_not_count() {
        let source = entry(Some(WatchStatus::Completed), 8, 12, 0);
        let mut target = source.clone();
        target.title = "Other".into();
        target.is_rewatching = true;
        assert!(diff(&source, Some(&target)).is_empty());
    }

    #[test]
    fn unknown_source_status_is_ignored() {
        let source = entry(None, 5, 3, 0);
        let target = entry(Some(WatchStatus::Dropped), 5, 3, 0);
        assert!(diff(&source, Some(&target)).is_empty());
    }

    #[test]
    fn rewatch_only_compared_when_source_has_one() {
        let source = entry(Some(WatchStatus::Completed), 8, 12, 0);
        let target = entry(Some(WatchStatus::Completed), 8, 12, 3);
        assert!(diff(&source, Some(&target)).is_empty());

        let source = entry(Some(WatchStatus::Completed), 8, 12, 2);
        assert_eq!(diff(&source, Some(&target)), vec![DiffReason::Rewatch]);
    }

    #[test]
    fn reports_every_differing_field() {
        let source = entry(Some(WatchStatus::Completed), 9, 24, 0);
        let target = entry(Some(WatchStatus::Watching), 7, 10, 0);
        assert_eq!(
            diff(&source, Some(&target)),
            vec![DiffReason::Status, DiffReason::Score, DiffReason::Progress]
        );
    }

    #[test]
    fn update_payload_carries_rewatch_fields_only_when_rewatched() {
        let plain = mal_update(&entry(Some(WatchStatus::OnHold), 6, 4, 0));
        assert_eq!(plain.status.as_deref(), Some("on_hold"));
        assert_eq!(plain.score, Some(6));
        assert_eq!(plain.num_watched_episodes, Some(4));
        assert_eq!(plain.num_times_rewatched, None);
        assert_eq!(plain.is_rewatching, None);

        let mut source = entry(None, 0, 1, 2);
        source.is_rewatching = true;
        let rewatched = mal_update(&source);
        assert_eq!(rewatched.status, None);
        assert_eq!(rewatched.num_times_rewatched, Some(2));
        assert_eq!(rewatched.is_rewatching, Some(true));
    }
}
