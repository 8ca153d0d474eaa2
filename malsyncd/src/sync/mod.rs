pub mod diff;
pub mod engine;
mod full;
pub mod ledger;
pub mod live;
pub mod normalize;
pub mod progress;
pub mod remote;
#[cfg(test)]
mod testing;

pub use engine::{
    DeletionPolicy, Direction, EngineTimings, RunState, SyncCounts, SyncEngine, SyncError,
    SyncReport, TargetId,
};
pub use live::{EntryChanged, LiveOutcome, LiveSettings};
pub use progress::{AuditTrail, ChangeAction, ChangeRecord, ProgressSink, Severity, TracingSink};
pub use remote::{AniListCollection, MalList};
