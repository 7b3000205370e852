use crate::{
    poller::PollHealth,
    severity::Severity,
    token::ViewToken,
};
use chrono::{
    DateTime,
    Utc,
};
use shardboard_api::wire::ShardStatus;

/// Derived, recomputed-per-merge view state for one shard. Holds no series
/// data; chart points travel separately in [`ShardUpdate`].
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedShardView {
    pub status: ShardStatus,
    pub stored_elements: u64,
    pub requests_per_sec: u64,
    /// In `[0, 100]`; values above capacity are capped for display.
    pub request_utilization_pct: f64,
    /// Not capped; above 100 means overcommit.
    pub storage_utilization_pct: f64,
    pub severity: Severity,
}

/// One merge result for one shard, handed to the view adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct ShardUpdate {
    pub group_id: String,
    pub group_token: ViewToken,
    pub shard_id: String,
    pub shard_token: ViewToken,
    pub view: DerivedShardView,
    /// Chart point appended to the per-second series by this merge.
    pub sec_point: (DateTime<Utc>, u64),
    /// Chart point appended to the per-minute series, present only on
    /// merges that crossed a wall-clock minute boundary.
    pub min_point: Option<(DateTime<Utc>, u64)>,
}

/// Presentation boundary. Implementations update textual/graphical
/// indicators and append chart points; all percentage and severity logic
/// stays on the engine side.
pub trait ViewSink: Send + Sync {
    fn shard_updated(&self, update: ShardUpdate);

    /// Poll health transitions for a group: `Stale` once consecutive poll
    /// failures pass the threshold, back to `Live` on the next success.
    fn poll_health_changed(&self, group_id: &str, health: PollHealth);
}

/// Sink that drops everything. Useful when only the registry state is of
/// interest.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ViewSink for NullSink {
    fn shard_updated(&self, _update: ShardUpdate) {}

    fn poll_health_changed(&self, _group_id: &str, _health: PollHealth) {}
}
