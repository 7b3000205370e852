//! Live telemetry synchronization engine for the shardboard client.
//!
//! The registry owns group metadata and per-shard time series, the merge
//! engine folds polled snapshots into them, and the poll scheduler drives
//! the fetch→merge pipeline with one cancellable task per watched group.
//! Rendering is left to a [`ViewSink`] implementation supplied by the
//! embedding application.

#[macro_use]
extern crate tracing;

mod merge;
mod poller;
mod registry;
mod series;
mod severity;
mod token;
mod view;

pub use merge::MergeEngine;
pub use poller::{
    GroupPoller,
    PollHealth,
    PollScheduler,
    SnapshotFetcher,
};
pub use registry::{
    Group,
    GroupRegistry,
    RegistryError,
    ShardState,
};
pub use series::{
    MinuteGate,
    SampleSeries,
};
pub use severity::{
    request_utilization,
    round2,
    storage_utilization,
    Severity,
};
pub use token::{
    normalize,
    ViewToken,
};
pub use view::{
    DerivedShardView,
    ShardUpdate,
    ViewSink,
};
