//! Serde mirrors of the backend's JSON payloads. Field names follow the
//! wire format exactly, renames are applied where the Rust name differs.

use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;

/// One group as returned by the group listing call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: String,
    /// Capability secret required to query this group's shard telemetry.
    pub secret: String,
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(rename = "tot_shards")]
    pub num_shards: i64,
    #[serde(rename = "max_elems")]
    pub max_elements: u64,
    pub max_req_sec: u64,
    #[serde(rename = "max_insert_serq", default)]
    pub max_insert_req_sec: u64,
    #[serde(default)]
    pub max_score: u8,
}

/// Lifecycle state of the record tree backing one shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ShardStatus {
    #[serde(rename = "STARTING")]
    #[strum(to_string = "STARTING")]
    Starting,
    #[serde(rename = "LOADING")]
    #[strum(to_string = "LOADING")]
    Loading,
    #[serde(rename = "ACTIVE")]
    #[strum(to_string = "ACTIVE")]
    Active,
    #[serde(rename = "NO_RECORDS")]
    #[strum(to_string = "NO_RECORDS")]
    NoRecords,
}

/// Per-shard operational metrics from one snapshot request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawShardMetrics {
    pub stored_elements: u64,
    pub rec_tree_status: ShardStatus,
    /// Requests per second, oldest first. The last entry is the current value.
    #[serde(rename = "queries_by_sec")]
    pub queries_by_sec: Vec<u64>,
    /// Requests per minute, oldest first.
    #[serde(rename = "queries_by_min")]
    pub queries_by_min: Vec<u64>,
}

impl RawShardMetrics {
    pub fn latest_per_sec(&self) -> Option<u64> {
        self.queries_by_sec.last().copied()
    }

    pub fn latest_per_min(&self) -> Option<u64> {
        self.queries_by_min.last().copied()
    }
}

/// One poll's full set of per-shard metrics for a group, keyed by the
/// opaque host identifier of the shard.
pub type ShardSnapshot = HashMap<String, RawShardMetrics>;

/// Acknowledgment of a group creation, carrying the new capability secret.
#[derive(Clone, Debug, Deserialize)]
pub struct CreateGroupAck {
    pub success: bool,
    pub key: String,
}

/// One billing history line.
#[derive(Clone, Debug, Deserialize)]
pub struct BillingLine {
    pub group: String,
    pub instances: i64,
    #[serde(rename = "type")]
    pub group_type: String,
    /// Unix seconds.
    pub from: i64,
    /// Unix seconds.
    pub to: i64,
    pub price: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BillingInfo {
    #[serde(default)]
    pub history: Vec<BillingLine>,
}

/// One account-activity log line, as shown on the account panel.
#[derive(Clone, Debug, Deserialize)]
pub struct ActivityLogLine {
    /// Unix seconds.
    pub ts: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub ip: String,
    pub desc: String,
}

/// Activity log lines grouped by category.
pub type ActivityLogs = HashMap<String, Vec<ActivityLogLine>>;
