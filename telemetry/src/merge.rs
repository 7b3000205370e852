use crate::{
    registry::{
        GroupRegistry,
        RegistryError,
    },
    severity::{
        request_utilization,
        storage_utilization,
        Severity,
    },
    view::{
        DerivedShardView,
        ShardUpdate,
    },
};
use chrono::{
    DateTime,
    Duration,
    Utc,
};
use shardboard_api::wire::ShardSnapshot;

/// Folds polled snapshots into registry state and derives view state.
///
/// The engine is the only series writer; it never touches presentation.
#[derive(Clone, Debug)]
pub struct MergeEngine {
    registry: GroupRegistry,
}

impl MergeEngine {
    pub fn new(registry: GroupRegistry) -> Self {
        Self { registry }
    }

    /// Merge one snapshot for a group.
    ///
    /// `issued_at` is the wall-clock timestamp at which the snapshot request
    /// was issued. Overlapping polls can complete out of order; a response
    /// whose issue timestamp is not newer than a shard's last applied one is
    /// discarded for that shard, so a late stale completion can never
    /// overwrite fresher samples.
    pub fn merge(
        &self,
        group_id: &str,
        issued_at: DateTime<Utc>,
        snapshot: &ShardSnapshot,
    ) -> Result<Vec<ShardUpdate>, RegistryError> {
        self.registry.with_group_mut(group_id, |group| {
            let max_elements = group.max_elements;
            let max_req_sec = group.max_req_sec;
            let group_token = group.token.clone();
            let mut updates = Vec::with_capacity(snapshot.len());

            for (shard_id, metrics) in snapshot {
                let Some(latest_sec) = metrics.latest_per_sec() else {
                    debug!(shard_id, "snapshot carries no per-second samples, skipping");
                    continue;
                };

                let shard = group.shard_entry(shard_id)?;

                if shard.last_applied.is_some_and(|last| issued_at <= last) {
                    debug!(shard_id, %issued_at, "discarding stale snapshot response");
                    continue;
                }

                // First sighting: seed the charts from the snapshot history,
                // bounded to the most recent samples.
                if shard.last_applied.is_none() {
                    shard.req_sec_series =
                        crate::series::SampleSeries::seed(issued_at, &metrics.queries_by_sec, Duration::seconds(1));
                    shard.req_min_series =
                        crate::series::SampleSeries::seed(issued_at, &metrics.queries_by_min, Duration::seconds(60));
                }

                shard.req_sec_series.push(issued_at, latest_sec);
                let min_point = (shard.minute_gate.admit(issued_at))
                    .then(|| metrics.latest_per_min())
                    .flatten()
                    .map(|latest_min| {
                        shard.req_min_series.push(issued_at, latest_min);
                        (issued_at, latest_min)
                    });

                shard.status = metrics.rec_tree_status;
                shard.stored_elements = metrics.stored_elements;
                shard.last_applied = Some(issued_at);

                let request_utilization_pct = request_utilization(latest_sec, max_req_sec);
                updates.push(ShardUpdate {
                    group_id: group_id.to_string(),
                    group_token: group_token.clone(),
                    shard_id: shard_id.clone(),
                    shard_token: shard.token.clone(),
                    view: DerivedShardView {
                        status: metrics.rec_tree_status,
                        stored_elements: metrics.stored_elements,
                        requests_per_sec: latest_sec,
                        request_utilization_pct,
                        storage_utilization_pct: storage_utilization(metrics.stored_elements, max_elements),
                        severity: Severity::from_request_utilization(request_utilization_pct),
                    },
                    sec_point: (issued_at, latest_sec),
                    min_point,
                });
            }

            Ok(updates)
        })?
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        registry::test::record,
        series::SERIES_CAPACITY,
        severity::Severity,
    };
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;
    use shardboard_api::wire::{
        RawShardMetrics,
        ShardStatus,
    };

    fn engine_with_group(group_id: &str) -> (MergeEngine, GroupRegistry) {
        let registry = GroupRegistry::new();
        registry.install(vec![record(group_id)]).unwrap();
        (MergeEngine::new(registry.clone()), registry)
    }

    fn metrics(sec: &[u64], min: &[u64], stored: u64) -> RawShardMetrics {
        RawShardMetrics {
            stored_elements: stored,
            rec_tree_status: ShardStatus::Active,
            queries_by_sec: sec.to_vec(),
            queries_by_min: min.to_vec(),
        }
    }

    fn snapshot(shard_id: &str, m: RawShardMetrics) -> ShardSnapshot {
        [(shard_id.to_string(), m)].into_iter().collect()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn derives_utilization_and_severity() {
        let (engine, _) = engine_with_group("g1");

        // max_req_sec = 100, max_elems = 1000 (see registry::test::record).
        let updates = engine
            .merge("g1", at(0), &snapshot("host.a", metrics(&[45], &[], 500)))
            .unwrap();
        assert_eq!(updates.len(), 1);
        let view = &updates[0].view;
        assert_eq!(view.request_utilization_pct, 45.0);
        assert_eq!(view.severity, Severity::Normal);
        assert_eq!(view.storage_utilization_pct, 50.0);

        let updates = engine
            .merge("g1", at(1), &snapshot("host.a", metrics(&[10, 90], &[], 500)))
            .unwrap();
        let view = &updates[0].view;
        assert_eq!(view.requests_per_sec, 90);
        assert_eq!(view.request_utilization_pct, 90.0);
        assert_eq!(view.severity, Severity::Danger);
    }

    #[test]
    fn request_utilization_is_capped_but_storage_is_not() {
        let (engine, _) = engine_with_group("g1");
        let updates = engine
            .merge("g1", at(0), &snapshot("host.a", metrics(&[250], &[], 1500)))
            .unwrap();
        let view = &updates[0].view;
        assert_eq!(view.request_utilization_pct, 100.0);
        assert_eq!(view.severity, Severity::Danger);
        assert_eq!(view.storage_utilization_pct, 150.0);
    }

    #[test]
    fn unseen_shards_are_seeded_then_appended() {
        let (engine, registry) = engine_with_group("g1");
        let history: Vec<u64> = (0..1500).collect();
        engine
            .merge("g1", at(0), &snapshot("host.a", metrics(&history, &[7], 1)))
            .unwrap();

        let group = registry.group("g1").unwrap();
        let shard = &group.shards["host.a"];
        // Seed truncated to capacity, then the live append evicted one more.
        assert_eq!(shard.req_sec_series.len(), SERIES_CAPACITY);
        assert_eq!(shard.req_sec_series.last().unwrap(), (at(0), 1499));
        assert_eq!(shard.token.as_str(), "host-a");
        assert_eq!(shard.status, ShardStatus::Active);
    }

    #[test]
    fn stale_responses_are_discarded_per_shard() {
        let (engine, registry) = engine_with_group("g1");

        // Response B was issued after response A but arrives first.
        engine
            .merge("g1", at(2), &snapshot("host.a", metrics(&[90], &[], 2)))
            .unwrap();
        let updates = engine
            .merge("g1", at(1), &snapshot("host.a", metrics(&[45], &[], 1)))
            .unwrap();

        // A's sample is discarded whole: no update, series reflects only B.
        assert!(updates.is_empty());
        let group = registry.group("g1").unwrap();
        let shard = &group.shards["host.a"];
        assert_eq!(shard.req_sec_series.last().unwrap(), (at(2), 90));
        assert_eq!(shard.stored_elements, 2);
    }

    #[test]
    fn minute_series_receives_one_point_per_minute() {
        let (engine, registry) = engine_with_group("g1");
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let mut min_points = 0;
        for tick in 0..180 {
            let updates = engine
                .merge(
                    "g1",
                    start + Duration::seconds(tick),
                    &snapshot("host.a", metrics(&[10], &[600], 1)),
                )
                .unwrap();
            if updates[0].min_point.is_some() {
                min_points += 1;
            }
        }

        assert_eq!(min_points, 3);
        let group = registry.group("g1").unwrap();
        // One seeded point plus the three appended ones.
        assert_eq!(group.shards["host.a"].req_min_series.len(), 4);
    }

    #[test]
    fn unknown_group_is_an_error() {
        let (engine, _) = engine_with_group("g1");
        let err = engine
            .merge("gone", at(0), &snapshot("host.a", metrics(&[1], &[], 0)))
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownGroup("gone".to_string()));
    }
}
