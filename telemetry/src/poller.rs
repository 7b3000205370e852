use crate::{
    merge::MergeEngine,
    registry::GroupRegistry,
    view::ViewSink,
};
use shardboard_api::{
    wire::ShardSnapshot,
    ApiClient,
};
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::sync::watch;
use tokio_util::sync::{
    CancellationToken,
    DropGuard,
};

/// Fixed polling cadence per watched group.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Transient fetch failures are retried this many times within one tick.
const MAX_FETCH_RETRIES: u32 = 2;

/// Consecutive failed ticks before a group's data is flagged as stale.
const STALE_THRESHOLD: u32 = 5;

/// Trait for issuing one authenticated snapshot request for a group.
pub trait SnapshotFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        user: &'a str,
        group_id: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = shardboard_api::Result<ShardSnapshot>> + Send + 'a>>;
}

impl SnapshotFetcher for ApiClient {
    fn fetch<'a>(
        &'a self,
        user: &'a str,
        group_id: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = shardboard_api::Result<ShardSnapshot>> + Send + 'a>> {
        Box::pin(self.shard_snapshot(user, group_id, secret))
    }
}

/// Freshness of a group's rendered telemetry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PollHealth {
    #[default]
    Live,
    /// Too many consecutive poll failures; indicators show data that may no
    /// longer reflect the backend.
    Stale,
}

/// Recurring polling task for one group, bound to the lifetime of its view.
///
/// Dropping the poller cancels the task; [`PollScheduler::stop`] does so
/// explicitly when a group view is torn down.
#[derive(Debug, Clone)]
pub struct GroupPoller {
    pub group_id: String,
    pub health: watch::Receiver<PollHealth>,
    _task_guard: Arc<DropGuard>,
}

impl GroupPoller {
    fn spawn(
        group_id: String,
        user: String,
        registry: GroupRegistry,
        fetcher: Arc<dyn SnapshotFetcher>,
        sink: Arc<dyn ViewSink>,
    ) -> Self {
        let task_cancellation_token = CancellationToken::new();
        let task_cancellation_guard = task_cancellation_token.clone().drop_guard();
        let (health_sender, health_receiver) = watch::channel(PollHealth::default());

        tokio::spawn({
            let group_id = group_id.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = task_cancellation_token.cancelled() => {},
                    _ = poll_loop(&group_id, &user, registry, fetcher, sink, health_sender) => {},
                };
                debug!(group_id, "poll task canceled");
            }
        });

        Self {
            group_id,
            health: health_receiver,
            _task_guard: Arc::new(task_cancellation_guard),
        }
    }
}

/// Ticks at the fixed cadence and issues one fetch→merge pipeline run per
/// tick. A tick does not wait for the previous one: slow responses overlap,
/// and the merge engine resolves out-of-order completions via the issue
/// timestamps. Returns only when the group disappears from the registry.
async fn poll_loop(
    group_id: &str,
    user: &str,
    registry: GroupRegistry,
    fetcher: Arc<dyn SnapshotFetcher>,
    sink: Arc<dyn ViewSink>,
    health: watch::Sender<PollHealth>,
) {
    let engine = MergeEngine::new(registry.clone());
    let failures = Arc::new(Mutex::new(0u32));
    let mut interval = tokio::time::interval(POLL_INTERVAL);

    loop {
        interval.tick().await;

        // Re-read every tick so key rotations take effect on the next
        // poll. A vanished group ends the task.
        let Some(secret) = registry.secret(group_id) else {
            debug!(group_id, "group no longer registered, stopping poll");
            return;
        };

        tokio::spawn({
            let group_id = group_id.to_string();
            let user = user.to_string();
            let engine = engine.clone();
            let fetcher = fetcher.clone();
            let sink = sink.clone();
            let health = health.clone();
            let failures = failures.clone();
            async move {
                match fetch_with_retry(fetcher.as_ref(), &user, &group_id, &secret).await {
                    Ok((issued_at, snapshot)) => match engine.merge(&group_id, issued_at, &snapshot) {
                        Ok(updates) => {
                            record_tick(&failures, &health, &sink, &group_id, true);
                            for update in updates {
                                sink.shard_updated(update);
                            }
                        }
                        Err(err) => {
                            warn!(group_id, "failed to merge snapshot: {err}");
                            record_tick(&failures, &health, &sink, &group_id, false);
                        }
                    },
                    Err(err) => {
                        // A missed tick is dropped, never fatal; polling
                        // continues on the next tick.
                        debug!(group_id, "poll tick failed: {err}");
                        record_tick(&failures, &health, &sink, &group_id, false);
                    }
                }
            }
        });
    }
}

/// One poll tick: fetch the snapshot, retrying transient failures a bounded
/// number of times. Returns the issue timestamp of the attempt that
/// succeeded alongside the snapshot.
async fn fetch_with_retry<'a>(
    fetcher: &'a dyn SnapshotFetcher,
    user: &'a str,
    group_id: &'a str,
    secret: &'a str,
) -> shardboard_api::Result<(chrono::DateTime<chrono::Utc>, ShardSnapshot)> {
    let mut backoff = maybe_backoff::MaybeBackoff::default();
    let mut attempt = 0;
    loop {
        backoff.sleep().await;
        let issued_at = chrono::Utc::now();
        match fetcher.fetch(user, group_id, secret).await {
            Ok(snapshot) => return Ok((issued_at, snapshot)),
            Err(err) if err.is_transient() && attempt < MAX_FETCH_RETRIES => {
                attempt += 1;
                backoff.arm();
                debug!(group_id, ?attempt, "snapshot fetch failed, retrying: {err}");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Track consecutive failures and flip the health indicator at the
/// threshold. Recovery is immediate on the first successful tick.
fn record_tick(
    failures: &Mutex<u32>,
    health: &watch::Sender<PollHealth>,
    sink: &Arc<dyn ViewSink>,
    group_id: &str,
    success: bool,
) {
    let mut failures = failures.lock().unwrap();
    let new_health = if success {
        *failures = 0;
        PollHealth::Live
    } else {
        *failures += 1;
        if *failures >= STALE_THRESHOLD {
            PollHealth::Stale
        } else {
            *health.borrow()
        }
    };

    let changed = health.send_if_modified(|current| {
        if *current == new_health {
            false
        } else {
            *current = new_health;
            true
        }
    });
    if changed {
        info!(group_id, health = %new_health, "poll health changed");
        sink.poll_health_changed(group_id, new_health);
    }
}

/// Owns the recurring polling tasks, one per actively-viewed group.
pub struct PollScheduler {
    user: String,
    registry: GroupRegistry,
    fetcher: Arc<dyn SnapshotFetcher>,
    sink: Arc<dyn ViewSink>,
    pollers: Mutex<HashMap<String, GroupPoller>>,
}

impl PollScheduler {
    pub fn new(
        user: impl ToString,
        registry: GroupRegistry,
        fetcher: Arc<dyn SnapshotFetcher>,
        sink: Arc<dyn ViewSink>,
    ) -> Self {
        Self {
            user: user.to_string(),
            registry,
            fetcher,
            sink,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling a group. Starting an already-watched group is a no-op.
    pub fn start(&self, group_id: &str) {
        let mut pollers = self.pollers.lock().unwrap();
        if pollers.contains_key(group_id) {
            return;
        }
        debug!(group_id, "starting poller");
        pollers.insert(
            group_id.to_string(),
            GroupPoller::spawn(
                group_id.to_string(),
                self.user.clone(),
                self.registry.clone(),
                self.fetcher.clone(),
                self.sink.clone(),
            ),
        );
    }

    /// Start polling every group currently in the registry.
    pub fn start_all(&self) {
        for group_id in self.registry.ids() {
            self.start(&group_id);
        }
    }

    /// Cancel a group's polling task. Invoked when the group view is torn
    /// down; returns false when the group was not being polled.
    pub fn stop(&self, group_id: &str) -> bool {
        let removed = self.pollers.lock().unwrap().remove(group_id).is_some();
        if removed {
            debug!(group_id, "stopped poller");
        }
        removed
    }

    pub fn stop_all(&self) {
        let mut pollers = self.pollers.lock().unwrap();
        debug!(count = pollers.len(), "stopping all pollers");
        pollers.clear();
    }

    pub fn health(&self, group_id: &str) -> Option<PollHealth> {
        self.pollers.lock().unwrap().get(group_id).map(|p| *p.health.borrow())
    }

    pub fn watched(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.pollers.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        registry::test::record,
        view::ShardUpdate,
    };
    use pretty_assertions::assert_eq;
    use shardboard_api::{
        wire::{
            RawShardMetrics,
            ShardStatus,
        },
        ApiError,
    };

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<ShardUpdate>>,
        health_changes: Mutex<Vec<(String, PollHealth)>>,
    }

    impl ViewSink for RecordingSink {
        fn shard_updated(&self, update: ShardUpdate) {
            self.updates.lock().unwrap().push(update);
        }

        fn poll_health_changed(&self, group_id: &str, health: PollHealth) {
            self.health_changes.lock().unwrap().push((group_id.to_string(), health));
        }
    }

    /// Fake backend: rejects anything but the current backend-side secret,
    /// serves a fixed request rate otherwise. `value = None` simulates an
    /// unreachable group.
    struct ScriptedFetcher {
        backend_secret: Mutex<String>,
        value: Mutex<Option<u64>>,
        calls: Mutex<u32>,
    }

    impl ScriptedFetcher {
        fn serving(value: u64) -> Self {
            Self {
                backend_secret: Mutex::new("s3cr3t".to_string()),
                value: Mutex::new(Some(value)),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl SnapshotFetcher for ScriptedFetcher {
        fn fetch<'a>(
            &'a self,
            _user: &'a str,
            _group_id: &'a str,
            secret: &'a str,
        ) -> Pin<Box<dyn Future<Output = shardboard_api::Result<ShardSnapshot>> + Send + 'a>> {
            Box::pin(async move {
                *self.calls.lock().unwrap() += 1;
                let Some(value) = *self.value.lock().unwrap() else {
                    return Err(ApiError::Auth("group unreachable".to_string()));
                };
                if secret != *self.backend_secret.lock().unwrap() {
                    return Err(ApiError::Auth("Unauthorized".to_string()));
                }
                Ok([(
                    "host.a".to_string(),
                    RawShardMetrics {
                        stored_elements: 500,
                        rec_tree_status: ShardStatus::Active,
                        queries_by_sec: vec![value],
                        queries_by_min: vec![value * 60],
                    },
                )]
                .into_iter()
                .collect())
            })
        }
    }

    fn scheduler_with(
        fetcher: Arc<ScriptedFetcher>,
        sink: Arc<RecordingSink>,
    ) -> (PollScheduler, GroupRegistry) {
        let registry = GroupRegistry::new();
        registry.install(vec![record("g1")]).unwrap();
        let scheduler = PollScheduler::new("op@example.com", registry.clone(), fetcher, sink);
        (scheduler, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_merge_into_the_registry_and_reach_the_sink() {
        let fetcher = Arc::new(ScriptedFetcher::serving(45));
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, registry) = scheduler_with(fetcher.clone(), sink.clone());

        scheduler.start("g1");
        // Starting twice must not double the cadence.
        scheduler.start("g1");
        assert_eq!(scheduler.watched(), vec!["g1".to_string()]);

        tokio::time::sleep(Duration::from_millis(3500)).await;

        let updates = sink.updates.lock().unwrap().clone();
        assert!(updates.len() >= 3, "expected one update per tick, got {}", updates.len());
        let update = &updates[0];
        assert_eq!(update.group_token.as_str(), "g1");
        assert_eq!(update.shard_token.as_str(), "host-a");
        assert_eq!(update.view.request_utilization_pct, 45.0);

        let shard = &registry.group("g1").unwrap().shards["host.a"];
        assert!(shard.req_sec_series.len() >= 3);
        assert_eq!(scheduler.health("g1"), Some(PollHealth::Live));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_recurring_task() {
        let fetcher = Arc::new(ScriptedFetcher::serving(10));
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, _registry) = scheduler_with(fetcher.clone(), sink);

        scheduler.start("g1");
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(scheduler.stop("g1"));
        assert!(!scheduler.stop("g1"));

        let calls_at_stop = fetcher.calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fetcher.calls(), calls_at_stop, "polling continued after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn key_rotation_applies_on_the_next_tick() {
        let fetcher = Arc::new(ScriptedFetcher::serving(45));
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, registry) = scheduler_with(fetcher.clone(), sink.clone());

        // The backend already rotated; the registry still holds the old
        // secret, so ticks fail authorization without touching the series.
        *fetcher.backend_secret.lock().unwrap() = "n3w-k3y".to_string();
        scheduler.start("g1");
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(sink.updates.lock().unwrap().is_empty());
        assert!(registry.group("g1").unwrap().shards.is_empty());

        registry.rotate_secret("g1", "n3w-k3y").unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert!(!sink.updates.lock().unwrap().is_empty());
        let shard = &registry.group("g1").unwrap().shards["host.a"];
        assert!(!shard.req_sec_series.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn health_flips_to_stale_and_recovers() {
        let fetcher = Arc::new(ScriptedFetcher::serving(10));
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, _registry) = scheduler_with(fetcher.clone(), sink.clone());

        *fetcher.value.lock().unwrap() = None;
        scheduler.start("g1");
        tokio::time::sleep(Duration::from_millis(6500)).await;

        assert_eq!(scheduler.health("g1"), Some(PollHealth::Stale));
        assert_eq!(
            sink.health_changes.lock().unwrap().first(),
            Some(&("g1".to_string(), PollHealth::Stale))
        );

        *fetcher.value.lock().unwrap() = Some(10);
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(scheduler.health("g1"), Some(PollHealth::Live));
        assert_eq!(
            sink.health_changes.lock().unwrap().last(),
            Some(&("g1".to_string(), PollHealth::Live))
        );
    }

    /// Fails with a server error until `failures_left` runs out.
    struct FlakyFetcher {
        failures_left: Mutex<u32>,
        calls: Mutex<u32>,
    }

    impl SnapshotFetcher for FlakyFetcher {
        fn fetch<'a>(
            &'a self,
            _user: &'a str,
            _group_id: &'a str,
            _secret: &'a str,
        ) -> Pin<Box<dyn Future<Output = shardboard_api::Result<ShardSnapshot>> + Send + 'a>> {
            Box::pin(async move {
                *self.calls.lock().unwrap() += 1;
                let mut failures_left = self.failures_left.lock().unwrap();
                if *failures_left > 0 {
                    *failures_left -= 1;
                    return Err(ApiError::Backend {
                        status: 503,
                        body: "provisioning".to_string(),
                    });
                }
                Ok(ShardSnapshot::new())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_within_one_tick() {
        let fetcher = FlakyFetcher {
            failures_left: Mutex::new(2),
            calls: Mutex::new(0),
        };
        let result = fetch_with_retry(&fetcher, "op@example.com", "g1", "s3cr3t").await;
        assert!(result.is_ok());
        assert_eq!(*fetcher.calls.lock().unwrap(), 3);

        // Non-transient errors fail the tick without retrying.
        let fetcher = ScriptedFetcher::serving(1);
        *fetcher.backend_secret.lock().unwrap() = "other".to_string();
        let result = fetch_with_retry(&fetcher, "op@example.com", "g1", "s3cr3t").await;
        assert!(matches!(result, Err(ApiError::Auth(_))));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_when_the_group_is_removed_locally() {
        let fetcher = Arc::new(ScriptedFetcher::serving(10));
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, registry) = scheduler_with(fetcher.clone(), sink);

        scheduler.start("g1");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        registry.remove("g1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let calls_after_removal = fetcher.calls();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fetcher.calls(), calls_after_removal);
    }
}
