use crate::{
    series::{
        MinuteGate,
        SampleSeries,
    },
    token::{
        normalize,
        ViewToken,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use shardboard_api::{
    session::Credentials,
    wire::{
        GroupRecord,
        ShardStatus,
    },
    ApiClient,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// Two distinct raw identifiers normalized to the same view token.
    #[error("view token {token} is already taken by {existing}, refusing to install {incoming}")]
    TokenCollision {
        token: ViewToken,
        existing: String,
        incoming: String,
    },

    #[error("unknown group {0}")]
    UnknownGroup(String),
}

/// A logical collection of shards sharing a capability secret and capacity
/// limits.
#[derive(Clone, Debug)]
pub struct Group {
    pub id: String,
    pub token: ViewToken,
    /// Credential required to query this group's shard telemetry. Mutable
    /// via key rotation; polls pick up the new value on their next tick.
    pub secret: String,
    pub group_type: String,
    pub max_elements: u64,
    pub max_req_sec: u64,
    pub shards: HashMap<String, ShardState>,
}

/// One storage unit within a group. Created the first time its host id
/// appears in a snapshot, updated on every subsequent snapshot.
#[derive(Clone, Debug)]
pub struct ShardState {
    pub id: String,
    pub token: ViewToken,
    pub status: ShardStatus,
    pub stored_elements: u64,
    pub req_sec_series: SampleSeries,
    pub req_min_series: SampleSeries,
    /// Issue timestamp of the last applied snapshot; responses older than
    /// this are discarded (overlapping polls can complete out of order).
    pub last_applied: Option<DateTime<Utc>>,
    pub(crate) minute_gate: MinuteGate,
}

/// Process-wide table of known groups, owned by the dashboard session.
///
/// Cloned handles share the same state. Every series mutation goes through
/// the merge engine, which funnels into [`GroupRegistry::with_group_mut`];
/// nothing else mutates shard state.
#[derive(Clone, Debug, Default)]
pub struct GroupRegistry {
    inner: Arc<Mutex<HashMap<String, Group>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the group listing and install it, replacing any previous state.
    ///
    /// Group deletion and resharding keep this reload-based model: callers
    /// re-bootstrap instead of reconciling incrementally. Returns the number
    /// of installed groups.
    pub async fn bootstrap(&self, client: &ApiClient, creds: &Credentials) -> eyre::Result<usize> {
        let records = client.list_groups(creds).await?;
        let installed = records.len();
        self.install(records)?;
        info!(groups = installed, "registry bootstrapped");
        Ok(installed)
    }

    /// Install group entries from a listing, replacing the current table.
    /// Fails without side effects when two raw group ids collide on the
    /// same view token.
    pub fn install(&self, records: Vec<GroupRecord>) -> Result<(), RegistryError> {
        let mut table = HashMap::with_capacity(records.len());
        let mut tokens: HashMap<ViewToken, String> = HashMap::new();

        for record in records {
            let token = normalize(&record.group_id);
            if let Some(existing) = tokens.insert(token.clone(), record.group_id.clone()) {
                if existing != record.group_id {
                    return Err(RegistryError::TokenCollision {
                        token,
                        existing,
                        incoming: record.group_id,
                    });
                }
            }
            table.insert(
                record.group_id.clone(),
                Group {
                    token,
                    id: record.group_id,
                    secret: record.secret,
                    group_type: record.group_type,
                    max_elements: record.max_elements,
                    max_req_sec: record.max_req_sec,
                    shards: HashMap::new(),
                },
            );
        }

        *self.inner.lock().unwrap() = table;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cloned snapshot of one group, for rendering.
    pub fn group(&self, group_id: &str) -> Option<Group> {
        self.inner.lock().unwrap().get(group_id).cloned()
    }

    /// Cloned snapshots of all groups, sorted by id.
    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<_> = self.inner.lock().unwrap().values().cloned().collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }

    pub fn secret(&self, group_id: &str) -> Option<String> {
        self.inner.lock().unwrap().get(group_id).map(|g| g.secret.clone())
    }

    /// Replace the stored capability secret after a key rotation. In-flight
    /// polls still carrying the old secret will fail authorization on their
    /// next tick; there is no mid-flight invalidation.
    pub fn rotate_secret(&self, group_id: &str, secret: impl ToString) -> Result<(), RegistryError> {
        self.with_group_mut(group_id, |group| {
            group.secret = secret.to_string();
        })
    }

    /// Drop a group from local state. The backend-side deletion is a
    /// separate one-shot action.
    pub fn remove(&self, group_id: &str) -> Option<Group> {
        self.inner.lock().unwrap().remove(group_id)
    }

    pub(crate) fn with_group_mut<R>(
        &self,
        group_id: &str,
        f: impl FnOnce(&mut Group) -> R,
    ) -> Result<R, RegistryError> {
        let mut table = self.inner.lock().unwrap();
        let group = table
            .get_mut(group_id)
            .ok_or_else(|| RegistryError::UnknownGroup(group_id.to_string()))?;
        Ok(f(group))
    }
}

impl Group {
    /// Find or create the shard record for one snapshot host id, checking
    /// for token collisions against the group's other shards.
    pub(crate) fn shard_entry(&mut self, shard_id: &str) -> Result<&mut ShardState, RegistryError> {
        let token = normalize(shard_id);
        if !self.shards.contains_key(shard_id) {
            if let Some(existing) = self.shards.values().find(|s| s.token == token) {
                return Err(RegistryError::TokenCollision {
                    token,
                    existing: existing.id.clone(),
                    incoming: shard_id.to_string(),
                });
            }
            self.shards.insert(
                shard_id.to_string(),
                ShardState {
                    id: shard_id.to_string(),
                    token,
                    status: ShardStatus::Starting,
                    stored_elements: 0,
                    req_sec_series: SampleSeries::new(),
                    req_min_series: SampleSeries::new(),
                    last_applied: None,
                    minute_gate: MinuteGate::new(),
                },
            );
        }
        Ok(self.shards.get_mut(shard_id).expect("just inserted"))
    }
}
