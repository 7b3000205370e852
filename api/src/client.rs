use crate::{
    error::ApiError,
    session::Credentials,
    wire::{
        ActivityLogs,
        BillingInfo,
        CreateGroupAck,
        GroupRecord,
        ShardSnapshot,
    },
    Result,
};
use url::Url;

/// HTTP client for the shard service's management API.
///
/// Purely transport: no retry, no backoff, no state. Every method issues a
/// single form-encoded POST, the way the backend expects its requests.
#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
}

/// Parameters for a group creation request.
#[derive(Clone, Debug)]
pub struct NewGroup {
    pub name: String,
    pub group_type: String,
    pub shards: u32,
    pub max_score: u8,
}

impl ApiClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// List all groups registered for the authenticated user.
    ///
    /// The backend responds with `null` instead of an empty list when the
    /// user has no groups yet.
    pub async fn list_groups(&self, creds: &Credentials) -> Result<Vec<GroupRecord>> {
        let response = self
            .post("get_groups_by_user", &[("u", creds.user.as_str()), ("uk", creds.key.as_str())])
            .await?;
        let groups: Option<Vec<GroupRecord>> = response.json().await?;
        Ok(groups.unwrap_or_default())
    }

    /// Fetch one snapshot of per-shard metrics for a group.
    ///
    /// One call per poll tick per group, authenticated with the group's
    /// capability secret rather than the account key.
    pub async fn shard_snapshot(&self, user: &str, group_id: &str, secret: &str) -> Result<ShardSnapshot> {
        let response = self
            .post("info", &[("uid", user), ("key", secret), ("group", group_id)])
            .await?;
        Ok(response.json().await?)
    }

    /// Create a new group of shards. Returns the capability secret assigned
    /// by the backend. Callers are expected to reload the group listing.
    pub async fn create_group(&self, creds: &Credentials, spec: &NewGroup) -> Result<CreateGroupAck> {
        let shards = spec.shards.to_string();
        let max_score = spec.max_score.to_string();
        let response = self
            .post(
                "add_group",
                &[
                    ("u", creds.user.as_str()),
                    ("uk", creds.key.as_str()),
                    ("guid", spec.name.as_str()),
                    ("gt", spec.group_type.as_str()),
                    ("shards", shards.as_str()),
                    ("maxscore", max_score.as_str()),
                ],
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Replace the group's capability secret. Returns the new secret; every
    /// poll issued after this call must carry it.
    pub async fn rotate_key(&self, creds: &Credentials, group_id: &str, secret: &str) -> Result<String> {
        let response = self
            .post(
                "generate_group_key",
                &[
                    ("u", creds.user.as_str()),
                    ("uk", creds.key.as_str()),
                    ("g", group_id),
                    ("k", secret),
                ],
            )
            .await?;
        Ok(response.text().await?.trim().to_string())
    }

    /// Remove a group and all content on its shards. The acknowledgment is
    /// an opaque body shown to the operator.
    pub async fn delete_group(&self, creds: &Credentials, group_id: &str, secret: &str) -> Result<String> {
        let response = self
            .post(
                "del_group",
                &[
                    ("u", creds.user.as_str()),
                    ("uk", creds.key.as_str()),
                    ("g", group_id),
                    ("k", secret),
                ],
            )
            .await?;
        Ok(response.text().await?)
    }

    /// Wipe the stored content of every shard in the group. The effect is
    /// applied asynchronously on the backend.
    pub async fn wipe_group_content(&self, creds: &Credentials, group_id: &str, secret: &str) -> Result<String> {
        let response = self
            .post(
                "remove_group_shards_content",
                &[
                    ("u", creds.user.as_str()),
                    ("uk", creds.key.as_str()),
                    ("g", group_id),
                    ("k", secret),
                ],
            )
            .await?;
        Ok(response.text().await?)
    }

    /// Change the shard topology target for a group. The local shard set is
    /// not reconciled; a later poll surfaces whatever the backend reports.
    pub async fn resize_shards(&self, creds: &Credentials, group_id: &str, secret: &str, shards: u32) -> Result<String> {
        let shards = shards.to_string();
        let response = self
            .post(
                "set_shards_group",
                &[
                    ("u", creds.user.as_str()),
                    ("uk", creds.key.as_str()),
                    ("g", group_id),
                    ("k", secret),
                    ("s", shards.as_str()),
                ],
            )
            .await?;
        Ok(response.text().await?)
    }

    /// Billing history for the account.
    pub async fn billing_info(&self, creds: &Credentials) -> Result<BillingInfo> {
        let response = self
            .post("billing_info", &[("u", creds.user.as_str()), ("k", creds.key.as_str())])
            .await?;
        Ok(response.json().await?)
    }

    /// Account-activity log lines, grouped by category.
    pub async fn account_logs(&self, creds: &Credentials) -> Result<ActivityLogs> {
        let response = self
            .post("account_logs", &[("u", creds.user.as_str()), ("k", creds.key.as_str())])
            .await?;
        Ok(response.json().await?)
    }

    /// Replace the account key. The caller is responsible for updating the
    /// persisted session afterwards.
    pub async fn change_pass(&self, creds: &Credentials, new_key: &str) -> Result<()> {
        self.post(
            "change_pass",
            &[("u", creds.user.as_str()), ("k", creds.key.as_str()), ("nk", new_key)],
        )
        .await?;
        Ok(())
    }

    /// Submit a contact form message.
    pub async fn contact(&self, mail: &str, content: &str) -> Result<()> {
        self.post("contact", &[("mail", mail), ("content", content)]).await?;
        Ok(())
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<reqwest::Response> {
        let url = self.endpoint(path)?;
        trace!(%url, "posting to backend");
        let response = self.http.post(url).form(form).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }
        Ok(response)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|err| ApiError::Backend {
            status: 0,
            body: format!("invalid endpoint {path}: {err}"),
        })
    }
}
