use crate::{
    args::{
        Args,
        Command,
    },
    render::{
        activity_logs_table,
        billing_table,
        groups_table,
        TableSink,
    },
};
use color_eyre::Result;
use eyre::{
    bail,
    eyre,
    OptionExt as _,
    WrapErr as _,
};
use shardboard_api::{
    session::{
        Credentials,
        SessionStash,
    },
    ApiClient,
    NewGroup,
};
use shardboard_telemetry::{
    GroupRegistry,
    PollScheduler,
};
use std::{
    io::Write as _,
    sync::Arc,
    time::Duration,
};

pub struct App {
    args: Args,
    client: ApiClient,
    stash: SessionStash,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let client = ApiClient::new(args.api_url.clone());
        let stash = SessionStash::load_default()?;
        Ok(Self { args, client, stash })
    }

    pub async fn run(mut self) -> Result<()> {
        match self.args.command.clone() {
            Command::Watch { groups, refresh } => self.watch(groups, refresh).await,
            Command::Login { user, key } => self.login(user, key).await,
            Command::Logout => {
                self.stash.logout()?;
                println!("Logged out.");
                Ok(())
            }
            Command::Groups => self.groups().await,
            Command::CreateGroup {
                name,
                group_type,
                shards,
                max_score,
            } => {
                self.create_group(NewGroup {
                    name,
                    group_type,
                    shards,
                    max_score,
                })
                .await
            }
            Command::DeleteGroup { group, yes } => self.delete_group(group, yes).await,
            Command::RotateKey { group } => self.rotate_key(group).await,
            Command::Resize { group, shards } => self.resize(group, shards).await,
            Command::Wipe { group, yes } => self.wipe(group, yes).await,
            Command::Billing => self.billing().await,
            Command::AccountLogs => self.account_logs().await,
            Command::ChangePass { new_key } => self.change_pass(new_key).await,
            Command::Contact { mail, content } => {
                self.client.contact(&mail, &content).await?;
                println!("Sent!");
                Ok(())
            }
        }
    }

    /// Live telemetry view: one polling task per watched group, tables
    /// redrawn on a fixed cadence, teardown on ctrl-c.
    async fn watch(&self, groups: Vec<String>, refresh: u64) -> Result<()> {
        let creds = self.credentials()?;
        let registry = GroupRegistry::new();
        let installed = registry.bootstrap(&self.client, creds).await?;
        if installed == 0 {
            println!("No groups defined");
            return Ok(());
        }

        for group in &groups {
            if registry.group(group).is_none() {
                bail!("unknown group {group}");
            }
        }

        let sink = Arc::new(TableSink::new());
        let scheduler = PollScheduler::new(
            &creds.user,
            registry.clone(),
            Arc::new(self.client.clone()),
            sink.clone(),
        );
        if groups.is_empty() {
            scheduler.start_all();
        } else {
            for group in &groups {
                scheduler.start(group);
            }
        }
        info!(watched = scheduler.watched().len(), "watching groups, ctrl-c to stop");

        let mut redraw = tokio::time::interval(Duration::from_secs(refresh.max(1)));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = redraw.tick() => {
                    // Clear and repaint, keeping the indicators in place.
                    print!("\x1b[2J\x1b[H{}", sink.render(&registry));
                    let _ = std::io::stdout().flush();
                }
            }
        }

        // Explicit teardown; the views are gone, so the polls must be too.
        scheduler.stop_all();
        Ok(())
    }

    /// Validate credentials against the group listing before persisting
    /// them, the same check the login form performs. Invalid sessions are
    /// never stored.
    async fn login(&mut self, user: String, key: String) -> Result<()> {
        let credentials = Credentials { user, key };
        self.client
            .list_groups(&credentials)
            .await
            .wrap_err("login failed, session not persisted")?;
        self.stash.login(credentials)?;
        println!("Logged in.");
        Ok(())
    }

    async fn groups(&self) -> Result<()> {
        let creds = self.credentials()?;
        let groups = self.client.list_groups(creds).await?;
        if groups.is_empty() {
            println!("No groups defined");
        } else {
            println!("{}", groups_table(&groups));
        }
        Ok(())
    }

    async fn create_group(&self, spec: NewGroup) -> Result<()> {
        let creds = self.credentials()?;
        let ack = self.client.create_group(creds, &spec).await?;
        if !ack.success {
            bail!("the backend did not acknowledge the new group");
        }
        println!("Group created. Capability secret: {}", ack.key);
        Ok(())
    }

    async fn delete_group(&self, group: String, yes: bool) -> Result<()> {
        if !yes {
            bail!(
                "this removes all content from the shards, stored backups and configuration \
                 and cannot be undone; pass --yes to confirm"
            );
        }
        let creds = self.credentials()?;
        let secret = self.group_secret(creds, &group).await?;
        let ack = self.client.delete_group(creds, &group, &secret).await?;
        println!("Group removed ({})", ack.trim());
        Ok(())
    }

    async fn rotate_key(&self, group: String) -> Result<()> {
        let creds = self.credentials()?;
        let secret = self.group_secret(creds, &group).await?;
        let new_key = self.client.rotate_key(creds, &group, &secret).await?;
        println!("New capability secret: {new_key}");
        println!("Remember to change it on all the clients.");
        Ok(())
    }

    async fn resize(&self, group: String, shards: u32) -> Result<()> {
        let creds = self.credentials()?;
        let secret = self.group_secret(creds, &group).await?;
        self.client.resize_shards(creds, &group, &secret, shards).await?;
        println!("Updated. The shard set will converge on the next polls.");
        Ok(())
    }

    async fn wipe(&self, group: String, yes: bool) -> Result<()> {
        if !yes {
            bail!(
                "this removes all content from the shards and stored backups and cannot \
                 be undone; pass --yes to confirm"
            );
        }
        let creds = self.credentials()?;
        let secret = self.group_secret(creds, &group).await?;
        self.client.wipe_group_content(creds, &group, &secret).await?;
        println!("Content removed. This action can take some time to have effect.");
        Ok(())
    }

    async fn billing(&self) -> Result<()> {
        let creds = self.credentials()?;
        let info = self.client.billing_info(creds).await?;
        println!("{}", billing_table(&info));
        Ok(())
    }

    async fn account_logs(&self) -> Result<()> {
        let creds = self.credentials()?;
        let logs = self.client.account_logs(creds).await?;
        println!("{}", activity_logs_table(&logs));
        Ok(())
    }

    async fn change_pass(&mut self, new_key: String) -> Result<()> {
        let creds = self.credentials()?.clone();
        self.client.change_pass(&creds, &new_key).await?;
        self.stash.update_key(&new_key)?;
        println!("Key updated.");
        Ok(())
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.stash
            .credentials()
            .ok_or_eyre("not logged in, run `shardboard login <user> <key>` first")
    }

    /// One-shot actions authenticate with the group's capability secret on
    /// top of the account key; look it up from a fresh listing.
    async fn group_secret(&self, creds: &Credentials, group_id: &str) -> Result<String> {
        let groups = self.client.list_groups(creds).await?;
        groups
            .into_iter()
            .find(|g| g.group_id == group_id)
            .map(|g| g.secret)
            .ok_or_else(|| eyre!("unknown group {group_id}"))
    }
}
