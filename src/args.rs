use clap::{
    Parser,
    Subcommand,
};
use url::Url;

/// Operator dashboard for sharded storage groups.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the shard service management API.
    #[clap(long, env = "SHARDBOARD_API_URL", default_value = "https://api.shardboard.dev/")]
    pub api_url: Url,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Watch live shard telemetry for your groups.
    Watch {
        /// Restrict watching to these group ids. Watches every group when
        /// omitted.
        #[clap(long = "group")]
        groups: Vec<String>,

        /// Seconds between table redraws.
        #[clap(long, default_value_t = 2)]
        refresh: u64,
    },

    /// Store credentials for subsequent commands.
    Login {
        user: String,
        key: String,
    },

    /// Forget the stored session.
    Logout,

    /// List the groups registered for the account.
    Groups,

    /// Create a new group of shards.
    CreateGroup {
        name: String,
        /// Billing/capacity tier of the group.
        #[clap(long = "type")]
        group_type: String,
        #[clap(long, default_value_t = 1)]
        shards: u32,
        #[clap(long, default_value_t = 5)]
        max_score: u8,
    },

    /// Remove a group, its shard content, backups and configuration. This
    /// cannot be undone.
    DeleteGroup {
        group: String,
        /// Skip the confirmation prompt.
        #[clap(long)]
        yes: bool,
    },

    /// Regenerate the capability secret for a group. Remember to change it
    /// on all clients.
    RotateKey {
        group: String,
    },

    /// Change the number of shards backing a group.
    Resize {
        group: String,
        shards: u32,
    },

    /// Wipe all content stored on a group's shards. This cannot be undone.
    Wipe {
        group: String,
        /// Skip the confirmation prompt.
        #[clap(long)]
        yes: bool,
    },

    /// Show the account's billing history.
    Billing,

    /// Show the account's activity logs.
    AccountLogs,

    /// Replace the account key.
    ChangePass {
        new_key: String,
    },

    /// Send a message to the service operators.
    Contact {
        mail: String,
        content: String,
    },
}
