//! Persisted operator session.
//!
//! The user identity and capability key are stored as JSON in the platform
//! data directory and read at startup to restore a session without asking
//! the operator to authenticate again.

use directories::ProjectDirs;
use eyre::{
    Context as _,
    OptionExt as _,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};

const SESSION_FILE: &str = "session.json";

/// Identity and capability key of the operator account.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub key: String,
}

/// On-disk session stash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStash {
    #[serde(skip)]
    file: PathBuf,
    credentials: Option<Credentials>,
}

impl SessionStash {
    /// Load the stash from the given file, falling back to an empty session
    /// when the file is missing or unreadable.
    pub fn load(file: impl AsRef<Path>) -> Self {
        let file = file.as_ref();
        file.exists()
            .then(|| {
                std::fs::File::open(file)
                    .ok()
                    .and_then(|f| serde_json::from_reader::<_, SessionStash>(f).ok())
            })
            .flatten()
            .map(|mut stash| {
                debug!(?file, "restored session");
                stash.file = file.to_path_buf();
                stash
            })
            .unwrap_or_else(|| {
                debug!(?file, "no stored session found");
                Self {
                    file: file.to_path_buf(),
                    credentials: None,
                }
            })
    }

    /// Load the stash from the platform data directory.
    pub fn load_default() -> Result<Self> {
        Ok(Self::load(default_session_file()?))
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Store new credentials and persist them. An authentication failure on
    /// the caller's side must not reach this point: invalid sessions are
    /// never persisted.
    pub fn login(&mut self, credentials: Credentials) -> Result<()> {
        self.credentials = Some(credentials);
        self.save()
    }

    /// Update only the capability key, keeping the identity.
    pub fn update_key(&mut self, key: impl ToString) -> Result<()> {
        let credentials = self.credentials.as_mut().ok_or_eyre("no session to update")?;
        credentials.key = key.to_string();
        self.save()
    }

    /// Forget the stored session.
    pub fn logout(&mut self) -> Result<()> {
        self.credentials = None;
        if self.file.exists() {
            std::fs::remove_file(&self.file).context("failed to remove session file")?;
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let dir = self.file.parent().ok_or_eyre("failed to get parent directory")?;
        std::fs::create_dir_all(dir)?;
        let file = std::fs::File::create(&self.file)?;
        serde_json::to_writer_pretty(&file, self)?;
        debug!(file = ?self.file, "saved session");
        Ok(())
    }
}

fn default_session_file() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("dev", "shardboard", env!("CARGO_PKG_NAME"))
        .ok_or_eyre("failed to determine the data directory")?;
    Ok(dirs.data_local_dir().join(SESSION_FILE))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_empty_session() {
        let stash = SessionStash::load("/nonexistent/session.json");
        assert!(stash.credentials().is_none());
    }

    #[test]
    fn login_roundtrips_through_disk() {
        let dir = std::env::temp_dir().join("shardboard-session-test");
        let file = dir.join(SESSION_FILE);
        let _ = std::fs::remove_file(&file);

        let mut stash = SessionStash::load(&file);
        stash
            .login(Credentials {
                user: "op@example.com".into(),
                key: "k3y".into(),
            })
            .unwrap();

        let restored = SessionStash::load(&file);
        assert_eq!(
            restored.credentials(),
            Some(&Credentials {
                user: "op@example.com".into(),
                key: "k3y".into(),
            })
        );

        let mut restored = restored;
        restored.update_key("n3w").unwrap();
        assert_eq!(SessionStash::load(&file).credentials().unwrap().key, "n3w");

        restored.logout().unwrap();
        assert!(SessionStash::load(&file).credentials().is_none());
    }
}
