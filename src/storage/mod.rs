//! On-disk state under the data directory.
//!
//! ```text
//! <data>/
//!   admin.pub      administrator public key (authorized-keys line)
//!   host_key       SSH host key (PEM)
//!   users.json     registered users and their keys
//!   repos.json     repository permission tables
//!   repos/         bare repositories, `<name>.git`
//! ```

pub mod json;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::auth::{AuthorizedKey, IdentityStore};
use crate::repo::RepoTable;

pub use json::{load_repos, load_users, save_repos, save_users, RepoRecord, UserRecord};

/// Well-known paths inside the data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn users_file(&self) -> PathBuf {
        self.root.join("users.json")
    }

    pub fn repos_file(&self) -> PathBuf {
        self.root.join("repos.json")
    }

    pub fn admin_key_file(&self) -> PathBuf {
        self.root.join("admin.pub")
    }

    pub fn host_key_file(&self) -> PathBuf {
        self.root.join("host_key")
    }

    /// Read the administrator key from the first non-comment line of
    /// `admin.pub`.
    pub fn load_admin_key(&self) -> Result<AuthorizedKey> {
        let path = self.admin_key_file();
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read admin key: {}", path.display()))?;
        let line = contents
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .with_context(|| format!("admin key file is empty: {}", path.display()))?;
        AuthorizedKey::parse(line)
            .with_context(|| format!("failed to parse admin key: {}", path.display()))
    }

    /// Load the admin key, users and repositories into the shared tables.
    ///
    /// Every failure here is a warning: the daemon keeps running with
    /// whatever could be loaded.
    pub async fn load_tables(&self, identities: &IdentityStore, repos: &RepoTable) {
        match self.load_admin_key() {
            Ok(key) => {
                info!(fingerprint = %key.fingerprint(), "admin key loaded");
                identities.set_admin_key(key);
            }
            Err(e) => warn!(
                error = %format!("{e:#}"),
                path = %self.admin_key_file().display(),
                "no usable admin key; the admin console is unreachable"
            ),
        }

        match load_users(&self.users_file()) {
            Ok(Some(records)) => {
                let count = identities.restore(records);
                info!(count, "users loaded");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %format!("{e:#}"), "failed to load user data"),
        }

        match load_repos(&self.repos_file()) {
            Ok(Some(records)) => {
                let count = repos.restore(records).await;
                info!(count, "repositories loaded");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %format!("{e:#}"), "failed to load repo permission data"),
        }
    }

    /// Write both tables.  Attempts the repo file even if the user file fails.
    pub async fn save_tables(&self, identities: &IdentityStore, repos: &RepoTable) -> Result<()> {
        let users = save_users(&self.users_file(), &identities.snapshot());
        let repos = save_repos(&self.repos_file(), &repos.snapshot().await);
        users.and(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::keys::tests::{test_key, test_key_line};

    #[test]
    fn layout_is_rooted_at_data_dir() {
        let data = DataDir::new("/srv/git");
        assert_eq!(data.repos_dir(), PathBuf::from("/srv/git/repos"));
        assert_eq!(data.users_file(), PathBuf::from("/srv/git/users.json"));
        assert_eq!(data.repos_file(), PathBuf::from("/srv/git/repos.json"));
        assert_eq!(data.host_key_file(), PathBuf::from("/srv/git/host_key"));
    }

    #[test]
    fn admin_key_skips_comments_and_blank_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let data = DataDir::new(tmp.path());
        let body = format!("# operator key\n\n{}\n", test_key_line(4, "ops@host"));
        std::fs::write(data.admin_key_file(), body).unwrap();

        let key = data.load_admin_key().unwrap();
        assert_eq!(key, test_key(4));
    }

    #[tokio::test]
    async fn tables_survive_save_and_load() {
        use crate::auth::{Identity, Permission, GUEST_NAME};
        use crate::repo::table::tests::table;

        let tmp = tempfile::tempdir().unwrap();
        let data = DataDir::new(tmp.path());
        std::fs::write(data.admin_key_file(), test_key_line(1, "")).unwrap();

        let identities = IdentityStore::new();
        let repos = table(&data.repos_dir());
        identities.create_user("alice").unwrap();
        identities.add_key_to_user("alice", test_key(2)).unwrap();
        repos.create("P").await.unwrap();
        repos.add_user("P", "alice", Permission::Write).await.unwrap();
        repos.add_user("P", GUEST_NAME, Permission::Read).await.unwrap();
        data.save_tables(&identities, &repos).await.unwrap();

        let identities = IdentityStore::new();
        let repos = table(&data.repos_dir());
        data.load_tables(&identities, &repos).await;

        assert_eq!(identities.authenticate(&test_key(1)), Identity::Admin);
        assert_eq!(identities.authenticate(&test_key(2)), Identity::User("alice".into()));
        let p = repos.get("P").await.unwrap();
        assert_eq!(p.permission_of("alice"), Permission::Write);
        assert_eq!(p.permission_of(GUEST_NAME), Permission::Read);
    }

    #[tokio::test]
    async fn load_tables_tolerates_corrupt_files() {
        use crate::repo::table::tests::table;

        let tmp = tempfile::tempdir().unwrap();
        let data = DataDir::new(tmp.path());
        std::fs::write(data.users_file(), "[oops").unwrap();
        std::fs::write(data.repos_file(), "{").unwrap();

        let identities = IdentityStore::new();
        let repos = table(&data.repos_dir());
        data.load_tables(&identities, &repos).await;

        assert!(!identities.has_admin_key());
        assert!(identities.list_users().is_empty());
        assert!(repos.list().await.is_empty());
    }

    #[test]
    fn missing_admin_key_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(DataDir::new(tmp.path()).load_admin_key().is_err());
    }
}
