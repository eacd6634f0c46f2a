//! Repository permission table.
//!
//! Tracks every hosted repository, where it lives on disk, and which users
//! hold which [`Permission`] on it.  The reserved entry `guest` grants
//! anonymous read access.
//!
//! The whole table sits behind one async reader/writer lock.  `create` holds
//! the write lock across `git init --bare` so that two sessions can never
//! race to create the same repository.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::auth::{Permission, GUEST_NAME};
use crate::git::{self, REPO_SUFFIX};
use crate::storage::RepoRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepoError {
    #[error("repository {0} already exists")]
    AlreadyExists(String),
    #[error("repository {0} does not exist")]
    NotFound(String),
    #[error("invalid repository name: {0}")]
    InvalidName(String),
    #[error("guest may only be granted read access")]
    GuestWrite,
    #[error("failed to init repository {name}: {reason}")]
    Init { name: String, reason: String },
    #[error("failed to remove repository {name}: {reason}")]
    Remove { name: String, reason: String },
}

/// Creates the on-disk bare repository for a newly tracked name.
#[async_trait]
pub trait RepoInitializer: Send + Sync {
    async fn init(&self, path: &Path) -> anyhow::Result<()>;
}

/// Runs `git init --bare`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitInit;

#[async_trait]
impl RepoInitializer for GitInit {
    async fn init(&self, path: &Path) -> anyhow::Result<()> {
        git::init_bare_repo(path).await
    }
}

/// A tracked repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub path: PathBuf,
    pub users: BTreeMap<String, Permission>,
}

impl Repository {
    pub fn permission_of(&self, user: &str) -> Permission {
        self.users.get(user).copied().unwrap_or_default()
    }
}

pub struct RepoTable {
    base_path: PathBuf,
    initializer: Arc<dyn RepoInitializer>,
    repos: RwLock<BTreeMap<String, Repository>>,
}

impl RepoTable {
    /// Table whose repositories live under `base_path` and are created with
    /// `git init --bare`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self::with_initializer(base_path, Arc::new(GitInit))
    }

    pub fn with_initializer(
        base_path: impl Into<PathBuf>,
        initializer: Arc<dyn RepoInitializer>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            initializer,
            repos: RwLock::new(BTreeMap::new()),
        }
    }

    /// On-disk location for `name`: `{base_path}/{name}.git`.
    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.base_path
            .join(format!("{}{REPO_SUFFIX}", normalize(name)))
    }

    #[instrument(skip(self))]
    pub async fn create(&self, name: &str) -> Result<Repository, RepoError> {
        let name = normalize(name);
        if !git::is_valid_repo_name(name) {
            return Err(RepoError::InvalidName(name.to_string()));
        }

        let mut repos = self.repos.write().await;
        if repos.contains_key(name) {
            return Err(RepoError::AlreadyExists(name.to_string()));
        }

        let path = self.repo_path(name);
        if let Err(e) = self.initializer.init(&path).await {
            if let Err(cleanup) = git::remove_repo(&path).await {
                warn!(error = %cleanup, "failed to clean up partially created repository");
            }
            return Err(RepoError::Init {
                name: name.to_string(),
                reason: format!("{e:#}"),
            });
        }

        let repo = Repository {
            name: name.to_string(),
            path,
            users: BTreeMap::new(),
        };
        repos.insert(name.to_string(), repo.clone());
        info!(path = %repo.path.display(), "repository created");
        Ok(repo)
    }

    /// Remove the repository from disk, then stop tracking it.  If the disk
    /// removal fails the entry stays tracked.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<(), RepoError> {
        let name = normalize(name);
        let mut repos = self.repos.write().await;
        let path = repos
            .get(name)
            .map(|r| r.path.clone())
            .ok_or_else(|| RepoError::NotFound(name.to_string()))?;

        git::remove_repo(&path)
            .await
            .map_err(|e| RepoError::Remove {
                name: name.to_string(),
                reason: format!("{e:#}"),
            })?;

        repos.remove(name);
        info!("repository deleted");
        Ok(())
    }

    /// Look up a repository, with or without the `.git` suffix.
    pub async fn get(&self, name: &str) -> Option<Repository> {
        self.repos.read().await.get(normalize(name)).cloned()
    }

    pub async fn list(&self) -> Vec<Repository> {
        self.repos.read().await.values().cloned().collect()
    }

    /// Grant `perm` to `user`.  Granting [`Permission::None`] removes the entry.
    #[instrument(skip(self))]
    pub async fn add_user(&self, repo: &str, user: &str, perm: Permission) -> Result<(), RepoError> {
        if user == GUEST_NAME && perm == Permission::Write {
            return Err(RepoError::GuestWrite);
        }
        let repo = normalize(repo);
        let mut repos = self.repos.write().await;
        let entry = repos
            .get_mut(repo)
            .ok_or_else(|| RepoError::NotFound(repo.to_string()))?;

        if perm == Permission::None {
            entry.users.remove(user);
        } else {
            entry.users.insert(user.to_string(), perm);
        }
        debug!("permission updated");
        Ok(())
    }

    /// Revoke `user`'s entry.  Revoking an absent entry is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_user(&self, repo: &str, user: &str) -> Result<(), RepoError> {
        let repo = normalize(repo);
        let mut repos = self.repos.write().await;
        let entry = repos
            .get_mut(repo)
            .ok_or_else(|| RepoError::NotFound(repo.to_string()))?;
        entry.users.remove(user);
        Ok(())
    }

    /// Drop `user` from every repository, returning how many entries went.
    pub async fn remove_user_everywhere(&self, user: &str) -> usize {
        let mut repos = self.repos.write().await;
        repos
            .values_mut()
            .filter_map(|r| r.users.remove(user))
            .count()
    }

    /// Decide whether `user` (empty for an unknown key) may read, or with
    /// `need_write` push to, `repo`.
    ///
    /// A `guest` read grant is consulted before anything about the caller,
    /// so it also covers authenticated users without an entry of their own.
    pub async fn check_permission(&self, repo: &str, user: &str, need_write: bool) -> bool {
        let repos = self.repos.read().await;
        let Some(entry) = repos.get(normalize(repo)) else {
            return false;
        };

        if !need_write && entry.permission_of(GUEST_NAME).has_read() {
            return true;
        }

        if user.is_empty() {
            return false;
        }

        let Some(perm) = entry.users.get(user) else {
            return false;
        };

        if need_write {
            perm.has_write()
        } else {
            perm.has_read()
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub async fn snapshot(&self) -> Vec<RepoRecord> {
        self.repos
            .read()
            .await
            .values()
            .map(|r| RepoRecord {
                name: r.name.clone(),
                path: r.path.to_string_lossy().into_owned(),
                users: r
                    .users
                    .iter()
                    .filter_map(|(u, p)| p.as_short().map(|s| (u.clone(), s.to_string())))
                    .collect(),
            })
            .collect()
    }

    /// Re-admit persisted repositories, returning how many were added.
    ///
    /// A record is skipped when its directory no longer exists or its name is
    /// already tracked.  Unrecognised permission strings drop only that user.
    pub async fn restore(&self, records: Vec<RepoRecord>) -> usize {
        let mut repos = self.repos.write().await;
        let mut admitted = 0;

        for record in records {
            let name = normalize(&record.name).to_string();
            if !git::is_valid_repo_name(&name) {
                warn!(repo = %record.name, "skipping persisted repository with invalid name");
                continue;
            }
            let path = PathBuf::from(&record.path);
            if tokio::fs::metadata(&path).await.is_err() {
                debug!(repo = %name, path = %record.path, "repository missing on disk; skipping");
                continue;
            }
            if repos.contains_key(&name) {
                continue;
            }

            let mut users = BTreeMap::new();
            for (user, short) in record.users {
                match Permission::parse_short(&short) {
                    Some(Permission::Write) if user == GUEST_NAME => {
                        warn!(repo = %name, "dropping persisted write grant for guest");
                    }
                    Some(perm) => {
                        users.insert(user, perm);
                    }
                    None => {
                        debug!(repo = %name, user = %user, permission = %short, "dropping unrecognised permission");
                    }
                }
            }

            repos.insert(
                name.clone(),
                Repository {
                    name,
                    path,
                    users,
                },
            );
            admitted += 1;
        }

        admitted
    }
}

fn normalize(name: &str) -> &str {
    name.strip_suffix(REPO_SUFFIX).unwrap_or(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
