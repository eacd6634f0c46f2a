//! Per-connection routing between the admin console and the Git data plane.
//!
//! The transport accepts every key; this module is where a session is
//! actually authorized.  It decides, from the resolved [`Identity`] and the
//! exec command (if any), whether to enter the console, run a Git program
//! against a repository, or reject the session.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::{AuthorizedKey, Identity, IdentityStore};
use crate::git::{self, CommandError, GitCommand};
use crate::repo::RepoTable;

/// Why a session was refused.  The `Display` text is sent to the client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Denial {
    #[error("Access denied: admin only")]
    ConsoleRequiresAdmin,
    #[error("Access denied: admins cannot perform Git operations")]
    AdminGitOperation,
    #[error("Error: {0}")]
    Command(#[from] CommandError),
    #[error("Access denied: insufficient permissions")]
    PermissionDenied,
    #[error("Error: repository does not exist")]
    RepoNotFound,
}

/// An authorized Git request, ready to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInvocation {
    pub command: GitCommand,
    /// Absolute location of the bare repository.
    pub repo_dir: PathBuf,
}

impl GitInvocation {
    pub fn program(&self) -> &'static str {
        self.command.operation().program()
    }
}

#[derive(Clone)]
pub struct Router {
    identities: Arc<IdentityStore>,
    repos: Arc<RepoTable>,
}

impl Router {
    pub fn new(identities: Arc<IdentityStore>, repos: Arc<RepoTable>) -> Self {
        Self { identities, repos }
    }

    /// Resolve a presented key.  Always succeeds, possibly to
    /// [`Identity::Unknown`], so unknown keys still reach guest-gated repos.
    pub fn resolve(&self, key: &AuthorizedKey) -> Identity {
        self.identities.authenticate(key)
    }

    /// Only the administrator may have an interactive terminal.
    pub fn allow_pty(&self, identity: &Identity) -> bool {
        identity.is_admin()
    }

    /// A session without a command asks for the console.
    pub fn route_shell(&self, identity: &Identity) -> Result<(), Denial> {
        if identity.is_admin() {
            Ok(())
        } else {
            warn!(username = identity.username(), "console requested by non-admin");
            Err(Denial::ConsoleRequiresAdmin)
        }
    }

    /// Authorize an exec command.  Nothing is spawned here; the caller runs
    /// the returned invocation.
    pub async fn route_exec(&self, identity: &Identity, raw: &str) -> Result<GitInvocation, Denial> {
        if identity.is_admin() {
            warn!(command = %raw, "git command requested by admin");
            return Err(Denial::AdminGitOperation);
        }

        let command = GitCommand::parse(raw).inspect_err(|e| {
            warn!(command = %raw, error = %e, "rejected exec command");
        })?;

        let username = identity.username();
        if !self
            .repos
            .check_permission(command.repo_name(), username, command.is_write())
            .await
        {
            warn!(
                username,
                repo = command.repo_path(),
                write = command.is_write(),
                "permission denied"
            );
            return Err(Denial::PermissionDenied);
        }

        let repo_dir = match self.repos.get(command.repo_name()).await {
            Some(repo) => repo.path,
            None => return Err(Denial::RepoNotFound),
        };
        if !git::validate_bare_repo(&repo_dir).await {
            warn!(repo = command.repo_path(), path = %repo_dir.display(), "repository missing on disk");
            return Err(Denial::RepoNotFound);
        }

        debug!(
            username,
            repo = command.repo_path(),
            operation = %command.operation(),
            "git command authorized"
        );
        Ok(GitInvocation { command, repo_dir })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
