//! Parsing of the command string an SSH client sends with an exec request.
//!
//! Git clients send exactly one of:
//!
//! ```text
//! git-upload-pack 'org/repo.git'
//! git-receive-pack '/org/repo.git'
//! ```
//!
//! Anything else is rejected before a process is ever spawned.  The path
//! grammar admits only `[A-Za-z0-9_-]` segments joined by `/` and ending in
//! `.git`, so `..`, absolute paths, whitespace and shell metacharacters can
//! never reach the filesystem or a program's argument list.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Suffix every repository path carries on the wire and on disk.
pub const REPO_SUFFIX: &str = ".git";

static REPO_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(/[A-Za-z0-9_-]+)*\.git$").expect("invalid repo path pattern")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid command format")]
    InvalidFormat,
    #[error("command not allowed: {0}")]
    NotAllowed(String),
    #[error("invalid repo path: {0}")]
    InvalidPath(String),
}

/// The two Git transport programs a client may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOperation {
    /// Clone, fetch and pull.
    UploadPack,
    /// Push.
    ReceivePack,
}

impl GitOperation {
    fn from_program(name: &str) -> Option<Self> {
        match name {
            "git-upload-pack" => Some(GitOperation::UploadPack),
            "git-receive-pack" => Some(GitOperation::ReceivePack),
            _ => None,
        }
    }

    /// Program executed for this operation.
    pub fn program(&self) -> &'static str {
        match self {
            GitOperation::UploadPack => "git-upload-pack",
            GitOperation::ReceivePack => "git-receive-pack",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, GitOperation::ReceivePack)
    }
}

impl fmt::Display for GitOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// A validated Git request.  Only constructible through [`GitCommand::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    operation: GitOperation,
    repo_path: String,
}

impl GitCommand {
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let (program, argument) = raw
            .trim()
            .split_once(char::is_whitespace)
            .ok_or(CommandError::InvalidFormat)?;

        let operation = GitOperation::from_program(program)
            .ok_or_else(|| CommandError::NotAllowed(program.to_string()))?;

        let argument = unquote(argument.trim());
        let repo_path = argument.strip_prefix('/').unwrap_or(argument);

        if !REPO_PATH.is_match(repo_path) {
            return Err(CommandError::InvalidPath(repo_path.to_string()));
        }

        Ok(Self {
            operation,
            repo_path: repo_path.to_string(),
        })
    }

    pub fn operation(&self) -> GitOperation {
        self.operation
    }

    /// Normalised relative path, e.g. `org/repo.git`.
    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    /// Repository name as tracked by the permission table (no `.git`).
    pub fn repo_name(&self) -> &str {
        self.repo_path
            .strip_suffix(REPO_SUFFIX)
            .unwrap_or(&self.repo_path)
    }

    pub fn is_write(&self) -> bool {
        self.operation.is_write()
    }
}

/// Whether `name` (without the `.git` suffix) is a valid repository name,
/// i.e. one a client could address through [`GitCommand::parse`].
pub fn is_valid_repo_name(name: &str) -> bool {
    REPO_PATH.is_match(&format!("{name}{REPO_SUFFIX}"))
}

/// Strip one layer of matching single or double quotes.
fn unquote(s: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
