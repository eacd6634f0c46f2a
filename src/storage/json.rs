//! JSON codecs for `users.json` and `repos.json`.
//!
//! A missing or empty file loads as `None` so a fresh data directory is not
//! an error.  Writes go to a temporary file in the same directory which is
//! then renamed over the target, so a crash mid-save never leaves a truncated
//! file behind.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Persisted form of a registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    /// Authorized-keys lines.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Persisted form of a repository and its permission table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRecord {
    pub name: String,
    pub path: String,
    /// Username to `"r"` or `"rw"`.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

pub fn load_users(path: &Path) -> Result<Option<Vec<UserRecord>>> {
    load_json(path, "user data")
}

pub fn save_users(path: &Path, users: &[UserRecord]) -> Result<()> {
    save_json(path, users, "user data")
}

pub fn load_repos(path: &Path) -> Result<Option<Vec<RepoRecord>>> {
    load_json(path, "repo permission data")
}

pub fn save_repos(path: &Path, repos: &[RepoRecord]) -> Result<()> {
    save_json(path, repos, "repo permission data")
}

#[instrument(fields(path = %path.display()))]
fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Option<Vec<T>>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no {what} file yet");
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {what}: {}", path.display()))
        }
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let records = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {what}: {}", path.display()))?;
    Ok(Some(records))
}

#[instrument(skip(records), fields(path = %path.display(), count = records.len()))]
fn save_json<T: Serialize>(path: &Path, records: &[T], what: &str) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)
        .with_context(|| format!("failed to serialize {what}"))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(&json)
        .and_then(|()| tmp.write_all(b"\n"))
        .with_context(|| format!("failed to write {what}"))?;
    tmp.persist(path)
        .with_context(|| format!("failed to save {what}: {}", path.display()))?;

    debug!("{what} saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_users(&tmp.path().join("users.json")).unwrap().is_none());
        assert!(load_repos(&tmp.path().join("repos.json")).unwrap().is_none());
    }

    #[test]
    fn empty_file_loads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(load_users(&path).unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("repos.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_repos(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse repo permission data"));
    }

    #[test]
    fn users_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.json");
        let users = vec![UserRecord {
            name: "alice".into(),
            keys: vec!["ssh-ed25519 AAAA alice@laptop".into()],
        }];
        save_users(&path, &users).unwrap();
        assert_eq!(load_users(&path).unwrap().unwrap(), users);
    }

    #[test]
    fn repo_file_uses_short_permission_strings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("repos.json");
        let repos = vec![RepoRecord {
            name: "proj".into(),
            path: "/srv/git/repos/proj.git".into(),
            users: BTreeMap::from([
                ("alice".to_string(), "rw".to_string()),
                ("guest".to_string(), "r".to_string()),
            ]),
        }];
        save_repos(&path, &repos).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["users"]["alice"], "rw");
        assert_eq!(raw[0]["users"]["guest"], "r");
    }

    #[test]
    fn record_without_users_defaults_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("repos.json");
        std::fs::write(&path, r#"[{"name":"p","path":"/x"}]"#).unwrap();
        let repos = load_repos(&path).unwrap().unwrap();
        assert!(repos[0].users.is_empty());
    }

    #[test]
    fn save_overwrites_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.json");
        save_users(&path, &[UserRecord { name: "a".into(), keys: vec![] }]).unwrap();
        save_users(&path, &[]).unwrap();
        assert_eq!(load_users(&path).unwrap().unwrap(), Vec::<UserRecord>::new());
    }
}
