//! Identity store: the admin credential plus registered users and their keys.
//!
//! The store is shared by every session for the lifetime of the daemon and is
//! guarded by a single reader/writer lock.  Mutations are visible to the next
//! [`IdentityStore::authenticate`] call from any session.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use super::keys::AuthorizedKey;
use crate::storage::UserRecord;

/// Fixed name of the administrator identity.
pub const ADMIN_NAME: &str = "admin";

/// Reserved pseudo-user that stands for anonymous read access in a
/// repository's permission map.  It never owns keys.
pub const GUEST_NAME: &str = "guest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("cannot create user named '{0}'")]
    ReservedName(String),
    #[error("user {0} already exists")]
    UserExists(String),
    #[error("user {0} does not exist")]
    UserNotFound(String),
    #[error("key already exists")]
    DuplicateKey,
    #[error("key is already registered to user {0}")]
    KeyInUse(String),
    #[error("key is the administrator key")]
    AdminKey,
    #[error("key not found")]
    KeyNotFound,
}

/// How a connecting key was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityClass {
    Unknown,
    Admin,
    Normal,
}

/// The identity a session acts as, resolved once from the presented key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Admin,
    User(String),
    Unknown,
}

impl Identity {
    pub fn class(&self) -> IdentityClass {
        match self {
            Identity::Admin => IdentityClass::Admin,
            Identity::User(_) => IdentityClass::Normal,
            Identity::Unknown => IdentityClass::Unknown,
        }
    }

    /// Name used for permission lookups; empty for an unknown key.
    pub fn username(&self) -> &str {
        match self {
            Identity::Admin => ADMIN_NAME,
            Identity::User(name) => name,
            Identity::Unknown => "",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Identity::Admin)
    }
}

/// A registered user and its keys, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub keys: Vec<AuthorizedKey>,
}

impl User {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keys: Vec::new(),
        }
    }

    pub fn has_key(&self, key: &AuthorizedKey) -> bool {
        self.has_fingerprint(&key.fingerprint())
    }

    fn has_fingerprint(&self, fingerprint: &str) -> bool {
        self.keys.iter().any(|k| k.fingerprint() == fingerprint)
    }

    fn add_key(&mut self, key: AuthorizedKey) -> Result<(), IdentityError> {
        if self.has_key(&key) {
            return Err(IdentityError::DuplicateKey);
        }
        self.keys.push(key);
        Ok(())
    }

    fn remove_key(&mut self, fingerprint: &str) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| k.fingerprint() != fingerprint);
        self.keys.len() != before
    }
}

#[derive(Debug, Default)]
struct Inner {
    admin_key: Option<AuthorizedKey>,
    /// Name-ordered so the key scan in `authenticate` is deterministic.
    users: BTreeMap<String, User>,
}

impl Inner {
    fn key_owner(&self, fingerprint: &str) -> Option<&User> {
        self.users.values().find(|u| u.has_fingerprint(fingerprint))
    }

    fn is_admin_key(&self, fingerprint: &str) -> bool {
        self.admin_key
            .as_ref()
            .is_some_and(|k| k.fingerprint() == fingerprint)
    }
}

#[derive(Debug, Default)]
pub struct IdentityStore {
    inner: RwLock<Inner>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the administrator key.
    pub fn set_admin_key(&self, key: AuthorizedKey) {
        debug!(key = %key, "admin key installed");
        self.inner.write().admin_key = Some(key);
    }

    pub fn has_admin_key(&self) -> bool {
        self.inner.read().admin_key.is_some()
    }

    /// Resolve a presented key.  Never fails: keys that match nothing resolve
    /// to [`Identity::Unknown`].
    pub fn authenticate(&self, key: &AuthorizedKey) -> Identity {
        let fingerprint = key.fingerprint();
        let inner = self.inner.read();

        if inner.is_admin_key(&fingerprint) {
            return Identity::Admin;
        }

        match inner.key_owner(&fingerprint) {
            Some(user) => Identity::User(user.name.clone()),
            None => Identity::Unknown,
        }
    }

    pub fn create_user(&self, name: &str) -> Result<(), IdentityError> {
        if name == ADMIN_NAME {
            return Err(IdentityError::ReservedName(name.to_string()));
        }
        let mut inner = self.inner.write();
        if inner.users.contains_key(name) {
            return Err(IdentityError::UserExists(name.to_string()));
        }
        inner.users.insert(name.to_string(), User::new(name));
        Ok(())
    }

    pub fn delete_user(&self, name: &str) -> Result<(), IdentityError> {
        self.inner
            .write()
            .users
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IdentityError::UserNotFound(name.to_string()))
    }

    pub fn get_user(&self, name: &str) -> Option<User> {
        self.inner.read().users.get(name).cloned()
    }

    pub fn user_exists(&self, name: &str) -> bool {
        self.inner.read().users.contains_key(name)
    }

    pub fn list_users(&self) -> Vec<User> {
        self.inner.read().users.values().cloned().collect()
    }

    /// Register `key` for `name`.  A key may belong to at most one identity.
    pub fn add_key_to_user(&self, name: &str, key: AuthorizedKey) -> Result<(), IdentityError> {
        let fingerprint = key.fingerprint();
        let mut inner = self.inner.write();

        if !inner.users.contains_key(name) {
            return Err(IdentityError::UserNotFound(name.to_string()));
        }
        if inner.is_admin_key(&fingerprint) {
            return Err(IdentityError::AdminKey);
        }
        if let Some(owner) = inner.key_owner(&fingerprint) {
            if owner.name != name {
                return Err(IdentityError::KeyInUse(owner.name.clone()));
            }
        }

        match inner.users.get_mut(name) {
            Some(user) => user.add_key(key),
            None => Err(IdentityError::UserNotFound(name.to_string())),
        }
    }

    pub fn remove_key_from_user(&self, name: &str, fingerprint: &str) -> Result<(), IdentityError> {
        let mut inner = self.inner.write();
        let user = inner
            .users
            .get_mut(name)
            .ok_or_else(|| IdentityError::UserNotFound(name.to_string()))?;
        if !user.remove_key(fingerprint) {
            return Err(IdentityError::KeyNotFound);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Every user with every key it currently holds.
    pub fn snapshot(&self) -> Vec<UserRecord> {
        self.inner
            .read()
            .users
            .values()
            .map(|u| UserRecord {
                name: u.name.clone(),
                keys: u.keys.iter().map(AuthorizedKey::to_authorized_line).collect(),
            })
            .collect()
    }

    /// Merge persisted users into the store, returning how many were admitted.
    ///
    /// Unparseable key strings are skipped silently; the admin key and keys
    /// already owned by another user are skipped with a warning.
    pub fn restore(&self, records: Vec<UserRecord>) -> usize {
        let mut inner = self.inner.write();
        let mut admitted = 0;

        for record in records {
            if record.name == ADMIN_NAME || record.name == GUEST_NAME {
                warn!(user = %record.name, "ignoring persisted user with reserved name");
                continue;
            }

            let mut user = User::new(&record.name);
            for line in &record.keys {
                let key = match AuthorizedKey::parse(line) {
                    Ok(key) => key,
                    Err(_) => continue,
                };
                let fingerprint = key.fingerprint();
                if inner.is_admin_key(&fingerprint) {
                    warn!(
                        user = %record.name,
                        fingerprint = %fingerprint,
                        "skipping persisted key that is the administrator key"
                    );
                    continue;
                }
                let owner = inner
                    .key_owner(&fingerprint)
                    .filter(|owner| owner.name != record.name)
                    .map(|owner| owner.name.clone());
                if let Some(owner) = owner {
                    warn!(
                        user = %record.name,
                        owner = %owner,
                        fingerprint = %fingerprint,
                        "skipping persisted key already registered to another user"
                    );
                    continue;
                }
                // Duplicates within one record collapse to a single key.
                let _ = user.add_key(key);
            }

            inner.users.insert(record.name, user);
            admitted += 1;
        }

        admitted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
