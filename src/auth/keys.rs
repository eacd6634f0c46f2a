//! OpenSSH public keys in authorized-keys form.
//!
//! Keys are stored as their raw wire blob so that a key read from
//! `users.json`, `admin.pub` or the console compares equal to the key the
//! transport layer hands us during public-key authentication.  Equality is
//! always decided by [`AuthorizedKey::fingerprint`].

use std::fmt;

use base64::Engine as _;
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Reasons an authorized-keys line is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("expected '<algorithm> <base64-key> [comment]'")]
    MissingFields,
    #[error("key data is not valid base64")]
    InvalidBase64,
    #[error("key blob is truncated")]
    Truncated,
    #[error("key type '{declared}' does not match key data type '{embedded}'")]
    AlgorithmMismatch { declared: String, embedded: String },
}

/// A public key together with its optional authorized-keys comment.
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    algorithm: String,
    blob: Vec<u8>,
    comment: Option<String>,
}

impl AuthorizedKey {
    /// Parse a single authorized-keys line such as
    /// `ssh-ed25519 AAAAC3Nza... alice@laptop`.
    ///
    /// A leading options field (`no-pty`, `from="..."`) is skipped; options
    /// are not enforced.
    pub fn parse(line: &str) -> Result<Self, KeyParseError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let start = fields.iter().position(|f| is_key_type(f)).unwrap_or(0);
        let (Some(algorithm), Some(encoded)) = (fields.get(start), fields.get(start + 1)) else {
            return Err(KeyParseError::MissingFields);
        };
        let comment = fields[start + 2..].join(" ");

        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| KeyParseError::InvalidBase64)?;

        let embedded = embedded_algorithm(&blob)?;
        if embedded != *algorithm {
            return Err(KeyParseError::AlgorithmMismatch {
                declared: algorithm.to_string(),
                embedded,
            });
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            blob,
            comment: (!comment.is_empty()).then_some(comment),
        })
    }

    /// Convert a key presented by an SSH client during authentication.
    pub fn from_public_key(key: &PublicKey) -> Result<Self, KeyParseError> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(key.public_key_base64().as_bytes())
            .map_err(|_| KeyParseError::InvalidBase64)?;
        let algorithm = embedded_algorithm(&blob)?;
        Ok(Self {
            algorithm,
            blob,
            comment: None,
        })
    }

    /// SHA-256 fingerprint in the `ssh-keygen -l` format (`SHA256:<base64>`).
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(&self.blob);
        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
        format!("SHA256:{encoded}")
    }

    /// Serialize back to a single authorized-keys line.
    pub fn to_authorized_line(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.blob);
        match &self.comment {
            Some(comment) => format!("{} {} {}", self.algorithm, encoded, comment),
            None => format!("{} {}", self.algorithm, encoded),
        }
    }
}

impl PartialEq for AuthorizedKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for AuthorizedKey {}

impl fmt::Display for AuthorizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.fingerprint())
    }
}

/// Whether an authorized-keys field names a key algorithm rather than an
/// option.
fn is_key_type(field: &str) -> bool {
    ["ssh-", "ecdsa-sha2-", "sk-ssh-", "sk-ecdsa-sha2-"]
        .iter()
        .any(|prefix| field.starts_with(prefix))
}

/// Read the leading SSH wire string of a key blob, which names its algorithm.
fn embedded_algorithm(blob: &[u8]) -> Result<String, KeyParseError> {
    let len_bytes: [u8; 4] = blob
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(KeyParseError::Truncated)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let name = blob.get(4..4 + len).ok_or(KeyParseError::Truncated)?;
    Ok(String::from_utf8_lossy(name).into_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
