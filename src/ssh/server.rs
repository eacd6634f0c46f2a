//! SSH server bootstrap and the [`russh::server::Server`] implementation.

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::server::{self, Server};
use russh::MethodSet;
use russh_keys::key::KeyPair;
use tracing::{info, instrument};

use super::session::SshSession;
use crate::AppState;

// ---------------------------------------------------------------------------
// Server type
// ---------------------------------------------------------------------------

/// Hands each incoming connection to its own [`SshSession`].
pub struct SshServer {
    state: Arc<AppState>,
}

impl SshServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl server::Server for SshServer {
    type Handler = SshSession;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        info!(peer = ?peer_addr, "new SSH client connection");
        SshSession::new(Arc::clone(&self.state), peer_addr)
    }
}

// ---------------------------------------------------------------------------
// Host key
// ---------------------------------------------------------------------------

/// Load the PEM host key at `path`, or generate and persist a fresh Ed25519
/// key if the file does not exist yet.
#[instrument(fields(path = %path.display()))]
pub fn load_or_generate_host_key(path: &Path) -> Result<KeyPair> {
    match std::fs::read_to_string(path) {
        Ok(pem) => {
            let key = russh_keys::decode_secret_key(&pem, None)
                .with_context(|| format!("failed to decode SSH host key: {}", path.display()))?;
            info!("loaded SSH host key");
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = KeyPair::generate_ed25519();
            write_host_key(path, &key)?;
            info!("generated new Ed25519 SSH host key");
            Ok(key)
        }
        Err(e) => {
            Err(e).with_context(|| format!("failed to read SSH host key: {}", path.display()))
        }
    }
}

fn write_host_key(path: &Path, key: &KeyPair) -> Result<()> {
    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(key, &mut pem).context("failed to encode SSH host key")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create SSH host key: {}", path.display()))?;
    file.write_all(&pem)
        .with_context(|| format!("failed to write SSH host key: {}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Start the SSH listener.  Runs until the listener fails; binding failure
/// is the only fatal error.
pub async fn start_ssh_server(state: Arc<AppState>) -> Result<()> {
    let listen_addr = state.config.listen_addr()?;
    let host_key = load_or_generate_host_key(&state.data.host_key_file())?;

    let ssh = &state.config.ssh;
    let config = Arc::new(server::Config {
        keys: vec![host_key],
        methods: MethodSet::PUBLICKEY,
        preferred: russh::Preferred::DEFAULT,
        inactivity_timeout: Some(Duration::from_secs(ssh.inactivity_timeout)),
        auth_rejection_time: Duration::from_millis(ssh.auth_rejection_time_ms),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        max_auth_attempts: ssh.max_auth_attempts,
        ..Default::default()
    });

    info!(address = %listen_addr, "starting SSH server");

    let mut ssh_server = SshServer::new(state);
    ssh_server
        .run_on_address(config, listen_addr)
        .await
        .context("SSH server exited with error")?;

    Ok(())
}
