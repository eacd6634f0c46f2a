//! SSH session handler implementing the `russh` 0.46 [`Handler`] trait.
//!
//! Each inbound connection is served by a dedicated [`SshSession`].  Public
//! key authentication always succeeds; the key only decides which
//! [`Identity`] the session acts as.  The [`Router`] then admits the session
//! to the admin console, runs a Git program against a repository, or sends a
//! denial on stderr and closes the channel with a non-zero exit status.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use russh_keys::key::PublicKey;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

use super::process::{self, ChannelSink, STDERR};
use super::router::{Denial, GitInvocation, Router};
use crate::auth::{AuthorizedKey, Identity};
use crate::console::Console;
use crate::AppState;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// What the channel is currently wired to.
enum Mode {
    Idle,
    Console(Console),
    /// Stdin of the running Git program.  Dropping it signals EOF.
    Git(ChildStdin),
}

/// Per-connection SSH session state.
pub struct SshSession {
    state: Arc<AppState>,
    router: Router,
    peer_addr: Option<SocketAddr>,
    identity: Identity,
    /// `GIT_PROTOCOL` value sent by the client via SSH env request.
    git_protocol: Option<String>,
    mode: Mode,
}

impl SshSession {
    pub fn new(state: Arc<AppState>, peer_addr: Option<SocketAddr>) -> Self {
        let router = Router::new(Arc::clone(&state.identities), Arc::clone(&state.repos));
        Self {
            state,
            router,
            peer_addr,
            identity: Identity::Unknown,
            git_protocol: None,
            mode: Mode::Idle,
        }
    }

    fn open_console(&mut self, channel_id: ChannelId, session: &mut Session) {
        if let Err(denial) = self.router.route_shell(&self.identity) {
            deny(session, channel_id, &denial);
            return;
        }

        info!(peer = ?self.peer_addr, "admin console opened");
        let console = Console::new(
            Arc::clone(&self.state.identities),
            Arc::clone(&self.state.repos),
            self.state.data.clone(),
        );
        session.data(channel_id, CryptoVec::from_slice(&console.greeting()));
        self.mode = Mode::Console(console);
    }

    fn spawn_git(&mut self, channel_id: ChannelId, invocation: GitInvocation, session: &mut Session) {
        let mut cmd = Command::new(invocation.program());
        cmd.arg(&invocation.repo_dir);
        if let Some(ref proto) = self.git_protocol {
            cmd.env("GIT_PROTOCOL", proto);
        }

        info!(
            username = self.identity.username(),
            repo = invocation.command.repo_path(),
            operation = %invocation.command.operation(),
            "starting git program"
        );

        // The sync `Session` cannot be used outside the handler call, so the
        // process task talks to the channel through a `Handle`.
        let sink = ChannelSink::new(session.handle(), channel_id);
        let (stdin, _task) = process::launch(cmd, sink);
        if let Some(stdin) = stdin {
            self.mode = Mode::Git(stdin);
        }
    }
}

// ---------------------------------------------------------------------------
// Channel helpers
// ---------------------------------------------------------------------------

/// Send exit-status, EOF, and close on a channel, in that order.  Git's SSH
/// transport treats a close without exit-status as a hung-up remote.
fn finish_channel(session: &mut Session, channel_id: ChannelId, exit_status: u32) {
    session.exit_status_request(channel_id, exit_status);
    session.eof(channel_id);
    session.close(channel_id);
}

/// Report a denial on stderr and end the channel with status 1.
fn deny(session: &mut Session, channel_id: ChannelId, denial: &Denial) {
    session.extended_data(channel_id, STDERR, CryptoVec::from_slice(format!("{denial}\r\n").as_bytes()));
    finish_channel(session, channel_id, 1);
}

// ---------------------------------------------------------------------------
// Handler implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = anyhow::Error;

    /// Every key is accepted.  Keys that match nothing resolve to
    /// [`Identity::Unknown`] so they can still read guest-readable repos.
    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        self.identity = match AuthorizedKey::from_public_key(key) {
            Ok(key) => {
                let identity = self.router.resolve(&key);
                info!(
                    peer = ?self.peer_addr,
                    user = %user,
                    key = %key,
                    identity = ?identity.class(),
                    username = identity.username(),
                    "SSH public-key auth"
                );
                identity
            }
            Err(e) => {
                warn!(peer = ?self.peer_addr, error = %e, "unreadable client key; treating as unknown");
                Identity::Unknown
            }
        };
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Git clients send `GIT_PROTOCOL=version=2` here before the exec request.
    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if variable_name == "GIT_PROTOCOL" {
            debug!(value = %variable_value, "captured GIT_PROTOCOL from client");
            self.git_protocol = Some(variable_value.to_string());
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.router.allow_pty(&self.identity) {
            session.channel_success(channel);
        } else {
            debug!(username = self.identity.username(), "pty refused");
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel);
        self.open_console(channel, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let raw_cmd = String::from_utf8_lossy(data);
        info!(
            peer = ?self.peer_addr,
            username = self.identity.username(),
            command = %raw_cmd,
            "SSH exec request"
        );
        session.channel_success(channel);

        // An empty command is the same as asking for a shell.
        if raw_cmd.trim().is_empty() {
            self.open_console(channel, session);
            return Ok(());
        }

        match self.router.route_exec(&self.identity, &raw_cmd).await {
            Ok(invocation) => self.spawn_git(channel, invocation, session),
            Err(denial) => deny(session, channel, &denial),
        }
        Ok(())
    }

    /// Client bytes go to the console line editor or to the Git program.
    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match &mut self.mode {
            Mode::Idle => {}
            Mode::Console(console) => {
                let output = console.feed(data).await;
                if !output.bytes.is_empty() {
                    session.data(channel, CryptoVec::from_slice(&output.bytes));
                }
                if output.finished {
                    info!(peer = ?self.peer_addr, "admin console closed");
                    self.mode = Mode::Idle;
                    finish_channel(session, channel, 0);
                }
            }
            Mode::Git(stdin) => {
                if let Err(e) = stdin.write_all(data).await {
                    debug!(error = %e, "failed to write to git program stdin (process may have exited)");
                    self.mode = Mode::Idle;
                }
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match std::mem::replace(&mut self.mode, Mode::Idle) {
            // Dropping stdin closes the pipe so the Git program sees EOF.
            Mode::Git(_stdin) => {}
            Mode::Console(_) => finish_channel(session, channel, 0),
            Mode::Idle => {}
        }
        Ok(())
    }
}
