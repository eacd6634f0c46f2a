//! Running an authorized Git program against an SSH channel.
//!
//! The program's stdout is sent as channel data, its stderr as extended data
//! of type 1, and its exit status becomes the channel's exit status.  The
//! channel side is abstracted as an [`OutputSink`] so the process plumbing
//! does not depend on a live transport.

use std::process::Stdio;

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Extended-data type code for stderr (RFC 4254).
pub const STDERR: u32 = 1;

/// Status reported when the program could not be started or was killed by
/// a signal.
pub const FAILURE: u32 = 1;

/// Destination for a program's output and final status.
#[async_trait]
pub trait OutputSink: Send + Sync + 'static {
    /// Send `bytes` as data (`ext == None`) or as extended data.  Returns
    /// `false` once the client is gone.
    async fn send(&self, ext: Option<u32>, bytes: &[u8]) -> bool;

    /// End the channel with `exit_status`.
    async fn finish(&self, exit_status: u32);
}

/// An SSH channel reached through a session [`Handle`].
pub struct ChannelSink {
    handle: Handle,
    channel_id: ChannelId,
}

impl ChannelSink {
    pub fn new(handle: Handle, channel_id: ChannelId) -> Self {
        Self { handle, channel_id }
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn send(&self, ext: Option<u32>, bytes: &[u8]) -> bool {
        let chunk = CryptoVec::from_slice(bytes);
        let sent = match ext {
            Some(code) => self.handle.extended_data(self.channel_id, code, chunk).await,
            None => self.handle.data(self.channel_id, chunk).await,
        };
        sent.is_ok()
    }

    /// Exit-status, then EOF, then close.  Git's SSH transport treats a
    /// close without exit-status as a hung-up remote.
    async fn finish(&self, exit_status: u32) {
        let _ = self.handle.exit_status_request(self.channel_id, exit_status).await;
        let _ = self.handle.eof(self.channel_id).await;
        let _ = self.handle.close(self.channel_id).await;
    }
}

/// Start `cmd` with piped stdio and stream it to `sink` in the background.
///
/// Returns the program's stdin (absent if it could not be started) and a
/// task resolving to the exit status that was reported to `sink`.  A spawn
/// failure is reported on stderr and finishes the channel with [`FAILURE`].
pub fn launch<S: OutputSink>(mut cmd: Command, sink: S) -> (Option<ChildStdin>, JoinHandle<u32>) {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(program = %program, error = %e, "failed to spawn git program");
            let task = tokio::spawn(async move {
                let msg = format!("Error: failed to start {program}\r\n");
                sink.send(Some(STDERR), msg.as_bytes()).await;
                sink.finish(FAILURE).await;
                FAILURE
            });
            return (None, task);
        }
    };

    let stdin = child.stdin.take();
    let (stdout, stderr) = (child.stdout.take(), child.stderr.take());

    let task = tokio::spawn(async move {
        match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => {
                tokio::join!(pump(stdout, &sink, None), pump(stderr, &sink, Some(STDERR)));
            }
            _ => warn!(program = %program, "git program started without piped output"),
        }

        let exit_status = match child.wait().await {
            Ok(status) => status.code().map_or(FAILURE, |code| code as u32),
            Err(e) => {
                warn!(program = %program, error = %e, "failed to wait for git program");
                FAILURE
            }
        };
        info!(program = %program, exit_status, "git program exited");

        sink.finish(exit_status).await;
        exit_status
    });

    (stdin, task)
}

/// Copy one output stream to the sink until EOF or until the client is gone.
async fn pump<R, S>(mut reader: R, sink: &S, ext: Option<u32>)
where
    R: AsyncRead + Unpin,
    S: OutputSink,
{
    let mut buf = vec![0u8; 65536];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if !sink.send(ext, &buf[..n]).await {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "error reading git program output");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
