//! Administrative console served on the admin's shell channel.
//!
//! The console is a plain line protocol: bytes from the channel are fed to a
//! [`LineEditor`], each completed line is executed against the shared
//! identity store and repository table, and the reply is written back with
//! CRLF line endings.  Every successful mutation is persisted immediately.

mod commands;
pub mod line;

use std::sync::Arc;

use crate::auth::IdentityStore;
use crate::repo::RepoTable;
use crate::storage::DataDir;

use line::{LineEditor, LineEvent};

const PROMPT: &str = "\r\nadmin> ";

const BANNER: &[&str] = &[
    "",
    "╔══════════════════════════════════════╗",
    "║     Git Server Management System     ║",
    "╚══════════════════════════════════════╝",
    "",
];

/// Bytes to send back to the client after feeding input.
#[derive(Debug, Default)]
pub struct ConsoleOutput {
    pub bytes: Vec<u8>,
    /// The admin quit or closed the input; the channel should be finished.
    pub finished: bool,
}

/// Reply to one command line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub quit: bool,
}

impl Reply {
    fn line(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
            quit: false,
        }
    }

    fn push(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }
}

pub struct Console {
    identities: Arc<IdentityStore>,
    repos: Arc<RepoTable>,
    data: DataDir,
    editor: LineEditor,
}

impl Console {
    pub fn new(identities: Arc<IdentityStore>, repos: Arc<RepoTable>, data: DataDir) -> Self {
        Self {
            identities,
            repos,
            data,
            editor: LineEditor::new(),
        }
    }

    /// Banner, help text and the first prompt.
    pub fn greeting(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for line in BANNER {
            write_line(&mut out, line);
        }
        for line in commands::HELP {
            write_line(&mut out, line);
        }
        out.extend_from_slice(PROMPT.as_bytes());
        out
    }

    /// Feed raw channel bytes.  Input after a quitting command is discarded.
    pub async fn feed(&mut self, data: &[u8]) -> ConsoleOutput {
        let mut output = ConsoleOutput::default();

        for &byte in data {
            match self.editor.push(byte, &mut output.bytes) {
                LineEvent::Pending => {}
                LineEvent::Line(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        output.bytes.extend_from_slice(PROMPT.as_bytes());
                        continue;
                    }
                    let reply = self.execute(line).await;
                    for text in &reply.lines {
                        write_line(&mut output.bytes, text);
                    }
                    if reply.quit {
                        output.finished = true;
                        return output;
                    }
                    output.bytes.extend_from_slice(PROMPT.as_bytes());
                }
                LineEvent::Interrupt | LineEvent::Eof => {
                    output.finished = true;
                    return output;
                }
            }
        }

        output
    }
}

/// Write `text` with every line terminated by CRLF.
fn write_line(out: &mut Vec<u8>, text: &str) {
    for line in text.split('\n') {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}
