//! SSH front end of the gateway.
//!
//! Accepts every public key, resolves it to an identity, and routes each
//! session either to the admin console or to `git-upload-pack` /
//! `git-receive-pack` against a hosted bare repository.

pub mod process;
pub mod router;
pub mod server;
pub mod session;

pub use server::start_ssh_server;
