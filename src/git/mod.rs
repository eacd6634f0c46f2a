//! Git command gateway and bare repository management.
//!
//! Nothing here speaks the Git wire protocol.  Repository creation shells out
//! to `git init --bare`, and an authorized session is handed to the system's
//! `git-upload-pack` / `git-receive-pack` programs.

pub mod bare_repo;
pub mod command;

pub use bare_repo::{init_bare_repo, remove_repo, validate_bare_repo};
pub use command::{is_valid_repo_name, CommandError, GitCommand, REPO_SUFFIX};
