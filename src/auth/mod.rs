//! Identity resolution and permission levels.
//!
//! Every key presented at the SSH layer is resolved to an [`Identity`]:
//! the administrator, a registered user, or unknown.  Resolution never
//! rejects a connection; authorization happens later, per command.

pub mod identity;
pub mod keys;
pub mod permission;

pub use identity::{Identity, IdentityStore, GUEST_NAME};
pub use keys::AuthorizedKey;
pub use permission::Permission;
