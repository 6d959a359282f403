//! ACL expression language, glob-based permission resolver, shadow metadata
//! store and the sandboxed virtual filesystem built on top of them.

pub mod acl;
mod cap_fs;
pub mod error;
pub mod ipmask;
pub mod listing;
pub mod permissions;
mod pool;
pub mod shadow;
pub mod vfs;

pub use acl::{AclError, AclErrorKind, AclExpr};
pub use error::{VfsError, VfsErrorKind};
pub use permissions::{Permissions, Rule, RuleError, RuleErrorKind, Scope};
pub use shadow::{Entry as ShadowEntry, ShadowStore};
pub use vfs::{Filesystem, VfsConfig};
