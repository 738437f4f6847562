//! Permission checking
//!
//! - `store`: explicit user grants and role defaults (memory / SQLite)
//! - `checker`: resolution order and ownership lookups

mod checker;
mod store;

pub use checker::{NoOwnership, OwnershipResolver, PermissionChecker, Resolution, StaticOwnership};
pub use store::{MemoryPermissionStore, PermissionStore, SqlitePermissionStore};
