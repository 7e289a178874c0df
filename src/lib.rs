//! Reslock: exclusive, process-external locks on named resources drawn from
//! a shared inventory.
//!
//! Independent processes (test runners sharing a pool of physical devices,
//! for example) coordinate through marker files in a shared lock directory:
//! the filesystem's exclusive-create operation is the sole arbiter, so the
//! scheme is safe exactly when every competitor uses the same directory
//! (one host, or one shared filesystem). This is not a distributed consensus
//! system and promises nothing across hosts without that shared directory.
//!
//! The core pieces:
//! - [`Requirements`] / [`Query`]: declarative filters over resource records
//!   (equality, `$exists`, `$in`, `$nin`, `$regex`).
//! - [`Provider`]: inventory source (static list, file, HTTP endpoint).
//! - [`Allocator`]: matching, shuffled candidate polling with timeout, and
//!   the in-process allocation table.
//! - [`Allocation`] / [`AllocationGuard`]: the grant handle with single-use
//!   release token, and its RAII form.

pub mod allocation;
pub mod allocator;
pub mod error;
pub mod lockfile;
pub mod provider;
pub mod query;
pub mod requirements;
pub mod resource;
mod unflatten;

pub use allocation::{Allocation, AllocationGuard};
pub use allocator::{Allocator, DEFAULT_RETRY_INTERVAL, DEFAULT_TIMEOUT};
pub use error::{ReslockError, Result};
pub use provider::{create_provider, FileProvider, HttpProvider, Provider, StaticProvider};
pub use query::Query;
pub use requirements::Requirements;
pub use resource::ResourceRecord;
