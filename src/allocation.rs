//! Allocation handles.
//!
//! An [`Allocation`] is the proof object for one granted resource. It owns
//! the release capability (the marker file plus the engine's tracking entry)
//! and enforces single-release semantics through a one-shot token: releasing
//! twice, or with a foreign token, is a programmer error.

use crate::error::{ReslockError, Result};
use crate::lockfile::LockFile;
use crate::requirements::Requirements;
use crate::resource::ResourceRecord;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Engine-side table of live allocations: resource id to allocation token.
pub(crate) type AllocationTable = Arc<Mutex<HashMap<String, Uuid>>>;

pub(crate) fn lock_table(table: &AllocationTable) -> std::sync::MutexGuard<'_, HashMap<String, Uuid>> {
    table.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// The release capability: owned exclusively by the handle, runs at most
/// once. Removes the marker file and the engine's tracking entry.
#[derive(Debug)]
pub(crate) struct Releaser {
    pub(crate) resource_id: String,
    pub(crate) lock: LockFile,
    pub(crate) table: AllocationTable,
}

impl Releaser {
    fn release(self) -> Result<()> {
        self.lock.release()?;
        lock_table(&self.table).remove(&self.resource_id);
        Ok(())
    }
}

/// One successful grant of a resource.
#[derive(Debug)]
pub struct Allocation {
    requirements: Requirements,
    resource: ResourceRecord,
    lock_path: PathBuf,
    token: Option<Uuid>,
    releaser: Option<Releaser>,
    start_time: DateTime<Utc>,
    release_time: Option<DateTime<Utc>>,
    queue_time: Option<Duration>,
}

impl Allocation {
    pub(crate) fn new(
        requirements: Requirements,
        resource: ResourceRecord,
        releaser: Releaser,
    ) -> Self {
        let lock_path = releaser.lock.path().to_path_buf();
        Self {
            requirements,
            resource,
            lock_path,
            token: Some(Uuid::new_v4()),
            releaser: Some(releaser),
            start_time: Utc::now(),
            release_time: None,
            queue_time: None,
        }
    }

    /// The granted resource's id.
    pub fn resource_id(&self) -> &str {
        self.resource.id()
    }

    /// Snapshot of the granted resource record.
    pub fn resource(&self) -> &ResourceRecord {
        &self.resource
    }

    /// Look up a field of the granted resource.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.resource.get(key)
    }

    /// The requirements this allocation was granted for.
    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Path of the marker file backing this allocation.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// The single-use allocation token. `None` once released.
    pub fn token(&self) -> Option<Uuid> {
        self.token
    }

    /// Whether the allocation is still held.
    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    /// Time spent polling before the grant succeeded, if recorded.
    pub fn queue_time(&self) -> Option<Duration> {
        self.queue_time
    }

    pub(crate) fn set_queue_time(&mut self, queue_time: Duration) {
        self.queue_time = Some(queue_time);
    }

    /// When the allocation was released, if it has been.
    pub fn release_time(&self) -> Option<DateTime<Utc>> {
        self.release_time
    }

    /// Elapsed time from grant to release, or to now while still held.
    pub fn allocation_duration(&self) -> chrono::Duration {
        let end = self.release_time.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.start_time)
    }

    /// Release the resource, consuming the matching token.
    ///
    /// Fails with [`ReslockError::AlreadyReleased`] after a prior release and
    /// with [`ReslockError::TokenMismatch`] for a foreign token. On success
    /// the release capability runs exactly once: the marker file is removed
    /// and the engine's tracking entry dropped.
    pub fn release(&mut self, token: Uuid) -> Result<()> {
        match self.token {
            None => return Err(ReslockError::AlreadyReleased),
            Some(own) if own != token => return Err(ReslockError::TokenMismatch),
            Some(_) => {}
        }
        if let Some(releaser) = self.releaser.take() {
            releaser.release()?;
        }
        info!("released resource {}", self.resource_id());
        self.token = None;
        self.release_time = Some(Utc::now());
        Ok(())
    }

    /// Release with the handle's own token.
    pub fn unlock(&mut self) -> Result<()> {
        let token = self.token.ok_or(ReslockError::AlreadyReleased)?;
        self.release(token)
    }
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self
            .resource
            .fields()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "Allocation(queue_time: {:?}, resource_info: {info})",
            self.queue_time
        )
    }
}

/// RAII wrapper returned by `auto_lock`: releases the allocation on every
/// exit path of the caller's scope.
///
/// Dropping the guard releases the resource; a failed release during drop is
/// reported as a warning, never a panic. Use [`AllocationGuard::release`] to
/// observe release errors explicitly.
#[derive(Debug)]
pub struct AllocationGuard {
    inner: Option<Allocation>,
}

impl AllocationGuard {
    pub(crate) fn new(allocation: Allocation) -> Self {
        Self {
            inner: Some(allocation),
        }
    }

    /// Release explicitly, surfacing any error.
    pub fn release(mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut allocation) => allocation.unlock(),
            None => Ok(()),
        }
    }
}

impl std::ops::Deref for AllocationGuard {
    type Target = Allocation;

    fn deref(&self) -> &Allocation {
        self.inner
            .as_ref()
            .unwrap_or_else(|| unreachable!("guard emptied only on drop/release"))
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        if let Some(mut allocation) = self.inner.take()
            && allocation.is_held()
            && let Err(e) = allocation.unlock()
        {
            warn!(
                "failed to release resource '{}': {e}",
                allocation.resource_id()
            );
        }
    }
}
