//! The allocation engine.
//!
//! Orchestrates candidate filtering, randomized ordering, try-lock polling
//! with timeout, and the in-process allocation table that prevents one
//! engine instance from re-locking a resource it already holds.
//!
//! Cross-process exclusion comes entirely from the lock primitive's
//! exclusive-create marker files; the polling here is deliberately
//! coarse (second-level sleeps between full candidate passes), not a spin.

use crate::allocation::{lock_table, Allocation, AllocationGuard, AllocationTable, Releaser};
use crate::error::{ReslockError, Result};
use crate::lockfile;
use crate::provider::Provider;
use crate::query::Query;
use crate::requirements::Requirements;
use crate::resource::ResourceRecord;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default allocation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1000);

/// Default sleep between full candidate passes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Allocation engine: grants exclusive, process-external locks on resources
/// from a provider-supplied inventory.
pub struct Allocator {
    hostname: String,
    lock_dir: PathBuf,
    retry_interval: Duration,
    provider: Box<dyn Provider>,
    allocations: AllocationTable,
}

impl Allocator {
    /// Build an engine over a provider, storing marker files in `lock_dir`.
    ///
    /// The engine's hostname defaults to the system hostname and constrains
    /// eligibility through the default `hostname` requirement.
    pub fn new(provider: Box<dyn Provider>, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            hostname: system_hostname(),
            lock_dir: lock_dir.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            provider,
            allocations: Arc::default(),
        }
    }

    /// Override the engine hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Override the sleep between polling passes.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// The hostname used for default eligibility.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Current inventory snapshot (as of the last refresh).
    pub fn resource_list(&self) -> &[ResourceRecord] {
        self.provider.snapshot()
    }

    /// Lock one resource satisfying the requirements.
    ///
    /// Merges the default constraints (`hostname`, `online = true`; an
    /// explicit null removes either), refreshes the inventory, filters and
    /// shuffles candidates, then polls until a marker is acquired or the
    /// timeout expires. No structurally matching candidate at all fails
    /// immediately with `ResourceNotFound`; a timeout of zero tries every
    /// candidate exactly once without sleeping.
    pub fn lock(&mut self, requirements: &Requirements, timeout: Duration) -> Result<Allocation> {
        let begin = Instant::now();
        let predicate = requirements.with_defaults(&self.hostname);
        let query = Query::compile(&predicate)?;
        self.provider.reload()?;
        debug!("lock folder: {}", self.lock_dir.display());
        debug!("requirements: {predicate}");

        let mut candidates: Vec<ResourceRecord> = query
            .filter(self.provider.snapshot())
            .into_iter()
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(ReslockError::ResourceNotFound(predicate.to_json()));
        }
        candidates.shuffle(&mut rand::thread_rng());

        let mut granted = self.lock_some(vec![predicate], candidates, timeout)?;
        let mut allocation = match granted.pop() {
            Some(allocation) => allocation,
            None => return Err(ReslockError::ResourceNotFound("no allocation".to_string())),
        };
        allocation.set_queue_time(begin.elapsed());
        Ok(allocation)
    }

    /// Lock one resource per requirement spec, atomically enough: either
    /// every spec is granted or none survive.
    ///
    /// Candidate sets are computed per spec and unioned (deduplicated by
    /// id); a union smaller than the number of specs is structurally
    /// unsatisfiable and fails fast with `ResourceNotFound` before any
    /// marker is created. On timeout every partial grant is rolled back.
    pub fn lock_many(
        &mut self,
        requirements: &[Requirements],
        timeout: Duration,
    ) -> Result<Vec<Allocation>> {
        let begin = Instant::now();
        let mut predicates = Vec::with_capacity(requirements.len());
        let mut queries = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            let predicate = requirement.with_defaults(&self.hostname);
            queries.push(Query::compile(&predicate)?);
            predicates.push(predicate);
        }
        self.provider.reload()?;
        debug!("lock folder: {}", self.lock_dir.display());

        let mut union: Vec<ResourceRecord> = Vec::new();
        for (predicate, query) in predicates.iter().zip(&queries) {
            let matched = query.filter(self.provider.snapshot());
            if matched.is_empty() {
                return Err(ReslockError::ResourceNotFound(predicate.to_json()));
            }
            for record in matched {
                if !union.iter().any(|r| r.id() == record.id()) {
                    union.push(record.clone());
                }
            }
        }
        if union.len() < predicates.len() {
            let all = predicates
                .iter()
                .map(Requirements::to_json)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ReslockError::ResourceNotFound(all));
        }
        union.shuffle(&mut rand::thread_rng());

        let mut granted = self.lock_some(predicates, union, timeout)?;
        let queue_time = begin.elapsed();
        for allocation in &mut granted {
            allocation.set_queue_time(queue_time);
        }
        Ok(granted)
    }

    /// Shared polling loop for `lock` and `lock_many`.
    ///
    /// Each pass walks every unfulfilled requirement in declaration order
    /// against the full candidate list, skipping resources this engine
    /// already holds. After a full pass with outstanding requirements the
    /// elapsed time is checked against the timeout, then the loop sleeps
    /// the retry interval and repeats.
    fn lock_some(
        &mut self,
        predicates: Vec<Requirements>,
        candidates: Vec<ResourceRecord>,
        timeout: Duration,
    ) -> Result<Vec<Allocation>> {
        debug!(
            "total matching candidates: {}, timeout: {timeout:?}",
            candidates.len()
        );
        let start = Instant::now();
        let total = predicates.len();
        let mut pending: Vec<Option<Requirements>> = predicates.into_iter().map(Some).collect();
        let mut granted: Vec<Allocation> = Vec::with_capacity(total);

        loop {
            for index in 0..pending.len() {
                let Some(predicate) = pending[index].take() else {
                    continue;
                };
                match self.try_candidates(predicate, &candidates) {
                    Ok(Ok(allocation)) => {
                        debug!(
                            "resource {} allocated ({}), token: {:?}",
                            allocation.resource_id(),
                            allocation.resource(),
                            allocation.token()
                        );
                        granted.push(allocation);
                    }
                    Ok(Err(predicate)) => pending[index] = Some(predicate),
                    Err(e) => {
                        // Hard failure: no partial grants survive.
                        self.rollback(granted);
                        return Err(e);
                    }
                }
            }

            if granted.len() == total {
                return Ok(granted);
            }

            // Coarse timeout check once per full pass; on the first pass it
            // runs before any sleep, so a zero timeout means one attempt at
            // every candidate and an immediate failure.
            if start.elapsed() >= timeout {
                self.rollback(granted);
                warn!("allocation timeout");
                return Err(ReslockError::Timeout(timeout));
            }

            debug!("trying to lock again after {:?}", self.retry_interval);
            std::thread::sleep(self.retry_interval);
        }
    }

    /// One attempt to lock any free candidate for a single requirement.
    ///
    /// `Ok(Ok(allocation))` on success, `Ok(Err(predicate))` when every
    /// candidate is currently held (the requirement goes back to pending),
    /// `Err` on a hard failure.
    fn try_candidates(
        &mut self,
        predicate: Requirements,
        candidates: &[ResourceRecord],
    ) -> Result<std::result::Result<Allocation, Requirements>> {
        for candidate in candidates {
            // Skip resources already allocated by this engine instance.
            if lock_table(&self.allocations).contains_key(candidate.id()) {
                continue;
            }
            match lockfile::try_acquire(&self.lock_dir, candidate.id()) {
                Ok(lock) => {
                    info!(
                        "allocated {}, lockfile: {}",
                        candidate.id(),
                        lock.path().display()
                    );
                    let releaser = Releaser {
                        resource_id: candidate.id().to_string(),
                        lock,
                        table: Arc::clone(&self.allocations),
                    };
                    let allocation = Allocation::new(predicate, candidate.clone(), releaser);
                    if let Some(token) = allocation.token() {
                        lock_table(&self.allocations)
                            .insert(allocation.resource_id().to_string(), token);
                    }
                    return Ok(Ok(allocation));
                }
                Err(ReslockError::AlreadyLocked { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Err(predicate))
    }

    /// Release every partial grant, reporting (not raising) failures.
    fn rollback(&self, granted: Vec<Allocation>) {
        for mut allocation in granted {
            if let Err(e) = allocation.unlock() {
                warn!(
                    "failed to roll back allocation of '{}': {e}",
                    allocation.resource_id()
                );
            }
        }
    }

    /// Release an allocation tracked by this engine.
    ///
    /// Fails with `ResourceNotFound` when the handle's resource is not in
    /// the engine's allocation table (never locked here, or already
    /// released).
    pub fn unlock(&self, allocation: &mut Allocation) -> Result<()> {
        let resource_id = allocation.resource_id().to_string();
        if !lock_table(&self.allocations).contains_key(&resource_id) {
            return Err(ReslockError::ResourceNotFound("resource not locked".to_string()));
        }
        info!("release: {resource_id}");
        let token = allocation.token().ok_or(ReslockError::AlreadyReleased)?;
        allocation.release(token)
    }

    /// Scoped acquisition: lock, then release on every exit path of the
    /// returned guard's scope.
    pub fn auto_lock(
        &mut self,
        requirements: &Requirements,
        timeout: Duration,
    ) -> Result<AllocationGuard> {
        Ok(AllocationGuard::new(self.lock(requirements, timeout)?))
    }
}

fn system_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
