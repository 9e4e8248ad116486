//! Pool lifecycle state.
//!
//! Status moves `Initializing -> Inactive -> Creating -> Active -> Closing -> Inactive`.
//! Create and close are serialized by an [`ExclusiveGate`]; cost estimates are
//! tagged with the generation that requested them and dropped when stale.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::costs::AccountCosts;
use crate::error::{ProvisionError, ProvisionResult};
use crate::provisioner::PoolConfig;

/// Lifecycle status of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Pool cost not yet known
    Initializing,
    /// Cost known, no pool
    Inactive,
    Creating,
    Closing,
    /// Pool exists
    Active,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Initializing => "initializing",
            Status::Inactive => "inactive",
            Status::Creating => "creating",
            Status::Closing => "closing",
            Status::Active => "active",
        };
        f.write_str(name)
    }
}

/// Admits at most one create-or-close operation at a time
#[derive(Debug, Default)]
pub struct ExclusiveGate {
    held: AtomicBool,
}

impl ExclusiveGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate, or `None` if another operation holds it.
    /// The gate is released when the returned guard drops.
    pub fn try_acquire(&self) -> Option<GateGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard { gate: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a ExclusiveGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}

/// Costs together with the pool size they were computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostEstimate {
    pub parallelization: u64,
    pub costs: AccountCosts,
}

/// Shared status, costs and pool of one provisioner
#[derive(Debug)]
pub struct PoolState {
    status: RwLock<Status>,
    estimate: RwLock<Option<CostEstimate>>,
    pool: RwLock<Option<Arc<PoolConfig>>>,
    gate: ExclusiveGate,
    generation: AtomicU64,
}

impl Default for PoolState {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolState {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(Status::Initializing),
            estimate: RwLock::new(None),
            pool: RwLock::new(None),
            gate: ExclusiveGate::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> Status {
        *read(&self.status)
    }

    pub fn estimate(&self) -> Option<CostEstimate> {
        *read(&self.estimate)
    }

    pub fn pool(&self) -> Option<Arc<PoolConfig>> {
        read(&self.pool).clone()
    }

    pub fn gate(&self) -> &ExclusiveGate {
        &self.gate
    }

    pub fn generation(&self) -> &AtomicU64 {
        &self.generation
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a new cost generation, invalidating any estimate in flight
    pub fn next_generation(&self) -> u64 {
        let mut estimate = write(&self.estimate);
        *estimate = None;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store an estimate if `generation` is still current.
    ///
    /// The first accepted estimate moves `Initializing` to `Inactive`; any
    /// later status is left alone. Returns whether the estimate was kept.
    pub fn record_estimate(&self, generation: u64, estimate: CostEstimate) -> bool {
        let mut current = write(&self.estimate);
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *current = Some(estimate);
        drop(current);

        let mut status = write(&self.status);
        if *status == Status::Initializing {
            *status = Status::Inactive;
        }
        true
    }

    /// Move from `from` to `to`, failing if the pool is elsewhere
    pub fn transition(&self, from: Status, to: Status) -> ProvisionResult<()> {
        let mut status = write(&self.status);
        if *status != from {
            return Err(ProvisionError::InvalidStatus {
                expected: from,
                actual: *status,
            });
        }
        *status = to;
        Ok(())
    }

    /// Publish a freshly created pool
    pub fn activate(&self, pool: Arc<PoolConfig>) {
        *write(&self.pool) = Some(pool);
        *write(&self.status) = Status::Active;
    }

    /// Back to `Inactive` with no pool, after a close or a failed operation
    pub fn reset(&self) {
        *write(&self.pool) = None;
        *write(&self.status) = Status::Inactive;
    }

    /// Force `Inactive` and drop the pool reference, unless an operation is in flight
    pub fn deactivate(&self) -> bool {
        let Some(_guard) = self.gate.try_acquire() else {
            return false;
        };
        self.reset();
        true
    }
}

// A poisoned lock only means a writer panicked mid-update of a Copy value
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
