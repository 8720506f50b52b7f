//! Per-application processing locks.
//!
//! Only one administrator may decide an application at a time. Callers go
//! through [`ProcessingLocks`] so the single-process table in [`memory`] can be
//! replaced by a shared transactional store without touching the pipeline.

mod memory;
mod sweeper;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{ActorId, ApplicationId, TenantId};

pub use memory::InMemoryLockManager;
pub use sweeper::LockSweeper;

/// Upper bound on ids accepted by a single bulk status query.
pub const DEFAULT_BULK_STATUS_LIMIT: usize = 100;

/// Decision an administrator intends to make while holding the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
}

impl DecisionAction {
    pub const fn label(self) -> &'static str {
        match self {
            DecisionAction::Approve => "approve",
            DecisionAction::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockRequest {
    pub application_id: ApplicationId,
    pub tenant_id: TenantId,
    pub holder_id: ActorId,
    pub holder_name: String,
    pub action: DecisionAction,
    pub ttl: Duration,
}

/// A time-boxed claim on one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLock {
    pub application_id: ApplicationId,
    pub tenant_id: TenantId,
    pub holder_id: ActorId,
    pub holder_name: String,
    pub action: DecisionAction,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProcessingLock {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn ttl(&self) -> Duration {
        self.expires_at - self.acquired_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockState {
    pub locked: bool,
    pub lock: Option<ProcessingLock>,
}

impl LockState {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn held(lock: ProcessingLock) -> Self {
        Self {
            locked: true,
            lock: Some(lock),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    #[error("application is being processed by {} ({})", .current.holder_name, .current.action.label())]
    Conflict { current: Box<ProcessingLock> },
    #[error("lock is held by {holder_name}, not the caller")]
    NotOwner { holder_name: String },
    #[error("bulk lock status accepts at most {limit} ids, got {requested}")]
    BatchTooLarge { requested: usize, limit: usize },
}

/// Mutual exclusion contract for deciding applications.
pub trait ProcessingLocks: Send + Sync {
    /// Take or refresh the lock. A live lock held by someone else is a conflict.
    fn acquire(&self, request: LockRequest) -> Result<ProcessingLock, LockError>;

    /// Drop the caller's lock. Missing or expired locks release trivially.
    fn release(&self, application_id: &ApplicationId, holder_id: &ActorId)
        -> Result<(), LockError>;

    fn is_locked(&self, application_id: &ApplicationId) -> LockState;

    fn bulk_status(
        &self,
        application_ids: &[ApplicationId],
    ) -> Result<BTreeMap<ApplicationId, LockState>, LockError>;

    /// Release without the ownership check. Only locks owned by `tenant_id` are
    /// touched. Returns how many locks were dropped.
    fn force_release(
        &self,
        tenant_id: &TenantId,
        holder_id: &ActorId,
        application_id: Option<&ApplicationId>,
    ) -> usize;

    /// Evict every expired lock, returning the eviction count.
    fn sweep(&self) -> usize;
}

/// Scoped hold on a processing lock. Releases on drop unless released explicitly.
pub struct LockLease {
    locks: Arc<dyn ProcessingLocks>,
    lock: ProcessingLock,
    released: bool,
}

impl LockLease {
    pub fn acquire(locks: Arc<dyn ProcessingLocks>, request: LockRequest) -> Result<Self, LockError> {
        let lock = locks.acquire(request)?;
        Ok(Self {
            locks,
            lock,
            released: false,
        })
    }

    pub fn lock(&self) -> &ProcessingLock {
        &self.lock
    }

    /// Disarm the lease and hand back the lock. It stays held until its TTL
    /// runs out or the holder releases it.
    pub fn keep(mut self) -> ProcessingLock {
        self.released = true;
        self.lock.clone()
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.locks
            .release(&self.lock.application_id, &self.lock.holder_id)
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self
            .locks
            .release(&self.lock.application_id, &self.lock.holder_id)
        {
            warn!(
                application_id = %self.lock.application_id,
                holder_id = %self.lock.holder_id,
                error = %err,
                "processing lock release failed during cleanup"
            );
        }
    }
}
