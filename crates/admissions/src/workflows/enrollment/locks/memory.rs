use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{LockError, LockRequest, LockState, ProcessingLock, ProcessingLocks};
use crate::workflows::enrollment::clock::Clock;
use crate::workflows::enrollment::domain::{ActorId, ApplicationId, TenantId};

/// Single-process lock table keyed by application id.
///
/// Expired entries are evicted lazily on access and in bulk by [`ProcessingLocks::sweep`].
pub struct InMemoryLockManager {
    table: Mutex<HashMap<ApplicationId, ProcessingLock>>,
    clock: Arc<dyn Clock>,
    bulk_limit: usize,
}

impl InMemoryLockManager {
    pub fn new(clock: Arc<dyn Clock>, bulk_limit: usize) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            clock,
            bulk_limit,
        }
    }

    pub fn bulk_limit(&self) -> usize {
        self.bulk_limit
    }

    /// Number of entries currently in the table, expired ones included.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ApplicationId, ProcessingLock>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_of(
        table: &mut HashMap<ApplicationId, ProcessingLock>,
        application_id: &ApplicationId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> LockState {
        match table.get(application_id) {
            Some(lock) if lock.is_live(now) => LockState::held(lock.clone()),
            Some(_) => {
                table.remove(application_id);
                LockState::unlocked()
            }
            None => LockState::unlocked(),
        }
    }
}

impl ProcessingLocks for InMemoryLockManager {
    fn acquire(&self, request: LockRequest) -> Result<ProcessingLock, LockError> {
        let now = self.clock.now();
        let mut table = self.table();

        if let Some(existing) = table.get(&request.application_id) {
            if existing.is_live(now) && existing.holder_id != request.holder_id {
                debug!(
                    application_id = %request.application_id,
                    holder_id = %existing.holder_id,
                    requested_by = %request.holder_id,
                    "processing lock contended"
                );
                return Err(LockError::Conflict {
                    current: Box::new(existing.clone()),
                });
            }
        }

        let lock = ProcessingLock {
            application_id: request.application_id.clone(),
            tenant_id: request.tenant_id,
            holder_id: request.holder_id,
            holder_name: request.holder_name,
            action: request.action,
            acquired_at: now,
            expires_at: now + request.ttl,
        };
        table.insert(request.application_id, lock.clone());
        debug!(
            application_id = %lock.application_id,
            holder_id = %lock.holder_id,
            action = lock.action.label(),
            "processing lock acquired"
        );
        Ok(lock)
    }

    fn release(
        &self,
        application_id: &ApplicationId,
        holder_id: &ActorId,
    ) -> Result<(), LockError> {
        let now = self.clock.now();
        let mut table = self.table();

        match table.get(application_id) {
            None => Ok(()),
            Some(lock) if !lock.is_live(now) => {
                table.remove(application_id);
                Ok(())
            }
            Some(lock) if &lock.holder_id != holder_id => Err(LockError::NotOwner {
                holder_name: lock.holder_name.clone(),
            }),
            Some(_) => {
                table.remove(application_id);
                debug!(%application_id, %holder_id, "processing lock released");
                Ok(())
            }
        }
    }

    fn is_locked(&self, application_id: &ApplicationId) -> LockState {
        let now = self.clock.now();
        let mut table = self.table();
        Self::state_of(&mut table, application_id, now)
    }

    fn bulk_status(
        &self,
        application_ids: &[ApplicationId],
    ) -> Result<BTreeMap<ApplicationId, LockState>, LockError> {
        if application_ids.len() > self.bulk_limit {
            return Err(LockError::BatchTooLarge {
                requested: application_ids.len(),
                limit: self.bulk_limit,
            });
        }

        let now = self.clock.now();
        let mut table = self.table();
        Ok(application_ids
            .iter()
            .map(|id| (id.clone(), Self::state_of(&mut table, id, now)))
            .collect())
    }

    fn force_release(
        &self,
        tenant_id: &TenantId,
        holder_id: &ActorId,
        application_id: Option<&ApplicationId>,
    ) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|id, lock| {
            let targeted = application_id.map_or(true, |wanted| wanted == id);
            !(targeted && &lock.tenant_id == tenant_id && &lock.holder_id == holder_id)
        });
        let released = before - table.len();
        if released > 0 {
            warn!(%tenant_id, %holder_id, released, "processing locks force-released");
        }
        released
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, lock| lock.is_live(now));
        before - table.len()
    }
}
