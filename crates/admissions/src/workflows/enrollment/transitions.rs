use std::sync::Arc;

use super::domain::{Application, ApplicationId, ApplicationStatus, TenantId};
use super::repository::{EnrollmentStore, EnrollmentTransaction, StoreError, Transition};

/// Why an application cannot be decided.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EligibilityError {
    /// Missing, or owned by another tenant. Callers cannot tell which.
    #[error("application not found")]
    NotFound,
    #[error("application already {}", .status.label())]
    AlreadyProcessed { status: ApplicationStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tenant-scoped loader and compare-and-set updater for application status.
pub struct StateTransitionController<S> {
    store: Arc<S>,
}

impl<S> StateTransitionController<S>
where
    S: EnrollmentStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the application and confirm it is still `pending`.
    pub fn validate_for_processing(
        &self,
        application_id: &ApplicationId,
        tenant_id: &TenantId,
    ) -> Result<Application, EligibilityError> {
        match self.store.find_application(tenant_id, application_id)? {
            None => Err(EligibilityError::NotFound),
            Some(application) if application.status.is_terminal() => {
                Err(EligibilityError::AlreadyProcessed {
                    status: application.status,
                })
            }
            Some(application) => Ok(application),
        }
    }

    /// Move a pending application to a terminal status.
    ///
    /// `Ok(None)` means no pending row matched: someone else decided it first.
    pub fn apply_transition(
        &self,
        transition: &Transition,
    ) -> Result<Option<Application>, StoreError> {
        self.store.apply_transition(transition)
    }

    /// Same compare-and-set, inside an open transaction.
    pub fn apply_in(
        &self,
        tx: &mut dyn EnrollmentTransaction,
        transition: &Transition,
    ) -> Result<Option<Application>, StoreError> {
        tx.apply_transition(transition)
    }

    /// Explain a zero-row update by re-reading the application.
    pub fn lost_race(
        &self,
        application_id: &ApplicationId,
        tenant_id: &TenantId,
    ) -> EligibilityError {
        match self.store.find_application(tenant_id, application_id) {
            Ok(Some(application)) => EligibilityError::AlreadyProcessed {
                status: application.status,
            },
            Ok(None) => EligibilityError::NotFound,
            Err(err) => EligibilityError::Store(err),
        }
    }
}
