use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::clock::Clock;
use super::domain::{
    AccountRole, ActorId, Application, ApplicationId, ApplicationStatus, CreatedEntities,
    GuardianId,
};
use super::locks::{
    DecisionAction, LockError, LockLease, LockRequest, ProcessingLock, ProcessingLocks,
};
use super::password::{PasswordHasher, SaltedSha256Hasher};
use super::pipeline::{EnrollmentPipeline, PipelineError, PipelineStep};
use super::repository::{
    EnrollmentStore, Notification, NotificationPublisher, NotificationReceipt, StoreError,
    Transition,
};
use super::requests::DecisionRequest;
use super::tenancy::ActorContext;
use super::transitions::{EligibilityError, StateTransitionController};
use super::validation::{
    ApplicationValidator, ApprovalPlan, RejectionPlan, ValidatedDecision, ValidationErrors,
};
use crate::config::ProcessingConfig;

pub const WELCOME_TEMPLATE: &str = "guardian_welcome";
pub const REJECTION_TEMPLATE: &str = "application_rejected";

/// Successful decision, as returned to the administrator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedApplication {
    pub application: Application,
    #[serde(rename = "createdEntities", skip_serializing_if = "Option::is_none")]
    pub created: Option<CreatedEntities>,
    pub notifications: Vec<NotificationReceipt>,
}

/// Lock state of one application from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatusView {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<DecisionAction>,
    pub is_own_lock: bool,
}

impl LockStatusView {
    fn unlocked() -> Self {
        Self {
            locked: false,
            holder_name: None,
            since: None,
            action: None,
            is_own_lock: false,
        }
    }
}

/// Error raised by the processing service. Each variant has a stable code.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Validation(ValidationErrors),
    #[error("application not found")]
    NotFound,
    #[error("application already {}", .status.label())]
    AlreadyProcessed { status: ApplicationStatus },
    #[error("application is being processed by {holder_name} ({})", .action.label())]
    Locked {
        holder_name: String,
        action: DecisionAction,
        since: DateTime<Utc>,
    },
    #[error("guardian email already registered to {} account {existing_id}", .existing_role.label())]
    GuardianEmailExists {
        existing_id: GuardianId,
        existing_role: AccountRole,
    },
    #[error("enrollment could not be created (failed at {step}); nothing was saved")]
    TransactionFailed { step: PipelineStep },
    #[error("at most {limit} applications per lock status query, got {requested}")]
    BatchTooLarge { requested: usize, limit: usize },
    #[error("processing lock is held by {holder_name}")]
    NotLockOwner { holder_name: String },
    #[error("application store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

impl ProcessingError {
    pub const fn code(&self) -> &'static str {
        match self {
            ProcessingError::Validation(_) => "VALIDATION_ERROR",
            ProcessingError::NotFound => "NOT_FOUND",
            ProcessingError::AlreadyProcessed { .. } => "ALREADY_PROCESSED",
            ProcessingError::Locked { .. } => "LOCKED",
            ProcessingError::GuardianEmailExists { .. } => "GUARDIAN_EMAIL_EXISTS",
            ProcessingError::TransactionFailed { .. } => "TRANSACTION_FAILED",
            ProcessingError::BatchTooLarge { .. } => "BATCH_TOO_LARGE",
            ProcessingError::NotLockOwner { .. } => "LOCK_NOT_OWNER",
            ProcessingError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Structured detail a client can act on without reading server logs.
    pub fn details(&self) -> Option<Value> {
        match self {
            ProcessingError::Validation(errors) => Some(json!({ "fieldErrors": errors })),
            ProcessingError::AlreadyProcessed { status } => {
                Some(json!({ "status": status.label() }))
            }
            ProcessingError::Locked {
                holder_name,
                action,
                since,
            } => Some(json!({
                "holderName": holder_name,
                "action": action.label(),
                "since": since,
            })),
            ProcessingError::GuardianEmailExists {
                existing_id,
                existing_role,
            } => Some(json!({
                "existingId": existing_id,
                "existingRole": existing_role.label(),
            })),
            ProcessingError::TransactionFailed { step } => Some(json!({ "step": step.label() })),
            ProcessingError::BatchTooLarge { requested, limit } => {
                Some(json!({ "requested": requested, "limit": limit }))
            }
            ProcessingError::NotLockOwner { holder_name } => {
                Some(json!({ "holderName": holder_name }))
            }
            ProcessingError::NotFound | ProcessingError::StoreUnavailable(_) => None,
        }
    }
}

impl From<ValidationErrors> for ProcessingError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

impl From<EligibilityError> for ProcessingError {
    fn from(value: EligibilityError) -> Self {
        match value {
            EligibilityError::NotFound => Self::NotFound,
            EligibilityError::AlreadyProcessed { status } => Self::AlreadyProcessed { status },
            EligibilityError::Store(err) => Self::StoreUnavailable(err),
        }
    }
}

impl From<PipelineError> for ProcessingError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::GuardianEmailExists {
                existing_id,
                existing_role,
            } => Self::GuardianEmailExists {
                existing_id,
                existing_role,
            },
            PipelineError::Eligibility(err) => err.into(),
            PipelineError::TransactionFailed { step, .. } => Self::TransactionFailed { step },
        }
    }
}

impl From<LockError> for ProcessingError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::Conflict { current } => Self::Locked {
                holder_name: current.holder_name,
                action: current.action,
                since: current.acquired_at,
            },
            LockError::NotOwner { holder_name } => Self::NotLockOwner { holder_name },
            LockError::BatchTooLarge { requested, limit } => {
                Self::BatchTooLarge { requested, limit }
            }
        }
    }
}

impl From<StoreError> for ProcessingError {
    fn from(value: StoreError) -> Self {
        Self::StoreUnavailable(value)
    }
}

/// Decision service composing locks, validation, eligibility and the pipeline.
pub struct ApplicationProcessor<S, N> {
    locks: Arc<dyn ProcessingLocks>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    validator: ApplicationValidator,
    transitions: StateTransitionController<S>,
    pipeline: EnrollmentPipeline<S>,
    lock_ttl: Duration,
}

impl<S, N> ApplicationProcessor<S, N>
where
    S: EnrollmentStore + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        locks: Arc<dyn ProcessingLocks>,
        clock: Arc<dyn Clock>,
        config: &ProcessingConfig,
    ) -> Self {
        let hasher = Arc::new(SaltedSha256Hasher::new(config.password_hash_rounds));
        Self::with_hasher(store, notifier, locks, clock, config, hasher)
    }

    pub fn with_hasher(
        store: Arc<S>,
        notifier: Arc<N>,
        locks: Arc<dyn ProcessingLocks>,
        clock: Arc<dyn Clock>,
        config: &ProcessingConfig,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            locks,
            notifier,
            clock,
            validator: ApplicationValidator::new(
                config.max_reason_length,
                config.min_password_length,
            ),
            transitions: StateTransitionController::new(store.clone()),
            pipeline: EnrollmentPipeline::new(store, hasher),
            lock_ttl: config.lock_ttl(),
        }
    }

    /// Approve or reject an application.
    ///
    /// Lock, validate, check eligibility, mutate, release. The lock is released
    /// on every path out of this function.
    pub fn process(
        &self,
        actor: &ActorContext,
        application_id: &ApplicationId,
        request: DecisionRequest,
    ) -> Result<ProcessedApplication, ProcessingError> {
        let action = request.action();
        let lease = self.lease(actor, application_id, action)?;

        let today = self.clock.now().date_naive();
        let decision = self.validator.validate(request, today).map_err(|errors| {
            info!(
                %application_id,
                actor_id = %actor.actor_id,
                violations = errors.0.len(),
                "decision payload rejected"
            );
            ProcessingError::Validation(errors)
        })?;

        let application = self
            .transitions
            .validate_for_processing(application_id, &actor.tenant_id)?;

        match decision {
            ValidatedDecision::Approve(plan) => self.approve(actor, &application, plan, lease),
            ValidatedDecision::Reject(plan) => self.reject(actor, &application, plan, lease),
        }
    }

    fn approve(
        &self,
        actor: &ActorContext,
        application: &Application,
        plan: ApprovalPlan,
        lease: LockLease,
    ) -> Result<ProcessedApplication, ProcessingError> {
        let outcome = self
            .pipeline
            .approve(application, actor, &plan, self.clock.now())?;
        release(lease);

        let mut notifications = Vec::new();
        if plan.send_welcome_email {
            let mut details = BTreeMap::new();
            details.insert("guardianName".to_string(), outcome.created.guardian.name.clone());
            details.insert("childName".to_string(), outcome.created.child.full_name.clone());
            details.insert("loginEmail".to_string(), outcome.created.guardian.email.clone());
            details.insert(
                "enrollmentId".to_string(),
                outcome.created.enrollment.id.to_string(),
            );
            if let Some(program) = &outcome.created.enrollment.program_id {
                details.insert("programId".to_string(), program.clone());
            }
            notifications.push(self.notify(Notification {
                template: WELCOME_TEMPLATE.to_string(),
                tenant_id: outcome.application.tenant_id.clone(),
                application_id: outcome.application.id.clone(),
                recipient: outcome.created.guardian.email.clone(),
                details,
            }));
        }

        Ok(ProcessedApplication {
            application: outcome.application,
            created: Some(outcome.created),
            notifications,
        })
    }

    fn reject(
        &self,
        actor: &ActorContext,
        application: &Application,
        plan: RejectionPlan,
        lease: LockLease,
    ) -> Result<ProcessedApplication, ProcessingError> {
        let transition = Transition {
            application_id: application.id.clone(),
            tenant_id: application.tenant_id.clone(),
            status: ApplicationStatus::Rejected,
            actor_id: actor.actor_id.clone(),
            reason: Some(plan.reason.clone()),
            notes: plan.notes.clone(),
            at: self.clock.now(),
        };

        let Some(updated) = self.transitions.apply_transition(&transition)? else {
            return Err(self
                .transitions
                .lost_race(&application.id, &application.tenant_id)
                .into());
        };
        info!(
            application_id = %updated.id,
            tenant_id = %updated.tenant_id,
            actor_id = %actor.actor_id,
            "application rejected"
        );
        release(lease);

        let mut notifications = Vec::new();
        if plan.notify_parent {
            let mut details = BTreeMap::new();
            details.insert("guardianName".to_string(), updated.guardian.name.clone());
            details.insert("childName".to_string(), updated.child.name.clone());
            details.insert("reason".to_string(), plan.reason);
            notifications.push(self.notify(Notification {
                template: REJECTION_TEMPLATE.to_string(),
                tenant_id: updated.tenant_id.clone(),
                application_id: updated.id.clone(),
                recipient: updated.guardian.email.clone(),
                details,
            }));
        }

        Ok(ProcessedApplication {
            application: updated,
            created: None,
            notifications,
        })
    }

    /// Take the processing lock ahead of a decision (e.g. when a review dialog opens).
    pub fn claim(
        &self,
        actor: &ActorContext,
        application_id: &ApplicationId,
        action: DecisionAction,
    ) -> Result<ProcessingLock, ProcessingError> {
        let lease = self.lease(actor, application_id, action)?;
        self.transitions
            .validate_for_processing(application_id, &actor.tenant_id)?;
        Ok(lease.keep())
    }

    /// Release the caller's own lock. Locks under other tenants are invisible.
    pub fn release_lock(
        &self,
        actor: &ActorContext,
        application_id: &ApplicationId,
    ) -> Result<(), ProcessingError> {
        if let Some(lock) = self.locks.is_locked(application_id).lock {
            if lock.tenant_id != actor.tenant_id {
                return Ok(());
            }
        }
        self.locks.release(application_id, &actor.actor_id)?;
        Ok(())
    }

    pub fn lock_status(
        &self,
        actor: &ActorContext,
        application_ids: &[ApplicationId],
    ) -> Result<BTreeMap<ApplicationId, LockStatusView>, ProcessingError> {
        let states = self.locks.bulk_status(application_ids)?;
        Ok(states
            .into_iter()
            .map(|(id, state)| {
                let view = match state.lock {
                    Some(lock) if state.locked && lock.tenant_id == actor.tenant_id => {
                        LockStatusView {
                            locked: true,
                            is_own_lock: lock.holder_id == actor.actor_id,
                            holder_name: Some(lock.holder_name),
                            since: Some(lock.acquired_at),
                            action: Some(lock.action),
                        }
                    }
                    _ => LockStatusView::unlocked(),
                };
                (id, view)
            })
            .collect())
    }

    /// Privileged unlock that skips the ownership check. Scoped to the caller's tenant.
    pub fn force_release(
        &self,
        actor: &ActorContext,
        holder_id: &ActorId,
        application_id: Option<&ApplicationId>,
    ) -> usize {
        let released = self
            .locks
            .force_release(&actor.tenant_id, holder_id, application_id);
        info!(
            actor_id = %actor.actor_id,
            tenant_id = %actor.tenant_id,
            %holder_id,
            released,
            "force release requested"
        );
        released
    }

    pub fn application(
        &self,
        actor: &ActorContext,
        application_id: &ApplicationId,
    ) -> Result<Application, ProcessingError> {
        self.transitions
            .store()
            .find_application(&actor.tenant_id, application_id)?
            .ok_or(ProcessingError::NotFound)
    }

    fn lease(
        &self,
        actor: &ActorContext,
        application_id: &ApplicationId,
        action: DecisionAction,
    ) -> Result<LockLease, ProcessingError> {
        // Unknown ids never reach the lock table, so a foreign tenant cannot
        // hold a lock over another school's application.
        if self
            .transitions
            .store()
            .find_application(&actor.tenant_id, application_id)?
            .is_none()
        {
            return Err(ProcessingError::NotFound);
        }

        let request = LockRequest {
            application_id: application_id.clone(),
            tenant_id: actor.tenant_id.clone(),
            holder_id: actor.actor_id.clone(),
            holder_name: actor.name.clone(),
            action,
            ttl: self.lock_ttl,
        };
        LockLease::acquire(self.locks.clone(), request).map_err(|err| match err {
            LockError::Conflict { current } if current.tenant_id != actor.tenant_id => {
                ProcessingError::NotFound
            }
            other => {
                if let LockError::Conflict { current } = &other {
                    info!(
                        %application_id,
                        requested_by = %actor.actor_id,
                        holder_id = %current.holder_id,
                        "decision blocked by processing lock"
                    );
                }
                other.into()
            }
        })
    }

    fn notify(&self, notification: Notification) -> NotificationReceipt {
        let template = notification.template.clone();
        let recipient = notification.recipient.clone();
        let application_id = notification.application_id.clone();
        let queued = match self.notifier.publish(notification) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    %application_id,
                    template = %template,
                    error = %err,
                    "notification could not be queued"
                );
                false
            }
        };
        NotificationReceipt {
            template,
            recipient,
            queued,
        }
    }
}

fn release(lease: LockLease) {
    let application_id = lease.lock().application_id.clone();
    if let Err(err) = lease.release() {
        warn!(%application_id, error = %err, "processing lock release failed after commit");
    }
}
