//! Atomic materialization of an approval.
//!
//! A guardian account, household, child and enrollment are created and the
//! application flips to `approved` inside one store transaction. Either all of
//! it lands or none of it does.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use super::domain::{
    split_display_name, AccountRole, Application, ApplicationStatus, ChildId, ChildRecord,
    CreatedEntities, EnrollmentId, EnrollmentRecord, GuardianAccount, GuardianId, HouseholdId,
    HouseholdUnit,
};
use super::password::PasswordHasher;
use super::repository::{EnrollmentStore, StoreError, Transition};
use super::tenancy::ActorContext;
use super::transitions::{EligibilityError, StateTransitionController};
use super::validation::ApprovalPlan;

/// Identity of each unit of work inside the approval transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    CreateGuardian,
    CreateHousehold,
    CreateChild,
    CreateEnrollment,
    ApproveApplication,
}

impl PipelineStep {
    pub const fn label(self) -> &'static str {
        match self {
            PipelineStep::CreateGuardian => "create_guardian",
            PipelineStep::CreateHousehold => "create_household",
            PipelineStep::CreateChild => "create_child",
            PipelineStep::CreateEnrollment => "create_enrollment",
            PipelineStep::ApproveApplication => "approve_application",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("guardian email already registered to {} account {existing_id}", .existing_role.label())]
    GuardianEmailExists {
        existing_id: GuardianId,
        existing_role: AccountRole,
    },
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error("enrollment transaction failed at {step}: {source}")]
    TransactionFailed {
        step: PipelineStep,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub application: Application,
    pub created: CreatedEntities,
}

pub struct EnrollmentPipeline<S> {
    store: Arc<S>,
    transitions: StateTransitionController<S>,
    hasher: Arc<dyn PasswordHasher>,
}

impl<S> EnrollmentPipeline<S>
where
    S: EnrollmentStore,
{
    pub fn new(store: Arc<S>, hasher: Arc<dyn PasswordHasher>) -> Self {
        let transitions = StateTransitionController::new(store.clone());
        Self {
            store,
            transitions,
            hasher,
        }
    }

    /// Run the approval for an application already confirmed `pending`.
    pub fn approve(
        &self,
        application: &Application,
        actor: &ActorContext,
        plan: &ApprovalPlan,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, PipelineError> {
        if let Some(existing) = self
            .store
            .find_guardian_by_email(&plan.guardian.email)
            .map_err(EligibilityError::Store)?
        {
            info!(
                application_id = %application.id,
                existing_id = %existing.id,
                existing_role = existing.role.label(),
                "approval aborted: guardian email already registered"
            );
            return Err(PipelineError::GuardianEmailExists {
                existing_id: existing.id,
                existing_role: existing.role,
            });
        }

        let created = self.build_records(application, plan, now);
        let transition = Transition {
            application_id: application.id.clone(),
            tenant_id: application.tenant_id.clone(),
            status: ApplicationStatus::Approved,
            actor_id: actor.actor_id.clone(),
            reason: None,
            notes: plan.notes.clone(),
            at: now,
        };

        let mut step = PipelineStep::CreateGuardian;
        let mut approved: Option<Application> = None;
        let mut lost_race = false;

        let result = self.store.transaction(&mut |tx| {
            step = PipelineStep::CreateGuardian;
            tx.insert_guardian(created.guardian.clone())?;

            step = PipelineStep::CreateHousehold;
            tx.insert_household(created.household.clone())?;

            step = PipelineStep::CreateChild;
            tx.insert_child(created.child.clone())?;

            step = PipelineStep::CreateEnrollment;
            tx.insert_enrollment(created.enrollment.clone())?;

            step = PipelineStep::ApproveApplication;
            match self.transitions.apply_in(tx, &transition)? {
                Some(application) => {
                    approved = Some(application);
                    Ok(())
                }
                None => {
                    lost_race = true;
                    Err(StoreError::Conflict {
                        entity: "application",
                        detail: "no longer pending".to_string(),
                    })
                }
            }
        });

        match (result, approved) {
            (Ok(()), Some(application)) => {
                info!(
                    application_id = %application.id,
                    tenant_id = %application.tenant_id,
                    guardian_id = %created.guardian.id,
                    enrollment_id = %created.enrollment.id,
                    "application approved and enrollment created"
                );
                Ok(ApprovalOutcome {
                    application,
                    created,
                })
            }
            (Err(StoreError::DuplicateGuardianEmail {
                existing_id,
                existing_role,
            }), _) => Err(PipelineError::GuardianEmailExists {
                existing_id,
                existing_role,
            }),
            (Err(_), _) if lost_race => {
                debug!(application_id = %application.id, "approval lost the race to another decision");
                Err(self
                    .transitions
                    .lost_race(&application.id, &application.tenant_id)
                    .into())
            }
            (Err(source), _) => {
                error!(
                    application_id = %application.id,
                    tenant_id = %application.tenant_id,
                    step = step.label(),
                    error = %source,
                    "enrollment transaction rolled back"
                );
                self.verify_rolled_back(application);
                Err(PipelineError::TransactionFailed { step, source })
            }
            (Ok(()), None) => Err(PipelineError::TransactionFailed {
                step,
                source: StoreError::Unavailable("transaction committed without a result".to_string()),
            }),
        }
    }

    fn build_records(
        &self,
        application: &Application,
        plan: &ApprovalPlan,
        now: DateTime<Utc>,
    ) -> CreatedEntities {
        let tenant_id = application.tenant_id.clone();

        let guardian = GuardianAccount {
            id: GuardianId::generate(),
            tenant_id: tenant_id.clone(),
            name: plan.guardian.name.clone(),
            email: plan.guardian.email.clone(),
            phone: plan.guardian.phone.clone(),
            password_hash: self.hasher.hash(&plan.guardian.password),
            role: AccountRole::Parent,
            created_at: now,
        };

        let (first_name, last_name) = split_display_name(&plan.child.name);
        let household = HouseholdUnit {
            id: HouseholdId::generate(),
            tenant_id: tenant_id.clone(),
            name: if last_name.is_empty() {
                format!("{} household", plan.child.name)
            } else {
                format!("{last_name} household")
            },
            primary_guardian_id: guardian.id,
            created_at: now,
        };

        let child = ChildRecord {
            id: ChildId::generate(),
            tenant_id: tenant_id.clone(),
            household_id: household.id,
            full_name: plan.child.name.clone(),
            first_name,
            last_name,
            date_of_birth: plan.child.date_of_birth,
            gender: plan.child.gender.clone(),
            created_at: now,
        };

        let enrollment = EnrollmentRecord {
            id: EnrollmentId::generate(),
            tenant_id,
            application_id: application.id.clone(),
            child_id: child.id,
            guardian_id: guardian.id,
            program_id: plan
                .enrollment
                .program_id
                .clone()
                .or_else(|| plan.child.program_id.clone())
                .or_else(|| application.program_id.clone()),
            start_date: plan.enrollment.start_date.or(plan.child.start_date),
            status: plan.enrollment.status,
            created_at: now,
        };

        CreatedEntities {
            guardian,
            household,
            child,
            enrollment,
        }
    }

    fn verify_rolled_back(&self, application: &Application) {
        match self
            .store
            .find_application(&application.tenant_id, &application.id)
        {
            Ok(Some(current)) if current.status == ApplicationStatus::Pending => {
                debug!(application_id = %application.id, "rollback verified: application still pending");
            }
            Ok(Some(current)) => error!(
                application_id = %application.id,
                status = current.status.label(),
                "rollback verification found a decided application"
            ),
            Ok(None) => error!(
                application_id = %application.id,
                "rollback verification could not find the application"
            ),
            Err(err) => error!(
                application_id = %application.id,
                error = %err,
                "rollback verification could not read the application"
            ),
        }
    }
}
