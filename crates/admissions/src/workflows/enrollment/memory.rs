use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;

use super::domain::{
    normalize_email, Application, ApplicationId, ApplicationStatus, ChildId, ChildRecord,
    EnrollmentId, EnrollmentRecord, GuardianAccount, GuardianId, HouseholdId, HouseholdUnit,
    TenantId,
};
use super::repository::{EnrollmentStore, EnrollmentTransaction, StoreError, Transition};

type ChildKey = (HouseholdId, String, String, NaiveDate);

#[derive(Debug, Clone, Default)]
struct StoreState {
    applications: HashMap<ApplicationId, Application>,
    guardians: HashMap<GuardianId, GuardianAccount>,
    guardian_emails: HashMap<String, GuardianId>,
    households: HashMap<HouseholdId, HouseholdUnit>,
    children: HashMap<ChildId, ChildRecord>,
    child_keys: HashSet<ChildKey>,
    enrollments: HashMap<EnrollmentId, EnrollmentRecord>,
}

impl StoreState {
    fn apply_transition(&mut self, transition: &Transition) -> Option<Application> {
        if !transition.status.is_terminal() {
            return None;
        }

        let application = self
            .applications
            .get_mut(&transition.application_id)
            .filter(|application| {
                application.tenant_id == transition.tenant_id
                    && application.status == ApplicationStatus::Pending
            })?;

        application.status = transition.status;
        application.updated_at = transition.at;
        if transition.notes.is_some() {
            application.notes = transition.notes.clone();
        }
        match transition.status {
            ApplicationStatus::Approved => {
                application.approved_by = Some(transition.actor_id.clone());
                application.approved_at = Some(transition.at);
            }
            ApplicationStatus::Rejected => {
                application.rejected_by = Some(transition.actor_id.clone());
                application.rejected_at = Some(transition.at);
                application.rejection_reason = transition.reason.clone();
            }
            ApplicationStatus::Pending => {}
        }
        Some(application.clone())
    }
}

struct StagedTransaction<'a> {
    state: &'a mut StoreState,
}

impl EnrollmentTransaction for StagedTransaction<'_> {
    fn insert_guardian(&mut self, mut account: GuardianAccount) -> Result<(), StoreError> {
        account.email = normalize_email(&account.email);
        if let Some(existing_id) = self.state.guardian_emails.get(&account.email) {
            let existing_role = self
                .state
                .guardians
                .get(existing_id)
                .map(|existing| existing.role)
                .unwrap_or(account.role);
            return Err(StoreError::DuplicateGuardianEmail {
                existing_id: *existing_id,
                existing_role,
            });
        }
        self.state
            .guardian_emails
            .insert(account.email.clone(), account.id);
        self.state.guardians.insert(account.id, account);
        Ok(())
    }

    fn insert_household(&mut self, household: HouseholdUnit) -> Result<(), StoreError> {
        if !self
            .state
            .guardians
            .contains_key(&household.primary_guardian_id)
        {
            return Err(StoreError::MissingReference {
                entity: "guardian account",
            });
        }
        self.state.households.insert(household.id, household);
        Ok(())
    }

    fn insert_child(&mut self, child: ChildRecord) -> Result<(), StoreError> {
        if !self.state.households.contains_key(&child.household_id) {
            return Err(StoreError::MissingReference {
                entity: "household unit",
            });
        }
        let key = (
            child.household_id,
            child.first_name.to_lowercase(),
            child.last_name.to_lowercase(),
            child.date_of_birth,
        );
        if !self.state.child_keys.insert(key) {
            return Err(StoreError::Conflict {
                entity: "child record",
                detail: format!(
                    "{} born {} already belongs to household {}",
                    child.full_name, child.date_of_birth, child.household_id
                ),
            });
        }
        self.state.children.insert(child.id, child);
        Ok(())
    }

    fn insert_enrollment(&mut self, enrollment: EnrollmentRecord) -> Result<(), StoreError> {
        if !self.state.children.contains_key(&enrollment.child_id) {
            return Err(StoreError::MissingReference {
                entity: "child record",
            });
        }
        if !self.state.guardians.contains_key(&enrollment.guardian_id) {
            return Err(StoreError::MissingReference {
                entity: "guardian account",
            });
        }
        if self
            .state
            .enrollments
            .values()
            .any(|existing| existing.application_id == enrollment.application_id)
        {
            return Err(StoreError::Conflict {
                entity: "enrollment record",
                detail: format!("application {} already enrolled", enrollment.application_id),
            });
        }
        self.state.enrollments.insert(enrollment.id, enrollment);
        Ok(())
    }

    fn apply_transition(
        &mut self,
        transition: &Transition,
    ) -> Result<Option<Application>, StoreError> {
        Ok(self.state.apply_transition(transition))
    }
}

/// Mutex-guarded store with snapshot-and-swap transactions.
///
/// A transaction works on a private copy of the state and replaces the shared
/// state only when the work succeeds, so readers never observe partial writes.
#[derive(Debug, Default)]
pub struct InMemoryEnrollmentStore {
    state: Mutex<StoreState>,
}

impl InMemoryEnrollmentStore {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an application as the intake process would.
    pub fn insert_application(&self, application: Application) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.applications.contains_key(&application.id) {
            return Err(StoreError::Conflict {
                entity: "application",
                detail: application.id.0,
            });
        }
        state
            .applications
            .insert(application.id.clone(), application);
        Ok(())
    }

    /// Register a pre-existing account (staff or a guardian from an earlier approval).
    pub fn insert_account(&self, account: GuardianAccount) -> Result<(), StoreError> {
        let mut state = self.state();
        StagedTransaction { state: &mut *state }.insert_guardian(account)
    }

    pub fn applications(&self) -> Vec<Application> {
        self.state().applications.values().cloned().collect()
    }

    pub fn guardians(&self) -> Vec<GuardianAccount> {
        self.state().guardians.values().cloned().collect()
    }

    pub fn households(&self) -> Vec<HouseholdUnit> {
        self.state().households.values().cloned().collect()
    }

    pub fn children(&self) -> Vec<ChildRecord> {
        self.state().children.values().cloned().collect()
    }

    pub fn enrollments(&self) -> Vec<EnrollmentRecord> {
        self.state().enrollments.values().cloned().collect()
    }
}

impl EnrollmentStore for InMemoryEnrollmentStore {
    fn find_application(
        &self,
        tenant_id: &TenantId,
        application_id: &ApplicationId,
    ) -> Result<Option<Application>, StoreError> {
        Ok(self
            .state()
            .applications
            .get(application_id)
            .filter(|application| &application.tenant_id == tenant_id)
            .cloned())
    }

    fn find_guardian_by_email(&self, email: &str) -> Result<Option<GuardianAccount>, StoreError> {
        let state = self.state();
        Ok(state
            .guardian_emails
            .get(&normalize_email(email))
            .and_then(|id| state.guardians.get(id))
            .cloned())
    }

    fn apply_transition(&self, transition: &Transition) -> Result<Option<Application>, StoreError> {
        Ok(self.state().apply_transition(transition))
    }

    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn EnrollmentTransaction) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let mut staged = StoreState::clone(&state);
        work(&mut StagedTransaction { state: &mut staged })?;
        *state = staged;
        Ok(())
    }
}
