use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    AccountRole, ActorId, Application, ApplicationId, ApplicationStatus, ChildRecord,
    EnrollmentRecord, GuardianAccount, GuardianId, HouseholdUnit, TenantId,
};

/// Status change applied with a compare-and-set on `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub application_id: ApplicationId,
    pub tenant_id: TenantId,
    pub status: ApplicationStatus,
    pub actor_id: ActorId,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Write surface available inside [`EnrollmentStore::transaction`].
///
/// Nothing written through it is visible to other readers until the enclosing
/// transaction commits.
pub trait EnrollmentTransaction {
    fn insert_guardian(&mut self, account: GuardianAccount) -> Result<(), StoreError>;
    fn insert_household(&mut self, household: HouseholdUnit) -> Result<(), StoreError>;
    fn insert_child(&mut self, child: ChildRecord) -> Result<(), StoreError>;
    fn insert_enrollment(&mut self, enrollment: EnrollmentRecord) -> Result<(), StoreError>;

    /// Returns `None` when no pending application matched.
    fn apply_transition(&mut self, transition: &Transition)
        -> Result<Option<Application>, StoreError>;
}

/// Persistence collaborator. Every application read and write is tenant scoped.
pub trait EnrollmentStore: Send + Sync {
    fn find_application(
        &self,
        tenant_id: &TenantId,
        application_id: &ApplicationId,
    ) -> Result<Option<Application>, StoreError>;

    /// Guardian emails are unique across all tenants, so this lookup is global.
    fn find_guardian_by_email(&self, email: &str) -> Result<Option<GuardianAccount>, StoreError>;

    fn apply_transition(&self, transition: &Transition) -> Result<Option<Application>, StoreError>;

    /// Run `work` atomically. An `Err` from `work` discards every write it made.
    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn EnrollmentTransaction) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("guardian email already registered to account {existing_id}")]
    DuplicateGuardianEmail {
        existing_id: GuardianId,
        existing_role: AccountRole,
    },
    #[error("{entity} already exists: {detail}")]
    Conflict { entity: &'static str, detail: String },
    #[error("{entity} not found")]
    MissingReference { entity: &'static str },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification hook (welcome e-mail, rejection notice).
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub template: String,
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub recipient: String,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// What happened to a notification the pipeline tried to enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationReceipt {
    pub template: String,
    pub recipient: String,
    pub queued: bool,
}
