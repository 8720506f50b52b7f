//! Admin-side processing of school enrollment applications.
//!
//! An administrator approves or rejects a pending application. Approval turns
//! the application into a guardian account, household, child profile and
//! enrollment in one atomic step. A per-application processing lock keeps two
//! administrators from deciding the same application at once, and every
//! lookup is scoped to the caller's tenant.

pub mod clock;
pub mod domain;
pub mod locks;
pub mod memory;
pub mod password;
pub mod pipeline;
pub mod repository;
pub mod requests;
pub mod router;
pub mod service;
pub mod tenancy;
pub mod transitions;
pub mod validation;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    AccountRole, ActorId, Application, ApplicationId, ApplicationStatus, ChildDetails, ChildId,
    ChildRecord, CreatedEntities, EnrollmentId, EnrollmentRecord, EnrollmentStatus,
    GuardianAccount, GuardianContact, GuardianId, HouseholdId, HouseholdUnit, TenantId,
};
pub use locks::{
    DecisionAction, InMemoryLockManager, LockError, LockLease, LockRequest, LockState,
    LockSweeper, ProcessingLock, ProcessingLocks,
};
pub use memory::InMemoryEnrollmentStore;
pub use password::{PasswordHasher, SaltedSha256Hasher};
pub use pipeline::{EnrollmentPipeline, PipelineError, PipelineStep};
pub use repository::{
    EnrollmentStore, EnrollmentTransaction, Notification, NotificationError,
    NotificationPublisher, NotificationReceipt, StoreError, Transition,
};
pub use requests::{
    ApprovePayload, ChildData, DecisionRequest, EnrollmentData, ParentData, RejectPayload,
};
pub use router::application_router;
pub use service::{ApplicationProcessor, LockStatusView, ProcessedApplication, ProcessingError};
pub use tenancy::{authenticate, AccessError, ActorContext};
pub use transitions::{EligibilityError, StateTransitionController};
pub use validation::{ApplicationValidator, FieldError, FieldErrorCode, ValidationErrors};
