use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::config::ProcessingConfig;
use crate::workflows::enrollment::clock::ManualClock;
use crate::workflows::enrollment::domain::{
    AccountRole, Application, ApplicationId, ChildDetails, ChildRecord, EnrollmentRecord,
    GuardianAccount, GuardianContact, GuardianId, HouseholdUnit, TenantId,
};
use crate::workflows::enrollment::locks::{InMemoryLockManager, ProcessingLocks};
use crate::workflows::enrollment::memory::InMemoryEnrollmentStore;
use crate::workflows::enrollment::pipeline::PipelineStep;
use crate::workflows::enrollment::repository::{
    EnrollmentStore, EnrollmentTransaction, Notification, NotificationError,
    NotificationPublisher, StoreError, Transition,
};
use crate::workflows::enrollment::requests::{
    ApprovePayload, ChildData, DecisionRequest, EnrollmentData, ParentData, RejectPayload,
};
use crate::workflows::enrollment::service::ApplicationProcessor;
use crate::workflows::enrollment::tenancy::ActorContext;

pub(super) const TENANT_A: &str = "school-a";
pub(super) const TENANT_B: &str = "school-b";
pub(super) const APPLICATION: &str = "app-1";

pub(super) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn processing_config() -> ProcessingConfig {
    ProcessingConfig {
        password_hash_rounds: 2,
        ..ProcessingConfig::default()
    }
}

pub(super) fn app_id(id: &str) -> ApplicationId {
    ApplicationId(id.to_string())
}

pub(super) fn pending_application(id: &str, tenant: &str) -> Application {
    Application::pending(
        app_id(id),
        TenantId(tenant.to_string()),
        GuardianContact {
            name: "Rosa Lopez".to_string(),
            email: "rosa@example.com".to_string(),
            phone: Some("555-0100".to_string()),
        },
        ChildDetails {
            name: "Maya Lopez".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2019, 4, 2).expect("valid"),
            gender: Some("F".to_string()),
        },
        Some("prek".to_string()),
        fixed_now(),
    )
}

pub(super) fn admin(id: &str, tenant: &str) -> ActorContext {
    ActorContext::new(id, format!("Admin {id}"), AccountRole::Admin, tenant)
}

pub(super) fn super_admin(id: &str, tenant: &str) -> ActorContext {
    ActorContext::new(id, format!("Root {id}"), AccountRole::SuperAdmin, tenant)
}

pub(super) fn parent_data(email: &str) -> ParentData {
    ParentData {
        name: Some("Rosa Lopez".to_string()),
        email: Some(email.to_string()),
        phone: Some("555-0100".to_string()),
        password: Some("s3cure-pass".to_string()),
        send_welcome_email: Some(true),
    }
}

pub(super) fn approve_payload() -> ApprovePayload {
    ApprovePayload {
        parent_data: Some(parent_data("rosa@example.com")),
        child_data: Some(ChildData {
            name: Some("Maya Lopez".to_string()),
            date_of_birth: Some("2019-04-02".to_string()),
            gender: Some("F".to_string()),
            program_id: None,
            start_date: Some("2025-09-08".to_string()),
        }),
        enrollment_data: Some(EnrollmentData {
            program_id: Some("prek-am".to_string()),
            status: None,
            start_date: None,
        }),
        notes: Some("Sibling already enrolled".to_string()),
    }
}

pub(super) fn approve_request() -> DecisionRequest {
    DecisionRequest::Approve(approve_payload())
}

pub(super) fn reject_request(reason: &str) -> DecisionRequest {
    DecisionRequest::Reject(RejectPayload {
        rejection_reason: Some(reason.to_string()),
        notify_parent: Some(true),
        notes: None,
    })
}

pub(super) fn parent_account(email: &str, role: AccountRole) -> GuardianAccount {
    GuardianAccount {
        id: GuardianId::generate(),
        tenant_id: TenantId(TENANT_A.to_string()),
        name: "Existing Account".to_string(),
        email: email.to_string(),
        phone: None,
        password_hash: "sha256$1$00$00".to_string(),
        role,
        created_at: fixed_now(),
    }
}

/// Everything a processing test needs, wired to a manual clock.
pub(super) struct Harness<S> {
    pub(super) processor: Arc<ApplicationProcessor<S, MemoryNotifier>>,
    pub(super) store: Arc<S>,
    pub(super) notifier: Arc<MemoryNotifier>,
    pub(super) locks: Arc<InMemoryLockManager>,
    pub(super) clock: Arc<ManualClock>,
}

pub(super) fn harness() -> Harness<InMemoryEnrollmentStore> {
    let store = InMemoryEnrollmentStore::default();
    store
        .insert_application(pending_application(APPLICATION, TENANT_A))
        .expect("seed application");
    harness_with(store, MemoryNotifier::default())
}

pub(super) fn harness_with<S>(store: S, notifier: MemoryNotifier) -> Harness<S>
where
    S: EnrollmentStore + 'static,
{
    let config = processing_config();
    let clock = Arc::new(ManualClock::new(fixed_now()));
    let locks = Arc::new(InMemoryLockManager::new(clock.clone(), config.bulk_status_limit));
    let store = Arc::new(store);
    let notifier = Arc::new(notifier);
    let shared_locks: Arc<dyn ProcessingLocks> = locks.clone();
    let processor = Arc::new(ApplicationProcessor::new(
        store.clone(),
        notifier.clone(),
        shared_locks,
        clock.clone(),
        &config,
    ));
    Harness {
        processor,
        store,
        notifier,
        locks,
        clock,
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    events: Mutex<Vec<Notification>>,
    offline: bool,
}

impl MemoryNotifier {
    pub(super) fn offline() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            offline: true,
        }
    }

    pub(super) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notifier mutex").clone()
    }
}

impl NotificationPublisher for MemoryNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        if self.offline {
            return Err(NotificationError::Transport("smtp relay down".to_string()));
        }
        self.events.lock().expect("notifier mutex").push(notification);
        Ok(())
    }
}

/// Store that fails one approval step inside the transaction.
pub(super) struct FaultyStore {
    pub(super) inner: InMemoryEnrollmentStore,
    fail_at: PipelineStep,
}

impl FaultyStore {
    pub(super) fn failing_at(fail_at: PipelineStep) -> Self {
        let inner = InMemoryEnrollmentStore::default();
        inner
            .insert_application(pending_application(APPLICATION, TENANT_A))
            .expect("seed application");
        Self { inner, fail_at }
    }
}

struct FaultyTransaction<'a> {
    inner: &'a mut dyn EnrollmentTransaction,
    fail_at: PipelineStep,
}

impl FaultyTransaction<'_> {
    fn check(&self, step: PipelineStep) -> Result<(), StoreError> {
        if step == self.fail_at {
            Err(StoreError::Unavailable(format!("injected failure at {step}")))
        } else {
            Ok(())
        }
    }
}

impl EnrollmentTransaction for FaultyTransaction<'_> {
    fn insert_guardian(&mut self, account: GuardianAccount) -> Result<(), StoreError> {
        self.check(PipelineStep::CreateGuardian)?;
        self.inner.insert_guardian(account)
    }

    fn insert_household(&mut self, household: HouseholdUnit) -> Result<(), StoreError> {
        self.check(PipelineStep::CreateHousehold)?;
        self.inner.insert_household(household)
    }

    fn insert_child(&mut self, child: ChildRecord) -> Result<(), StoreError> {
        self.check(PipelineStep::CreateChild)?;
        self.inner.insert_child(child)
    }

    fn insert_enrollment(&mut self, enrollment: EnrollmentRecord) -> Result<(), StoreError> {
        self.check(PipelineStep::CreateEnrollment)?;
        self.inner.insert_enrollment(enrollment)
    }

    fn apply_transition(
        &mut self,
        transition: &Transition,
    ) -> Result<Option<Application>, StoreError> {
        self.check(PipelineStep::ApproveApplication)?;
        self.inner.apply_transition(transition)
    }
}

impl EnrollmentStore for FaultyStore {
    fn find_application(
        &self,
        tenant_id: &TenantId,
        application_id: &ApplicationId,
    ) -> Result<Option<Application>, StoreError> {
        self.inner.find_application(tenant_id, application_id)
    }

    fn find_guardian_by_email(&self, email: &str) -> Result<Option<GuardianAccount>, StoreError> {
        self.inner.find_guardian_by_email(email)
    }

    fn apply_transition(&self, transition: &Transition) -> Result<Option<Application>, StoreError> {
        self.inner.apply_transition(transition)
    }

    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn EnrollmentTransaction) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let fail_at = self.fail_at;
        self.inner.transaction(&mut |tx| {
            work(&mut FaultyTransaction {
                inner: tx,
                fail_at,
            })
        })
    }
}

/// Store whose backend is unreachable.
pub(super) struct UnavailableStore;

impl EnrollmentStore for UnavailableStore {
    fn find_application(
        &self,
        _tenant_id: &TenantId,
        _application_id: &ApplicationId,
    ) -> Result<Option<Application>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn find_guardian_by_email(&self, _email: &str) -> Result<Option<GuardianAccount>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn apply_transition(&self, _transition: &Transition) -> Result<Option<Application>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn transaction(
        &self,
        _work: &mut dyn FnMut(&mut dyn EnrollmentTransaction) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
