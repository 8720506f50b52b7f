use super::common::*;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::workflows::enrollment::clock::ManualClock;
use crate::workflows::enrollment::domain::{
    AccountRole, ActorId, ApplicationId, ApplicationStatus, EnrollmentStatus, TenantId,
};
use crate::workflows::enrollment::locks::{
    DecisionAction, InMemoryLockManager, LockError, LockRequest, LockState, ProcessingLock,
    ProcessingLocks,
};
use crate::workflows::enrollment::memory::InMemoryEnrollmentStore;
use crate::workflows::enrollment::password::{PasswordHasher, SaltedSha256Hasher};
use crate::workflows::enrollment::repository::EnrollmentStore;
use crate::workflows::enrollment::requests::{ApprovePayload, DecisionRequest, EnrollmentData};
use crate::workflows::enrollment::service::{
    ApplicationProcessor, ProcessingError, REJECTION_TEMPLATE, WELCOME_TEMPLATE,
};

fn stored_status(store: &InMemoryEnrollmentStore) -> ApplicationStatus {
    store
        .find_application(&TenantId(TENANT_A.to_string()), &app_id(APPLICATION))
        .expect("store reachable")
        .expect("application present")
        .status
}

#[test]
fn approve_creates_linked_records_and_releases_lock() {
    let h = harness();
    let actor = admin("admin-1", TENANT_A);

    let processed = h
        .processor
        .process(&actor, &app_id(APPLICATION), approve_request())
        .expect("approval succeeds");

    assert_eq!(processed.application.status, ApplicationStatus::Approved);
    assert_eq!(processed.application.approved_by, Some(ActorId("admin-1".to_string())));
    assert_eq!(processed.application.approved_at, Some(fixed_now()));
    assert_eq!(processed.application.notes.as_deref(), Some("Sibling already enrolled"));

    let created = processed.created.expect("entities created");
    assert_eq!(created.guardian.role, AccountRole::Parent);
    assert_eq!(created.guardian.email, "rosa@example.com");
    assert_eq!(created.household.primary_guardian_id, created.guardian.id);
    assert_eq!(created.household.name, "Lopez household");
    assert_eq!(created.child.household_id, created.household.id);
    assert_eq!(created.child.first_name, "Maya");
    assert_eq!(created.child.last_name, "Lopez");
    assert_eq!(created.enrollment.child_id, created.child.id);
    assert_eq!(created.enrollment.guardian_id, created.guardian.id);
    assert_eq!(created.enrollment.program_id.as_deref(), Some("prek-am"));
    assert_eq!(
        created.enrollment.start_date,
        NaiveDate::from_ymd_opt(2025, 9, 8)
    );
    assert_eq!(created.enrollment.status, EnrollmentStatus::Active);

    assert_eq!(h.store.guardians().len(), 1);
    assert_eq!(h.store.households().len(), 1);
    assert_eq!(h.store.children().len(), 1);
    assert_eq!(h.store.enrollments().len(), 1);
    assert!(!h.locks.is_locked(&app_id(APPLICATION)).locked);
}

#[test]
fn approval_stores_only_a_password_hash() {
    let h = harness();
    h.processor
        .process(&admin("admin-1", TENANT_A), &app_id(APPLICATION), approve_request())
        .expect("approval succeeds");

    let guardian = h.store.guardians().pop().expect("guardian created");
    assert_ne!(guardian.password_hash, "s3cure-pass");
    assert!(SaltedSha256Hasher::new(2).verify("s3cure-pass", &guardian.password_hash));

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].template, WELCOME_TEMPLATE);
    assert_eq!(events[0].recipient, "rosa@example.com");
    assert!(events[0]
        .details
        .values()
        .all(|value| !value.contains("s3cure-pass")));
}

#[test]
fn enrollment_status_and_program_follow_the_payload() {
    let h = harness();
    let mut payload = approve_payload();
    payload.enrollment_data = Some(EnrollmentData {
        program_id: None,
        status: Some("waitlisted".to_string()),
        start_date: Some("2026-01-05".to_string()),
    });
    if let Some(parent) = payload.parent_data.as_mut() {
        parent.send_welcome_email = Some(false);
    }

    let processed = h
        .processor
        .process(
            &admin("admin-1", TENANT_A),
            &app_id(APPLICATION),
            DecisionRequest::Approve(payload),
        )
        .expect("approval succeeds");

    let enrollment = processed.created.expect("created").enrollment;
    assert_eq!(enrollment.status, EnrollmentStatus::Waitlisted);
    assert_eq!(enrollment.program_id.as_deref(), Some("prek"));
    assert_eq!(enrollment.start_date, NaiveDate::from_ymd_opt(2026, 1, 5));
    assert!(processed.notifications.is_empty());
    assert!(h.notifier.events().is_empty());
}

#[test]
fn reject_records_reason_and_notifies_parent() {
    let h = harness();
    let processed = h
        .processor
        .process(
            &admin("admin-1", TENANT_A),
            &app_id(APPLICATION),
            reject_request("Program is full for this term"),
        )
        .expect("rejection succeeds");

    assert_eq!(processed.application.status, ApplicationStatus::Rejected);
    assert_eq!(
        processed.application.rejection_reason.as_deref(),
        Some("Program is full for this term")
    );
    assert_eq!(processed.application.rejected_by, Some(ActorId("admin-1".to_string())));
    assert!(processed.created.is_none());
    assert!(h.store.guardians().is_empty());

    assert_eq!(processed.notifications.len(), 1);
    assert!(processed.notifications[0].queued);
    assert_eq!(h.notifier.events()[0].template, REJECTION_TEMPLATE);
    assert!(!h.locks.is_locked(&app_id(APPLICATION)).locked);
}

#[test]
fn decided_application_cannot_be_decided_again() {
    let h = harness();
    let actor = admin("admin-1", TENANT_A);
    h.processor
        .process(&actor, &app_id(APPLICATION), approve_request())
        .expect("first decision");

    let err = h
        .processor
        .process(&actor, &app_id(APPLICATION), reject_request("Changed my mind"))
        .expect_err("second decision refused");

    assert!(matches!(
        err,
        ProcessingError::AlreadyProcessed {
            status: ApplicationStatus::Approved
        }
    ));
    assert_eq!(err.code(), "ALREADY_PROCESSED");
    assert_eq!(stored_status(&h.store), ApplicationStatus::Approved);
    assert!(!h.locks.is_locked(&app_id(APPLICATION)).locked);
}

#[test]
fn lock_held_by_another_admin_blocks_the_decision() {
    let h = harness();
    h.processor
        .claim(&admin("admin-2", TENANT_A), &app_id(APPLICATION), DecisionAction::Reject)
        .expect("admin-2 claims");

    let err = h
        .processor
        .process(&admin("admin-1", TENANT_A), &app_id(APPLICATION), approve_request())
        .expect_err("locked");

    match err {
        ProcessingError::Locked {
            holder_name,
            action,
            since,
        } => {
            assert_eq!(holder_name, "Admin admin-2");
            assert_eq!(action, DecisionAction::Reject);
            assert_eq!(since, fixed_now());
        }
        other => panic!("expected lock conflict, got {other:?}"),
    }
    assert_eq!(stored_status(&h.store), ApplicationStatus::Pending);
    assert!(h.store.guardians().is_empty());

    // The blocked attempt must not disturb the holder's lock.
    let state = h.locks.is_locked(&app_id(APPLICATION));
    assert_eq!(
        state.lock.map(|lock| lock.holder_id),
        Some(ActorId("admin-2".to_string()))
    );
}

#[test]
fn expired_lock_can_be_taken_over() {
    let h = harness();
    h.processor
        .claim(&admin("admin-2", TENANT_A), &app_id(APPLICATION), DecisionAction::Approve)
        .expect("admin-2 claims");

    h.clock.advance(Duration::minutes(5) + Duration::seconds(1));

    let processed = h
        .processor
        .process(&admin("admin-1", TENANT_A), &app_id(APPLICATION), reject_request("Duplicate"))
        .expect("stale lock ignored");
    assert_eq!(processed.application.status, ApplicationStatus::Rejected);
}

#[test]
fn same_admin_can_decide_while_holding_their_own_claim() {
    let h = harness();
    let actor = admin("admin-1", TENANT_A);
    h.processor
        .claim(&actor, &app_id(APPLICATION), DecisionAction::Approve)
        .expect("claimed");

    h.processor
        .process(&actor, &app_id(APPLICATION), approve_request())
        .expect("holder decides");
    assert!(!h.locks.is_locked(&app_id(APPLICATION)).locked);
}

#[test]
fn other_tenants_application_is_not_found() {
    let h = harness();
    let err = h
        .processor
        .process(&admin("admin-9", TENANT_B), &app_id(APPLICATION), approve_request())
        .expect_err("hidden across tenants");

    assert!(matches!(err, ProcessingError::NotFound));
    assert_eq!(stored_status(&h.store), ApplicationStatus::Pending);
    assert!(!h.locks.is_locked(&app_id(APPLICATION)).locked);

    let err = h
        .processor
        .application(&admin("admin-9", TENANT_B), &app_id(APPLICATION))
        .expect_err("hidden across tenants");
    assert!(matches!(err, ProcessingError::NotFound));
}

#[test]
fn lock_from_another_tenant_reads_as_not_found() {
    let h = harness();
    h.processor
        .claim(&admin("admin-1", TENANT_A), &app_id(APPLICATION), DecisionAction::Approve)
        .expect("claimed");

    let err = h
        .processor
        .process(&admin("admin-9", TENANT_B), &app_id(APPLICATION), approve_request())
        .expect_err("hidden");
    assert!(matches!(err, ProcessingError::NotFound));

    let statuses = h
        .processor
        .lock_status(&admin("admin-9", TENANT_B), &[app_id(APPLICATION)])
        .expect("status");
    assert!(!statuses[&app_id(APPLICATION)].locked);
}

/// Lock table that counts acquire calls.
struct CountingLocks {
    inner: InMemoryLockManager,
    acquires: AtomicUsize,
}

impl ProcessingLocks for CountingLocks {
    fn acquire(&self, request: LockRequest) -> Result<ProcessingLock, LockError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire(request)
    }

    fn release(&self, application_id: &ApplicationId, holder_id: &ActorId) -> Result<(), LockError> {
        self.inner.release(application_id, holder_id)
    }

    fn is_locked(&self, application_id: &ApplicationId) -> LockState {
        self.inner.is_locked(application_id)
    }

    fn bulk_status(
        &self,
        application_ids: &[ApplicationId],
    ) -> Result<BTreeMap<ApplicationId, LockState>, LockError> {
        self.inner.bulk_status(application_ids)
    }

    fn force_release(
        &self,
        tenant_id: &TenantId,
        holder_id: &ActorId,
        application_id: Option<&ApplicationId>,
    ) -> usize {
        self.inner.force_release(tenant_id, holder_id, application_id)
    }

    fn sweep(&self) -> usize {
        self.inner.sweep()
    }
}

#[test]
fn foreign_tenant_attempt_never_touches_the_lock_table() {
    let store = Arc::new(InMemoryEnrollmentStore::default());
    store
        .insert_application(pending_application(APPLICATION, TENANT_A))
        .expect("seed application");
    let clock = Arc::new(ManualClock::new(fixed_now()));
    let locks = Arc::new(CountingLocks {
        inner: InMemoryLockManager::new(clock.clone(), 10),
        acquires: AtomicUsize::new(0),
    });
    let processor = ApplicationProcessor::new(
        store,
        Arc::new(MemoryNotifier::default()),
        locks.clone(),
        clock,
        &processing_config(),
    );

    let err = processor
        .claim(&admin("admin-9", TENANT_B), &app_id(APPLICATION), DecisionAction::Reject)
        .expect_err("hidden across tenants");
    assert!(matches!(err, ProcessingError::NotFound));
    assert_eq!(locks.acquires.load(Ordering::SeqCst), 0);

    processor
        .process(&admin("admin-1", TENANT_A), &app_id(APPLICATION), reject_request("Late"))
        .expect("owning tenant decides");
    assert_eq!(locks.acquires.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_application_releases_the_lock() {
    let h = harness();
    let err = h
        .processor
        .process(&admin("admin-1", TENANT_A), &app_id("app-404"), approve_request())
        .expect_err("not found");

    assert!(matches!(err, ProcessingError::NotFound));
    assert!(h.locks.is_empty());
}

#[test]
fn validation_reports_every_missing_section() {
    let h = harness();
    let err = h
        .processor
        .process(
            &admin("admin-1", TENANT_A),
            &app_id(APPLICATION),
            DecisionRequest::Approve(ApprovePayload::default()),
        )
        .expect_err("invalid payload");

    let ProcessingError::Validation(errors) = &err else {
        panic!("expected validation error, got {err:?}");
    };
    assert!(errors.has("parentData"));
    assert!(errors.has("childData"));
    assert!(errors.has("enrollmentData"));
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(stored_status(&h.store), ApplicationStatus::Pending);
    assert!(!h.locks.is_locked(&app_id(APPLICATION)).locked);
}

#[test]
fn future_birth_date_is_rejected() {
    let h = harness();
    let mut payload = approve_payload();
    if let Some(child) = payload.child_data.as_mut() {
        child.date_of_birth = Some("2025-09-02".to_string());
    }

    let err = h
        .processor
        .process(
            &admin("admin-1", TENANT_A),
            &app_id(APPLICATION),
            DecisionRequest::Approve(payload),
        )
        .expect_err("born tomorrow");

    let ProcessingError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert!(errors.has("childData.dateOfBirth"));
}

#[test]
fn existing_guardian_email_aborts_before_any_write() {
    let h = harness();
    h.store
        .insert_account(parent_account("Rosa@Example.com", AccountRole::Teacher))
        .expect("seed account");

    let err = h
        .processor
        .process(&admin("admin-1", TENANT_A), &app_id(APPLICATION), approve_request())
        .expect_err("email taken");

    match &err {
        ProcessingError::GuardianEmailExists { existing_role, .. } => {
            assert_eq!(*existing_role, AccountRole::Teacher);
        }
        other => panic!("expected duplicate email, got {other:?}"),
    }
    assert_eq!(err.code(), "GUARDIAN_EMAIL_EXISTS");
    assert_eq!(h.store.guardians().len(), 1);
    assert!(h.store.households().is_empty());
    assert!(h.store.enrollments().is_empty());
    assert_eq!(stored_status(&h.store), ApplicationStatus::Pending);
}

#[test]
fn notification_outage_does_not_undo_the_decision() {
    let store = InMemoryEnrollmentStore::default();
    store
        .insert_application(pending_application(APPLICATION, TENANT_A))
        .expect("seed");
    let h = harness_with(store, MemoryNotifier::offline());

    let processed = h
        .processor
        .process(&admin("admin-1", TENANT_A), &app_id(APPLICATION), approve_request())
        .expect("approval survives notifier outage");

    assert_eq!(processed.application.status, ApplicationStatus::Approved);
    assert_eq!(processed.notifications.len(), 1);
    assert!(!processed.notifications[0].queued);
    assert_eq!(h.store.enrollments().len(), 1);
}

#[test]
fn lock_status_distinguishes_own_and_foreign_locks() {
    let h = harness();
    h.processor
        .claim(&admin("admin-1", TENANT_A), &app_id(APPLICATION), DecisionAction::Approve)
        .expect("claimed");

    let ids = [app_id(APPLICATION), app_id("app-2")];
    let own = h
        .processor
        .lock_status(&admin("admin-1", TENANT_A), &ids)
        .expect("status");
    let view = &own[&app_id(APPLICATION)];
    assert!(view.locked);
    assert!(view.is_own_lock);
    assert_eq!(view.action, Some(DecisionAction::Approve));
    assert!(!own[&app_id("app-2")].locked);

    let other = h
        .processor
        .lock_status(&admin("admin-2", TENANT_A), &ids)
        .expect("status");
    let view = &other[&app_id(APPLICATION)];
    assert!(view.locked);
    assert!(!view.is_own_lock);
    assert_eq!(view.holder_name.as_deref(), Some("Admin admin-1"));
    assert_eq!(view.since, Some(fixed_now()));
}

#[test]
fn lock_status_rejects_oversized_batches() {
    let h = harness();
    let ids: Vec<_> = (0..101).map(|n| app_id(&format!("app-{n}"))).collect();

    let err = h
        .processor
        .lock_status(&admin("admin-1", TENANT_A), &ids)
        .expect_err("too many ids");
    assert!(matches!(
        err,
        ProcessingError::BatchTooLarge {
            requested: 101,
            limit: 100
        }
    ));
    assert_eq!(err.code(), "BATCH_TOO_LARGE");
}

#[test]
fn only_the_holder_may_release_a_lock() {
    let h = harness();
    h.processor
        .claim(&admin("admin-1", TENANT_A), &app_id(APPLICATION), DecisionAction::Approve)
        .expect("claimed");

    let err = h
        .processor
        .release_lock(&admin("admin-2", TENANT_A), &app_id(APPLICATION))
        .expect_err("not the owner");
    assert!(matches!(err, ProcessingError::NotLockOwner { .. }));
    assert!(h.locks.is_locked(&app_id(APPLICATION)).locked);

    // Foreign tenants see no lock and release trivially without touching it.
    h.processor
        .release_lock(&admin("admin-9", TENANT_B), &app_id(APPLICATION))
        .expect("no-op");
    assert!(h.locks.is_locked(&app_id(APPLICATION)).locked);

    h.processor
        .release_lock(&admin("admin-1", TENANT_A), &app_id(APPLICATION))
        .expect("owner releases");
    assert!(!h.locks.is_locked(&app_id(APPLICATION)).locked);
}

#[test]
fn force_release_clears_a_holders_locks_in_the_callers_tenant() {
    let h = harness();
    h.processor
        .claim(&admin("admin-1", TENANT_A), &app_id(APPLICATION), DecisionAction::Approve)
        .expect("claimed");

    let released = h.processor.force_release(
        &super_admin("root", TENANT_B),
        &ActorId("admin-1".to_string()),
        Some(&app_id(APPLICATION)),
    );
    assert_eq!(released, 0);

    let released = h.processor.force_release(
        &super_admin("root", TENANT_A),
        &ActorId("admin-1".to_string()),
        None,
    );
    assert_eq!(released, 1);
    assert!(!h.locks.is_locked(&app_id(APPLICATION)).locked);
}

#[test]
fn untargeted_force_release_from_another_tenant_keeps_the_lock() {
    let h = harness();
    h.processor
        .claim(&admin("admin-1", TENANT_A), &app_id(APPLICATION), DecisionAction::Approve)
        .expect("claimed");

    let released = h.processor.force_release(
        &super_admin("root", TENANT_B),
        &ActorId("admin-1".to_string()),
        None,
    );

    assert_eq!(released, 0);
    let state = h.locks.is_locked(&app_id(APPLICATION));
    assert!(state.locked);
    assert_eq!(
        state.lock.map(|lock| lock.holder_id),
        Some(ActorId("admin-1".to_string()))
    );
}

#[test]
fn unreachable_store_surfaces_as_unavailable() {
    let h = harness_with(UnavailableStore, MemoryNotifier::default());
    let err = h
        .processor
        .process(&admin("admin-1", TENANT_A), &app_id(APPLICATION), reject_request("Late"))
        .expect_err("store down");

    assert!(matches!(err, ProcessingError::StoreUnavailable(_)));
    assert_eq!(err.code(), "STORE_UNAVAILABLE");
    assert!(h.locks.is_empty());
}
