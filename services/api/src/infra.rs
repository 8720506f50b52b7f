use admissions::config::ProcessingConfig;
use admissions::workflows::enrollment::{
    ApplicationProcessor, Clock, InMemoryEnrollmentStore, InMemoryLockManager, Notification,
    NotificationError, NotificationPublisher, ProcessingLocks,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

pub(crate) type Processor = ApplicationProcessor<InMemoryEnrollmentStore, OutboxNotifier>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Notification sink that logs and keeps every message for inspection.
///
/// Stands in for the mail relay until one is wired up.
#[derive(Default, Clone)]
pub(crate) struct OutboxNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationPublisher for OutboxNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            template = %notification.template,
            application_id = %notification.application_id,
            tenant_id = %notification.tenant_id,
            "notification queued"
        );
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        Ok(())
    }
}

impl OutboxNotifier {
    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// In-process wiring shared by the server and the demo.
pub(crate) struct Runtime {
    pub(crate) processor: Arc<Processor>,
    pub(crate) store: Arc<InMemoryEnrollmentStore>,
    pub(crate) locks: Arc<dyn ProcessingLocks>,
    pub(crate) outbox: OutboxNotifier,
}

pub(crate) fn build_runtime(
    store: InMemoryEnrollmentStore,
    clock: Arc<dyn Clock>,
    config: &ProcessingConfig,
) -> Runtime {
    let store = Arc::new(store);
    let outbox = OutboxNotifier::default();
    let locks: Arc<dyn ProcessingLocks> = Arc::new(InMemoryLockManager::new(
        clock.clone(),
        config.bulk_status_limit,
    ));
    let processor = Arc::new(ApplicationProcessor::new(
        store.clone(),
        Arc::new(outbox.clone()),
        locks.clone(),
        clock,
        config,
    ));

    Runtime {
        processor,
        store,
        locks,
        outbox,
    }
}
