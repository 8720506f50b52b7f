use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::domain::{ActorId, ApplicationId};
use super::locks::DecisionAction;
use super::repository::{EnrollmentStore, NotificationPublisher};
use super::requests::DecisionRequest;
use super::service::{ApplicationProcessor, ProcessingError};
use super::tenancy::{authenticate, AccessError, ActorContext};

type SharedProcessor<S, N> = Arc<ApplicationProcessor<S, N>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimBody {
    action: DecisionAction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockStatusBody {
    application_ids: Vec<ApplicationId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForceReleaseBody {
    holder_id: ActorId,
    #[serde(default)]
    application_id: Option<ApplicationId>,
}

/// Admin endpoints for deciding applications and inspecting processing locks.
pub fn application_router<S, N>(processor: SharedProcessor<S, N>) -> Router
where
    S: EnrollmentStore + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/applications/:application_id",
            get(application_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/process",
            post(process_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/lock",
            post(claim_handler::<S, N>).delete(release_handler::<S, N>),
        )
        .route(
            "/api/v1/application-locks/status",
            post(lock_status_handler::<S, N>),
        )
        .route(
            "/api/v1/admin/application-locks/release",
            post(force_release_handler::<S, N>),
        )
        .with_state(processor)
}

pub(crate) async fn application_handler<S, N>(
    State(processor): State<SharedProcessor<S, N>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: EnrollmentStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = match admin(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    match processor.application(&actor, &ApplicationId(application_id)) {
        Ok(application) => (StatusCode::OK, Json(application)).into_response(),
        Err(err) => processing_error(err),
    }
}

pub(crate) async fn process_handler<S, N>(
    State(processor): State<SharedProcessor<S, N>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    body: Result<Json<DecisionRequest>, JsonRejection>,
) -> Response
where
    S: EnrollmentStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = match admin(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return malformed_body(rejection),
    };

    match processor.process(&actor, &ApplicationId(application_id), request) {
        Ok(processed) => (StatusCode::OK, Json(processed)).into_response(),
        Err(err) => processing_error(err),
    }
}

pub(crate) async fn claim_handler<S, N>(
    State(processor): State<SharedProcessor<S, N>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    body: Result<Json<ClaimBody>, JsonRejection>,
) -> Response
where
    S: EnrollmentStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = match admin(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return malformed_body(rejection),
    };

    match processor.claim(&actor, &ApplicationId(application_id), body.action) {
        Ok(lock) => (StatusCode::OK, Json(lock)).into_response(),
        Err(err) => processing_error(err),
    }
}

pub(crate) async fn release_handler<S, N>(
    State(processor): State<SharedProcessor<S, N>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: EnrollmentStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = match admin(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    match processor.release_lock(&actor, &ApplicationId(application_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => processing_error(err),
    }
}

pub(crate) async fn lock_status_handler<S, N>(
    State(processor): State<SharedProcessor<S, N>>,
    headers: HeaderMap,
    body: Result<Json<LockStatusBody>, JsonRejection>,
) -> Response
where
    S: EnrollmentStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = match admin(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return malformed_body(rejection),
    };

    match processor.lock_status(&actor, &body.application_ids) {
        Ok(statuses) => (StatusCode::OK, Json(json!({ "locks": statuses }))).into_response(),
        Err(err) => processing_error(err),
    }
}

pub(crate) async fn force_release_handler<S, N>(
    State(processor): State<SharedProcessor<S, N>>,
    headers: HeaderMap,
    body: Result<Json<ForceReleaseBody>, JsonRejection>,
) -> Response
where
    S: EnrollmentStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = match authenticate(&headers).and_then(|actor| {
        actor.require_super_admin()?;
        Ok(actor)
    }) {
        Ok(actor) => actor,
        Err(err) => return access_error(err),
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return malformed_body(rejection),
    };

    let released =
        processor.force_release(&actor, &body.holder_id, body.application_id.as_ref());
    (StatusCode::OK, Json(json!({ "released": released }))).into_response()
}

fn admin(headers: &HeaderMap) -> Result<ActorContext, Response> {
    let actor = authenticate(headers).map_err(access_error)?;
    actor.require_admin().map_err(access_error)?;
    Ok(actor)
}

fn error_body(code: &str, message: String, details: Option<Value>) -> Json<Value> {
    let mut error = json!({ "code": code, "message": message });
    if let (Some(details), Some(map)) = (details, error.as_object_mut()) {
        map.insert("details".to_string(), details);
    }
    Json(json!({ "error": error }))
}

fn access_error(err: AccessError) -> Response {
    let (status, code) = match err {
        AccessError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
        AccessError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
    };
    (status, error_body(code, err.to_string(), None)).into_response()
}

fn malformed_body(rejection: JsonRejection) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        error_body(
            "VALIDATION_ERROR",
            "request body could not be parsed".to_string(),
            Some(json!({ "reason": rejection.body_text() })),
        ),
    )
        .into_response()
}

fn processing_error(err: ProcessingError) -> Response {
    let status = match &err {
        ProcessingError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProcessingError::NotFound => StatusCode::NOT_FOUND,
        ProcessingError::AlreadyProcessed { .. } => StatusCode::CONFLICT,
        ProcessingError::Locked { .. } => StatusCode::LOCKED,
        ProcessingError::GuardianEmailExists { .. } => StatusCode::CONFLICT,
        ProcessingError::TransactionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        ProcessingError::BatchTooLarge { .. } => StatusCode::BAD_REQUEST,
        ProcessingError::NotLockOwner { .. } => StatusCode::FORBIDDEN,
        ProcessingError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, error_body(err.code(), err.to_string(), err.details())).into_response()
}
