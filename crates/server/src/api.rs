//! JSON API over the request lifecycle.
//!
//! Endpoints (all require `Authorization: Bearer <session token>`):
//! - `POST /api/v1/attachments?filename=`        upload a raw file body
//! - `POST /api/v1/requests`                      submit a request
//! - `GET  /api/v1/requests/{id}`                 request detail with history
//! - `POST /api/v1/requests/{id}/decision`        approve or reject the current stage
//! - `POST /api/v1/complaints/{id}/status`        move a complaint forward
//! - `GET  /api/v1/pending?residence=`            caller's review queue
//! - `GET  /api/v1/history`                       requests the caller acted on
//! - `GET  /api/v1/dashboard`                     caller's totals
//! - `GET  /api/v1/me/requests`                   student's own requests

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use campusflow_core::domain::history::ReviewDecision;
use campusflow_core::domain::request::{ComplaintStatus, Request, RequestId, RequestPayload, ResidenceType};
use campusflow_core::domain::stats::DashboardStats;
use campusflow_core::errors::{ApplicationError, InterfaceError, LifecycleError};
use campusflow_core::roles::{Actor, RoleResolver};
use campusflow_core::session::SessionIssuer;
use campusflow_core::validation::SubmissionSummary;
use campusflow_db::repositories::IdentityRepository;
use campusflow_db::{AttachmentStore, LifecycleService, QueryService, RequestContext};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: Arc<LifecycleService>,
    pub queries: Arc<QueryService>,
    pub identities: Arc<dyn IdentityRepository>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub sessions: SessionIssuer,
    pub resolver: RoleResolver,
    pub max_upload_bytes: usize,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: ReviewDecision,
    pub remark: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ComplaintStatusBody {
    pub status: ComplaintStatus,
    pub remark: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    pub residence: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: RequestId,
    pub request: Request,
    pub summary: SubmissionSummary,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub reference: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Serialize)]
pub struct RequestList {
    pub requests: Vec<Request>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

/// Interface error rendered as `{error, detail, correlation_id}`.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn bad_request(detail: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: detail.into(),
            correlation_id: correlation_id.to_owned(),
        })
    }

    fn unauthorized(detail: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::Unauthorized {
            message: detail.into(),
            correlation_id: correlation_id.to_owned(),
        })
    }

    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(
                event_name = "api.request.failed",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                detail = %self.0.message(),
                "request failed"
            );
        }
        let body = ErrorBody {
            error: self.0.user_message().to_owned(),
            detail: self.0.message().to_owned(),
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, [(CORRELATION_HEADER, body.correlation_id.clone())], Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: ApiState) -> Router {
    let upload_limit = state.max_upload_bytes.saturating_add(1);

    Router::new()
        .route(
            "/api/v1/attachments",
            post(upload_attachment).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/v1/requests", post(submit_request))
        .route("/api/v1/requests/{id}", get(get_request))
        .route("/api/v1/requests/{id}/decision", post(decide_request))
        .route("/api/v1/complaints/{id}/status", post(update_complaint_status))
        .route("/api/v1/pending", get(pending))
        .route("/api/v1/history", get(history))
        .route("/api/v1/dashboard", get(dashboard))
        .route("/api/v1/me/requests", get(my_requests))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Shared extraction
// ---------------------------------------------------------------------------

pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Bearer token → session claims → stored identity → actor.
async fn authenticate(state: &ApiState, headers: &HeaderMap, correlation_id: &str) -> ApiResult<Actor> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token", correlation_id))?;

    let claims = state
        .sessions
        .verify(token, Utc::now())
        .map_err(|error| ApiError::unauthorized(error.to_string(), correlation_id))?;

    let identity = state
        .identities
        .find_by_actor_id(&claims.actor_id)
        .await
        .map_err(|error| ApiError::from_application(error.into(), correlation_id))?
        .ok_or_else(|| {
            ApiError::unauthorized(format!("no identity for `{}`", claims.actor_id), correlation_id)
        })?;

    state
        .resolver
        .resolve(&identity)
        .map_err(|error| ApiError::from_application(error.into(), correlation_id))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>, correlation_id: &str) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text(), correlation_id))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn upload_attachment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    query: Result<Query<UploadQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;
    let Query(query) =
        query.map_err(|rejection| ApiError::bad_request(rejection.body_text(), &correlation_id))?;
    let bytes =
        body.map_err(|rejection| ApiError::bad_request(rejection.body_text(), &correlation_id))?;

    let stored = state
        .attachments
        .put(&query.filename, &bytes, actor.actor_id())
        .await
        .map_err(|error| ApiError::from_application(error.into(), &correlation_id))?;

    info!(
        event_name = "api.attachment.uploaded",
        correlation_id = %correlation_id,
        attachment_id = %stored.reference.0,
        actor = %actor.actor_id(),
        "attachment uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            reference: stored.reference.0,
            size_bytes: stored.size_bytes,
            sha256: stored.sha256,
        }),
    ))
}

async fn submit_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<RequestPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;
    let payload = json_body(body, &correlation_id)?;

    let submission = state
        .lifecycle
        .submit(&actor, payload, &RequestContext::new(&correlation_id))
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: submission.request.id.clone(),
            request: submission.request,
            summary: submission.summary,
        }),
    ))
}

async fn get_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Request>> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;

    let request = state
        .lifecycle
        .get(&RequestId(id), &actor)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(request))
}

async fn decide_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<DecisionBody>, JsonRejection>,
) -> ApiResult<Json<Request>> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;
    let body = json_body(body, &correlation_id)?;

    let request = state
        .lifecycle
        .transition(
            &RequestId(id),
            &actor,
            body.decision,
            body.remark.as_deref(),
            &RequestContext::new(&correlation_id),
        )
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(request))
}

async fn update_complaint_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<ComplaintStatusBody>, JsonRejection>,
) -> ApiResult<Json<Request>> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;
    let body = json_body(body, &correlation_id)?;

    let request = state
        .lifecycle
        .update_complaint(
            &RequestId(id),
            &actor,
            body.status,
            body.remark.as_deref(),
            &RequestContext::new(&correlation_id),
        )
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(request))
}

async fn pending(
    State(state): State<ApiState>,
    headers: HeaderMap,
    query: Result<Query<PendingQuery>, QueryRejection>,
) -> ApiResult<Json<RequestList>> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;
    let Query(query) =
        query.map_err(|rejection| ApiError::bad_request(rejection.body_text(), &correlation_id))?;

    let residence = match query.residence.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        None | Some("all") => None,
        Some(raw) => Some(ResidenceType::parse(raw).ok_or_else(|| {
            ApiError::bad_request(format!("unknown residence filter `{raw}`"), &correlation_id)
        })?),
    };

    let requests = state
        .queries
        .pending_for(&actor, residence)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(RequestList { requests }))
}

async fn history(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Json<RequestList>> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;

    let requests = state
        .queries
        .history_for(&actor)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(RequestList { requests }))
}

async fn dashboard(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<DashboardStats>> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;

    let stats = state
        .queries
        .dashboard_stats(&actor)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(stats))
}

async fn my_requests(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<RequestList>> {
    let correlation_id = correlation_id(&headers);
    let actor = authenticate(&state, &headers, &correlation_id).await?;

    let Actor::Student(student) = &actor else {
        return Err(ApiError::from_application(
            LifecycleError::NotPermitted {
                role: actor.role(),
                action: "list student requests".to_owned(),
            }
            .into(),
            &correlation_id,
        ));
    };

    let requests = state
        .queries
        .requests_for_student(&student.actor_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(RequestList { requests }))
}
