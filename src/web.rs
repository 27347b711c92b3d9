//! HTTP surface of the service: the device-facing wallet web-service
//! endpoints on the public port, and the pass-management API on the admin
//! port. Handlers stay thin; registry and directory logic lives in
//! `storage`, the update decision and fan-out in `notifier`.
use crate::artifact::{ArtifactBuilder, PASS_CONTENT_TYPE};
use crate::auth::PassAuthorization;
use crate::notifier;
use crate::push::PushTransport;
use crate::settings::Settings;
use crate::storage;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub push: Arc<dyn PushTransport>,
    pub artifacts: Arc<dyn ArtifactBuilder>,
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    // X-Content-Type-Options: Prevent MIME sniffing
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    // X-Frame-Options: Prevent clickjacking
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );

    // Referrer-Policy: Control referrer information
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

pub fn device_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/devices/{device_id}/registrations/{pass_type}/{serial}",
            post(register_device).delete(unregister_device),
        )
        .route(
            "/v1/devices/{device_id}/registrations/{pass_type}",
            get(poll_registrations),
        )
        .route("/v1/passes/{pass_type}/{serial}", get(get_pass_artifact))
        .route("/v1/log", post(ingest_device_logs))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/passes", post(admin_create_pass))
        .route("/admin/passes/{pass_type}/{serial}", get(admin_get_pass))
        .route(
            "/admin/passes/{pass_type}/{serial}/touch",
            post(admin_touch_pass),
        )
        .route("/admin/jobs/{job_name}/trigger", post(admin_trigger_job))
        .with_state(state)
}

pub async fn serve(
    settings: Settings,
    db: DatabaseConnection,
    push: Arc<dyn PushTransport>,
    artifacts: Arc<dyn ArtifactBuilder>,
) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        db,
        push,
        artifacts,
    };

    // NOTE: Rate limiting should be implemented at the reverse proxy level
    // (nginx, traefik, etc.) for production deployments, e.g. per-device
    // limits on the registration and poll endpoints.

    let public_addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    // Start admin server on separate port
    let admin_port = state
        .settings
        .server
        .admin_port
        .unwrap_or(state.settings.server.port + 1);
    let admin_addr: SocketAddr = format!("{}:{}", state.settings.server.host, admin_port)
        .parse()
        .map_err(|e| miette::miette!("bad admin addr: {e}"))?;

    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%admin_addr, "Admin API listening");

    let admin = admin_router(state.clone());
    tokio::spawn(async move {
        axum::serve(admin_listener, admin)
            .await
            .expect("Admin server failed");
    });

    // Start public server
    tracing::info!(%public_addr, "Device API listening");
    let listener = tokio::net::TcpListener::bind(public_addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, device_router(state)).await.into_diagnostic()?;
    Ok(())
}

/// Look up a pass under a type, enforcing the path's pass type. Unknown
/// serials and type mismatches are both plain 404s.
async fn find_pass(
    db: &DatabaseConnection,
    pass_type: &str,
    serial: &str,
) -> Result<Option<storage::Pass>, crate::errors::PassError> {
    match storage::get_pass(db, serial).await? {
        Some(pass) if pass.pass_type == pass_type => Ok(Some(pass)),
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(rename = "pushToken")]
    push_token: String,
}

async fn register_device(
    State(state): State<AppState>,
    Path((device_id, pass_type, serial)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let auth = match PassAuthorization::from_headers(&headers) {
        Some(a) => a,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing_authorization"})),
            )
                .into_response();
        }
    };

    match find_pass(&state.db, &pass_type, &serial).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    }

    match storage::verify_pass_secret(&state.db, &pass_type, &serial, &auth.token).await {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid_token"})),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    }

    match storage::register_device(&state.db, &device_id, &pass_type, &serial, &req.push_token)
        .await
    {
        Ok(true) => {
            tracing::info!(%device_id, %serial, "Device registered");
            (StatusCode::CREATED, ()).into_response()
        }
        Ok(false) => (StatusCode::OK, ()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn unregister_device(
    State(state): State<AppState>,
    Path((device_id, pass_type, serial)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let auth = match PassAuthorization::from_headers(&headers) {
        Some(a) => a,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing_authorization"})),
            )
                .into_response();
        }
    };

    match find_pass(&state.db, &pass_type, &serial).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    }

    match storage::verify_pass_secret(&state.db, &pass_type, &serial, &auth.token).await {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid_token"})),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    }

    // Success whether or not the pair existed
    match storage::unregister_device(&state.db, &device_id, &serial).await {
        Ok(()) => {
            tracing::info!(%device_id, %serial, "Device unregistered");
            (StatusCode::OK, ()).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    #[serde(rename = "passesUpdatedSince")]
    passes_updated_since: Option<String>,
}

#[derive(Debug, Serialize)]
struct PollResponse {
    #[serde(rename = "lastUpdated")]
    last_updated: String,
    #[serde(rename = "serialNumbers")]
    serial_numbers: Vec<String>,
}

async fn poll_registrations(
    State(state): State<AppState>,
    Path((device_id, pass_type)): Path<(String, String)>,
    Query(q): Query<PollQuery>,
) -> impl IntoResponse {
    // No marker means the device has never polled: everything counts as changed.
    let since: i64 = match q.passes_updated_since.as_deref() {
        None | Some("") => 0,
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_marker"})),
                )
                    .into_response();
            }
        },
    };

    let registrations =
        match storage::list_registrations_for_device(&state.db, &device_id, &pass_type).await {
            Ok(r) => r,
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": e.to_string()})),
                )
                    .into_response();
            }
        };

    if registrations.is_empty() {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
    }

    let changed = match notifier::changed_passes(&state.db, &device_id, &pass_type, since).await {
        Ok(c) => c,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    if changed.is_empty() {
        return (StatusCode::NO_CONTENT, ()).into_response();
    }

    let last_updated = changed.iter().map(|p| p.updated_at).max().unwrap_or(since);
    let serial_numbers = changed.into_iter().map(|p| p.serial).collect();

    (
        StatusCode::OK,
        Json(
            serde_json::to_value(PollResponse {
                last_updated: last_updated.to_string(),
                serial_numbers,
            })
            .unwrap(),
        ),
    )
        .into_response()
}

async fn get_pass_artifact(
    State(state): State<AppState>,
    Path((pass_type, serial)): Path<(String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let auth = match PassAuthorization::from_headers(&headers) {
        Some(a) => a,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing_authorization"})),
            )
                .into_response();
        }
    };

    let pass = match find_pass(&state.db, &pass_type, &serial).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    if pass.auth_token != auth.token {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_token"})),
        )
            .into_response();
    }

    // The signed package comes from the external builder; a failure there is
    // not the device's problem to interpret, it will retry on its own.
    match state.artifacts.build(&pass).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, PASS_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(%serial, "Artifact build failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "artifact_unavailable"})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceLogRequest {
    logs: Vec<String>,
}

async fn ingest_device_logs(Json(req): Json<DeviceLogRequest>) -> impl IntoResponse {
    for entry in &req.logs {
        tracing::warn!(device_log = %entry, "Device reported an error");
    }
    (StatusCode::OK, ()).into_response()
}

// Admin handlers

#[derive(Debug, Deserialize)]
struct CreatePassRequest {
    #[serde(rename = "passType")]
    pass_type: String,
    #[serde(rename = "serialNumber")]
    serial_number: String,
    #[serde(rename = "authenticationToken")]
    authentication_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct PassResponse {
    #[serde(rename = "passType")]
    pass_type: String,
    #[serde(rename = "serialNumber")]
    serial_number: String,
    #[serde(rename = "authenticationToken")]
    authentication_token: String,
    #[serde(rename = "updatedAt")]
    updated_at: i64,
    #[serde(rename = "createdAt")]
    created_at: i64,
}

impl From<storage::Pass> for PassResponse {
    fn from(pass: storage::Pass) -> Self {
        Self {
            pass_type: pass.pass_type,
            serial_number: pass.serial,
            authentication_token: pass.auth_token,
            updated_at: pass.updated_at,
            created_at: pass.created_at,
        }
    }
}

async fn admin_create_pass(
    State(state): State<AppState>,
    Json(req): Json<CreatePassRequest>,
) -> impl IntoResponse {
    if req.pass_type.is_empty() || req.serial_number.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_pass_metadata", "error_description": "passType and serialNumber required"})),
        )
            .into_response();
    }

    match storage::create_pass(
        &state.db,
        &req.pass_type,
        &req.serial_number,
        req.authentication_token.as_deref(),
    )
    .await
    {
        Ok(pass) => {
            tracing::info!(serial = %pass.serial, pass_type = %pass.pass_type, "Pass created");
            (
                StatusCode::CREATED,
                Json(serde_json::to_value(PassResponse::from(pass)).unwrap()),
            )
                .into_response()
        }
        Err(crate::errors::PassError::Conflict(msg)) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "conflict", "error_description": msg})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn admin_get_pass(
    State(state): State<AppState>,
    Path((pass_type, serial)): Path<(String, String)>,
) -> impl IntoResponse {
    match find_pass(&state.db, &pass_type, &serial).await {
        Ok(Some(pass)) => (
            StatusCode::OK,
            Json(serde_json::to_value(PassResponse::from(pass)).unwrap()),
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// The business-event entry point: bump the freshness marker, then wake the
/// registered devices. The fan-out runs detached; the caller never blocks on
/// push delivery.
async fn admin_touch_pass(
    State(state): State<AppState>,
    Path((pass_type, serial)): Path<(String, String)>,
) -> impl IntoResponse {
    match find_pass(&state.db, &pass_type, &serial).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    }

    let marker = match storage::touch_pass(&state.db, &serial).await {
        Ok(m) => m,
        Err(crate::errors::PassError::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    let db = state.db.clone();
    let push = state.push.clone();
    let fan_out_serial = serial.clone();
    tokio::spawn(async move {
        if let Err(e) = notifier::notify_all(&db, push.as_ref(), &fan_out_serial).await {
            tracing::error!(serial = %fan_out_serial, "Wake-up fan-out failed: {}", e);
        }
    });

    (StatusCode::OK, Json(json!({"updatedAt": marker}))).into_response()
}

async fn admin_trigger_job(
    State(state): State<AppState>,
    Path(job_name): Path<String>,
) -> impl IntoResponse {
    match crate::jobs::trigger_job_manually(&state.db, &job_name).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Err(crate::errors::PassError::NotFound(msg)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not_found", "error_description": msg})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
