//! Axum HTTP handlers for the web server
//!
//! Lets a presentation layer open an import session for a discovered device
//! and drive it through submit, retry, reset and close.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{AppError, SessionError};
use crate::http::sessions::{SessionHandle, SessionView};
use crate::import::model::{CredentialDirectory, DiscoveredDevice, ImportRequest, SshKey};
use crate::import::workflow::SessionReport;
use crate::import::ImportSession;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct OpenImportBody {
    pub device: DiscoveredDevice,
    #[serde(default)]
    pub ssh_keys: Vec<SshKey>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn open_import(
    State(state): State<AppState>,
    Json(body): Json<OpenImportBody>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    if body.device.id.trim().is_empty() {
        return Err(AppError::bad_request(
            "invalid_device",
            "device.id must not be empty",
        ));
    }

    let session = ImportSession::open(
        body.device,
        CredentialDirectory::new(body.ssh_keys),
        state.services.clone(),
    )
    .await;
    let (session_id, handle) = state.sessions.insert(session).await;

    let view = handle.view(session_id);
    info!(
        session_id = %session_id,
        device_id = %view.device_id,
        phase = %view.state.phase(),
        "import session opened"
    );
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_import(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let handle = lookup(&state, session_id).await?;
    Ok(Json(handle.view(session_id)))
}

pub async fn submit_import(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<SessionView>, AppError> {
    let handle = lookup(&state, session_id).await?;
    let Some(mut session) = handle.try_acquire() else {
        debug!(session_id = %session_id, "submit ignored while call in flight");
        return Ok(Json(handle.view(session_id)));
    };

    // Detached so a client disconnect cannot cancel an outstanding import.
    tokio::spawn(async move {
        session.submit(request).await;
    })
    .await
    .map_err(|err| AppError::internal(format!("submit task failed: {err}")))?;

    Ok(Json(handle.view(session_id)))
}

pub async fn retry_install(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let handle = lookup(&state, session_id).await?;
    let Some(mut session) = handle.try_acquire() else {
        debug!(session_id = %session_id, "retry ignored while call in flight");
        return Ok(Json(handle.view(session_id)));
    };

    tokio::spawn(async move {
        session.retry_install().await;
    })
    .await
    .map_err(|err| AppError::internal(format!("retry task failed: {err}")))?;

    Ok(Json(handle.view(session_id)))
}

pub async fn reset_import(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let handle = lookup(&state, session_id).await?;
    if let Some(mut session) = handle.try_acquire() {
        session.reset();
    }
    Ok(Json(handle.view(session_id)))
}

pub async fn close_import(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionReport>, AppError> {
    let handle = lookup(&state, session_id).await?;
    let Some(mut session) = handle.try_acquire() else {
        return Err(AppError::conflict(
            "import_in_flight",
            "wait for the running import call to finish before closing",
        ));
    };

    let report = session.close().map_err(|err| match &err {
        SessionError::InFlight { .. } => AppError::conflict("import_in_flight", err.to_string()),
        SessionError::Closed => AppError::not_found("session_not_found", "import session not found"),
    })?;
    drop(session);

    state.sessions.remove(session_id).await;
    Ok(Json(report))
}

async fn lookup(state: &AppState, session_id: Uuid) -> Result<Arc<SessionHandle>, AppError> {
    state
        .sessions
        .get(session_id)
        .await
        .ok_or_else(|| AppError::not_found("session_not_found", "import session not found"))
}
