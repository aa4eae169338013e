//! Service status and backup handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::models::*;
use crate::server::backup::BackupError;
use crate::server::endpoints_api::ApiError;
use crate::server::AppState;

pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        message: "PJSIP administration service is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let config_present = tokio::fs::try_exists(&state.config.pjsip_config)
        .await
        .unwrap_or(false);

    Json(HealthResponse {
        status: "healthy".to_string(),
        config_present,
    })
}

fn backup_error(e: BackupError) -> ApiError {
    let status = match &e {
        BackupError::NotFound(_) => StatusCode::NOT_FOUND,
        BackupError::InvalidName(_) => StatusCode::BAD_REQUEST,
        BackupError::Io(_) => {
            tracing::error!("Backup operation failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(OperationResponse::failed(e.to_string())))
}

pub async fn list_backups(State(state): State<Arc<AppState>>) -> Result<Json<Vec<BackupInfo>>, ApiError> {
    state.backups.list_backups().await.map(Json).map_err(backup_error)
}

pub async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    state
        .backups
        .restore_backup(&name, &state.config.pjsip_config)
        .await
        .map_err(backup_error)?;

    Ok(Json(OperationResponse::ok(format!("Restored configuration from {}", name))))
}
