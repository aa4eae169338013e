//! Endpoint provisioning handlers
//!
//! Every request loads a fresh store from disk, applies one operation and
//! writes the file back before responding.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::models::*;
use crate::server::pjsip::{self, ConfigError, ConfigStore, EndpointError};
use crate::server::AppState;

pub type ApiError = (StatusCode, Json<OperationResponse>);

/// Map a store failure onto a status code and response envelope
pub fn endpoint_error(e: EndpointError) -> ApiError {
    let status = match &e {
        EndpointError::NotFound(_) => StatusCode::NOT_FOUND,
        EndpointError::AlreadyExists(_) | EndpointError::InvalidId(_) => StatusCode::BAD_REQUEST,
        EndpointError::Config(_) => {
            tracing::error!("Configuration error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(OperationResponse::failed(e.to_string())))
}

fn config_error(e: ConfigError) -> ApiError {
    endpoint_error(e.into())
}

fn validation_failed(result: ValidationResult) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(
            OperationResponse::failed("Validation failed")
                .with_errors(result.errors)
                .with_warnings(result.warnings),
        ),
    )
}

async fn open_store(state: &AppState) -> Result<ConfigStore, ApiError> {
    state.open_store().await.map_err(config_error)
}

// ============== Read Routes ==============

pub async fn list_endpoints(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EndpointView>>, ApiError> {
    let store = open_store(&state).await?;
    Ok(Json(store.list_endpoints()))
}

pub async fn get_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EndpointView>, ApiError> {
    let store = open_store(&state).await?;
    store
        .get_endpoint(&id)
        .map(Json)
        .ok_or_else(|| endpoint_error(EndpointError::NotFound(id)))
}

/// Raw configuration text
pub async fn get_config(State(state): State<Arc<AppState>>) -> Result<Json<ConfigResponse>, ApiError> {
    let path = &state.config.pjsip_config;
    let config = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            format!("; {} does not exist yet", path.display())
        }
        Err(e) => {
            tracing::error!("Failed to read {:?}: {}", path, e);
            return Err(config_error(e.into()));
        }
    };

    Ok(Json(ConfigResponse {
        success: true,
        config,
        timestamp: Utc::now(),
    }))
}

// ============== Mutation Routes ==============

pub async fn create_endpoint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EndpointCreate>,
) -> Result<(StatusCode, Json<OperationResponse>), ApiError> {
    let mut store = open_store(&state).await?;
    let id = req.id.trim().to_string();

    let exists = store.endpoint_exists(&id);
    let validation = pjsip::validate_create(&req, &state.schema, exists);
    if !validation.valid {
        return Err(validation_failed(validation));
    }
    if exists {
        return Err(endpoint_error(EndpointError::AlreadyExists(id)));
    }

    if state.config.fast_append {
        pjsip::append_endpoint(&state.config.pjsip_config, &state.schema, &state.backups, &req)
            .await
            .map_err(endpoint_error)?;
    } else {
        store.add_endpoint(&req).map_err(endpoint_error)?;
        store
            .save(&state.backups, &format!("pjsip_add_{}", id))
            .await
            .map_err(config_error)?;
    }

    Ok((
        StatusCode::CREATED,
        Json(
            OperationResponse::ok(format!("Endpoint {} created", id))
                .with_warnings(validation.warnings),
        ),
    ))
}

pub async fn update_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<EndpointUpdate>,
) -> Result<Json<OperationResponse>, ApiError> {
    let validation = pjsip::validate_update(&req, &state.schema);
    if !validation.valid {
        return Err(validation_failed(validation));
    }

    let mut store = open_store(&state).await?;
    let target = req
        .new_id
        .as_deref()
        .map(str::trim)
        .filter(|new_id| !new_id.is_empty())
        .unwrap_or(id.as_str())
        .to_string();

    if target != id && store.endpoint_exists(&target) {
        return Err(endpoint_error(EndpointError::AlreadyExists(target)));
    }

    store
        .update_endpoint(&target, Some(&id), &req, &state.backups)
        .await
        .map_err(endpoint_error)?;

    let message = if target == id {
        format!("Endpoint {} updated", id)
    } else {
        format!("Endpoint {} renamed to {}", id, target)
    };
    Ok(Json(OperationResponse::ok(message).with_warnings(validation.warnings)))
}

pub async fn delete_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let mut store = open_store(&state).await?;
    store.delete_endpoint(&id).map_err(endpoint_error)?;
    store
        .save(&state.backups, &format!("pjsip_delete_{}", id))
        .await
        .map_err(config_error)?;

    Ok(Json(OperationResponse::ok(format!("Endpoint {} deleted", id))))
}

// ============== Validation Routes ==============

/// Dry-run validation of a create payload
pub async fn validate_endpoint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EndpointCreate>,
) -> Result<Json<ValidationResult>, ApiError> {
    let store = open_store(&state).await?;
    let exists = store.endpoint_exists(req.id.trim());
    Ok(Json(pjsip::validate_create(&req, &state.schema, exists)))
}

/// Ask the running Asterisk whether the endpoint id is taken
pub async fn probe_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<EndpointValidation> {
    let exists = state.asterisk.endpoint_known(&id).await;
    Json(EndpointValidation {
        endpoint_id: id,
        exists,
        available: !exists,
    })
}

// ============== Asterisk Routes ==============

pub async fn reload_pjsip(State(state): State<Arc<AppState>>) -> Json<ReloadResponse> {
    let result = state.asterisk.reload_pjsip().await;
    let message = if result.success {
        "PJSIP reloaded successfully"
    } else {
        "PJSIP reload failed"
    };

    Json(ReloadResponse {
        success: result.success,
        message: message.to_string(),
        output: Some(result.output).filter(|o| !o.is_empty()),
    })
}
