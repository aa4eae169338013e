//! Server-side code for the PJSIP administration service
//!
//! This module contains all backend functionality:
//! - PJSIP configuration store (parse, mutate, serialize)
//! - Backup and restore of configuration files
//! - Asterisk CLI access (reload, endpoint probes)
//! - API routes
#![allow(dead_code)]

pub mod asterisk;
pub mod backup;
pub mod config;
pub mod endpoints_api;
pub mod pjsip;
pub mod system_api;


use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use asterisk::{AsteriskCli, SudoAsteriskCli};
use backup::BackupService;
use config::AppConfig;
use pjsip::{ConfigError, ConfigStore, OptionSchema};

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// Option tables, loaded once at startup
    pub schema: Arc<OptionSchema>,
    pub backups: BackupService,
    pub asterisk: Arc<dyn AsteriskCli>,
}

impl AppState {
    pub fn new(config: AppConfig, schema: OptionSchema, asterisk: Arc<dyn AsteriskCli>) -> Self {
        Self {
            backups: BackupService::new(&config.backup_path),
            schema: Arc::new(schema),
            asterisk,
            config,
        }
    }

    /// Fresh store over the current contents of the PJSIP file
    pub async fn open_store(&self) -> Result<ConfigStore, ConfigError> {
        ConfigStore::load(&self.config.pjsip_config, self.schema.clone()).await
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    if config.allows_any_origin() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

/// Create the Axum router with all API routes
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        // Status
        .route("/", get(system_api::root))
        .route("/health", get(system_api::health_check))

        // Endpoint routes
        .route(
            "/api/v1/endpoints",
            get(endpoints_api::list_endpoints).post(endpoints_api::create_endpoint),
        )
        .route(
            "/api/v1/endpoints/{id}",
            get(endpoints_api::get_endpoint)
                .put(endpoints_api::update_endpoint)
                .delete(endpoints_api::delete_endpoint),
        )
        .route("/api/v1/endpoints/validate", post(endpoints_api::validate_endpoint))
        .route("/api/v1/endpoints/validate/{id}", get(endpoints_api::probe_endpoint))
        .route("/api/v1/endpoints/reload", post(endpoints_api::reload_pjsip))
        .route("/api/v1/endpoints/config", get(endpoints_api::get_config))

        // Backup routes
        .route("/api/v1/system/backups", get(system_api::list_backups))
        .route(
            "/api/v1/system/backups/{name}/restore",
            post(system_api::restore_backup),
        )

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Run the HTTP server
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;

    let schema = OptionSchema::load(config.options_path.as_deref()).await?;
    let asterisk: Arc<dyn AsteriskCli> = Arc::new(SudoAsteriskCli::new(&config.asterisk_user));
    let addr = config.bind_address();

    tracing::info!("PJSIP configuration: {:?}", config.pjsip_config);
    tracing::info!("Backup directory: {:?}", config.backup_path);
    if config.fast_append {
        tracing::info!("Fast append enabled for new endpoints");
    }

    let state = AppState::new(config, schema, asterisk);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
