//! DeviceDesk API Library
//!
//! Lifecycle management for helpdesk-issued handsets and SIMs: assignment,
//! outbound shipping, return of replaced devices and closure.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod lifecycle;
pub mod middleware_helpers;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::Extension,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;

use crate::auth::consts as perm;
use crate::auth::{AuthConfig, AuthRouterExt, AuthService};
use crate::db::DbPool;
use crate::events::EventSender;
use crate::health::HealthState;
use crate::services::{assignments::AssignmentService, devices::DeviceRegistry};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub devices: DeviceRegistry,
    pub assignments: AssignmentService,
    pub auth: Arc<AuthService>,
    pub health: Arc<HealthState>,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, config: config::AppConfig, event_sender: Arc<EventSender>) -> Self {
        let auth = Arc::new(AuthService::new(AuthConfig::from(&config)));
        let health = Arc::new(HealthState::new(db.clone(), event_sender.clone()));
        Self {
            devices: DeviceRegistry::new(db.clone()),
            assignments: AssignmentService::new(db.clone(), event_sender.clone()),
            db,
            config,
            event_sender,
            auth,
            health,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Versioned API routes, each group gated by its permission.
pub fn api_v1_routes() -> Router<AppState> {
    let devices_read = Router::new()
        .route("/devices", get(handlers::devices::list_devices))
        .route("/devices/:id", get(handlers::devices::get_device))
        .route(
            "/devices/by-imei/:imei",
            get(handlers::devices::get_device_by_imei),
        )
        .with_permission(perm::DEVICES_READ);

    let devices_create = Router::new()
        .route("/devices", post(handlers::devices::create_device))
        .with_permission(perm::DEVICES_CREATE);

    let assignments_read = Router::new()
        .route("/assignments", get(handlers::assignments::list_assignments))
        .route("/assignments/:id", get(handlers::assignments::get_assignment))
        .with_permission(perm::ASSIGNMENTS_READ);

    let assignments_create = Router::new()
        .route(
            "/assignments",
            post(handlers::assignments::create_assignment),
        )
        .with_permission(perm::ASSIGNMENTS_CREATE);

    let assignments_ship = Router::new()
        .route(
            "/assignments/:id/shipping/start",
            post(handlers::assignments::start_shipping),
        )
        .route(
            "/assignments/:id/shipping",
            patch(handlers::assignments::update_shipping),
        )
        .route(
            "/assignments/:id/shipping/deliver",
            post(handlers::assignments::mark_delivered),
        )
        .with_permission(perm::ASSIGNMENTS_SHIP);

    let assignments_return = Router::new()
        .route(
            "/assignments/:id/return",
            patch(handlers::assignments::register_return),
        )
        .with_permission(perm::ASSIGNMENTS_RETURN);

    let assignments_close = Router::new()
        .route(
            "/assignments/:id/close",
            post(handlers::assignments::close_assignment),
        )
        .with_permission(perm::ASSIGNMENTS_CLOSE);

    Router::new()
        .route("/status", get(api_status))
        .merge(devices_read)
        .merge(devices_create)
        .merge(assignments_read)
        .merge(assignments_create)
        .merge(assignments_ship)
        .merge(assignments_return)
        .merge(assignments_close)
}

/// Full application router: health, docs and `/api/v1`, with request id,
/// tracing and metrics layers. CORS is added by the binary.
pub fn build_router(state: AppState) -> Router {
    let health_state = state.health.clone();
    let auth = state.auth.clone();

    Router::new()
        .nest("/health", health::health_routes(health_state))
        .merge(openapi::swagger_ui())
        .nest("/api/v1", api_v1_routes().with_state(state))
        .layer(Extension(auth))
        .layer(axum::middleware::from_fn(crate::tracing::http_metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(crate::tracing::RequestSpanMaker))
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}

async fn api_status() -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "status": "ok",
        "service": "devicedesk-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
