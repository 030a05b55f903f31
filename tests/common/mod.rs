#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use devicedesk_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{device, soti_device, AssignmentType, DeviceStatus},
    events::{Event, EventSender},
    lifecycle::NewAssignment,
    services::devices::NewDevice,
    AppState,
};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "kq7Vt9zXw2Lp4Rn8Ys6Hm3Jb5Gd1Fc0N";

/// Application state over a private in-memory SQLite database with the
/// schema applied. The event receiver is kept so tests can inspect what was
/// published.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    events: Mutex<mpsc::Receiver<Event>>,
}

impl TestApp {
    pub async fn new() -> Self {
        let pool = db::establish_connection(&DbConfig::sqlite_memory())
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;

        let (event_sender, event_rx) = EventSender::channel(256);
        let state = AppState::new(Arc::new(pool), cfg, Arc::new(event_sender));
        let router = devicedesk_api::build_router(state.clone());

        Self {
            router,
            state,
            events: Mutex::new(event_rx),
        }
    }

    /// Bearer token for `subject` holding `roles`.
    pub fn token_for(&self, roles: &[&str]) -> String {
        self.token_with(roles, &[])
    }

    pub fn token_with(&self, roles: &[&str], permissions: &[&str]) -> String {
        self.state
            .auth
            .issue_token(
                "agent-test",
                Some("Test Agent".to_string()),
                roles.iter().map(|r| r.to_string()).collect(),
                permissions.iter().map(|p| p.to_string()).collect(),
            )
            .expect("issue test token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends `body` verbatim as an `application/json` request.
    pub async fn raw_request(
        &self,
        method: Method,
        uri: &str,
        body: &'static str,
        token: &str,
    ) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Request as a helpdesk agent.
    pub async fn helpdesk(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let token = self.token_for(&["helpdesk"]);
        self.request(method, uri, body, Some(&token)).await
    }

    pub async fn seed_device(&self, imei: &str, status: DeviceStatus) -> device::Model {
        self.state
            .devices
            .intake(NewDevice {
                imei: imei.to_string(),
                model: "Galaxy A54".to_string(),
                status: Some(status),
            })
            .await
            .expect("seed device")
    }

    /// Inserts a device row directly, bypassing intake rules.
    pub async fn seed_device_raw(&self, imei: &str, status: DeviceStatus) -> device::Model {
        device::ActiveModel {
            id: Set(Uuid::new_v4()),
            imei: Set(imei.to_string()),
            model: Set(None),
            status: Set(status),
            assigned_to: Set(None),
            ticket: Set(None),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed raw device")
    }

    pub async fn seed_mirror(&self, imei: &str) -> soti_device::Model {
        soti_device::ActiveModel {
            id: Set(Uuid::new_v4()),
            imei: Set(imei.to_string()),
            device_name: Set(Some(format!("MDM-{}", &imei[imei.len() - 4..]))),
            assigned_user: Set(None),
            last_synced_at: Set(Some(Utc::now())),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed mirror row")
    }

    pub async fn mirror(&self, id: Uuid) -> soti_device::Model {
        soti_device::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load mirror row")
            .expect("mirror row exists")
    }

    pub async fn device(&self, id: Uuid) -> device::Model {
        self.state.devices.get(id).await.expect("load device")
    }

    /// Drains every event published so far.
    pub async fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().await;
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn new_assignment(imei: &str) -> NewAssignment {
    NewAssignment {
        device_imei: imei.to_string(),
        assignment_type: AssignmentType::Assign,
        assignee_name: "Eleni Markou".to_string(),
        assignee_phone: Some("+30 694 000 0000".to_string()),
        assignee_location: Some("Thessaloniki branch".to_string()),
        ticket: Some("HD-1024".to_string()),
        shipping_voucher_id: None,
        expects_return: false,
        return_device_imei: None,
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
