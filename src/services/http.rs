use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{
    admin::AdminRequest, catalog::CatalogRequest, ledger::LedgerRequest,
    sessions::SessionStore, support::SupportRequest, users::UserRequest, ServiceError,
    ServiceHandles,
};

pub mod admin;
pub mod auth;
pub mod catalog;
pub mod ledger;
pub mod support;
pub mod users;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Clone)]
pub struct AppState {
    user_channel: mpsc::Sender<UserRequest>,
    ledger_channel: mpsc::Sender<LedgerRequest>,
    admin_channel: mpsc::Sender<AdminRequest>,
    support_channel: mpsc::Sender<SupportRequest>,
    catalog_channel: mpsc::Sender<CatalogRequest>,
    sessions: Arc<SessionStore>,
}

impl From<ServiceHandles> for AppState {
    fn from(handles: ServiceHandles) -> Self {
        AppState {
            user_channel: handles.users,
            ledger_channel: handles.ledger,
            admin_channel: handles.admin,
            support_channel: handles.support,
            catalog_channel: handles.catalog,
            sessions: handles.sessions,
        }
    }
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_)
            | ServiceError::Database(_)
            | ServiceError::Communication(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "Validation error",
            ServiceError::Unauthorized(_) => "Unauthorized",
            ServiceError::Forbidden(_) => "Forbidden",
            ServiceError::NotFound(_) => "Not found",
            ServiceError::Conflict(_) => "Conflict",
            ServiceError::Unavailable(_) => "Service unavailable",
            ServiceError::Internal(_) | ServiceError::Communication(_, _) => {
                "Internal server error"
            }
            ServiceError::Database(_) => "Database error",
        }
    }

    fn into_parts(self) -> (StatusCode, Json<serde_json::Value>) {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }

        (
            status,
            Json(json!({
                "error": self.label(),
                "details": self.to_string()
            })),
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.into_parts().into_response()
    }
}

/// Sends the request built by `request` to a service and waits for its
/// answer.
pub(crate) async fn call<R, T>(
    channel: &mpsc::Sender<R>,
    request: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication("HTTP".to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication("HTTP".to_string(), e.to_string()))?
}

pub(crate) fn respond<T: Serialize>(
    status: StatusCode,
    result: Result<T, ServiceError>,
) -> (StatusCode, Json<serde_json::Value>) {
    match result {
        Ok(body) => (status, Json(json!(body))),
        Err(e) => e.into_parts(),
    }
}

pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn router(handles: ServiceHandles) -> Router {
    let app_state = AppState::from(handles);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/auth/register", post(users::register))
        .route("/auth/login", post(users::login))
        .route("/auth/logout", post(users::logout))
        .route("/settings", get(catalog::get_settings))
        .route("/plans", get(catalog::list_plans))
        .route("/tasks", get(catalog::list_tasks))
        .route("/me", get(users::me))
        .route("/me/transactions", get(users::my_transactions))
        .route("/me/referrals", get(users::my_referrals))
        .route("/plans/{id}/purchase", post(ledger::purchase_plan))
        .route("/tasks/{id}/start", post(ledger::start_task))
        .route("/tasks/{id}/complete", post(ledger::complete_task))
        .route("/deposits", post(ledger::request_deposit))
        .route("/withdrawals", post(ledger::request_withdrawal))
        .route("/spin", post(ledger::spin))
        .route(
            "/tickets",
            get(support::my_tickets).post(support::create_ticket),
        )
        .route("/tickets/{id}/messages", post(support::add_message))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/users", get(admin::search_users))
        .route("/admin/users/{id}/ban", post(admin::ban_user))
        .route("/admin/users/{id}/unban", post(admin::unban_user))
        .route("/admin/users/{id}/balance", post(admin::adjust_balance))
        .route("/admin/users/{id}/password", post(admin::reset_password))
        .route("/admin/users/{id}/login", post(admin::impersonate))
        .route("/admin/transactions", get(admin::list_transactions))
        .route("/admin/deposits/{id}/approve", post(admin::approve_deposit))
        .route("/admin/deposits/{id}/reject", post(admin::reject_deposit))
        .route("/admin/withdrawals/{id}/pay", post(admin::pay_withdrawal))
        .route("/admin/withdrawals/{id}/reject", post(admin::reject_withdrawal))
        .route(
            "/admin/plans",
            get(catalog::admin_list_plans).post(catalog::create_plan),
        )
        .route("/admin/plans/{id}", put(catalog::update_plan))
        .route(
            "/admin/tasks",
            get(catalog::admin_list_tasks).post(catalog::create_task),
        )
        .route("/admin/tasks/{id}", put(catalog::update_task))
        .route("/admin/settings", put(admin::update_settings))
        .route("/admin/tickets", get(support::all_tickets))
        .route("/admin/tickets/{id}/reply", post(support::admin_reply))
        .route("/admin/tickets/{id}/status", put(support::set_status))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(handles: ServiceHandles, listen: &str) -> Result<(), anyhow::Error> {
    let app = router(handles);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
