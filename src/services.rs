use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::{Store, StoreError};
use crate::settings::Settings;

pub mod admin;
pub mod catalog;
pub mod http;
pub mod ledger;
pub mod sessions;
pub mod support;
pub mod users;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::Duplicate(id) => {
                ServiceError::Conflict(format!("Request already processed as {}", id))
            }
            StoreError::InsufficientBalance(_) => {
                ServiceError::Validation("Insufficient balance".to_string())
            }
            StoreError::NotPending { id, status } => {
                ServiceError::Conflict(format!("Transaction {} is already {}", id, status))
            }
            StoreError::GuardFailed(reason) => ServiceError::Validation(reason),
            StoreError::Conflict(reason) => ServiceError::Conflict(reason),
            StoreError::Malformed(reason) => ServiceError::Internal(reason),
            StoreError::Backend(reason) => ServiceError::Database(reason),
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Senders for every running service, plus the session table the HTTP
/// layer authenticates against.
#[derive(Clone)]
pub struct ServiceHandles {
    pub users: mpsc::Sender<users::UserRequest>,
    pub ledger: mpsc::Sender<ledger::LedgerRequest>,
    pub admin: mpsc::Sender<admin::AdminRequest>,
    pub support: mpsc::Sender<support::SupportRequest>,
    pub catalog: mpsc::Sender<catalog::CatalogRequest>,
    pub sessions: Arc<sessions::SessionStore>,
}

/// Seeds the default catalog and the configured administrator.
pub async fn bootstrap(store: &Arc<dyn Store>, settings: &Settings) -> Result<(), anyhow::Error> {
    catalog::seed_defaults(store.as_ref()).await?;
    users::ensure_admin(store.as_ref(), &settings.auth).await?;
    Ok(())
}

pub fn spawn_services(store: Arc<dyn Store>, settings: &Settings) -> ServiceHandles {
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (ledger_tx, mut ledger_rx) = mpsc::channel(512);
    let (admin_tx, mut admin_rx) = mpsc::channel(512);
    let (support_tx, mut support_rx) = mpsc::channel(512);
    let (catalog_tx, mut catalog_rx) = mpsc::channel(512);

    let sessions = Arc::new(sessions::SessionStore::new(settings.auth.session_ttl_secs));

    let mut user_service = users::UserService::new();
    let mut ledger_service = ledger::LedgerService::new();
    let mut admin_service = admin::AdminService::new();
    let mut support_service = support::SupportService::new();
    let mut catalog_service = catalog::CatalogService::new();

    log::info!("Starting user service.");
    let handler = users::UserRequestHandler::new(store.clone(), sessions.clone());
    tokio::spawn(async move {
        user_service.run(handler, &mut user_rx).await;
    });

    log::info!("Starting ledger service.");
    let handler = ledger::LedgerRequestHandler::new(store.clone(), settings.retry.clone());
    tokio::spawn(async move {
        ledger_service.run(handler, &mut ledger_rx).await;
    });

    log::info!("Starting admin service.");
    let handler =
        admin::AdminRequestHandler::new(store.clone(), sessions.clone(), settings.retry.clone());
    tokio::spawn(async move {
        admin_service.run(handler, &mut admin_rx).await;
    });

    log::info!("Starting support service.");
    let handler = support::SupportRequestHandler::new(store.clone());
    tokio::spawn(async move {
        support_service.run(handler, &mut support_rx).await;
    });

    log::info!("Starting catalog service.");
    let handler = catalog::CatalogRequestHandler::new(store);
    tokio::spawn(async move {
        catalog_service.run(handler, &mut catalog_rx).await;
    });

    ServiceHandles {
        users: user_tx,
        ledger: ledger_tx,
        admin: admin_tx,
        support: support_tx,
        catalog: catalog_tx,
        sessions,
    }
}

pub async fn start_services(store: Arc<dyn Store>, settings: Settings) -> Result<(), anyhow::Error> {
    bootstrap(&store, &settings).await?;
    let handles = spawn_services(store, &settings);

    log::info!("Started services.");
    http::start_http_server(handles, &settings.server.listen).await
}
