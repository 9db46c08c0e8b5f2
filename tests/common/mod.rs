#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use earn_ledger::{
    models::{
        transactions::{NewDeposit, PaymentMethod},
        users::{NewUser, User},
    },
    repositories::{MemoryStore, Store},
    services::{
        admin::AdminRequestHandler,
        catalog,
        ledger::{
            wheel::{RandomDraw, RewardDraw},
            LedgerRequestHandler,
        },
        sessions::SessionStore,
        support::SupportRequestHandler,
        users::{self, UserRequestHandler},
    },
    settings::{Auth, Backend, Postgres, Retry, Server, Settings, Store as StoreSettings},
};

/// 2025-03-01T10:00:00Z
pub const T0: i64 = 1_740_823_200_000;
pub const HOUR: i64 = 3_600_000;

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-secret";

static PHONES: AtomicU64 = AtomicU64::new(1_700_000_000);

pub fn test_settings() -> Settings {
    Settings {
        server: Server {
            listen: "127.0.0.1:0".to_string(),
        },
        store: StoreSettings {
            backend: Backend::Memory,
        },
        postgres: Postgres {
            url: "postgres://localhost/earn_test".to_string(),
            max_connections: 1,
        },
        auth: Auth {
            session_ttl_secs: 3600,
            admin_username: ADMIN_USERNAME.to_string(),
            admin_phone: "01999999999".to_string(),
            admin_password: ADMIN_PASSWORD.to_string(),
        },
        retry: Retry {
            max_attempts: 3,
            base_delay_ms: 1,
        },
    }
}

pub fn new_user(username: &str, referral_code: Option<&str>) -> NewUser {
    NewUser {
        username: username.to_string(),
        phone: format!("0{}", PHONES.fetch_add(1, Ordering::SeqCst)),
        password: "password1".to_string(),
        referral_code: referral_code.map(str::to_string),
    }
}

pub struct Harness {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionStore>,
    pub users: UserRequestHandler,
    pub ledger: LedgerRequestHandler,
    pub admin: AdminRequestHandler,
    pub support: SupportRequestHandler,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_draw(Arc::new(RandomDraw)).await
    }

    pub async fn with_draw(draw: Arc<dyn RewardDraw>) -> Self {
        let settings = test_settings();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        catalog::seed_defaults(store.as_ref()).await.unwrap();
        users::ensure_admin(store.as_ref(), &settings.auth).await.unwrap();

        let sessions = Arc::new(SessionStore::new(settings.auth.session_ttl_secs));

        Harness {
            users: UserRequestHandler::new(store.clone(), sessions.clone()),
            ledger: LedgerRequestHandler::with_draw(store.clone(), settings.retry.clone(), draw),
            admin: AdminRequestHandler::new(store.clone(), sessions.clone(), settings.retry),
            support: SupportRequestHandler::new(store.clone()),
            store,
            sessions,
        }
    }

    pub async fn register(&self, username: &str, referral_code: Option<&str>) -> User {
        self.users
            .register(new_user(username, referral_code), T0)
            .await
            .unwrap()
    }

    pub async fn user(&self, id: &str) -> User {
        self.store.get_user(id).await.unwrap().unwrap()
    }

    pub async fn balance(&self, id: &str) -> f64 {
        self.user(id).await.balance
    }

    pub async fn admin(&self) -> User {
        self.store.get_user_by_key(ADMIN_USERNAME).await.unwrap().unwrap()
    }

    /// Deposits `amount` and has the admin approve it.
    pub async fn fund(&self, user_id: &str, amount: f64) {
        let deposit = self
            .ledger
            .request_deposit(
                user_id,
                NewDeposit {
                    amount,
                    method: PaymentMethod::Bkash,
                    trx_id: format!("TRX{}", PHONES.fetch_add(1, Ordering::SeqCst)),
                    account_number: "01711111111".to_string(),
                },
                None,
                T0,
            )
            .await
            .unwrap();
        self.admin
            .resolve_deposit(&deposit.id, true, None)
            .await
            .unwrap();
    }

    /// Registers a user holding the free plan.
    pub async fn member(&self, username: &str, referral_code: Option<&str>) -> User {
        let user = self.register(username, referral_code).await;
        self.ledger
            .purchase_plan(&user.id, "p1", None, T0)
            .await
            .unwrap();
        self.user(&user.id).await
    }
}
