use async_trait::async_trait;

use crate::models::{
    catalog::{Plan, Task},
    settings::AppSettings,
    tickets::{Reply, SupportTicket, TicketStatus},
    transactions::{Transaction, TransactionFilter, TransactionKind, TransactionStatus},
    users::{Credential, User, UserStatus},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    /// The idempotency key was already used; carries the transaction id
    /// the first request created.
    #[error("Duplicate request, original transaction {0}")]
    Duplicate(String),
    #[error("Insufficient balance for user {0}")]
    InsufficientBalance(String),
    #[error("Transaction {id} is {status}, not pending")]
    NotPending { id: String, status: String },
    #[error("Guard failed: {0}")]
    GuardFailed(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Malformed record: {0}")]
    Malformed(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Only transport-level failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyKey {
    pub user_id: String,
    pub key: String,
    /// Transaction recorded against the key when the batch commits.
    pub transaction_id: String,
}

/// Compare-and-swap of a pending transaction to its resolved status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub transaction_id: String,
    pub to: TransactionStatus,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    UserActive {
        user_id: String,
    },
    /// Fewer than `limit` task entries since `since`.
    DailyTaskQuota {
        user_id: String,
        since: i64,
        limit: u32,
    },
    /// Non-rejected withdrawals since `since`, plus `amount`, stay within
    /// `limit`.
    DailyWithdrawalLimit {
        user_id: String,
        since: i64,
        limit: f64,
        amount: f64,
    },
    /// Last spin unset or at least `cooldown_ms` before `now`.
    SpinCooldown {
        user_id: String,
        now: i64,
        cooldown_ms: i64,
    },
}

impl Guard {
    fn user_id(&self) -> &str {
        match self {
            Guard::UserActive { user_id }
            | Guard::DailyTaskQuota { user_id, .. }
            | Guard::DailyWithdrawalLimit { user_id, .. }
            | Guard::SpinCooldown { user_id, .. } => user_id,
        }
    }
}

/// Increments applied to one user. A negative balance component must not
/// take the balance below zero unless `clamp_at_zero` is set, in which case
/// the balance floors at zero instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceDelta {
    pub user_id: String,
    pub balance: f64,
    pub total_earnings: f64,
    pub total_withdrawals: f64,
    pub clamp_at_zero: bool,
}

impl BalanceDelta {
    pub fn balance(user_id: &str, amount: f64) -> Self {
        BalanceDelta {
            user_id: user_id.to_string(),
            balance: amount,
            total_earnings: 0.0,
            total_withdrawals: 0.0,
            clamp_at_zero: false,
        }
    }

    /// Credits both the spendable balance and the lifetime earnings.
    pub fn earning(user_id: &str, amount: f64) -> Self {
        BalanceDelta {
            total_earnings: amount,
            ..BalanceDelta::balance(user_id, amount)
        }
    }

    pub fn withdrawn(user_id: &str, amount: f64) -> Self {
        BalanceDelta {
            total_withdrawals: amount,
            ..BalanceDelta::balance(user_id, 0.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserUpdate {
    ActivatePlan {
        user_id: String,
        plan_id: String,
        expiry: i64,
    },
    RecordSpin {
        user_id: String,
        at: i64,
    },
}

impl UserUpdate {
    fn user_id(&self) -> &str {
        match self {
            UserUpdate::ActivatePlan { user_id, .. } | UserUpdate::RecordSpin { user_id, .. } => {
                user_id
            }
        }
    }
}

/// Everything one settlement writes. [`Store::apply`] commits a batch
/// all-or-nothing, in the order: idempotency key, transition, guards,
/// deltas, user updates, appended entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerBatch {
    pub idempotency: Option<IdempotencyKey>,
    pub transition: Option<StatusTransition>,
    pub guards: Vec<Guard>,
    pub deltas: Vec<BalanceDelta>,
    pub updates: Vec<UserUpdate>,
    pub entries: Vec<Transaction>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn idempotent(mut self, key: Option<IdempotencyKey>) -> Self {
        self.idempotency = key;
        self
    }

    pub fn transition(mut self, transition: StatusTransition) -> Self {
        self.transition = Some(transition);
        self
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn delta(mut self, delta: BalanceDelta) -> Self {
        self.deltas.push(delta);
        self
    }

    pub fn update(mut self, update: UserUpdate) -> Self {
        self.updates.push(update);
        self
    }

    pub fn entry(mut self, entry: Transaction) -> Self {
        self.entries.push(entry);
        self
    }

    /// Sorted, deduplicated ids of every user the batch reads or writes.
    pub fn touched_users(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .guards
            .iter()
            .map(|g| g.user_id().to_string())
            .chain(self.deltas.iter().map(|d| d.user_id.clone()))
            .chain(self.updates.iter().map(|u| u.user_id().to_string()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// The record store every service talks to. All balance-affecting writes go
/// through [`Store::apply`]; the remaining writes only touch catalog,
/// profile, settings and ticket records.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Fails with `Conflict` when the username key, phone or referral code is
    /// already taken.
    async fn insert_user(&self, user: User, credential: Credential) -> Result<User, StoreError>;
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    /// Looks a user up by normalized username, which is also the referral
    /// code.
    async fn get_user_by_key(&self, key: &str) -> Result<Option<User>, StoreError>;
    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    async fn list_referred_users(&self, referral_code: &str) -> Result<Vec<User>, StoreError>;
    async fn set_user_status(&self, id: &str, status: UserStatus) -> Result<User, StoreError>;
    async fn get_credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError>;
    async fn set_credential(&self, credential: Credential) -> Result<(), StoreError>;

    async fn list_plans(&self) -> Result<Vec<Plan>, StoreError>;
    async fn get_plan(&self, id: &str) -> Result<Option<Plan>, StoreError>;
    async fn upsert_plan(&self, plan: Plan) -> Result<Plan, StoreError>;
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError>;
    async fn upsert_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError>;
    /// Newest first.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError>;
    async fn count_transactions_since(
        &self,
        user_id: &str,
        kind: TransactionKind,
        since: i64,
    ) -> Result<u64, StoreError>;
    async fn apply(&self, batch: LedgerBatch) -> Result<(), StoreError>;
    /// The transaction a committed batch recorded against `key`.
    async fn get_idempotent(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Defaults when the record was never written.
    async fn get_settings(&self) -> Result<AppSettings, StoreError>;
    async fn put_settings(&self, settings: AppSettings) -> Result<(), StoreError>;

    async fn insert_ticket(&self, ticket: SupportTicket) -> Result<SupportTicket, StoreError>;
    async fn get_ticket(&self, id: &str) -> Result<Option<SupportTicket>, StoreError>;
    /// Newest first; all tickets when `user_id` is `None`.
    async fn list_tickets(&self, user_id: Option<&str>)
        -> Result<Vec<SupportTicket>, StoreError>;
    async fn append_replies(
        &self,
        ticket_id: &str,
        replies: Vec<Reply>,
        status: TicketStatus,
    ) -> Result<SupportTicket, StoreError>;
    async fn set_ticket_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
    ) -> Result<SupportTicket, StoreError>;
}
