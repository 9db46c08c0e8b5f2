use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{users::load_active_user, RequestHandler, Service, ServiceError};
use crate::{
    models::{
        catalog::Plan,
        referrals::ReferralCredit,
        settings::AppSettings,
        transactions::{
            NewDeposit, NewWithdrawal, Transaction, TransactionKind, TransactionStatus,
        },
        users::User,
        DAY_MS,
    },
    repositories::{
        BalanceDelta, Guard, IdempotencyKey, LedgerBatch, Store, StoreError, UserUpdate,
    },
    settings::Retry,
    utils::{now_millis, retry_with_backoff, start_of_day},
};

pub mod referral;
pub mod wheel;

use wheel::{RandomDraw, RewardDraw};

pub enum LedgerRequest {
    StartTask {
        user_id: String,
        task_id: String,
        response: oneshot::Sender<Result<ActiveTask, ServiceError>>,
    },
    CompleteTask {
        user_id: String,
        task_id: String,
        idempotency_key: Option<String>,
        response: oneshot::Sender<Result<TaskCompletion, ServiceError>>,
    },
    PurchasePlan {
        user_id: String,
        plan_id: String,
        idempotency_key: Option<String>,
        response: oneshot::Sender<Result<PlanPurchase, ServiceError>>,
    },
    RequestDeposit {
        user_id: String,
        deposit: NewDeposit,
        idempotency_key: Option<String>,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    RequestWithdrawal {
        user_id: String,
        withdrawal: NewWithdrawal,
        idempotency_key: Option<String>,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    Spin {
        user_id: String,
        idempotency_key: Option<String>,
        response: oneshot::Sender<Result<SpinOutcome, ServiceError>>,
    },
}

/// The task a user is currently watching. One per user.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTask {
    pub task_id: String,
    pub started_at: i64,
    pub ready_at: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub transaction: Transaction,
    pub referral_credits: Vec<ReferralCredit>,
    pub user: User,
    pub replayed: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPurchase {
    pub transaction: Transaction,
    pub user: User,
    pub replayed: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinOutcome {
    pub index: usize,
    pub reward: f64,
    pub target_angle: f64,
    pub next_spin_at: i64,
    pub transaction: Transaction,
    pub user: User,
    pub replayed: bool,
}

pub(crate) enum Settled {
    Applied,
    Replayed(Transaction),
}

/// Commits `batch`, retrying transport failures. A batch whose idempotency
/// key was already used resolves to the transaction the first request
/// created, provided it is of the `expected` kind.
pub(crate) async fn settle(
    store: &dyn Store,
    retry: &Retry,
    batch: LedgerBatch,
    expected: TransactionKind,
) -> Result<Settled, ServiceError> {
    match retry_with_backoff(retry, || store.apply(batch.clone())).await {
        Ok(()) => Ok(Settled::Applied),
        Err(StoreError::Duplicate(original)) => {
            let transaction = store
                .get_transaction(&original)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Transaction {}", original)))?;
            replay(transaction, expected).map(Settled::Replayed)
        }
        Err(e) => Err(e.into()),
    }
}

fn replay(transaction: Transaction, expected: TransactionKind) -> Result<Transaction, ServiceError> {
    if transaction.kind != expected {
        return Err(ServiceError::Conflict(
            "Idempotency key was already used for a different request".to_string(),
        ));
    }
    log::info!("Replaying transaction {} for a repeated request.", transaction.id);
    Ok(transaction)
}

fn client_key(key: Option<&str>) -> Option<&str> {
    key.map(str::trim).filter(|k| !k.is_empty())
}

#[derive(Clone)]
pub struct LedgerRequestHandler {
    store: Arc<dyn Store>,
    retry: Retry,
    draw: Arc<dyn RewardDraw>,
    active_tasks: Arc<DashMap<String, ActiveTask>>,
}

impl LedgerRequestHandler {
    pub fn new(store: Arc<dyn Store>, retry: Retry) -> Self {
        Self::with_draw(store, retry, Arc::new(RandomDraw))
    }

    pub fn with_draw(store: Arc<dyn Store>, retry: Retry, draw: Arc<dyn RewardDraw>) -> Self {
        LedgerRequestHandler {
            store,
            retry,
            draw,
            active_tasks: Arc::new(DashMap::new()),
        }
    }

    fn idempotency(
        user_id: &str,
        key: Option<String>,
        transaction_id: &str,
    ) -> Option<IdempotencyKey> {
        // Without a client key a fresh one still makes internal retries safe.
        let key = client_key(key.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        Some(IdempotencyKey {
            user_id: user_id.to_string(),
            key,
            transaction_id: transaction_id.to_string(),
        })
    }

    /// Resolves a repeated client key before any precondition is checked:
    /// the first request already changed the state those checks read.
    async fn replayed(
        &self,
        user_id: &str,
        key: Option<&str>,
        expected: TransactionKind,
    ) -> Result<Option<Transaction>, ServiceError> {
        let Some(key) = client_key(key) else {
            return Ok(None);
        };

        match self.store.get_idempotent(user_id, key).await? {
            Some(original) => replay(original, expected).map(Some),
            None => Ok(None),
        }
    }

    async fn open_settings(&self) -> Result<AppSettings, ServiceError> {
        let settings = self.store.get_settings().await?;
        if settings.maintenance {
            return Err(ServiceError::Unavailable(
                "The site is under maintenance. Please try again later.".to_string(),
            ));
        }
        Ok(settings)
    }

    async fn current_plan(&self, user: &User, now: i64) -> Result<Plan, ServiceError> {
        let plan_id = match &user.active_plan_id {
            Some(id) if user.has_active_plan(now) => id,
            _ => {
                return Err(ServiceError::Validation(
                    "No active plan. Buy a plan to continue.".to_string(),
                ))
            }
        };

        self.store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| ServiceError::Validation("Your plan is no longer available".to_string()))
    }

    async fn user(&self, user_id: &str) -> Result<User, ServiceError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", user_id)))
    }

    pub async fn start_task(
        &self,
        user_id: &str,
        task_id: &str,
        now: i64,
    ) -> Result<ActiveTask, ServiceError> {
        self.open_settings().await?;
        let user = load_active_user(self.store.as_ref(), user_id).await?;

        let task = match self.store.get_task(task_id).await? {
            Some(task) if task.active => task,
            _ => return Err(ServiceError::NotFound(format!("Task {}", task_id))),
        };

        let plan = self.current_plan(&user, now).await?;
        let done = self
            .store
            .count_transactions_since(user_id, TransactionKind::Task, start_of_day(now))
            .await?;
        if done >= plan.daily_tasks as u64 {
            return Err(ServiceError::Validation(
                "Daily task limit reached. Come back tomorrow.".to_string(),
            ));
        }

        let active = ActiveTask {
            task_id: task.id,
            started_at: now,
            ready_at: now + i64::from(task.time_required) * 1000,
        };
        if let Some(previous) = self.active_tasks.insert(user_id.to_string(), active.clone()) {
            log::info!(
                "User {} abandoned task {} for task {}.",
                user_id,
                previous.task_id,
                active.task_id
            );
        }

        Ok(active)
    }

    pub async fn complete_task(
        &self,
        user_id: &str,
        task_id: &str,
        idempotency_key: Option<String>,
        now: i64,
    ) -> Result<TaskCompletion, ServiceError> {
        if let Some(original) = self
            .replayed(user_id, idempotency_key.as_deref(), TransactionKind::Task)
            .await?
        {
            return Ok(TaskCompletion {
                transaction: original,
                referral_credits: Vec::new(),
                user: self.user(user_id).await?,
                replayed: true,
            });
        }
        let settings = self.open_settings().await?;

        let active = match self.active_tasks.get(user_id) {
            Some(active) if active.task_id == task_id => active.clone(),
            _ => {
                return Err(ServiceError::Validation(
                    "Start the task before completing it".to_string(),
                ))
            }
        };
        if now < active.ready_at {
            return Err(ServiceError::Validation(format!(
                "Please watch the task for {} more seconds",
                (active.ready_at - now + 999) / 1000
            )));
        }
        // Claim the timer so a concurrent completion cannot reuse it.
        if self
            .active_tasks
            .remove_if(user_id, |_, a| *a == active)
            .is_none()
        {
            return Err(ServiceError::Conflict("Task already completed".to_string()));
        }

        let result = self.settle_task(user_id, task_id, idempotency_key, &settings, now).await;
        if let Err(ServiceError::Database(_)) = &result {
            self.active_tasks.entry(user_id.to_string()).or_insert(active);
        }
        result
    }

    async fn settle_task(
        &self,
        user_id: &str,
        task_id: &str,
        idempotency_key: Option<String>,
        settings: &AppSettings,
        now: i64,
    ) -> Result<TaskCompletion, ServiceError> {
        let user = load_active_user(self.store.as_ref(), user_id).await?;
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Task {}", task_id)))?;
        let plan = self.current_plan(&user, now).await?;

        let chain = referral::resolve_chain(
            self.store.as_ref(),
            user.referred_by.as_deref(),
            settings.referral_depth(),
        )
        .await?;
        let credits = referral::compute_bonuses(task.amount, &chain, settings);

        let earned = Transaction::settled(
            user_id,
            TransactionKind::Task,
            task.amount,
            format!("Task completed: {}", task.title),
            Some(task.id.clone()),
            now,
        );

        let mut batch = LedgerBatch::new()
            .idempotent(Self::idempotency(user_id, idempotency_key, &earned.id))
            .guard(Guard::UserActive {
                user_id: user_id.to_string(),
            })
            .guard(Guard::DailyTaskQuota {
                user_id: user_id.to_string(),
                since: start_of_day(now),
                limit: plan.daily_tasks,
            })
            .delta(BalanceDelta::earning(user_id, task.amount))
            .entry(earned.clone());

        for credit in &credits {
            batch = batch
                .delta(BalanceDelta::earning(&credit.user_id, credit.amount))
                .entry(Transaction::settled(
                    &credit.user_id,
                    TransactionKind::Referral,
                    credit.amount,
                    format!("Level {} referral bonus from {}", credit.level, user.username),
                    Some(earned.id.clone()),
                    now,
                ));
        }

        let (transaction, referral_credits, replayed) =
            match settle(self.store.as_ref(), &self.retry, batch, TransactionKind::Task).await? {
                Settled::Applied => {
                    log::info!(
                        "User {} earned {} for task {} ({} referral credits).",
                        user_id,
                        task.amount,
                        task.id,
                        credits.len()
                    );
                    (earned, credits, false)
                }
                Settled::Replayed(original) => (original, Vec::new(), true),
            };

        Ok(TaskCompletion {
            transaction,
            referral_credits,
            user: self.user(user_id).await?,
            replayed,
        })
    }

    pub async fn purchase_plan(
        &self,
        user_id: &str,
        plan_id: &str,
        idempotency_key: Option<String>,
        now: i64,
    ) -> Result<PlanPurchase, ServiceError> {
        if let Some(original) = self
            .replayed(user_id, idempotency_key.as_deref(), TransactionKind::PlanPurchase)
            .await?
        {
            return Ok(PlanPurchase {
                transaction: original,
                user: self.user(user_id).await?,
                replayed: true,
            });
        }
        self.open_settings().await?;
        let user = load_active_user(self.store.as_ref(), user_id).await?;

        let plan = match self.store.get_plan(plan_id).await? {
            Some(plan) if plan.active => plan,
            _ => return Err(ServiceError::NotFound(format!("Plan {}", plan_id))),
        };
        if user.active_plan_id.as_deref() == Some(plan_id) && user.has_active_plan(now) {
            return Err(ServiceError::Conflict(format!(
                "{} plan is already active",
                plan.name
            )));
        }
        if user.balance < plan.price {
            return Err(ServiceError::Validation(
                "Insufficient balance. Please deposit first.".to_string(),
            ));
        }

        let purchase = Transaction::settled(
            user_id,
            TransactionKind::PlanPurchase,
            plan.price,
            format!("Purchased {} plan", plan.name),
            Some(plan.id.clone()),
            now,
        );
        let batch = LedgerBatch::new()
            .idempotent(Self::idempotency(user_id, idempotency_key, &purchase.id))
            .guard(Guard::UserActive {
                user_id: user_id.to_string(),
            })
            .delta(BalanceDelta::balance(user_id, -plan.price))
            .update(UserUpdate::ActivatePlan {
                user_id: user_id.to_string(),
                plan_id: plan.id.clone(),
                expiry: now + i64::from(plan.validity_days) * DAY_MS,
            })
            .entry(purchase.clone());

        let (transaction, replayed) = match settle(
            self.store.as_ref(),
            &self.retry,
            batch,
            TransactionKind::PlanPurchase,
        )
        .await?
        {
            Settled::Applied => {
                log::info!("User {} bought plan {} for {}.", user_id, plan.id, plan.price);
                (purchase, false)
            }
            Settled::Replayed(original) => (original, true),
        };

        Ok(PlanPurchase {
            transaction,
            user: self.user(user_id).await?,
            replayed,
        })
    }

    pub async fn request_deposit(
        &self,
        user_id: &str,
        deposit: NewDeposit,
        idempotency_key: Option<String>,
        now: i64,
    ) -> Result<Transaction, ServiceError> {
        if let Some(original) = self
            .replayed(user_id, idempotency_key.as_deref(), TransactionKind::Deposit)
            .await?
        {
            return Ok(original);
        }
        let settings = self.open_settings().await?;
        load_active_user(self.store.as_ref(), user_id).await?;

        if !deposit.amount.is_finite()
            || deposit.amount < settings.min_deposit
            || deposit.amount > settings.max_deposit
        {
            return Err(ServiceError::Validation(format!(
                "Deposit must be between {} and {}",
                settings.min_deposit, settings.max_deposit
            )));
        }
        let trx_id = deposit.trx_id.trim();
        let account_number = deposit.account_number.trim();
        if trx_id.is_empty() || account_number.is_empty() {
            return Err(ServiceError::Validation(
                "Transaction ID and sender number are required".to_string(),
            ));
        }

        let request = Transaction {
            id: uuid::Uuid::new_v4().hyphenated().to_string(),
            user_id: user_id.to_string(),
            amount: deposit.amount,
            kind: TransactionKind::Deposit,
            status: TransactionStatus::Pending,
            method: Some(deposit.method),
            account_number: Some(account_number.to_string()),
            trx_id: Some(trx_id.to_string()),
            created_at: now,
            description: format!("Deposit via {}", deposit.method.as_str()),
            rejection_reason: None,
            reference_id: None,
        };
        let batch = LedgerBatch::new()
            .idempotent(Self::idempotency(user_id, idempotency_key, &request.id))
            .guard(Guard::UserActive {
                user_id: user_id.to_string(),
            })
            .entry(request.clone());

        match settle(self.store.as_ref(), &self.retry, batch, TransactionKind::Deposit).await? {
            Settled::Applied => {
                log::info!(
                    "User {} requested a deposit of {} ({}).",
                    user_id,
                    request.amount,
                    request.id
                );
                Ok(request)
            }
            Settled::Replayed(original) => Ok(original),
        }
    }

    /// Holds the amount immediately; the admin gate later marks it paid or
    /// refunds it.
    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        withdrawal: NewWithdrawal,
        idempotency_key: Option<String>,
        now: i64,
    ) -> Result<Transaction, ServiceError> {
        if let Some(original) = self
            .replayed(user_id, idempotency_key.as_deref(), TransactionKind::Withdrawal)
            .await?
        {
            return Ok(original);
        }
        let settings = self.open_settings().await?;
        let user = load_active_user(self.store.as_ref(), user_id).await?;

        if !withdrawal.amount.is_finite()
            || withdrawal.amount <= 0.0
            || withdrawal.amount < settings.min_withdrawal
        {
            return Err(ServiceError::Validation(format!(
                "Minimum withdrawal is {}",
                settings.min_withdrawal
            )));
        }
        let account_number = withdrawal.account_number.trim();
        if account_number.is_empty() {
            return Err(ServiceError::Validation(
                "Account number is required".to_string(),
            ));
        }
        if user.balance < withdrawal.amount {
            return Err(ServiceError::Validation("Insufficient balance".to_string()));
        }

        let request = Transaction {
            id: uuid::Uuid::new_v4().hyphenated().to_string(),
            user_id: user_id.to_string(),
            amount: withdrawal.amount,
            kind: TransactionKind::Withdrawal,
            status: TransactionStatus::Pending,
            method: Some(withdrawal.method),
            account_number: Some(account_number.to_string()),
            trx_id: None,
            created_at: now,
            description: format!("Withdrawal to {}", withdrawal.method.as_str()),
            rejection_reason: None,
            reference_id: None,
        };
        let batch = LedgerBatch::new()
            .idempotent(Self::idempotency(user_id, idempotency_key, &request.id))
            .guard(Guard::UserActive {
                user_id: user_id.to_string(),
            })
            .guard(Guard::DailyWithdrawalLimit {
                user_id: user_id.to_string(),
                since: start_of_day(now),
                limit: settings.max_withdrawal_per_day,
                amount: withdrawal.amount,
            })
            .delta(BalanceDelta::balance(user_id, -withdrawal.amount))
            .entry(request.clone());

        match settle(self.store.as_ref(), &self.retry, batch, TransactionKind::Withdrawal).await? {
            Settled::Applied => {
                log::info!(
                    "User {} requested a withdrawal of {} ({}).",
                    user_id,
                    request.amount,
                    request.id
                );
                Ok(request)
            }
            Settled::Replayed(original) => Ok(original),
        }
    }

    pub async fn spin(
        &self,
        user_id: &str,
        idempotency_key: Option<String>,
        now: i64,
    ) -> Result<SpinOutcome, ServiceError> {
        if let Some(original) = self
            .replayed(user_id, idempotency_key.as_deref(), TransactionKind::Spin)
            .await?
        {
            let slots = self.store.get_settings().await?.spin_rewards.len();
            return self.spin_outcome(user_id, original, 0, slots, true).await;
        }
        let settings = self.open_settings().await?;
        let user = load_active_user(self.store.as_ref(), user_id).await?;

        if !settings.spin_enabled {
            return Err(ServiceError::Validation("Spin is currently disabled".to_string()));
        }
        if !user.has_active_plan(now) {
            return Err(ServiceError::Validation(
                "You need an active plan to spin".to_string(),
            ));
        }
        if let Some(remaining) = wheel::cooldown_remaining(user.last_spin_time, now) {
            return Err(ServiceError::Validation(format!(
                "Next spin available in {} minutes",
                (remaining + 59_999) / 60_000
            )));
        }

        let slots = settings.spin_rewards.len();
        if slots == 0 {
            return Err(ServiceError::Internal("Spin table is empty".to_string()));
        }
        let index = self.draw.draw_index(slots);
        let reward = wheel::reward_at(&settings.spin_rewards, index, settings.max_spin_reward)
            .ok_or_else(|| ServiceError::Internal(format!("Spin slot {} out of range", index)))?;

        let entry = Transaction::settled(
            user_id,
            TransactionKind::Spin,
            reward,
            "Lucky spin reward".to_string(),
            Some(index.to_string()),
            now,
        );
        let batch = LedgerBatch::new()
            .idempotent(Self::idempotency(user_id, idempotency_key, &entry.id))
            .guard(Guard::UserActive {
                user_id: user_id.to_string(),
            })
            .guard(Guard::SpinCooldown {
                user_id: user_id.to_string(),
                now,
                cooldown_ms: wheel::SPIN_COOLDOWN_MS,
            })
            .delta(BalanceDelta::earning(user_id, reward))
            .update(UserUpdate::RecordSpin {
                user_id: user_id.to_string(),
                at: now,
            })
            .entry(entry.clone());

        let (transaction, replayed) =
            match settle(self.store.as_ref(), &self.retry, batch, TransactionKind::Spin).await? {
                Settled::Applied => {
                    log::info!("User {} won {} on slot {}.", user_id, reward, index);
                    (entry, false)
                }
                Settled::Replayed(original) => (original, true),
            };

        self.spin_outcome(user_id, transaction, index, slots, replayed)
            .await
    }

    /// The drawn slot travels in the entry's `reference_id` so a replay can
    /// report the same wheel position.
    async fn spin_outcome(
        &self,
        user_id: &str,
        transaction: Transaction,
        index: usize,
        slots: usize,
        replayed: bool,
    ) -> Result<SpinOutcome, ServiceError> {
        let index = transaction
            .reference_id
            .as_deref()
            .and_then(|i| i.parse().ok())
            .unwrap_or(index);

        Ok(SpinOutcome {
            index,
            reward: transaction.amount,
            target_angle: wheel::target_angle(index, slots),
            next_spin_at: transaction.created_at + wheel::SPIN_COOLDOWN_MS,
            transaction,
            user: self.user(user_id).await?,
            replayed,
        })
    }
}

#[async_trait]
impl RequestHandler<LedgerRequest> for LedgerRequestHandler {
    async fn handle_request(&self, request: LedgerRequest) {
        let now = now_millis();

        match request {
            LedgerRequest::StartTask {
                user_id,
                task_id,
                response,
            } => {
                let result = self.start_task(&user_id, &task_id, now).await;
                let _ = response.send(result);
            }
            LedgerRequest::CompleteTask {
                user_id,
                task_id,
                idempotency_key,
                response,
            } => {
                let result = self
                    .complete_task(&user_id, &task_id, idempotency_key, now)
                    .await;
                let _ = response.send(result);
            }
            LedgerRequest::PurchasePlan {
                user_id,
                plan_id,
                idempotency_key,
                response,
            } => {
                let result = self
                    .purchase_plan(&user_id, &plan_id, idempotency_key, now)
                    .await;
                let _ = response.send(result);
            }
            LedgerRequest::RequestDeposit {
                user_id,
                deposit,
                idempotency_key,
                response,
            } => {
                let result = self
                    .request_deposit(&user_id, deposit, idempotency_key, now)
                    .await;
                let _ = response.send(result);
            }
            LedgerRequest::RequestWithdrawal {
                user_id,
                withdrawal,
                idempotency_key,
                response,
            } => {
                let result = self
                    .request_withdrawal(&user_id, withdrawal, idempotency_key, now)
                    .await;
                let _ = response.send(result);
            }
            LedgerRequest::Spin {
                user_id,
                idempotency_key,
                response,
            } => {
                let result = self.spin(&user_id, idempotency_key, now).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct LedgerService;

impl LedgerService {
    pub fn new() -> Self {
        LedgerService {}
    }
}

#[async_trait]
impl Service<LedgerRequest, LedgerRequestHandler> for LedgerService {}
