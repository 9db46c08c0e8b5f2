use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Guard, LedgerBatch, Store, StoreError, UserUpdate};
use crate::models::{
    catalog::{Plan, Task},
    settings::AppSettings,
    tickets::{Reply, SupportTicket, TicketStatus},
    transactions::{Transaction, TransactionFilter, TransactionKind, TransactionStatus},
    users::{normalize_username, Credential, User, UserStatus},
};

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    /// normalized username -> user id
    directory: HashMap<String, String>,
    credentials: HashMap<String, Credential>,
    plans: Vec<Plan>,
    tasks: Vec<Task>,
    transactions: Vec<Transaction>,
    idempotency: HashMap<(String, String), String>,
    tickets: Vec<SupportTicket>,
    settings: Option<AppSettings>,
}

impl State {
    fn transaction_mut(&mut self, id: &str) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == id)
    }

    fn user(&self, id: &str) -> Result<&User, StoreError> {
        self.users
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }

    fn check_guard(&self, guard: &Guard) -> Result<(), StoreError> {
        match guard {
            Guard::UserActive { user_id } => {
                if !self.user(user_id)?.is_active() {
                    return Err(StoreError::GuardFailed(format!("user {} is banned", user_id)));
                }
            }
            Guard::DailyTaskQuota {
                user_id,
                since,
                limit,
            } => {
                let done = self
                    .transactions
                    .iter()
                    .filter(|t| {
                        t.user_id == *user_id
                            && t.kind == TransactionKind::Task
                            && t.created_at >= *since
                    })
                    .count();
                if done >= *limit as usize {
                    return Err(StoreError::GuardFailed("daily task limit reached".to_string()));
                }
            }
            Guard::DailyWithdrawalLimit {
                user_id,
                since,
                limit,
                amount,
            } => {
                let withdrawn: f64 = self
                    .transactions
                    .iter()
                    .filter(|t| {
                        t.user_id == *user_id
                            && t.kind == TransactionKind::Withdrawal
                            && t.status != TransactionStatus::Rejected
                            && t.created_at >= *since
                    })
                    .map(|t| t.amount)
                    .sum();
                if withdrawn + amount > *limit {
                    return Err(StoreError::GuardFailed(
                        "daily withdrawal limit exceeded".to_string(),
                    ));
                }
            }
            Guard::SpinCooldown {
                user_id,
                now,
                cooldown_ms,
            } => {
                if let Some(last) = self.user(user_id)?.last_spin_time {
                    if *now - last < *cooldown_ms {
                        return Err(StoreError::GuardFailed("spin cooldown active".to_string()));
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-process store. Every batch runs under a single write lock and is
/// fully validated before anything is mutated.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User, credential: Credential) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        let key = normalize_username(&user.username);

        if state.directory.contains_key(&key) {
            return Err(StoreError::Conflict(format!("username {} taken", user.username)));
        }
        if state.users.values().any(|u| u.phone == user.phone) {
            return Err(StoreError::Conflict(format!("phone {} taken", user.phone)));
        }
        if state
            .users
            .values()
            .any(|u| u.referral_code == user.referral_code)
        {
            return Err(StoreError::Conflict(format!(
                "referral code {} taken",
                user.referral_code
            )));
        }

        state.directory.insert(key, user.id.clone());
        state.credentials.insert(user.id.clone(), credential);
        state.users.insert(user.id.clone(), user.clone());

        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn get_user_by_key(&self, key: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .directory
            .get(key)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.phone == phone).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn list_referred_users(&self, referral_code: &str) -> Result<Vec<User>, StoreError> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.referred_by.as_deref() == Some(referral_code))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn set_user_status(&self, id: &str, status: UserStatus) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
        user.status = status;
        Ok(user.clone())
    }

    async fn get_credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.state.read().await.credentials.get(user_id).cloned())
    }

    async fn set_credential(&self, credential: Credential) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&credential.user_id) {
            return Err(StoreError::NotFound(format!("user {}", credential.user_id)));
        }
        state
            .credentials
            .insert(credential.user_id.clone(), credential);
        Ok(())
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, StoreError> {
        Ok(self.state.read().await.plans.clone())
    }

    async fn get_plan(&self, id: &str) -> Result<Option<Plan>, StoreError> {
        let state = self.state.read().await;
        Ok(state.plans.iter().find(|p| p.id == id).cloned())
    }

    async fn upsert_plan(&self, plan: Plan) -> Result<Plan, StoreError> {
        let mut state = self.state.write().await;
        match state.plans.iter_mut().find(|p| p.id == plan.id) {
            Some(existing) => *existing = plan.clone(),
            None => state.plans.push(plan.clone()),
        }
        Ok(plan)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.state.read().await.tasks.clone())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let state = self.state.read().await;
        Ok(state.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn upsert_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut state = self.state.write().await;
        match state.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => state.tasks.push(task.clone()),
        }
        Ok(task)
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().await;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    async fn count_transactions_since(
        &self,
        user_id: &str,
        kind: TransactionKind,
        since: i64,
    ) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.kind == kind && t.created_at >= since)
            .count() as u64)
    }

    async fn get_idempotent(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().await;
        let found = state
            .idempotency
            .get(&(user_id.to_string(), key.to_string()))
            .and_then(|id| state.transactions.iter().find(|t| t.id == *id))
            .cloned();
        Ok(found)
    }

    async fn apply(&self, batch: LedgerBatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        if let Some(key) = &batch.idempotency {
            if let Some(existing) = state
                .idempotency
                .get(&(key.user_id.clone(), key.key.clone()))
            {
                return Err(StoreError::Duplicate(existing.clone()));
            }
        }

        if let Some(transition) = &batch.transition {
            let current = state
                .transactions
                .iter()
                .find(|t| t.id == transition.transaction_id)
                .ok_or_else(|| {
                    StoreError::NotFound(format!("transaction {}", transition.transaction_id))
                })?;
            if !current.is_pending() {
                return Err(StoreError::NotPending {
                    id: current.id.clone(),
                    status: current.status.as_str().to_string(),
                });
            }
        }

        for guard in &batch.guards {
            state.check_guard(guard)?;
        }

        // Resolve every delta against a scratch copy first so a failing
        // delta leaves nothing half-applied.
        let mut balances: HashMap<String, (f64, f64, f64)> = HashMap::new();
        for delta in &batch.deltas {
            let user = state.user(&delta.user_id)?;
            let entry = balances
                .entry(delta.user_id.clone())
                .or_insert((user.balance, user.total_earnings, user.total_withdrawals));

            let next = entry.0 + delta.balance;
            entry.0 = if next < 0.0 {
                if !delta.clamp_at_zero {
                    return Err(StoreError::InsufficientBalance(delta.user_id.clone()));
                }
                0.0
            } else {
                next
            };
            entry.1 += delta.total_earnings;
            entry.2 += delta.total_withdrawals;
        }

        for update in &batch.updates {
            state.user(update.user_id())?;
        }

        for entry in &batch.entries {
            if state.transactions.iter().any(|t| t.id == entry.id) {
                return Err(StoreError::Conflict(format!("transaction {} exists", entry.id)));
            }
        }

        if let Some(key) = batch.idempotency {
            state
                .idempotency
                .insert((key.user_id, key.key), key.transaction_id);
        }

        if let Some(transition) = batch.transition {
            if let Some(tx) = state.transaction_mut(&transition.transaction_id) {
                tx.status = transition.to;
                tx.rejection_reason = transition.rejection_reason;
            }
        }

        for (user_id, (balance, earnings, withdrawals)) in balances {
            if let Some(user) = state.users.get_mut(&user_id) {
                user.balance = balance;
                user.total_earnings = earnings;
                user.total_withdrawals = withdrawals;
            }
        }

        for update in batch.updates {
            match update {
                UserUpdate::ActivatePlan {
                    user_id,
                    plan_id,
                    expiry,
                } => {
                    if let Some(user) = state.users.get_mut(&user_id) {
                        user.active_plan_id = Some(plan_id);
                        user.plan_expiry = Some(expiry);
                    }
                }
                UserUpdate::RecordSpin { user_id, at } => {
                    if let Some(user) = state.users.get_mut(&user_id) {
                        user.last_spin_time = Some(at);
                    }
                }
            }
        }

        state.transactions.extend(batch.entries);

        Ok(())
    }

    async fn get_settings(&self) -> Result<AppSettings, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .settings
            .clone()
            .unwrap_or_default())
    }

    async fn put_settings(&self, settings: AppSettings) -> Result<(), StoreError> {
        self.state.write().await.settings = Some(settings);
        Ok(())
    }

    async fn insert_ticket(&self, ticket: SupportTicket) -> Result<SupportTicket, StoreError> {
        let mut state = self.state.write().await;
        if state.tickets.iter().any(|t| t.id == ticket.id) {
            return Err(StoreError::Conflict(format!("ticket {} exists", ticket.id)));
        }
        state.tickets.push(ticket.clone());
        Ok(ticket)
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<SupportTicket>, StoreError> {
        let state = self.state.read().await;
        Ok(state.tickets.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tickets(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<SupportTicket>, StoreError> {
        let state = self.state.read().await;
        let mut tickets: Vec<SupportTicket> = state
            .tickets
            .iter()
            .rev()
            .filter(|t| user_id.map_or(true, |id| t.user_id == id))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    async fn append_replies(
        &self,
        ticket_id: &str,
        replies: Vec<Reply>,
        status: TicketStatus,
    ) -> Result<SupportTicket, StoreError> {
        let mut state = self.state.write().await;
        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", ticket_id)))?;
        ticket.replies.extend(replies);
        ticket.status = status;
        Ok(ticket.clone())
    }

    async fn set_ticket_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
    ) -> Result<SupportTicket, StoreError> {
        let mut state = self.state.write().await;
        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", ticket_id)))?;
        ticket.status = status;
        Ok(ticket.clone())
    }
}
