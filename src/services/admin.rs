use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{
    sessions::SessionStore,
    users::{new_credential, validate_password},
    RequestHandler, Service, ServiceError,
};
use crate::{
    models::{
        settings::AppSettings,
        tickets::TicketStatus,
        transactions::{Transaction, TransactionFilter, TransactionKind, TransactionStatus},
        users::{LoginResponse, User, UserStatus},
    },
    repositories::{
        BalanceDelta, IdempotencyKey, LedgerBatch, StatusTransition, Store, StoreError,
    },
    settings::Retry,
    utils::{now_millis, retry_with_backoff},
};

pub enum AdminRequest {
    GetStats {
        response: oneshot::Sender<Result<AdminStats, ServiceError>>,
    },
    SearchUsers {
        query: Option<String>,
        response: oneshot::Sender<Result<Vec<User>, ServiceError>>,
    },
    SetBanned {
        user_id: String,
        banned: bool,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    AdjustBalance {
        admin_id: String,
        user_id: String,
        amount: f64,
        note: Option<String>,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    Impersonate {
        admin_id: String,
        user_id: String,
        response: oneshot::Sender<Result<LoginResponse, ServiceError>>,
    },
    ResetPassword {
        user_id: String,
        password: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    ListTransactions {
        filter: TransactionFilter,
        response: oneshot::Sender<Result<Vec<Transaction>, ServiceError>>,
    },
    ResolveDeposit {
        transaction_id: String,
        approve: bool,
        reason: Option<String>,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    ResolveWithdrawal {
        transaction_id: String,
        pay: bool,
        reason: Option<String>,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    UpdateSettings {
        settings: AppSettings,
        response: oneshot::Sender<Result<AppSettings, ServiceError>>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_users: usize,
    pub total_balance: f64,
    pub pending_deposits: usize,
    pub pending_withdrawals: usize,
    pub open_tickets: usize,
}

#[derive(Clone)]
pub struct AdminRequestHandler {
    store: Arc<dyn Store>,
    sessions: Arc<SessionStore>,
    retry: Retry,
}

impl AdminRequestHandler {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<SessionStore>, retry: Retry) -> Self {
        AdminRequestHandler {
            store,
            sessions,
            retry,
        }
    }

    async fn user(&self, user_id: &str) -> Result<User, ServiceError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", user_id)))
    }

    async fn pending(&self, id: &str, kind: TransactionKind) -> Result<Transaction, ServiceError> {
        let transaction = self
            .store
            .get_transaction(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {}", id)))?;

        if transaction.kind != kind {
            return Err(ServiceError::Validation(format!(
                "Transaction {} is a {}, not a {}",
                id,
                transaction.kind.as_str(),
                kind.as_str()
            )));
        }
        if !transaction.is_pending() {
            return Err(ServiceError::Conflict(format!(
                "Transaction {} is already {}",
                id,
                transaction.status.as_str()
            )));
        }
        Ok(transaction)
    }

    /// Applies a transition batch. A retry that finds the transaction
    /// already in the target status means an earlier attempt committed
    /// before its connection failed.
    async fn commit(&self, batch: LedgerBatch, id: &str) -> Result<Transaction, ServiceError> {
        let target = batch.transition.as_ref().map(|t| t.to);
        let mut attempts = 0;
        let applied = retry_with_backoff(&self.retry, || {
            attempts += 1;
            self.store.apply(batch.clone())
        })
        .await;

        let transaction = match applied {
            Ok(()) => self.store.get_transaction(id).await?,
            Err(StoreError::NotPending { id: pending, status }) if attempts > 1 => {
                match self.store.get_transaction(id).await? {
                    Some(current) if Some(current.status) == target => {
                        log::warn!(
                            "Transaction {} was already {} after a retried commit.",
                            id,
                            current.status.as_str()
                        );
                        Some(current)
                    }
                    _ => return Err(StoreError::NotPending { id: pending, status }.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        transaction.ok_or_else(|| ServiceError::NotFound(format!("Transaction {}", id)))
    }

    pub async fn get_stats(&self) -> Result<AdminStats, ServiceError> {
        let users = self.store.list_users().await?;
        let pending = self
            .store
            .list_transactions(&TransactionFilter {
                status: Some(TransactionStatus::Pending),
                ..Default::default()
            })
            .await?;
        let tickets = self.store.list_tickets(None).await?;

        Ok(AdminStats {
            total_users: users.iter().filter(|u| !u.is_admin).count(),
            total_balance: users.iter().map(|u| u.balance).sum(),
            pending_deposits: pending
                .iter()
                .filter(|t| t.kind == TransactionKind::Deposit)
                .count(),
            pending_withdrawals: pending
                .iter()
                .filter(|t| t.kind == TransactionKind::Withdrawal)
                .count(),
            open_tickets: tickets
                .iter()
                .filter(|t| matches!(t.status, TicketStatus::Open | TicketStatus::InProgress))
                .count(),
        })
    }

    /// Case-insensitive substring match on username or phone.
    pub async fn search_users(&self, query: Option<String>) -> Result<Vec<User>, ServiceError> {
        let users = self.store.list_users().await?;
        let query = query.map(|q| q.trim().to_lowercase()).unwrap_or_default();
        if query.is_empty() {
            return Ok(users);
        }

        Ok(users
            .into_iter()
            .filter(|u| u.username.to_lowercase().contains(&query) || u.phone.contains(&query))
            .collect())
    }

    pub async fn set_banned(&self, user_id: &str, banned: bool) -> Result<User, ServiceError> {
        let user = self.user(user_id).await?;
        if banned && user.is_admin {
            return Err(ServiceError::Forbidden(
                "Admin accounts cannot be banned".to_string(),
            ));
        }

        let status = if banned {
            UserStatus::Banned
        } else {
            UserStatus::Active
        };
        let user = self.store.set_user_status(user_id, status).await?;
        if banned {
            let revoked = self.sessions.revoke_user(user_id);
            log::info!("Banned user {} and revoked {} sessions.", user_id, revoked);
        } else {
            log::info!("Unbanned user {}.", user_id);
        }
        Ok(user)
    }

    /// Signed adjustment; a debit larger than the balance floors it at zero.
    pub async fn adjust_balance(
        &self,
        admin_id: &str,
        user_id: &str,
        amount: f64,
        note: Option<String>,
        now: i64,
    ) -> Result<User, ServiceError> {
        if !amount.is_finite() || amount == 0.0 {
            return Err(ServiceError::Validation(
                "Adjustment must be a non-zero number".to_string(),
            ));
        }
        self.user(user_id).await?;

        let direction = if amount > 0.0 { "credit" } else { "debit" };
        let description = match note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => format!("Admin {}: {}", direction, note),
            None => format!("Admin {}", direction),
        };
        let entry = Transaction::settled(
            user_id,
            TransactionKind::Adjustment,
            amount.abs(),
            description,
            Some(admin_id.to_string()),
            now,
        );
        // A one-off key turns a retry after a lost acknowledgement into a
        // duplicate instead of a second adjustment.
        let batch = LedgerBatch::new()
            .idempotent(Some(IdempotencyKey {
                user_id: user_id.to_string(),
                key: uuid::Uuid::new_v4().simple().to_string(),
                transaction_id: entry.id.clone(),
            }))
            .delta(BalanceDelta {
                clamp_at_zero: true,
                ..BalanceDelta::balance(user_id, amount)
            })
            .entry(entry);

        match retry_with_backoff(&self.retry, || self.store.apply(batch.clone())).await {
            Ok(()) | Err(StoreError::Duplicate(_)) => {}
            Err(e) => return Err(e.into()),
        }
        log::info!("Admin {} adjusted balance of {} by {}.", admin_id, user_id, amount);

        self.user(user_id).await
    }

    /// Issues a session for `user_id` on behalf of an admin, for support
    /// staff to see what the user sees. Other admins and banned users are off
    /// limits.
    pub async fn impersonate(
        &self,
        admin_id: &str,
        user_id: &str,
        now: i64,
    ) -> Result<LoginResponse, ServiceError> {
        let user = self.user(user_id).await?;
        if user.is_admin {
            return Err(ServiceError::Forbidden(
                "Cannot sign in as an admin account".to_string(),
            ));
        }
        if !user.is_active() {
            return Err(ServiceError::Forbidden(
                "Cannot sign in as a banned user".to_string(),
            ));
        }

        let session = self.sessions.issue(&user, now);
        log::warn!(
            "Admin {} signed in as user {} ({}), session valid until {}.",
            admin_id,
            user.id,
            user.username,
            session.expires_at
        );

        Ok(LoginResponse {
            token: session.token,
            expires_at: session.expires_at,
            user,
        })
    }

    pub async fn reset_password(&self, user_id: &str, password: &str) -> Result<(), ServiceError> {
        validate_password(password)?;
        self.user(user_id).await?;

        self.store
            .set_credential(new_credential(user_id, password))
            .await?;
        self.sessions.revoke_user(user_id);
        log::info!("Reset password of user {}.", user_id);
        Ok(())
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, ServiceError> {
        Ok(self.store.list_transactions(filter).await?)
    }

    /// Approving credits the deposit to the balance; rejecting leaves the
    /// balance untouched.
    pub async fn resolve_deposit(
        &self,
        transaction_id: &str,
        approve: bool,
        reason: Option<String>,
    ) -> Result<Transaction, ServiceError> {
        let deposit = self.pending(transaction_id, TransactionKind::Deposit).await?;

        let mut batch = LedgerBatch::new().transition(StatusTransition {
            transaction_id: deposit.id.clone(),
            to: if approve {
                TransactionStatus::Approved
            } else {
                TransactionStatus::Rejected
            },
            rejection_reason: if approve { None } else { reason },
        });
        if approve {
            batch = batch.delta(BalanceDelta::balance(&deposit.user_id, deposit.amount));
        }

        let resolved = self.commit(batch, &deposit.id).await?;
        log::info!(
            "Deposit {} of {} for user {} is now {}.",
            resolved.id,
            resolved.amount,
            resolved.user_id,
            resolved.status.as_str()
        );
        Ok(resolved)
    }

    /// The amount was held at request time, so paying only records it as
    /// withdrawn and rejecting refunds it.
    pub async fn resolve_withdrawal(
        &self,
        transaction_id: &str,
        pay: bool,
        reason: Option<String>,
    ) -> Result<Transaction, ServiceError> {
        let withdrawal = self
            .pending(transaction_id, TransactionKind::Withdrawal)
            .await?;

        let (to, delta, rejection_reason) = if pay {
            (
                TransactionStatus::Paid,
                BalanceDelta::withdrawn(&withdrawal.user_id, withdrawal.amount),
                None,
            )
        } else {
            (
                TransactionStatus::Rejected,
                BalanceDelta::balance(&withdrawal.user_id, withdrawal.amount),
                reason,
            )
        };
        let batch = LedgerBatch::new()
            .transition(StatusTransition {
                transaction_id: withdrawal.id.clone(),
                to,
                rejection_reason,
            })
            .delta(delta);

        let resolved = self.commit(batch, &withdrawal.id).await?;
        log::info!(
            "Withdrawal {} of {} for user {} is now {}.",
            resolved.id,
            resolved.amount,
            resolved.user_id,
            resolved.status.as_str()
        );
        Ok(resolved)
    }

    pub async fn update_settings(&self, settings: AppSettings) -> Result<AppSettings, ServiceError> {
        settings.validate().map_err(ServiceError::Validation)?;
        self.store.put_settings(settings.clone()).await?;
        log::info!(
            "Updated settings (maintenance: {}, spin enabled: {}).",
            settings.maintenance,
            settings.spin_enabled
        );
        Ok(settings)
    }
}

#[async_trait]
impl RequestHandler<AdminRequest> for AdminRequestHandler {
    async fn handle_request(&self, request: AdminRequest) {
        match request {
            AdminRequest::GetStats { response } => {
                let _ = response.send(self.get_stats().await);
            }
            AdminRequest::SearchUsers { query, response } => {
                let _ = response.send(self.search_users(query).await);
            }
            AdminRequest::SetBanned {
                user_id,
                banned,
                response,
            } => {
                let _ = response.send(self.set_banned(&user_id, banned).await);
            }
            AdminRequest::AdjustBalance {
                admin_id,
                user_id,
                amount,
                note,
                response,
            } => {
                let result = self
                    .adjust_balance(&admin_id, &user_id, amount, note, now_millis())
                    .await;
                let _ = response.send(result);
            }
            AdminRequest::Impersonate {
                admin_id,
                user_id,
                response,
            } => {
                let result = self.impersonate(&admin_id, &user_id, now_millis()).await;
                let _ = response.send(result);
            }
            AdminRequest::ResetPassword {
                user_id,
                password,
                response,
            } => {
                let _ = response.send(self.reset_password(&user_id, &password).await);
            }
            AdminRequest::ListTransactions { filter, response } => {
                let _ = response.send(self.list_transactions(&filter).await);
            }
            AdminRequest::ResolveDeposit {
                transaction_id,
                approve,
                reason,
                response,
            } => {
                let result = self.resolve_deposit(&transaction_id, approve, reason).await;
                let _ = response.send(result);
            }
            AdminRequest::ResolveWithdrawal {
                transaction_id,
                pay,
                reason,
                response,
            } => {
                let result = self.resolve_withdrawal(&transaction_id, pay, reason).await;
                let _ = response.send(result);
            }
            AdminRequest::UpdateSettings { settings, response } => {
                let _ = response.send(self.update_settings(settings).await);
            }
        }
    }
}

pub struct AdminService;

impl AdminService {
    pub fn new() -> Self {
        AdminService {}
    }
}

#[async_trait]
impl Service<AdminRequest, AdminRequestHandler> for AdminService {}
