use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{types::Json, PgPool, Postgres, Transaction as PgTransaction};

use super::{Guard, LedgerBatch, Store, StoreError, UserUpdate};
use crate::models::{
    catalog::{Plan, Task},
    settings::AppSettings,
    tickets::{Reply, SupportTicket, TicketStatus},
    transactions::{PaymentMethod, Transaction, TransactionFilter, TransactionKind},
    users::{normalize_username, Credential, User, UserStatus},
};

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_check_violation() => {
                StoreError::GuardFailed(db.message().to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

const USER_COLUMNS: &str = "id, username, phone, balance, total_earnings, total_withdrawals, \
     referral_code, referred_by, status, is_admin, active_plan_id, plan_expiry, last_spin_time, \
     created_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, kind, status, method, account_number, \
     trx_id, created_at, description, rejection_reason, reference_id";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    phone: String,
    balance: f64,
    total_earnings: f64,
    total_withdrawals: f64,
    referral_code: String,
    referred_by: Option<String>,
    status: String,
    is_admin: bool,
    active_plan_id: Option<String>,
    plan_expiry: Option<i64>,
    last_spin_time: Option<i64>,
    created_at: i64,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<UserStatus>()
            .map_err(|e| StoreError::Malformed(format!("user {}: {}", row.id, e)))?;

        Ok(User {
            id: row.id,
            username: row.username,
            phone: row.phone,
            balance: row.balance,
            total_earnings: row.total_earnings,
            total_withdrawals: row.total_withdrawals,
            referral_code: row.referral_code,
            referred_by: row.referred_by,
            status,
            is_admin: row.is_admin,
            active_plan_id: row.active_plan_id,
            plan_expiry: row.plan_expiry,
            last_spin_time: row.last_spin_time,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    name: String,
    price: f64,
    daily_tasks: i32,
    daily_earning: f64,
    validity_days: i32,
    active: bool,
}

impl TryFrom<PlanRow> for Plan {
    type Error = StoreError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        let malformed = |field: &str| StoreError::Malformed(format!("plan {}: {}", row.id, field));
        let daily_tasks = u32::try_from(row.daily_tasks).map_err(|_| malformed("daily_tasks"))?;
        let validity_days =
            u32::try_from(row.validity_days).map_err(|_| malformed("validity_days"))?;

        Ok(Plan {
            id: row.id,
            name: row.name,
            price: row.price,
            daily_tasks,
            daily_earning: row.daily_earning,
            validity_days,
            active: row.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    description: String,
    amount: f64,
    time_required: i32,
    link: String,
    category: String,
    image_url: Option<String>,
    active: bool,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let time_required = u32::try_from(row.time_required)
            .map_err(|_| StoreError::Malformed(format!("task {}: time_required", row.id)))?;

        Ok(Task {
            id: row.id,
            title: row.title,
            description: row.description,
            amount: row.amount,
            time_required,
            link: row.link,
            category: row.category,
            image_url: row.image_url,
            active: row.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    amount: f64,
    kind: String,
    status: String,
    method: Option<String>,
    account_number: Option<String>,
    trx_id: Option<String>,
    created_at: i64,
    description: String,
    rejection_reason: Option<String>,
    reference_id: Option<String>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let malformed = |e: crate::models::ParseEnumError| {
            StoreError::Malformed(format!("transaction {}: {}", row.id, e))
        };
        let kind = row.kind.parse().map_err(malformed)?;
        let status = row.status.parse().map_err(malformed)?;
        let method = row
            .method
            .as_deref()
            .map(str::parse::<PaymentMethod>)
            .transpose()
            .map_err(malformed)?;

        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            kind,
            status,
            method,
            account_number: row.account_number,
            trx_id: row.trx_id,
            created_at: row.created_at,
            description: row.description,
            rejection_reason: row.rejection_reason,
            reference_id: row.reference_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    user_id: String,
    subject: String,
    category: String,
    message: String,
    status: String,
    created_at: i64,
}

#[derive(sqlx::FromRow)]
struct ReplyRow {
    id: String,
    ticket_id: String,
    sender_id: String,
    message: String,
    created_at: i64,
    is_admin: bool,
}

impl From<ReplyRow> for Reply {
    fn from(row: ReplyRow) -> Self {
        Reply {
            id: row.id,
            sender_id: row.sender_id,
            message: row.message,
            created_at: row.created_at,
            is_admin: row.is_admin,
        }
    }
}

fn ticket_from_row(row: TicketRow, replies: Vec<Reply>) -> Result<SupportTicket, StoreError> {
    let status = row
        .status
        .parse::<TicketStatus>()
        .map_err(|e| StoreError::Malformed(format!("ticket {}: {}", row.id, e)))?;

    Ok(SupportTicket {
        id: row.id,
        user_id: row.user_id,
        subject: row.subject,
        category: row.category,
        message: row.message,
        status,
        created_at: row.created_at,
        replies,
    })
}

/// Converts a collection read, dropping rows that fail validation. The bad
/// rows are logged so they can be repaired by hand.
fn quarantine<R, T>(rows: Vec<R>) -> Vec<T>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter()
        .filter_map(|row| match T::try_from(row) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping record: {}", e);
                None
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct PgStore {
    conn: PgPool,
}

impl PgStore {
    pub fn new(conn: PgPool) -> Self {
        PgStore { conn }
    }

    pub async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::migrate!("./migrations").run(&self.conn).await?;
        Ok(())
    }

    async fn fetch_user_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE {} = $1",
            USER_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.conn)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn load_replies(
        &self,
        ticket_ids: &[String],
    ) -> Result<HashMap<String, Vec<Reply>>, StoreError> {
        let rows = sqlx::query_as::<_, ReplyRow>(
            "SELECT id, ticket_id, sender_id, message, created_at, is_admin \
             FROM ticket_replies WHERE ticket_id = ANY($1) ORDER BY seq",
        )
        .bind(ticket_ids.to_vec())
        .fetch_all(&self.conn)
        .await?;

        let mut replies: HashMap<String, Vec<Reply>> = HashMap::new();
        for row in rows {
            replies
                .entry(row.ticket_id.clone())
                .or_default()
                .push(row.into());
        }
        Ok(replies)
    }

    async fn check_guard(
        tx: &mut PgTransaction<'_, Postgres>,
        guard: &Guard,
    ) -> Result<(), StoreError> {
        match guard {
            Guard::UserActive { user_id } => {
                let status: Option<String> =
                    sqlx::query_scalar("SELECT status FROM users WHERE id = $1")
                        .bind(user_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                match status.as_deref() {
                    None => return Err(StoreError::NotFound(format!("user {}", user_id))),
                    Some("active") => {}
                    Some(_) => {
                        return Err(StoreError::GuardFailed(format!(
                            "user {} is banned",
                            user_id
                        )))
                    }
                }
            }
            Guard::DailyTaskQuota {
                user_id,
                since,
                limit,
            } => {
                let done: i64 = sqlx::query_scalar(
                    "SELECT COUNT(1) FROM transactions \
                     WHERE user_id = $1 AND kind = 'task' AND created_at >= $2",
                )
                .bind(user_id)
                .bind(since)
                .fetch_one(&mut **tx)
                .await?;
                if done >= i64::from(*limit) {
                    return Err(StoreError::GuardFailed("daily task limit reached".to_string()));
                }
            }
            Guard::DailyWithdrawalLimit {
                user_id,
                since,
                limit,
                amount,
            } => {
                let withdrawn: f64 = sqlx::query_scalar(
                    "SELECT COALESCE(SUM(amount), 0::DOUBLE PRECISION) FROM transactions \
                     WHERE user_id = $1 AND kind = 'withdrawal' AND status <> 'rejected' \
                     AND created_at >= $2",
                )
                .bind(user_id)
                .bind(since)
                .fetch_one(&mut **tx)
                .await?;
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
                let last: Option<Option<i64>> =
                    sqlx::query_scalar("SELECT last_spin_time FROM users WHERE id = $1")
                        .bind(user_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                match last {
                    None => return Err(StoreError::NotFound(format!("user {}", user_id))),
                    Some(Some(last)) if *now - last < *cooldown_ms => {
                        return Err(StoreError::GuardFailed("spin cooldown active".to_string()))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    async fn insert_transaction(
        tx: &mut PgTransaction<'_, Postgres>,
        entry: &Transaction,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            TRANSACTION_COLUMNS
        ))
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(entry.amount)
        .bind(entry.kind.as_str())
        .bind(entry.status.as_str())
        .bind(entry.method.map(|m| m.as_str()))
        .bind(&entry.account_number)
        .bind(&entry.trx_id)
        .bind(entry.created_at)
        .bind(&entry.description)
        .bind(&entry.rejection_reason)
        .bind(&entry.reference_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: User, credential: Credential) -> Result<User, StoreError> {
        let mut tx = self.conn.begin().await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users
            (id, username, username_key, phone, balance, total_earnings, total_withdrawals,
             referral_code, referred_by, status, is_admin, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.id)
        .bind(&user.username)
        .bind(normalize_username(&user.username))
        .bind(&user.phone)
        .bind(user.balance)
        .bind(user.total_earnings)
        .bind(user.total_withdrawals)
        .bind(&user.referral_code)
        .bind(&user.referred_by)
        .bind(user.status.as_str())
        .bind(user.is_admin)
        .bind(user.created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO credentials (user_id, salt, password_hash) VALUES ($1, $2, $3)")
            .bind(&credential.user_id)
            .bind(&credential.salt)
            .bind(&credential.password_hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        User::try_from(row)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user_where("id", id).await
    }

    async fn get_user_by_key(&self, key: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user_where("username_key", key).await
    }

    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user_where("phone", phone).await
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY created_at",
            USER_COLUMNS
        ))
        .fetch_all(&self.conn)
        .await?;

        Ok(quarantine(rows))
    }

    async fn list_referred_users(&self, referral_code: &str) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE referred_by = $1 ORDER BY created_at",
            USER_COLUMNS
        ))
        .bind(referral_code)
        .fetch_all(&self.conn)
        .await?;

        Ok(quarantine(rows))
    }

    async fn set_user_status(&self, id: &str, status: UserStatus) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET status = $1 WHERE id = $2 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(status.as_str())
        .bind(id)
        .fetch_optional(&self.conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;

        User::try_from(row)
    }

    async fn get_credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT user_id, salt, password_hash FROM credentials WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(row.map(|(user_id, salt, password_hash)| Credential {
            user_id,
            salt,
            password_hash,
        }))
    }

    async fn set_credential(&self, credential: Credential) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE credentials SET salt = $1, password_hash = $2 WHERE user_id = $3",
        )
        .bind(&credential.salt)
        .bind(&credential.password_hash)
        .bind(&credential.user_id)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", credential.user_id)));
        }
        Ok(())
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, StoreError> {
        let rows = sqlx::query_as::<_, PlanRow>(
            "SELECT id, name, price, daily_tasks, daily_earning, validity_days, active \
             FROM plans ORDER BY seq",
        )
        .fetch_all(&self.conn)
        .await?;

        Ok(quarantine(rows))
    }

    async fn get_plan(&self, id: &str) -> Result<Option<Plan>, StoreError> {
        let row = sqlx::query_as::<_, PlanRow>(
            "SELECT id, name, price, daily_tasks, daily_earning, validity_days, active \
             FROM plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        row.map(Plan::try_from).transpose()
    }

    async fn upsert_plan(&self, plan: Plan) -> Result<Plan, StoreError> {
        let to_i32 = |v: u32| {
            i32::try_from(v).map_err(|_| StoreError::Malformed(format!("plan {}", plan.id)))
        };
        sqlx::query(
            r#"
            INSERT INTO plans (id, name, price, daily_tasks, daily_earning, validity_days, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                daily_tasks = EXCLUDED.daily_tasks,
                daily_earning = EXCLUDED.daily_earning,
                validity_days = EXCLUDED.validity_days,
                active = EXCLUDED.active
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(plan.price)
        .bind(to_i32(plan.daily_tasks)?)
        .bind(plan.daily_earning)
        .bind(to_i32(plan.validity_days)?)
        .bind(plan.active)
        .execute(&self.conn)
        .await?;

        Ok(plan)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT id, title, description, amount, time_required, link, category, image_url, \
             active FROM tasks ORDER BY seq",
        )
        .fetch_all(&self.conn)
        .await?;

        Ok(quarantine(rows))
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT id, title, description, amount, time_required, link, category, image_url, \
             active FROM tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn upsert_task(&self, task: Task) -> Result<Task, StoreError> {
        let time_required = i32::try_from(task.time_required)
            .map_err(|_| StoreError::Malformed(format!("task {}", task.id)))?;
        sqlx::query(
            r#"
            INSERT INTO tasks
            (id, title, description, amount, time_required, link, category, image_url, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                amount = EXCLUDED.amount,
                time_required = EXCLUDED.time_required,
                link = EXCLUDED.link,
                category = EXCLUDED.category,
                image_url = EXCLUDED.image_url,
                active = EXCLUDED.active
            "#,
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.amount)
        .bind(time_required)
        .bind(&task.link)
        .bind(&task.category)
        .bind(&task.image_url)
        .bind(task.active)
        .execute(&self.conn)
        .await?;

        Ok(task)
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR kind = $2)
              AND ($3::TEXT IS NULL OR user_id = $3)
            ORDER BY created_at DESC, seq DESC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(&filter.user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(quarantine(rows))
    }

    async fn count_transactions_since(
        &self,
        user_id: &str,
        kind: TransactionKind,
        since: i64,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM transactions WHERE user_id = $1 AND kind = $2 AND created_at >= $3",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.conn)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn get_idempotent(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = \
             (SELECT transaction_id FROM idempotency_keys WHERE user_id = $1 AND key = $2)",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(key)
        .fetch_optional(&self.conn)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn apply(&self, batch: LedgerBatch) -> Result<(), StoreError> {
        let mut tx = self.conn.begin().await?;

        // Row locks in id order serialize every batch touching the same
        // users and rule out deadlocks between them.
        let touched = batch.touched_users();
        if !touched.is_empty() {
            let locked: Vec<String> =
                sqlx::query_scalar("SELECT id FROM users WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                    .bind(touched.clone())
                    .fetch_all(&mut *tx)
                    .await?;
            if let Some(missing) = touched.iter().find(|id| !locked.contains(id)) {
                return Err(StoreError::NotFound(format!("user {}", missing)));
            }
        }

        if let Some(key) = &batch.idempotency {
            let inserted = sqlx::query(
                "INSERT INTO idempotency_keys (user_id, key, transaction_id) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&key.user_id)
            .bind(&key.key)
            .bind(&key.transaction_id)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                let existing: String = sqlx::query_scalar(
                    "SELECT transaction_id FROM idempotency_keys WHERE user_id = $1 AND key = $2",
                )
                .bind(&key.user_id)
                .bind(&key.key)
                .fetch_one(&mut *tx)
                .await?;
                return Err(StoreError::Duplicate(existing));
            }
        }

        if let Some(transition) = &batch.transition {
            let updated: Option<String> = sqlx::query_scalar(
                "UPDATE transactions SET status = $1, rejection_reason = $2 \
                 WHERE id = $3 AND status = 'pending' RETURNING id",
            )
            .bind(transition.to.as_str())
            .bind(&transition.rejection_reason)
            .bind(&transition.transaction_id)
            .fetch_optional(&mut *tx)
            .await?;

            if updated.is_none() {
                let status: Option<String> =
                    sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1")
                        .bind(&transition.transaction_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match status {
                    Some(status) => StoreError::NotPending {
                        id: transition.transaction_id.clone(),
                        status,
                    },
                    None => {
                        StoreError::NotFound(format!("transaction {}", transition.transaction_id))
                    }
                });
            }
        }

        for guard in &batch.guards {
            Self::check_guard(&mut tx, guard).await?;
        }

        for delta in &batch.deltas {
            let query = if delta.clamp_at_zero {
                "UPDATE users SET balance = GREATEST(balance + $2, 0), \
                 total_earnings = total_earnings + $3, total_withdrawals = total_withdrawals + $4 \
                 WHERE id = $1 RETURNING id"
            } else {
                "UPDATE users SET balance = balance + $2, \
                 total_earnings = total_earnings + $3, total_withdrawals = total_withdrawals + $4 \
                 WHERE id = $1 AND balance + $2 >= 0 RETURNING id"
            };
            let updated: Option<String> = sqlx::query_scalar(query)
                .bind(&delta.user_id)
                .bind(delta.balance)
                .bind(delta.total_earnings)
                .bind(delta.total_withdrawals)
                .fetch_optional(&mut *tx)
                .await?;

            if updated.is_none() {
                return Err(StoreError::InsufficientBalance(delta.user_id.clone()));
            }
        }

        for update in &batch.updates {
            match update {
                UserUpdate::ActivatePlan {
                    user_id,
                    plan_id,
                    expiry,
                } => {
                    sqlx::query(
                        "UPDATE users SET active_plan_id = $2, plan_expiry = $3 WHERE id = $1",
                    )
                    .bind(user_id)
                    .bind(plan_id)
                    .bind(expiry)
                    .execute(&mut *tx)
                    .await?;
                }
                UserUpdate::RecordSpin { user_id, at } => {
                    sqlx::query("UPDATE users SET last_spin_time = $2 WHERE id = $1")
                        .bind(user_id)
                        .bind(at)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        for entry in &batch.entries {
            Self::insert_transaction(&mut tx, entry).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn get_settings(&self) -> Result<AppSettings, StoreError> {
        let settings: Option<Json<AppSettings>> =
            sqlx::query_scalar("SELECT data FROM app_settings WHERE id = 1")
                .fetch_optional(&self.conn)
                .await?;

        Ok(settings.map(|s| s.0).unwrap_or_default())
    }

    async fn put_settings(&self, settings: AppSettings) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_settings (id, data) VALUES (1, $1) \
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(Json(settings))
        .execute(&self.conn)
        .await?;
        Ok(())
    }

    async fn insert_ticket(&self, ticket: SupportTicket) -> Result<SupportTicket, StoreError> {
        let mut tx = self.conn.begin().await?;

        sqlx::query(
            "INSERT INTO tickets (id, user_id, subject, category, message, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&ticket.id)
        .bind(&ticket.user_id)
        .bind(&ticket.subject)
        .bind(&ticket.category)
        .bind(&ticket.message)
        .bind(ticket.status.as_str())
        .bind(ticket.created_at)
        .execute(&mut *tx)
        .await?;

        for reply in &ticket.replies {
            insert_reply(&mut tx, &ticket.id, reply).await?;
        }

        tx.commit().await?;
        Ok(ticket)
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<SupportTicket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(
            "SELECT id, user_id, subject, category, message, status, created_at \
             FROM tickets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let mut replies = self.load_replies(&[row.id.clone()]).await?;
                let replies = replies.remove(&row.id).unwrap_or_default();
                ticket_from_row(row, replies).map(Some)
            }
        }
    }

    async fn list_tickets(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<SupportTicket>, StoreError> {
        let rows = sqlx::query_as::<_, TicketRow>(
            "SELECT id, user_id, subject, category, message, status, created_at FROM tickets \
             WHERE ($1::TEXT IS NULL OR user_id = $1) ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut replies = self.load_replies(&ids).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let thread = replies.remove(&row.id).unwrap_or_default();
                match ticket_from_row(row, thread) {
                    Ok(ticket) => Some(ticket),
                    Err(e) => {
                        log::warn!("Skipping record: {}", e);
                        None
                    }
                }
            })
            .collect())
    }

    async fn append_replies(
        &self,
        ticket_id: &str,
        replies: Vec<Reply>,
        status: TicketStatus,
    ) -> Result<SupportTicket, StoreError> {
        let mut tx = self.conn.begin().await?;

        let updated = sqlx::query("UPDATE tickets SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(ticket_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("ticket {}", ticket_id)));
        }

        for reply in &replies {
            insert_reply(&mut tx, ticket_id, reply).await?;
        }

        tx.commit().await?;

        self.get_ticket(ticket_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", ticket_id)))
    }

    async fn set_ticket_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
    ) -> Result<SupportTicket, StoreError> {
        self.append_replies(ticket_id, Vec::new(), status).await
    }
}

async fn insert_reply(
    tx: &mut PgTransaction<'_, Postgres>,
    ticket_id: &str,
    reply: &Reply,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO ticket_replies (id, ticket_id, sender_id, message, created_at, is_admin) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&reply.id)
    .bind(ticket_id)
    .bind(&reply.sender_id)
    .bind(&reply.message)
    .bind(reply.created_at)
    .bind(reply.is_admin)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
