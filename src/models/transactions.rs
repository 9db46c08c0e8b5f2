use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ParseEnumError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Task,
    Referral,
    PlanPurchase,
    Spin,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Task => "task",
            TransactionKind::Referral => "referral",
            TransactionKind::PlanPurchase => "plan_purchase",
            TransactionKind::Spin => "spin",
            TransactionKind::Adjustment => "adjustment",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "task" => Ok(TransactionKind::Task),
            "referral" => Ok(TransactionKind::Referral),
            "plan_purchase" => Ok(TransactionKind::PlanPurchase),
            "spin" => Ok(TransactionKind::Spin),
            "adjustment" => Ok(TransactionKind::Adjustment),
            other => Err(ParseEnumError {
                kind: "transaction type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Paid => "paid",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "approved" => Ok(TransactionStatus::Approved),
            "rejected" => Ok(TransactionStatus::Rejected),
            "paid" => Ok(TransactionStatus::Paid),
            other => Err(ParseEnumError {
                kind: "transaction status",
                value: other.to_string(),
            }),
        }
    }
}

/// Mobile-money rail a deposit was sent over or a withdrawal is paid to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PaymentMethod {
    #[serde(rename = "bKash")]
    Bkash,
    #[serde(rename = "Nagad")]
    Nagad,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Bkash => "bKash",
            PaymentMethod::Nagad => "Nagad",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bKash" => Ok(PaymentMethod::Bkash),
            "Nagad" => Ok(PaymentMethod::Nagad),
            other => Err(ParseEnumError {
                kind: "payment method",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub method: Option<PaymentMethod>,
    pub account_number: Option<String>,
    pub trx_id: Option<String>,
    pub created_at: i64,
    pub description: String,
    pub rejection_reason: Option<String>,
    pub reference_id: Option<String>,
}

impl Transaction {
    /// An instantly settled entry with no payment-rail metadata.
    pub fn settled(
        user_id: &str,
        kind: TransactionKind,
        amount: f64,
        description: String,
        reference_id: Option<String>,
        created_at: i64,
    ) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().hyphenated().to_string(),
            user_id: user_id.to_string(),
            amount,
            kind,
            status: TransactionStatus::Approved,
            method: None,
            account_number: None,
            trx_id: None,
            created_at,
            description,
            rejection_reason: None,
            reference_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDeposit {
    pub amount: f64,
    pub method: PaymentMethod,
    pub trx_id: String,
    pub account_number: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWithdrawal {
    pub amount: f64,
    pub method: PaymentMethod,
    pub account_number: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub kind: Option<TransactionKind>,
    pub user_id: Option<String>,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.status.map_or(true, |s| s == transaction.status)
            && self.kind.map_or(true, |k| k == transaction.kind)
            && self
                .user_id
                .as_deref()
                .map_or(true, |id| id == transaction.user_id)
    }
}
