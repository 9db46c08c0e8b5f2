use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ParseEnumError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Banned => "banned",
        }
    }
}

impl FromStr for UserStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            other => Err(ParseEnumError {
                kind: "user status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub phone: String,
    pub balance: f64,
    pub total_earnings: f64,
    pub total_withdrawals: f64,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub status: UserStatus,
    pub is_admin: bool,
    pub active_plan_id: Option<String>,
    pub plan_expiry: Option<i64>,
    pub last_spin_time: Option<i64>,
    pub created_at: i64,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// A plan whose expiry has passed no longer counts, even though the id
    /// stays on the record until the next purchase.
    pub fn has_active_plan(&self, now: i64) -> bool {
        match (&self.active_plan_id, self.plan_expiry) {
            (Some(_), Some(expiry)) => expiry > now,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Stored apart from [`User`] so that no user-facing read ever carries it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub salt: String,
    pub password_hash: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub phone: String,
    pub password: String,
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: i64,
    pub user: User,
}

/// Trimmed, lowercased and stripped of all whitespace. Used both as the
/// directory key for case-insensitive uniqueness and as the referral code.
pub fn normalize_username(username: &str) -> String {
    username
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
