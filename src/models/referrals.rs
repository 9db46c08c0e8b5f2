use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BonusType {
    Percentage,
    Fixed,
}

/// Bonus paid to the referrer sitting `level` steps above the earner.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ReferralBonus {
    pub level: u32,
    pub amount: f64,
    #[serde(rename = "type")]
    pub bonus_type: BonusType,
}

impl ReferralBonus {
    pub fn bonus_for(&self, task_amount: f64) -> f64 {
        match self.bonus_type {
            BonusType::Percentage => task_amount * self.amount / 100.0,
            BonusType::Fixed => self.amount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCredit {
    pub level: u32,
    pub user_id: String,
    pub username: String,
    pub amount: f64,
}

/// One line of a user's referral list. Balances of referred users are not
/// exposed to the referrer.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferredUser {
    pub username: String,
    pub created_at: i64,
    pub has_active_plan: bool,
}
