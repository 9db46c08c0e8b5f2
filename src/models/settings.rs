use serde::{Deserialize, Serialize};

use super::referrals::{BonusType, ReferralBonus};

/// Number of slots on the reward wheel.
pub const SPIN_SLOTS: usize = 12;

/// Upper bound accepted for `referral_levels`.
pub const MAX_REFERRAL_LEVELS: u32 = 10;

/// The single global configuration record, editable by administrators.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub website_notice: String,
    pub bkash_number: String,
    pub nagad_number: String,
    pub deposit_instructions: String,
    pub min_deposit: f64,
    pub max_deposit: f64,
    pub min_withdrawal: f64,
    pub max_withdrawal_per_day: f64,
    pub referral_levels: u32,
    pub referral_bonuses: Vec<ReferralBonus>,
    pub theme_color: String,
    pub maintenance: bool,
    pub spin_enabled: bool,
    pub spin_rewards: Vec<f64>,
    pub max_spin_reward: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            website_notice: "Welcome to ERNIG EARN! Complete tasks and earn money daily."
                .to_string(),
            bkash_number: "01700000000".to_string(),
            nagad_number: "01800000000".to_string(),
            deposit_instructions:
                "Send money to our bKash/Nagad number and provide the Transaction ID.".to_string(),
            min_deposit: 100.0,
            max_deposit: 25_000.0,
            min_withdrawal: 100.0,
            max_withdrawal_per_day: 5_000.0,
            referral_levels: 3,
            referral_bonuses: vec![
                ReferralBonus {
                    level: 1,
                    amount: 10.0,
                    bonus_type: BonusType::Percentage,
                },
                ReferralBonus {
                    level: 2,
                    amount: 5.0,
                    bonus_type: BonusType::Percentage,
                },
                ReferralBonus {
                    level: 3,
                    amount: 2.0,
                    bonus_type: BonusType::Percentage,
                },
            ],
            theme_color: "#4F46E5".to_string(),
            maintenance: false,
            spin_enabled: true,
            spin_rewards: vec![
                1.0, 2.0, 5.0, 10.0, 15.0, 20.0, 1.0, 2.0, 5.0, 10.0, 15.0, 20.0,
            ],
            max_spin_reward: 10.0,
        }
    }
}

impl AppSettings {
    /// Configured referral depth, falling back to 3 when unset.
    pub fn referral_depth(&self) -> u32 {
        if self.referral_levels == 0 {
            3
        } else {
            self.referral_levels
        }
    }

    pub fn bonus_for_level(&self, level: u32) -> Option<&ReferralBonus> {
        self.referral_bonuses.iter().find(|b| b.level == level)
    }

    pub fn validate(&self) -> Result<(), String> {
        let amounts = [
            self.min_deposit,
            self.max_deposit,
            self.min_withdrawal,
            self.max_withdrawal_per_day,
            self.max_spin_reward,
        ];
        if amounts.iter().any(|a| !a.is_finite() || *a < 0.0) {
            return Err("Limits must be non-negative numbers".to_string());
        }
        if self.min_deposit > self.max_deposit {
            return Err("Minimum deposit exceeds maximum deposit".to_string());
        }
        if self.min_withdrawal > self.max_withdrawal_per_day {
            return Err("Minimum withdrawal exceeds the daily withdrawal limit".to_string());
        }
        if self.referral_levels == 0 || self.referral_levels > MAX_REFERRAL_LEVELS {
            return Err(format!(
                "Referral levels must be between 1 and {}",
                MAX_REFERRAL_LEVELS
            ));
        }
        for bonus in &self.referral_bonuses {
            if bonus.level == 0 || !bonus.amount.is_finite() || bonus.amount < 0.0 {
                return Err(format!("Invalid referral bonus for level {}", bonus.level));
            }
        }
        if self.spin_rewards.len() != SPIN_SLOTS {
            return Err(format!("Spin table must have {} slots", SPIN_SLOTS));
        }
        if self.spin_rewards.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err("Spin rewards must be non-negative".to_string());
        }
        Ok(())
    }
}

/// What unauthenticated clients may read.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSettings {
    pub website_notice: String,
    pub bkash_number: String,
    pub nagad_number: String,
    pub deposit_instructions: String,
    pub min_deposit: f64,
    pub max_deposit: f64,
    pub min_withdrawal: f64,
    pub max_withdrawal_per_day: f64,
    pub referral_levels: u32,
    pub referral_bonuses: Vec<ReferralBonus>,
    pub theme_color: String,
    pub maintenance: bool,
    pub spin_enabled: bool,
    pub spin_rewards: Vec<f64>,
}

impl From<AppSettings> for PublicSettings {
    fn from(s: AppSettings) -> Self {
        PublicSettings {
            website_notice: s.website_notice,
            bkash_number: s.bkash_number,
            nagad_number: s.nagad_number,
            deposit_instructions: s.deposit_instructions,
            min_deposit: s.min_deposit,
            max_deposit: s.max_deposit,
            min_withdrawal: s.min_withdrawal,
            max_withdrawal_per_day: s.max_withdrawal_per_day,
            referral_levels: s.referral_levels,
            referral_bonuses: s.referral_bonuses,
            theme_color: s.theme_color,
            maintenance: s.maintenance,
            spin_enabled: s.spin_enabled,
            spin_rewards: s.spin_rewards,
        }
    }
}
