use std::collections::HashSet;

use crate::models::{
    referrals::ReferralCredit,
    settings::AppSettings,
    users::{normalize_username, User},
};
use crate::repositories::{Store, StoreError};

/// Ancestors of an earner, nearest first, following `referred_by` codes for
/// at most `depth` steps. A missing referrer or a user seen twice ends the
/// chain.
pub async fn resolve_chain(
    store: &dyn Store,
    referred_by: Option<&str>,
    depth: u32,
) -> Result<Vec<User>, StoreError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = referred_by.map(normalize_username);

    while let Some(code) = next.take() {
        if chain.len() >= depth as usize || code.is_empty() {
            break;
        }
        let Some(referrer) = store.get_user_by_key(&code).await? else {
            log::debug!("Referral code {} no longer resolves, ending walk.", code);
            break;
        };
        if !seen.insert(referrer.id.clone()) {
            log::warn!("Referral cycle through user {}, ending walk.", referrer.id);
            break;
        }
        next = referrer.referred_by.as_deref().map(normalize_username);
        chain.push(referrer);
    }

    Ok(chain)
}

/// Bonus owed to each ancestor for a task worth `task_amount`. Levels
/// without a configured bonus, and zero bonuses, are skipped.
pub fn compute_bonuses(task_amount: f64, chain: &[User], settings: &AppSettings) -> Vec<ReferralCredit> {
    chain
        .iter()
        .take(settings.referral_depth() as usize)
        .enumerate()
        .filter_map(|(i, referrer)| {
            let level = i as u32 + 1;
            let amount = settings.bonus_for_level(level)?.bonus_for(task_amount);
            (amount > 0.0).then(|| ReferralCredit {
                level,
                user_id: referrer.id.clone(),
                username: referrer.username.clone(),
                amount,
            })
        })
        .collect()
}
