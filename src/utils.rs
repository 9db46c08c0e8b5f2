use std::future::Future;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::repositories::StoreError;
use crate::settings::Retry;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Midnight (UTC) of the day containing `millis`.
pub fn start_of_day(millis: i64) -> i64 {
    let day = Utc
        .timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
        .date_naive();

    day.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc().timestamp_millis())
        .unwrap_or(millis)
}

pub fn generate_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is used up. The delay doubles after each attempt.
pub async fn retry_with_backoff<T, F, Fut>(policy: &Retry, mut operation: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let mut attempt = 1;

    loop {
        match operation().await {
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                log::warn!(
                    "Store call failed (attempt {}/{}): {}. Retrying in {:?}.",
                    attempt,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            result => return result,
        }
    }
}
