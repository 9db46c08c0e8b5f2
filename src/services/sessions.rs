use dashmap::DashMap;

use crate::models::users::User;

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub is_admin: bool,
    pub expires_at: i64,
}

/// Bearer tokens issued at login. Tokens are opaque; nothing about the user
/// can be derived from one.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl_ms: i64,
}

impl SessionStore {
    pub fn new(ttl_secs: i64) -> Self {
        SessionStore {
            sessions: DashMap::new(),
            ttl_ms: ttl_secs.saturating_mul(1000),
        }
    }

    /// Issues a fresh token. Expired sessions are pruned first so tokens
    /// nobody presents again do not pile up.
    pub fn issue(&self, user: &User, now: i64) -> Session {
        self.prune(now);

        let session = Session {
            token: uuid::Uuid::new_v4().simple().to_string(),
            user_id: user.id.clone(),
            is_admin: user.is_admin,
            expires_at: now.saturating_add(self.ttl_ms),
        };
        self.sessions
            .insert(session.token.clone(), session.clone());
        session
    }

    pub fn resolve(&self, token: &str, now: i64) -> Option<Session> {
        let session = self.sessions.get(token).map(|s| s.clone())?;
        if session.expires_at <= now {
            self.sessions.remove(token);
            return None;
        }
        Some(session)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drops every session of `user_id`, returning how many were dropped.
    pub fn revoke_user(&self, user_id: &str) -> usize {
        let mut dropped = 0;
        self.sessions.retain(|_, s| {
            let keep = s.user_id != user_id;
            if !keep {
                dropped += 1;
            }
            keep
        });
        dropped
    }

    pub fn prune(&self, now: i64) -> usize {
        let mut dropped = 0;
        self.sessions.retain(|_, s| {
            let live = s.expires_at > now;
            if !live {
                dropped += 1;
            }
            live
        });
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::UserStatus;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            username: id.to_string(),
            phone: String::new(),
            balance: 0.0,
            total_earnings: 0.0,
            total_withdrawals: 0.0,
            referral_code: id.to_string(),
            referred_by: None,
            status: UserStatus::Active,
            is_admin: false,
            active_plan_id: None,
            plan_expiry: None,
            last_spin_time: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_sessions_expire() {
        let store = SessionStore::new(60);
        let session = store.issue(&user("u1"), 1_000);

        assert_eq!(store.resolve(&session.token, 60_999), Some(session.clone()));
        assert_eq!(store.resolve(&session.token, 61_000), None);
        assert_eq!(store.resolve(&session.token, 1_000), None);
    }

    #[test]
    fn test_revoke_user_drops_all_sessions() {
        let store = SessionStore::new(60);
        let a = store.issue(&user("u1"), 0);
        let b = store.issue(&user("u1"), 0);
        let c = store.issue(&user("u2"), 0);

        assert_eq!(store.revoke_user("u1"), 2);
        assert!(store.resolve(&a.token, 1).is_none());
        assert!(store.resolve(&b.token, 1).is_none());
        assert!(store.resolve(&c.token, 1).is_some());
        assert!(store.revoke(&c.token));
        assert!(!store.revoke(&c.token));
        assert_eq!(store.revoke_user("u1"), 0);
    }

    #[test]
    fn test_issue_prunes_abandoned_sessions() {
        let store = SessionStore::new(60);
        store.issue(&user("u1"), 0);
        store.issue(&user("u2"), 0);
        let kept = store.issue(&user("u3"), 30_000);
        assert_eq!(store.len(), 3);

        let fresh = store.issue(&user("u4"), 60_000);
        assert_eq!(store.len(), 2);
        assert!(store.resolve(&kept.token, 60_000).is_some());
        assert!(store.resolve(&fresh.token, 60_000).is_some());
        assert_eq!(store.prune(200_000), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_revoke_user_counts_under_concurrent_issue() {
        let store = std::sync::Arc::new(SessionStore::new(60));
        for _ in 0..50 {
            store.issue(&user("target"), 0);
        }

        let issuer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    store.issue(&user("other"), 0);
                }
            })
        };
        let dropped = store.revoke_user("target");
        issuer.join().unwrap();

        assert_eq!(dropped, 50);
        assert_eq!(store.len(), 200);
    }
}
