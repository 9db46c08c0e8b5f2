use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{sessions::SessionStore, RequestHandler, Service, ServiceError};
use crate::{
    models::{
        referrals::ReferredUser,
        transactions::{Transaction, TransactionFilter},
        users::{
            normalize_username, Credential, LoginRequest, LoginResponse, NewUser, User,
            UserStatus,
        },
    },
    repositories::{Store, StoreError},
    settings::Auth,
    utils::{generate_salt, hash_password, now_millis},
};

pub const MIN_PASSWORD_LEN: usize = 6;

pub enum UserRequest {
    Register {
        user: NewUser,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    Login {
        request: LoginRequest,
        response: oneshot::Sender<Result<LoginResponse, ServiceError>>,
    },
    Logout {
        token: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    GetUser {
        id: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    GetTransactions {
        user_id: String,
        response: oneshot::Sender<Result<Vec<Transaction>, ServiceError>>,
    },
    GetReferrals {
        user_id: String,
        response: oneshot::Sender<Result<Vec<ReferredUser>, ServiceError>>,
    },
}

/// Loads `user_id`, refusing unknown and banned users.
pub(crate) async fn load_active_user(store: &dyn Store, user_id: &str) -> Result<User, ServiceError> {
    let user = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("User {}", user_id)))?;

    if !user.is_active() {
        return Err(ServiceError::Forbidden(
            "Your account has been banned.".to_string(),
        ));
    }
    Ok(user)
}

pub(crate) fn validate_password(password: &str) -> Result<(), ServiceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub(crate) fn new_credential(user_id: &str, password: &str) -> Credential {
    let salt = generate_salt();
    Credential {
        user_id: user_id.to_string(),
        password_hash: hash_password(&salt, password),
        salt,
    }
}

fn new_account(
    username: &str,
    phone: &str,
    password: &str,
    referred_by: Option<String>,
    is_admin: bool,
    now: i64,
) -> (User, Credential) {
    let id = uuid::Uuid::new_v4().hyphenated().to_string();
    let user = User {
        id: id.clone(),
        username: username.to_string(),
        phone: phone.to_string(),
        balance: 0.0,
        total_earnings: 0.0,
        total_withdrawals: 0.0,
        referral_code: normalize_username(username),
        referred_by,
        status: UserStatus::Active,
        is_admin,
        active_plan_id: None,
        plan_expiry: None,
        last_spin_time: None,
        created_at: now,
    };
    let credential = new_credential(&id, password);
    (user, credential)
}

/// Creates the configured administrator unless an account with that
/// username already exists.
pub async fn ensure_admin(store: &dyn Store, auth: &Auth) -> Result<(), StoreError> {
    let key = normalize_username(&auth.admin_username);
    if let Some(existing) = store.get_user_by_key(&key).await? {
        if !existing.is_admin {
            log::warn!(
                "Configured admin username {} belongs to a regular user.",
                auth.admin_username
            );
        }
        return Ok(());
    }

    let (user, credential) = new_account(
        auth.admin_username.trim(),
        auth.admin_phone.trim(),
        &auth.admin_password,
        None,
        true,
        now_millis(),
    );
    let admin = store.insert_user(user, credential).await?;
    log::info!("Created administrator {}.", admin.username);
    Ok(())
}

#[derive(Clone)]
pub struct UserRequestHandler {
    store: Arc<dyn Store>,
    sessions: Arc<SessionStore>,
}

impl UserRequestHandler {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<SessionStore>) -> Self {
        UserRequestHandler { store, sessions }
    }

    pub async fn register(&self, new_user: NewUser, now: i64) -> Result<User, ServiceError> {
        if self.store.get_settings().await?.maintenance {
            return Err(ServiceError::Unavailable(
                "The site is under maintenance. Please try again later.".to_string(),
            ));
        }

        let username = new_user.username.trim();
        let length = username.chars().count();
        if !(3..=32).contains(&length) || normalize_username(username).is_empty() {
            return Err(ServiceError::Validation(
                "Username must be 3 to 32 characters".to_string(),
            ));
        }
        let phone = new_user.phone.trim();
        if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit() || c == '+') {
            return Err(ServiceError::Validation("Invalid phone number".to_string()));
        }
        validate_password(&new_user.password)?;

        let key = normalize_username(username);
        if self.store.get_user_by_key(&key).await?.is_some() {
            return Err(ServiceError::Conflict("Username already exists".to_string()));
        }
        if self.store.get_user_by_phone(phone).await?.is_some() {
            return Err(ServiceError::Conflict(
                "Phone number already registered".to_string(),
            ));
        }

        let referred_by = match new_user
            .referral_code
            .as_deref()
            .map(normalize_username)
            .filter(|code| !code.is_empty())
        {
            Some(code) => match self.store.get_user_by_key(&code).await? {
                Some(referrer) => Some(referrer.referral_code),
                None => {
                    log::warn!("Ignoring unknown referral code {} for {}.", code, username);
                    None
                }
            },
            None => None,
        };

        let (user, credential) =
            new_account(username, phone, &new_user.password, referred_by, false, now);
        let user = self.store.insert_user(user, credential).await?;
        log::info!("Registered user {} ({}).", user.username, user.id);

        Ok(user)
    }

    pub async fn login(&self, request: LoginRequest, now: i64) -> Result<LoginResponse, ServiceError> {
        let invalid = || ServiceError::Unauthorized("Invalid username or password".to_string());

        let user = self
            .store
            .get_user_by_key(&normalize_username(&request.username))
            .await?
            .ok_or_else(invalid)?;
        let credential = self
            .store
            .get_credential(&user.id)
            .await?
            .ok_or_else(invalid)?;

        if hash_password(&credential.salt, &request.password) != credential.password_hash {
            log::debug!("Failed login for {}.", user.username);
            return Err(invalid());
        }
        if !user.is_active() {
            return Err(ServiceError::Forbidden(
                "Your account has been banned.".to_string(),
            ));
        }

        let session = self.sessions.issue(&user, now);
        Ok(LoginResponse {
            token: session.token,
            expires_at: session.expires_at,
            user,
        })
    }

    fn logout(&self, token: &str) -> Result<(), ServiceError> {
        if !self.sessions.revoke(token) {
            return Err(ServiceError::Unauthorized("Session not found".to_string()));
        }
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<User, ServiceError> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", id)))
    }

    pub async fn get_transactions(&self, user_id: &str) -> Result<Vec<Transaction>, ServiceError> {
        let filter = TransactionFilter {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        };
        Ok(self.store.list_transactions(&filter).await?)
    }

    pub async fn get_referrals(
        &self,
        user_id: &str,
        now: i64,
    ) -> Result<Vec<ReferredUser>, ServiceError> {
        let user = self.get_user(user_id).await?;
        let referred = self.store.list_referred_users(&user.referral_code).await?;

        Ok(referred
            .into_iter()
            .map(|u| ReferredUser {
                has_active_plan: u.has_active_plan(now),
                username: u.username,
                created_at: u.created_at,
            })
            .collect())
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::Register { user, response } => {
                let result = self.register(user, now_millis()).await;
                let _ = response.send(result);
            }
            UserRequest::Login { request, response } => {
                let result = self.login(request, now_millis()).await;
                let _ = response.send(result);
            }
            UserRequest::Logout { token, response } => {
                let _ = response.send(self.logout(&token));
            }
            UserRequest::GetUser { id, response } => {
                let user = self.get_user(&id).await;
                let _ = response.send(user);
            }
            UserRequest::GetTransactions { user_id, response } => {
                let transactions = self.get_transactions(&user_id).await;
                let _ = response.send(transactions);
            }
            UserRequest::GetReferrals { user_id, response } => {
                let referrals = self.get_referrals(&user_id, now_millis()).await;
                let _ = response.send(referrals);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}
