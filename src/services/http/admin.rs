use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{auth::AdminUser, call, respond, AppState};
use crate::models::{
    settings::AppSettings,
    transactions::{RejectRequest, TransactionFilter},
};
use crate::services::admin::AdminRequest;

#[derive(Deserialize)]
pub struct SearchQuery {
    search: Option<String>,
}

#[derive(Deserialize)]
pub struct BalanceAdjustment {
    amount: f64,
    note: Option<String>,
}

#[derive(Deserialize)]
pub struct PasswordReset {
    password: String,
}

/// The reject body is optional; anything that is not a JSON object with a
/// `reason` means no reason.
fn rejection_reason(body: &Bytes) -> Option<String> {
    serde_json::from_slice::<RejectRequest>(body)
        .ok()
        .and_then(|r| r.reason)
        .filter(|r| !r.trim().is_empty())
}

pub async fn stats(State(state): State<AppState>, _admin: AdminUser) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::GetStats { response }).await;

    respond(StatusCode::OK, result)
}

pub async fn search_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::SearchUsers {
        query: query.search,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

async fn set_banned(state: AppState, user_id: String, banned: bool) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::SetBanned {
        user_id,
        banned,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn ban_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    set_banned(state, user_id, true).await
}

pub async fn unban_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    set_banned(state, user_id, false).await
}

pub async fn adjust_balance(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    Json(adjustment): Json<BalanceAdjustment>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::AdjustBalance {
        admin_id: admin.user_id,
        user_id,
        amount: adjustment.amount,
        note: adjustment.note,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn impersonate(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::Impersonate {
        admin_id: admin.user_id,
        user_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn reset_password(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<String>,
    Json(reset): Json<PasswordReset>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::ResetPassword {
        user_id,
        password: reset.password,
        response,
    })
    .await
    .map(|()| serde_json::json!({ "reset": true }));

    respond(StatusCode::OK, result)
}

pub async fn list_transactions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<TransactionFilter>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::ListTransactions {
        filter,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

async fn resolve_deposit(
    state: AppState,
    transaction_id: String,
    approve: bool,
    reason: Option<String>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::ResolveDeposit {
        transaction_id,
        approve,
        reason,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn approve_deposit(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(transaction_id): Path<String>,
) -> impl IntoResponse {
    resolve_deposit(state, transaction_id, true, None).await
}

pub async fn reject_deposit(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(transaction_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let reason = rejection_reason(&body);
    resolve_deposit(state, transaction_id, false, reason).await
}

async fn resolve_withdrawal(
    state: AppState,
    transaction_id: String,
    pay: bool,
    reason: Option<String>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| {
        AdminRequest::ResolveWithdrawal {
            transaction_id,
            pay,
            reason,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn pay_withdrawal(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(transaction_id): Path<String>,
) -> impl IntoResponse {
    resolve_withdrawal(state, transaction_id, true, None).await
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(transaction_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let reason = rejection_reason(&body);
    resolve_withdrawal(state, transaction_id, false, reason).await
}

pub async fn update_settings(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(settings): Json<AppSettings>,
) -> impl IntoResponse {
    let result = call(&state.admin_channel, |response| AdminRequest::UpdateSettings {
        settings,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}
