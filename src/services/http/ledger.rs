use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use super::{auth::AuthUser, call, idempotency_key, respond, AppState};
use crate::models::transactions::{NewDeposit, NewWithdrawal};
use crate::services::ledger::LedgerRequest;

pub async fn purchase_plan(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.ledger_channel, |response| LedgerRequest::PurchasePlan {
        user_id: user.user_id,
        plan_id,
        idempotency_key: idempotency_key(&headers),
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn start_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.ledger_channel, |response| LedgerRequest::StartTask {
        user_id: user.user_id,
        task_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn complete_task(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.ledger_channel, |response| LedgerRequest::CompleteTask {
        user_id: user.user_id,
        task_id,
        idempotency_key: idempotency_key(&headers),
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn request_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(deposit): Json<NewDeposit>,
) -> impl IntoResponse {
    let result = call(&state.ledger_channel, |response| LedgerRequest::RequestDeposit {
        user_id: user.user_id,
        deposit,
        idempotency_key: idempotency_key(&headers),
        response,
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(withdrawal): Json<NewWithdrawal>,
) -> impl IntoResponse {
    let result = call(&state.ledger_channel, |response| {
        LedgerRequest::RequestWithdrawal {
            user_id: user.user_id,
            withdrawal,
            idempotency_key: idempotency_key(&headers),
            response,
        }
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn spin(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
) -> impl IntoResponse {
    let result = call(&state.ledger_channel, |response| LedgerRequest::Spin {
        user_id: user.user_id,
        idempotency_key: idempotency_key(&headers),
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}
