use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use super::{auth::AuthUser, call, respond, AppState};
use crate::models::users::{LoginRequest, NewUser};
use crate::services::users::UserRequest;

pub async fn register(
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::Register {
        user,
        response,
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::Login {
        request,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn logout(State(state): State<AppState>, user: AuthUser) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::Logout {
        token: user.token,
        response,
    })
    .await
    .map(|()| serde_json::json!({ "loggedOut": true }));

    respond(StatusCode::OK, result)
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::GetUser {
        id: user.user_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn my_transactions(State(state): State<AppState>, user: AuthUser) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::GetTransactions {
        user_id: user.user_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn my_referrals(State(state): State<AppState>, user: AuthUser) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::GetReferrals {
        user_id: user.user_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}
