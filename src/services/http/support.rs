use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{
    auth::{AdminUser, AuthUser},
    call, respond, AppState,
};
use crate::models::tickets::{NewTicket, TicketMessage, TicketStatusUpdate};
use crate::services::support::SupportRequest;

pub async fn create_ticket(
    State(state): State<AppState>,
    user: AuthUser,
    Json(ticket): Json<NewTicket>,
) -> impl IntoResponse {
    let result = call(&state.support_channel, |response| SupportRequest::CreateTicket {
        user_id: user.user_id,
        ticket,
        response,
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn my_tickets(State(state): State<AppState>, user: AuthUser) -> impl IntoResponse {
    let result = call(&state.support_channel, |response| SupportRequest::ListTickets {
        user_id: Some(user.user_id),
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn add_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(ticket_id): Path<String>,
    Json(body): Json<TicketMessage>,
) -> impl IntoResponse {
    let result = call(&state.support_channel, |response| SupportRequest::AddMessage {
        user_id: user.user_id,
        ticket_id,
        message: body.message,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn all_tickets(State(state): State<AppState>, _admin: AdminUser) -> impl IntoResponse {
    let result = call(&state.support_channel, |response| SupportRequest::ListTickets {
        user_id: None,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn admin_reply(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(ticket_id): Path<String>,
    Json(body): Json<TicketMessage>,
) -> impl IntoResponse {
    let result = call(&state.support_channel, |response| SupportRequest::AdminReply {
        admin_id: admin.user_id,
        ticket_id,
        message: body.message,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn set_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(ticket_id): Path<String>,
    Json(update): Json<TicketStatusUpdate>,
) -> impl IntoResponse {
    let result = call(&state.support_channel, |response| SupportRequest::SetStatus {
        ticket_id,
        status: update.status,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}
