use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{auth::AdminUser, call, respond, AppState};
use crate::models::catalog::{PlanInput, TaskInput};
use crate::services::catalog::CatalogRequest;

pub async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    let result = call(&state.catalog_channel, |response| CatalogRequest::GetSettings {
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

async fn plans(state: AppState, include_inactive: bool) -> impl IntoResponse {
    let result = call(&state.catalog_channel, |response| CatalogRequest::ListPlans {
        include_inactive,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

async fn tasks(state: AppState, include_inactive: bool) -> impl IntoResponse {
    let result = call(&state.catalog_channel, |response| CatalogRequest::ListTasks {
        include_inactive,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn list_plans(State(state): State<AppState>) -> impl IntoResponse {
    plans(state, false).await
}

pub async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    tasks(state, false).await
}

pub async fn admin_list_plans(State(state): State<AppState>, _admin: AdminUser) -> impl IntoResponse {
    plans(state, true).await
}

pub async fn admin_list_tasks(State(state): State<AppState>, _admin: AdminUser) -> impl IntoResponse {
    tasks(state, true).await
}

pub async fn create_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(plan): Json<PlanInput>,
) -> impl IntoResponse {
    let result = call(&state.catalog_channel, |response| CatalogRequest::CreatePlan {
        plan,
        response,
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn update_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(plan): Json<PlanInput>,
) -> impl IntoResponse {
    let result = call(&state.catalog_channel, |response| CatalogRequest::UpdatePlan {
        id,
        plan,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn create_task(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(task): Json<TaskInput>,
) -> impl IntoResponse {
    let result = call(&state.catalog_channel, |response| CatalogRequest::CreateTask {
        task,
        response,
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn update_task(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(task): Json<TaskInput>,
) -> impl IntoResponse {
    let result = call(&state.catalog_channel, |response| CatalogRequest::UpdateTask {
        id,
        task,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}
