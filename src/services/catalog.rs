use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::{
    models::{
        catalog::{default_plans, default_tasks, Plan, PlanInput, Task, TaskInput},
        settings::PublicSettings,
    },
    repositories::{Store, StoreError},
};

pub enum CatalogRequest {
    GetSettings {
        response: oneshot::Sender<Result<PublicSettings, ServiceError>>,
    },
    ListPlans {
        include_inactive: bool,
        response: oneshot::Sender<Result<Vec<Plan>, ServiceError>>,
    },
    ListTasks {
        include_inactive: bool,
        response: oneshot::Sender<Result<Vec<Task>, ServiceError>>,
    },
    CreatePlan {
        plan: PlanInput,
        response: oneshot::Sender<Result<Plan, ServiceError>>,
    },
    UpdatePlan {
        id: String,
        plan: PlanInput,
        response: oneshot::Sender<Result<Plan, ServiceError>>,
    },
    CreateTask {
        task: TaskInput,
        response: oneshot::Sender<Result<Task, ServiceError>>,
    },
    UpdateTask {
        id: String,
        task: TaskInput,
        response: oneshot::Sender<Result<Task, ServiceError>>,
    },
}

/// Writes the stock plans and tasks into an empty catalog.
pub async fn seed_defaults(store: &dyn Store) -> Result<(), StoreError> {
    if store.list_plans().await?.is_empty() {
        for plan in default_plans() {
            store.upsert_plan(plan).await?;
        }
        log::info!("Seeded default plans.");
    }
    if store.list_tasks().await?.is_empty() {
        for task in default_tasks() {
            store.upsert_task(task).await?;
        }
        log::info!("Seeded default tasks.");
    }
    Ok(())
}

#[derive(Clone)]
pub struct CatalogRequestHandler {
    store: Arc<dyn Store>,
}

impl CatalogRequestHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        CatalogRequestHandler { store }
    }

    async fn get_settings(&self) -> Result<PublicSettings, ServiceError> {
        Ok(self.store.get_settings().await?.into())
    }

    pub async fn list_plans(&self, include_inactive: bool) -> Result<Vec<Plan>, ServiceError> {
        let plans = self.store.list_plans().await?;
        Ok(plans
            .into_iter()
            .filter(|p| include_inactive || p.active)
            .collect())
    }

    pub async fn list_tasks(&self, include_inactive: bool) -> Result<Vec<Task>, ServiceError> {
        let tasks = self.store.list_tasks().await?;
        Ok(tasks
            .into_iter()
            .filter(|t| include_inactive || t.active)
            .collect())
    }

    pub async fn save_plan(&self, id: Option<String>, input: PlanInput) -> Result<Plan, ServiceError> {
        input.validate().map_err(ServiceError::Validation)?;

        let id = match id {
            Some(id) => {
                if self.store.get_plan(&id).await?.is_none() {
                    return Err(ServiceError::NotFound(format!("Plan {}", id)));
                }
                id
            }
            None => uuid::Uuid::new_v4().hyphenated().to_string(),
        };

        let plan = self.store.upsert_plan(input.into_plan(id)).await?;
        log::info!("Saved plan {} ({}).", plan.name, plan.id);
        Ok(plan)
    }

    pub async fn save_task(&self, id: Option<String>, input: TaskInput) -> Result<Task, ServiceError> {
        input.validate().map_err(ServiceError::Validation)?;

        let id = match id {
            Some(id) => {
                if self.store.get_task(&id).await?.is_none() {
                    return Err(ServiceError::NotFound(format!("Task {}", id)));
                }
                id
            }
            None => uuid::Uuid::new_v4().hyphenated().to_string(),
        };

        let task = self.store.upsert_task(input.into_task(id)).await?;
        log::info!("Saved task {} ({}).", task.title, task.id);
        Ok(task)
    }
}

#[async_trait]
impl RequestHandler<CatalogRequest> for CatalogRequestHandler {
    async fn handle_request(&self, request: CatalogRequest) {
        match request {
            CatalogRequest::GetSettings { response } => {
                let _ = response.send(self.get_settings().await);
            }
            CatalogRequest::ListPlans {
                include_inactive,
                response,
            } => {
                let _ = response.send(self.list_plans(include_inactive).await);
            }
            CatalogRequest::ListTasks {
                include_inactive,
                response,
            } => {
                let _ = response.send(self.list_tasks(include_inactive).await);
            }
            CatalogRequest::CreatePlan { plan, response } => {
                let _ = response.send(self.save_plan(None, plan).await);
            }
            CatalogRequest::UpdatePlan { id, plan, response } => {
                let _ = response.send(self.save_plan(Some(id), plan).await);
            }
            CatalogRequest::CreateTask { task, response } => {
                let _ = response.send(self.save_task(None, task).await);
            }
            CatalogRequest::UpdateTask { id, task, response } => {
                let _ = response.send(self.save_task(Some(id), task).await);
            }
        }
    }
}

pub struct CatalogService;

impl CatalogService {
    pub fn new() -> Self {
        CatalogService {}
    }
}

#[async_trait]
impl Service<CatalogRequest, CatalogRequestHandler> for CatalogService {}
