use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub daily_tasks: u32,
    /// Advertised on the plan card; task rewards are what actually accrue.
    pub daily_earning: f64,
    pub validity_days: u32,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub amount: f64,
    /// Seconds the ad must be watched before completion is accepted.
    pub time_required: u32,
    pub link: String,
    pub category: String,
    pub image_url: Option<String>,
    pub active: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    pub name: String,
    pub price: f64,
    pub daily_tasks: u32,
    pub daily_earning: f64,
    pub validity_days: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount: f64,
    pub time_required: u32,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub category: String,
    pub image_url: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl PlanInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Plan name is required".to_string());
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err("Plan price must be zero or more".to_string());
        }
        if !self.daily_earning.is_finite() || self.daily_earning < 0.0 {
            return Err("Daily earning must be zero or more".to_string());
        }
        if self.validity_days == 0 {
            return Err("Validity must be at least one day".to_string());
        }
        Ok(())
    }

    pub fn into_plan(self, id: String) -> Plan {
        Plan {
            id,
            name: self.name.trim().to_string(),
            price: self.price,
            daily_tasks: self.daily_tasks,
            daily_earning: self.daily_earning,
            validity_days: self.validity_days,
            active: self.active,
        }
    }
}

impl TaskInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Task title is required".to_string());
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err("Task reward must be positive".to_string());
        }
        if self.time_required == 0 {
            return Err("Task time must be at least one second".to_string());
        }
        Ok(())
    }

    pub fn into_task(self, id: String) -> Task {
        Task {
            id,
            title: self.title.trim().to_string(),
            description: self.description,
            amount: self.amount,
            time_required: self.time_required,
            link: self.link,
            category: self.category,
            image_url: self.image_url,
            active: self.active,
        }
    }
}

pub fn default_plans() -> Vec<Plan> {
    let plan = |id: &str, name: &str, price, daily_tasks, daily_earning, validity_days| Plan {
        id: id.to_string(),
        name: name.to_string(),
        price,
        daily_tasks,
        daily_earning,
        validity_days,
        active: true,
    };

    vec![
        plan("p1", "Free Plan", 0.0, 1, 2.0, 365),
        plan("p2", "Silver Plan", 500.0, 5, 25.0, 30),
        plan("p3", "Gold Plan", 1000.0, 10, 60.0, 30),
        plan("p4", "Diamond Plan", 2000.0, 25, 150.0, 30),
    ]
}

pub fn default_tasks() -> Vec<Task> {
    (1..=3)
        .map(|n| Task {
            id: n.to_string(),
            title: format!("Watch Video Ad {}", n),
            description: "Watch a 30-second video to earn.".to_string(),
            amount: 5.0,
            time_required: 30,
            link: "#".to_string(),
            category: "Video".to_string(),
            image_url: None,
            active: true,
        })
        .collect()
}
