use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ParseEnumError;

/// Sender id used for automatic replies.
pub const BOT_SENDER: &str = "bot";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Replied,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in-progress",
            TicketStatus::Replied => "replied",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "in-progress" => Ok(TicketStatus::InProgress),
            "replied" => Ok(TicketStatus::Replied),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(ParseEnumError {
                kind: "ticket status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: String,
    pub sender_id: String,
    pub message: String,
    pub created_at: i64,
    pub is_admin: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicket {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub category: String,
    pub message: String,
    pub status: TicketStatus,
    pub created_at: i64,
    pub replies: Vec<Reply>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewTicket {
    pub subject: String,
    pub category: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TicketMessage {
    pub message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TicketStatusUpdate {
    pub status: TicketStatus,
}
