use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{users::load_active_user, RequestHandler, Service, ServiceError};
use crate::{
    models::tickets::{NewTicket, Reply, SupportTicket, TicketStatus, BOT_SENDER},
    repositories::Store,
    utils::now_millis,
};

const DEFAULT_CATEGORY: &str = "General";

const GENERIC_REPLY: &str = "আমাদের সাপোর্ট টিমে মেসেজ দেয়ার জন্য ধন্যবাদ। একজন এডমিন শীঘ্রই আপনার সাথে যোগাযোগ করবেন। \
     Thank you for contacting support. An admin will contact you soon.";

/// Checked in order; the first group with a matching keyword wins.
const CANNED_REPLIES: &[(&[&str], &str)] = &[
    (
        &["deposit", "ডিপোজিট", "জমা"],
        "Deposits are reviewed by an admin, usually within a few hours. Make sure the \
         Transaction ID you entered matches your bKash/Nagad receipt.",
    ),
    (
        &["withdraw", "উইথড্র", "উত্তোলন"],
        "Withdrawals are paid manually after review. The amount is held from your balance \
         until the request is paid or rejected.",
    ),
    (
        &["task", "টাস্ক", "কাজ"],
        "Each task must be watched for its full time before it can be completed. Your plan \
         decides how many tasks you can do per day.",
    ),
    (
        &["plan", "প্ল্যান", "প্যাকেজ"],
        "Plans are bought from your balance and stay active for their validity period. \
         Deposit first if your balance is too low.",
    ),
    (
        &["refer", "রেফার"],
        "You earn a bonus whenever people you referred complete tasks. Share your referral \
         code from the profile page.",
    ),
    (
        &["spin", "স্পিন"],
        "The lucky wheel can be spun once every 24 hours while you have an active plan.",
    ),
    (
        &["password", "login", "পাসওয়ার্ড", "লগইন"],
        "If you cannot log in, an admin can reset your password. Please include your \
         registered phone number in this ticket.",
    ),
];

/// Canned answer for a user message, matched on lowercased keywords.
pub fn auto_reply(message: &str) -> &'static str {
    let message = message.to_lowercase();
    CANNED_REPLIES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| message.contains(k)))
        .map(|(_, reply)| *reply)
        .unwrap_or(GENERIC_REPLY)
}

fn reply(sender_id: &str, message: &str, is_admin: bool, created_at: i64) -> Reply {
    Reply {
        id: uuid::Uuid::new_v4().hyphenated().to_string(),
        sender_id: sender_id.to_string(),
        message: message.to_string(),
        created_at,
        is_admin,
    }
}

fn bot_reply(to: &str, now: i64) -> Reply {
    reply(BOT_SENDER, auto_reply(to), true, now + 1)
}

fn non_empty(value: &str, what: &str) -> Result<String, ServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::Validation(format!("{} is required", what)));
    }
    Ok(value.to_string())
}

pub enum SupportRequest {
    CreateTicket {
        user_id: String,
        ticket: NewTicket,
        response: oneshot::Sender<Result<SupportTicket, ServiceError>>,
    },
    AddMessage {
        user_id: String,
        ticket_id: String,
        message: String,
        response: oneshot::Sender<Result<SupportTicket, ServiceError>>,
    },
    ListTickets {
        user_id: Option<String>,
        response: oneshot::Sender<Result<Vec<SupportTicket>, ServiceError>>,
    },
    AdminReply {
        admin_id: String,
        ticket_id: String,
        message: String,
        response: oneshot::Sender<Result<SupportTicket, ServiceError>>,
    },
    SetStatus {
        ticket_id: String,
        status: TicketStatus,
        response: oneshot::Sender<Result<SupportTicket, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct SupportRequestHandler {
    store: Arc<dyn Store>,
}

impl SupportRequestHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        SupportRequestHandler { store }
    }

    async fn ensure_open(&self) -> Result<(), ServiceError> {
        if self.store.get_settings().await?.maintenance {
            return Err(ServiceError::Unavailable(
                "The site is under maintenance. Please try again later.".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn create_ticket(
        &self,
        user_id: &str,
        ticket: NewTicket,
        now: i64,
    ) -> Result<SupportTicket, ServiceError> {
        self.ensure_open().await?;
        load_active_user(self.store.as_ref(), user_id).await?;

        let subject = non_empty(&ticket.subject, "Subject")?;
        let message = non_empty(&ticket.message, "Message")?;
        let category = ticket
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let ticket = SupportTicket {
            id: uuid::Uuid::new_v4().hyphenated().to_string(),
            user_id: user_id.to_string(),
            subject,
            category,
            replies: vec![bot_reply(&message, now)],
            message,
            status: TicketStatus::Open,
            created_at: now,
        };

        let ticket = self.store.insert_ticket(ticket).await?;
        log::info!("User {} opened ticket {}.", user_id, ticket.id);
        Ok(ticket)
    }

    /// Only the owner may follow up; anyone else gets `NotFound`.
    pub async fn add_message(
        &self,
        user_id: &str,
        ticket_id: &str,
        message: &str,
        now: i64,
    ) -> Result<SupportTicket, ServiceError> {
        self.ensure_open().await?;
        load_active_user(self.store.as_ref(), user_id).await?;
        let message = non_empty(message, "Message")?;

        let ticket = match self.store.get_ticket(ticket_id).await? {
            Some(ticket) if ticket.user_id == user_id => ticket,
            _ => return Err(ServiceError::NotFound(format!("Ticket {}", ticket_id))),
        };
        if ticket.status == TicketStatus::Closed {
            return Err(ServiceError::Conflict("Ticket is closed".to_string()));
        }

        let replies = vec![reply(user_id, &message, false, now), bot_reply(&message, now)];
        Ok(self
            .store
            .append_replies(&ticket.id, replies, TicketStatus::Open)
            .await?)
    }

    pub async fn list_tickets(&self, user_id: Option<&str>) -> Result<Vec<SupportTicket>, ServiceError> {
        Ok(self.store.list_tickets(user_id).await?)
    }

    pub async fn admin_reply(
        &self,
        admin_id: &str,
        ticket_id: &str,
        message: &str,
        now: i64,
    ) -> Result<SupportTicket, ServiceError> {
        let message = non_empty(message, "Reply")?;
        if self.store.get_ticket(ticket_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("Ticket {}", ticket_id)));
        }

        let ticket = self
            .store
            .append_replies(
                ticket_id,
                vec![reply(admin_id, &message, true, now)],
                TicketStatus::Replied,
            )
            .await?;
        log::info!("Admin {} replied to ticket {}.", admin_id, ticket_id);
        Ok(ticket)
    }

    pub async fn set_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
    ) -> Result<SupportTicket, ServiceError> {
        Ok(self.store.set_ticket_status(ticket_id, status).await?)
    }
}

#[async_trait]
impl RequestHandler<SupportRequest> for SupportRequestHandler {
    async fn handle_request(&self, request: SupportRequest) {
        let now = now_millis();

        match request {
            SupportRequest::CreateTicket {
                user_id,
                ticket,
                response,
            } => {
                let _ = response.send(self.create_ticket(&user_id, ticket, now).await);
            }
            SupportRequest::AddMessage {
                user_id,
                ticket_id,
                message,
                response,
            } => {
                let result = self.add_message(&user_id, &ticket_id, &message, now).await;
                let _ = response.send(result);
            }
            SupportRequest::ListTickets { user_id, response } => {
                let _ = response.send(self.list_tickets(user_id.as_deref()).await);
            }
            SupportRequest::AdminReply {
                admin_id,
                ticket_id,
                message,
                response,
            } => {
                let result = self.admin_reply(&admin_id, &ticket_id, &message, now).await;
                let _ = response.send(result);
            }
            SupportRequest::SetStatus {
                ticket_id,
                status,
                response,
            } => {
                let _ = response.send(self.set_status(&ticket_id, status).await);
            }
        }
    }
}

pub struct SupportService;

impl SupportService {
    pub fn new() -> Self {
        SupportService {}
    }
}

#[async_trait]
impl Service<SupportRequest, SupportRequestHandler> for SupportService {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_reply_matches_keywords() {
        assert!(auto_reply("My DEPOSIT is missing").starts_with("Deposits"));
        assert!(auto_reply("আমার উত্তোলন কবে আসবে?").starts_with("Withdrawals"));
        assert!(auto_reply("forgot my password").contains("reset your password"));
        assert!(auto_reply("স্পিন হচ্ছে না").starts_with("The lucky wheel"));
        assert_eq!(auto_reply("hello"), GENERIC_REPLY);
    }

    #[test]
    fn test_earlier_groups_win() {
        // Mentions both a deposit and a plan.
        assert!(auto_reply("deposit to buy a plan").starts_with("Deposits"));
    }
}
