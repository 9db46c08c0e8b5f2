mod common;

use common::{Harness, T0};
use earn_ledger::{
    models::tickets::{NewTicket, TicketStatus, BOT_SENDER},
    services::ServiceError,
};

fn ticket(subject: &str, message: &str) -> NewTicket {
    NewTicket {
        subject: subject.to_string(),
        category: None,
        message: message.to_string(),
    }
}

#[tokio::test]
async fn test_new_ticket_gets_bot_reply() {
    let h = Harness::new().await;
    let user = h.register("ticketer", None).await;

    let created = h
        .support
        .create_ticket(&user.id, ticket("Deposit", "My deposit is not showing"), T0)
        .await
        .unwrap();

    assert_eq!(created.status, TicketStatus::Open);
    assert_eq!(created.category, "General");
    assert_eq!(created.replies.len(), 1);
    assert_eq!(created.replies[0].sender_id, BOT_SENDER);
    assert!(created.replies[0].message.starts_with("Deposits"));

    let empty = h.support.create_ticket(&user.id, ticket(" ", "help"), T0).await;
    assert!(matches!(empty, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn test_conversation_flow() {
    let h = Harness::new().await;
    let user = h.register("asker", None).await;
    let admin = h.admin().await;

    let created = h
        .support
        .create_ticket(&user.id, ticket("Help", "hello"), T0)
        .await
        .unwrap();

    let replied = h
        .support
        .admin_reply(&admin.id, &created.id, "We are checking.", T0 + 10)
        .await
        .unwrap();
    assert_eq!(replied.status, TicketStatus::Replied);
    assert!(replied.replies.last().unwrap().is_admin);

    let followed = h
        .support
        .add_message(&user.id, &created.id, "how do I spin?", T0 + 20)
        .await
        .unwrap();
    assert_eq!(followed.status, TicketStatus::Open);
    assert_eq!(followed.replies.len(), 4);
    let user_reply = &followed.replies[2];
    assert_eq!(user_reply.sender_id, user.id);
    assert!(!user_reply.is_admin);
    assert!(followed.replies[3].message.starts_with("The lucky wheel"));

    let closed = h
        .support
        .set_status(&created.id, TicketStatus::Closed)
        .await
        .unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);

    let late = h
        .support
        .add_message(&user.id, &created.id, "one more thing", T0 + 30)
        .await;
    assert!(matches!(late, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn test_tickets_are_private() {
    let h = Harness::new().await;
    let owner = h.register("owner", None).await;
    let other = h.register("snoop", None).await;

    let created = h
        .support
        .create_ticket(&owner.id, ticket("Withdraw", "withdraw pending"), T0)
        .await
        .unwrap();

    let result = h
        .support
        .add_message(&other.id, &created.id, "let me in", T0)
        .await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));

    assert_eq!(h.support.list_tickets(Some(&owner.id)).await.unwrap().len(), 1);
    assert!(h.support.list_tickets(Some(&other.id)).await.unwrap().is_empty());
    assert_eq!(h.support.list_tickets(None).await.unwrap().len(), 1);
}
