mod common;

use std::sync::Arc;

use common::{Harness, HOUR, T0};
use earn_ledger::{
    models::{
        settings::AppSettings,
        transactions::{
            NewDeposit, NewWithdrawal, PaymentMethod, TransactionFilter, TransactionKind,
            TransactionStatus,
        },
        DAY_MS,
    },
    services::{ledger::wheel::FixedDraw, ServiceError},
};

const TASK_MS: i64 = 30_000;

fn withdrawal(amount: f64) -> NewWithdrawal {
    NewWithdrawal {
        amount,
        method: PaymentMethod::Nagad,
        account_number: "01822222222".to_string(),
    }
}

async fn complete_task(h: &Harness, user_id: &str, task_id: &str, at: i64) {
    h.ledger.start_task(user_id, task_id, at).await.unwrap();
    h.ledger
        .complete_task(user_id, task_id, None, at + TASK_MS)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_plan_purchase_debits_price_and_sets_expiry() {
    let h = Harness::new().await;
    let user = h.register("alice", None).await;
    h.fund(&user.id, 600.0).await;

    let purchase = h.ledger.purchase_plan(&user.id, "p2", None, T0).await.unwrap();

    assert_eq!(purchase.user.balance, 100.0);
    assert_eq!(purchase.user.active_plan_id.as_deref(), Some("p2"));
    assert_eq!(purchase.user.plan_expiry, Some(T0 + 30 * DAY_MS));
    assert_eq!(purchase.transaction.kind, TransactionKind::PlanPurchase);
    assert_eq!(purchase.transaction.amount, 500.0);

    let again = h.ledger.purchase_plan(&user.id, "p2", None, T0 + HOUR).await;
    assert!(matches!(again, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn test_plan_purchase_without_funds_changes_nothing() {
    let h = Harness::new().await;
    let user = h.register("bob_poor", None).await;
    h.fund(&user.id, 600.0).await;

    let result = h.ledger.purchase_plan(&user.id, "p3", None, T0).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    let after = h.user(&user.id).await;
    assert_eq!(after.balance, 600.0);
    assert_eq!(after.active_plan_id, None);
    let purchases = h
        .store
        .count_transactions_since(&user.id, TransactionKind::PlanPurchase, 0)
        .await
        .unwrap();
    assert_eq!(purchases, 0);
}

#[tokio::test]
async fn test_task_requires_plan_and_elapsed_timer() {
    let h = Harness::new().await;
    let user = h.register("carol", None).await;

    let result = h.ledger.start_task(&user.id, "1", T0).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    h.ledger.purchase_plan(&user.id, "p1", None, T0).await.unwrap();

    let result = h.ledger.complete_task(&user.id, "1", None, T0).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    let active = h.ledger.start_task(&user.id, "1", T0).await.unwrap();
    assert_eq!(active.ready_at, T0 + TASK_MS);

    let early = h.ledger.complete_task(&user.id, "1", None, T0 + 10_000).await;
    assert!(matches!(early, Err(ServiceError::Validation(_))));
    assert_eq!(h.balance(&user.id).await, 0.0);

    let done = h
        .ledger
        .complete_task(&user.id, "1", None, T0 + TASK_MS)
        .await
        .unwrap();
    assert_eq!(done.transaction.amount, 5.0);
    assert_eq!(done.user.balance, 5.0);
    assert_eq!(done.user.total_earnings, 5.0);

    let twice = h.ledger.complete_task(&user.id, "1", None, T0 + TASK_MS).await;
    assert!(twice.is_err());
    assert_eq!(h.balance(&user.id).await, 5.0);
}

#[tokio::test]
async fn test_daily_task_quota_resets_at_utc_midnight() {
    let h = Harness::new().await;
    let user = h.member("dave", None).await;

    complete_task(&h, &user.id, "1", T0).await;

    let result = h.ledger.start_task(&user.id, "2", T0 + HOUR).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    // Next UTC day.
    complete_task(&h, &user.id, "2", T0 + 14 * HOUR + 1).await;
    assert_eq!(h.balance(&user.id).await, 10.0);
}

#[tokio::test]
async fn test_starting_another_task_abandons_the_first() {
    let h = Harness::new().await;
    let user = h.member("erin", None).await;

    h.ledger.start_task(&user.id, "1", T0).await.unwrap();
    h.ledger.start_task(&user.id, "2", T0 + 1_000).await.unwrap();

    let result = h.ledger.complete_task(&user.id, "1", None, T0 + HOUR).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
    h.ledger
        .complete_task(&user.id, "2", None, T0 + HOUR)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_referral_bonuses_stop_at_configured_depth() {
    let h = Harness::new().await;
    let top = h.member("level_four", None).await;
    let grand_grand = h.member("level_three", Some("level_four")).await;
    let grand = h.member("level_two", Some("level_three")).await;
    let parent = h.member("level_one", Some("level_two")).await;
    let earner = h.member("earner", Some("LEVEL_ONE")).await;
    assert_eq!(earner.referred_by.as_deref(), Some("level_one"));

    let done = h
        .ledger
        .complete_task(&earner.id, "1", None, T0)
        .await;
    assert!(done.is_err());

    h.ledger.start_task(&earner.id, "1", T0).await.unwrap();
    let done = h
        .ledger
        .complete_task(&earner.id, "1", None, T0 + TASK_MS)
        .await
        .unwrap();

    let credited: Vec<(u32, f64)> = done
        .referral_credits
        .iter()
        .map(|c| (c.level, c.amount))
        .collect();
    assert_eq!(credited, vec![(1, 0.5), (2, 0.25), (3, 0.1)]);

    assert_eq!(h.balance(&earner.id).await, 5.0);
    assert_eq!(h.balance(&parent.id).await, 0.5);
    assert_eq!(h.user(&parent.id).await.total_earnings, 0.5);
    assert_eq!(h.balance(&grand.id).await, 0.25);
    assert_eq!(h.balance(&grand_grand.id).await, 0.1);
    assert_eq!(h.balance(&top.id).await, 0.0);

    let referral_entries = h
        .store
        .list_transactions(&TransactionFilter {
            kind: Some(TransactionKind::Referral),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(referral_entries.len(), 3);
    assert!(referral_entries
        .iter()
        .all(|t| t.reference_id.as_deref() == Some(done.transaction.id.as_str())));
}

#[tokio::test]
async fn test_concurrent_referral_credits_are_not_lost() {
    let h = Arc::new(Harness::new().await);
    let referrer = h.member("referrer", None).await;

    let mut earners = Vec::new();
    for i in 0..10 {
        let earner = h.member(&format!("earner{}", i), Some("referrer")).await;
        h.ledger.start_task(&earner.id, "1", T0).await.unwrap();
        earners.push(earner);
    }

    let handles: Vec<_> = earners
        .into_iter()
        .map(|earner| {
            let h = h.clone();
            tokio::spawn(async move {
                h.ledger
                    .complete_task(&earner.id, "1", None, T0 + TASK_MS)
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let referrer = h.user(&referrer.id).await;
    assert_eq!(referrer.balance, 5.0);
    assert_eq!(referrer.total_earnings, 5.0);
}

#[tokio::test]
async fn test_spin_reward_is_clamped_and_cooled_down() {
    let h = Harness::with_draw(Arc::new(FixedDraw(5))).await;
    let user = h.member("spinner", None).await;

    let outcome = h.ledger.spin(&user.id, None, T0).await.unwrap();
    assert_eq!(outcome.index, 5);
    assert_eq!(outcome.reward, 10.0);
    assert_eq!(outcome.next_spin_at, T0 + DAY_MS);
    assert_eq!(outcome.user.balance, 10.0);
    assert_eq!(outcome.user.last_spin_time, Some(T0));

    let early = h.ledger.spin(&user.id, None, T0 + DAY_MS - 1).await;
    assert!(matches!(early, Err(ServiceError::Validation(_))));
    assert_eq!(h.balance(&user.id).await, 10.0);

    h.ledger.spin(&user.id, None, T0 + DAY_MS).await.unwrap();
    assert_eq!(h.balance(&user.id).await, 20.0);
}

#[tokio::test]
async fn test_spin_needs_plan_and_enabled_wheel() {
    let h = Harness::with_draw(Arc::new(FixedDraw(0))).await;
    let user = h.register("planless", None).await;

    let result = h.ledger.spin(&user.id, None, T0).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    let member = h.member("member", None).await;
    let settings = AppSettings {
        spin_enabled: false,
        ..AppSettings::default()
    };
    h.admin.update_settings(settings).await.unwrap();

    let result = h.ledger.spin(&member.id, None, T0).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
    assert_eq!(h.balance(&member.id).await, 0.0);
}

#[tokio::test]
async fn test_concurrent_spins_credit_once() {
    let h = Arc::new(Harness::with_draw(Arc::new(FixedDraw(1))).await);
    let user = h.member("eager", None).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            let user_id = user.id.clone();
            tokio::spawn(async move { h.ledger.spin(&user_id, None, T0).await })
        })
        .collect();

    let mut credited = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            credited += 1;
        }
    }

    assert_eq!(credited, 1);
    assert_eq!(h.balance(&user.id).await, 2.0);
}

#[tokio::test]
async fn test_deposit_limits() {
    let h = Harness::new().await;
    let user = h.register("depositor", None).await;

    for amount in [50.0, 30_000.0, f64::NAN] {
        let result = h
            .ledger
            .request_deposit(
                &user.id,
                NewDeposit {
                    amount,
                    method: PaymentMethod::Bkash,
                    trx_id: "TRX1".to_string(),
                    account_number: "017".to_string(),
                },
                None,
                T0,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    let result = h
        .ledger
        .request_deposit(
            &user.id,
            NewDeposit {
                amount: 500.0,
                method: PaymentMethod::Bkash,
                trx_id: "  ".to_string(),
                account_number: "017".to_string(),
            },
            None,
            T0,
        )
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn test_deposit_approval_credits_once() {
    let h = Harness::new().await;
    let user = h.register("frank", None).await;

    let deposit = h
        .ledger
        .request_deposit(
            &user.id,
            NewDeposit {
                amount: 300.0,
                method: PaymentMethod::Bkash,
                trx_id: "8N7A6B5C".to_string(),
                account_number: "01733333333".to_string(),
            },
            None,
            T0,
        )
        .await
        .unwrap();
    assert_eq!(deposit.status, TransactionStatus::Pending);
    assert_eq!(h.balance(&user.id).await, 0.0);

    let approved = h.admin.resolve_deposit(&deposit.id, true, None).await.unwrap();
    assert_eq!(approved.status, TransactionStatus::Approved);

    let again = h.admin.resolve_deposit(&deposit.id, true, None).await;
    assert!(matches!(again, Err(ServiceError::Conflict(_))));
    let reject = h.admin.resolve_deposit(&deposit.id, false, None).await;
    assert!(matches!(reject, Err(ServiceError::Conflict(_))));

    assert_eq!(h.balance(&user.id).await, 300.0);
    // Deposits are not earnings.
    assert_eq!(h.user(&user.id).await.total_earnings, 0.0);
}

#[tokio::test]
async fn test_rejected_deposit_leaves_balance() {
    let h = Harness::new().await;
    let user = h.register("grace", None).await;

    let deposit = h
        .ledger
        .request_deposit(
            &user.id,
            NewDeposit {
                amount: 300.0,
                method: PaymentMethod::Nagad,
                trx_id: "FAKE".to_string(),
                account_number: "018".to_string(),
            },
            None,
            T0,
        )
        .await
        .unwrap();

    let rejected = h
        .admin
        .resolve_deposit(&deposit.id, false, Some("Unknown transaction ID".to_string()))
        .await
        .unwrap();
    assert_eq!(rejected.status, TransactionStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Unknown transaction ID"));
    assert_eq!(h.balance(&user.id).await, 0.0);

    let wrong_gate = h.admin.resolve_withdrawal(&deposit.id, true, None).await;
    assert!(matches!(wrong_gate, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn test_withdrawal_hold_refund_and_payout() {
    let h = Harness::new().await;
    let user = h.register("heidi", None).await;
    h.fund(&user.id, 1_000.0).await;

    let request = h
        .ledger
        .request_withdrawal(&user.id, withdrawal(200.0), None, T0)
        .await
        .unwrap();
    assert_eq!(h.balance(&user.id).await, 800.0);

    h.admin
        .resolve_withdrawal(&request.id, false, Some("Wrong number".to_string()))
        .await
        .unwrap();
    assert_eq!(h.balance(&user.id).await, 1_000.0);

    let again = h.admin.resolve_withdrawal(&request.id, false, None).await;
    assert!(matches!(again, Err(ServiceError::Conflict(_))));
    assert_eq!(h.balance(&user.id).await, 1_000.0);

    let request = h
        .ledger
        .request_withdrawal(&user.id, withdrawal(200.0), None, T0)
        .await
        .unwrap();
    let paid = h.admin.resolve_withdrawal(&request.id, true, None).await.unwrap();
    assert_eq!(paid.status, TransactionStatus::Paid);

    let user = h.user(&user.id).await;
    assert_eq!(user.balance, 800.0);
    assert_eq!(user.total_withdrawals, 200.0);
}

#[tokio::test]
async fn test_withdrawal_limits() {
    let h = Harness::new().await;
    let user = h.register("ivan", None).await;
    h.fund(&user.id, 6_000.0).await;

    let small = h.ledger.request_withdrawal(&user.id, withdrawal(50.0), None, T0).await;
    assert!(matches!(small, Err(ServiceError::Validation(_))));

    h.ledger
        .request_withdrawal(&user.id, withdrawal(3_000.0), None, T0)
        .await
        .unwrap();
    let over = h
        .ledger
        .request_withdrawal(&user.id, withdrawal(2_500.0), None, T0 + HOUR)
        .await;
    assert!(matches!(over, Err(ServiceError::Validation(_))));
    assert_eq!(h.balance(&user.id).await, 3_000.0);

    let poor = h.register("judy", None).await;
    let broke = h.ledger.request_withdrawal(&poor.id, withdrawal(100.0), None, T0).await;
    assert!(matches!(broke, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn test_idempotency_key_replays_original() {
    let h = Harness::new().await;
    let user = h.register("kate", None).await;
    let deposit = || NewDeposit {
        amount: 150.0,
        method: PaymentMethod::Bkash,
        trx_id: "REPLAY1".to_string(),
        account_number: "017".to_string(),
    };

    let first = h
        .ledger
        .request_deposit(&user.id, deposit(), Some("key-1".to_string()), T0)
        .await
        .unwrap();
    let second = h
        .ledger
        .request_deposit(&user.id, deposit(), Some("key-1".to_string()), T0 + 5)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    let pending = h
        .store
        .list_transactions(&TransactionFilter {
            user_id: Some(user.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    h.fund(&user.id, 500.0).await;
    let reused = h
        .ledger
        .request_withdrawal(&user.id, withdrawal(100.0), Some("key-1".to_string()), T0)
        .await;
    assert!(matches!(reused, Err(ServiceError::Conflict(_))));
    assert_eq!(h.balance(&user.id).await, 500.0);
}

#[tokio::test]
async fn test_repeated_plan_purchase_replays_original() {
    let h = Harness::new().await;
    let user = h.register("mona", None).await;
    h.fund(&user.id, 600.0).await;
    let key = || Some("buy-silver".to_string());

    let first = h.ledger.purchase_plan(&user.id, "p2", key(), T0).await.unwrap();
    let second = h
        .ledger
        .purchase_plan(&user.id, "p2", key(), T0 + 5)
        .await
        .unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.transaction.id, first.transaction.id);
    assert_eq!(second.user.balance, 100.0);
    assert_eq!(h.balance(&user.id).await, 100.0);
}

#[tokio::test]
async fn test_repeated_task_completion_replays_original() {
    let h = Harness::new().await;
    let parent = h.member("nora", None).await;
    let user = h.member("omar", Some("nora")).await;
    let key = || Some("task-1".to_string());

    h.ledger.start_task(&user.id, "1", T0).await.unwrap();
    let first = h
        .ledger
        .complete_task(&user.id, "1", key(), T0 + TASK_MS)
        .await
        .unwrap();
    let second = h
        .ledger
        .complete_task(&user.id, "1", key(), T0 + TASK_MS + 5)
        .await
        .unwrap();

    assert!(second.replayed);
    assert_eq!(second.transaction.id, first.transaction.id);
    assert_eq!(h.balance(&user.id).await, 5.0);
    assert_eq!(h.balance(&parent.id).await, 0.5);
}

#[tokio::test]
async fn test_repeated_withdrawal_replays_original() {
    let h = Harness::new().await;
    let user = h.register("pia", None).await;
    h.fund(&user.id, 300.0).await;
    let key = || Some("cash-out".to_string());

    let first = h
        .ledger
        .request_withdrawal(&user.id, withdrawal(300.0), key(), T0)
        .await
        .unwrap();
    let second = h
        .ledger
        .request_withdrawal(&user.id, withdrawal(300.0), key(), T0 + 5)
        .await
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(h.balance(&user.id).await, 0.0);
}

#[tokio::test]
async fn test_repeated_spin_replays_original() {
    let h = Harness::with_draw(Arc::new(FixedDraw(5))).await;
    let user = h.member("quinn", None).await;
    let key = || Some("spin-1".to_string());

    let first = h.ledger.spin(&user.id, key(), T0).await.unwrap();
    let second = h.ledger.spin(&user.id, key(), T0 + HOUR).await.unwrap();

    assert!(second.replayed);
    assert_eq!(second.transaction.id, first.transaction.id);
    assert_eq!(second.index, 5);
    assert_eq!(second.target_angle, first.target_angle);
    assert_eq!(second.next_spin_at, T0 + DAY_MS);
    assert_eq!(h.balance(&user.id).await, 10.0);

    let reused = h.ledger.purchase_plan(&user.id, "p1", key(), T0 + HOUR).await;
    assert!(matches!(reused, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn test_maintenance_blocks_user_actions() {
    let h = Harness::new().await;
    let user = h.register("leo", None).await;
    h.fund(&user.id, 600.0).await;

    h.admin
        .update_settings(AppSettings {
            maintenance: true,
            ..AppSettings::default()
        })
        .await
        .unwrap();

    let result = h.ledger.purchase_plan(&user.id, "p2", None, T0).await;
    assert!(matches!(result, Err(ServiceError::Unavailable(_))));
    let result = h.ledger.request_withdrawal(&user.id, withdrawal(100.0), None, T0).await;
    assert!(matches!(result, Err(ServiceError::Unavailable(_))));

    // Admin actions keep working.
    let adjusted = h
        .admin
        .adjust_balance("admin", &user.id, 10.0, None, T0)
        .await
        .unwrap();
    assert_eq!(adjusted.balance, 610.0);
}

#[tokio::test]
async fn test_banned_user_cannot_transact() {
    let h = Harness::new().await;
    let user = h.register("mallory", None).await;
    h.fund(&user.id, 600.0).await;

    h.admin.set_banned(&user.id, true).await.unwrap();
    let result = h.ledger.purchase_plan(&user.id, "p2", None, T0).await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));

    h.admin.set_banned(&user.id, false).await.unwrap();
    h.ledger.purchase_plan(&user.id, "p2", None, T0).await.unwrap();
}

#[tokio::test]
async fn test_balance_adjustment_floors_at_zero() {
    let h = Harness::new().await;
    let user = h.register("nina", None).await;
    let admin = h.admin().await;
    h.fund(&user.id, 100.0).await;

    let adjusted = h
        .admin
        .adjust_balance(&admin.id, &user.id, -250.0, Some("chargeback".to_string()), T0)
        .await
        .unwrap();
    assert_eq!(adjusted.balance, 0.0);

    let entries = h
        .store
        .list_transactions(&TransactionFilter {
            kind: Some(TransactionKind::Adjustment),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, 250.0);
    assert_eq!(entries[0].description, "Admin debit: chargeback");

    let zero = h.admin.adjust_balance(&admin.id, &user.id, 0.0, None, T0).await;
    assert!(matches!(zero, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn test_admin_stats() {
    let h = Harness::new().await;
    let user = h.register("oscar", None).await;
    h.fund(&user.id, 1_000.0).await;
    h.ledger
        .request_withdrawal(&user.id, withdrawal(100.0), None, T0)
        .await
        .unwrap();

    let stats = h.admin.get_stats().await.unwrap();
    assert_eq!(stats.total_users, 1);
    assert_eq!(stats.total_balance, 900.0);
    assert_eq!(stats.pending_deposits, 0);
    assert_eq!(stats.pending_withdrawals, 1);
}
