mod common;

use std::sync::Arc;

use common::{test_settings, ADMIN_PASSWORD, ADMIN_USERNAME};
use earn_ledger::{
    repositories::{MemoryStore, Store},
    services::{self, http},
};
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn serve() -> String {
    let settings = test_settings();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    services::bootstrap(&store, &settings).await.unwrap();
    let app = http::router(services::spawn_services(store, &settings));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn login(client: &reqwest::Client, base: &str, username: &str, password: &str) -> String {
    let response = client
        .post(format!("{}/auth/login", base))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let base = serve().await;
    let body = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_authentication_is_enforced() {
    let base = serve().await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/me", base)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");

    let response = client
        .get(format!("{}/me", base))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post(format!("{}/auth/register", base))
        .json(&json!({ "username": "rafi", "phone": "01712345678", "password": "secret1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let token = login(&client, &base, "rafi", "secret1").await;
    let response = client
        .get(format!("{}/admin/stats", base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .post(format!("{}/auth/logout", base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(format!("{}/me", base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deposit_approval_and_plan_purchase() {
    let base = serve().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/auth/register", base))
        .json(&json!({ "username": "Mitu", "phone": "01798765432", "password": "secret1" }))
        .send()
        .await
        .unwrap();
    let user = login(&client, &base, "mitu", "secret1").await;
    let admin = login(&client, &base, ADMIN_USERNAME, ADMIN_PASSWORD).await;

    let deposit = json!({
        "amount": 600.0,
        "method": "bKash",
        "trxId": "9XK2LM4P",
        "accountNumber": "01798765432"
    });
    let mut ids = Vec::new();
    for _ in 0..2 {
        let response = client
            .post(format!("{}/deposits", base))
            .bearer_auth(&user)
            .header("Idempotency-Key", "deposit-1")
            .json(&deposit)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["type"], "deposit");
        assert_eq!(body["status"], "pending");
        ids.push(body["id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids[0], ids[1]);

    let pending: Value = client
        .get(format!("{}/admin/transactions?status=pending&kind=deposit", base))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let approve = format!("{}/admin/deposits/{}/approve", base, ids[0]);
    let response = client.post(&approve).bearer_auth(&admin).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = client.post(&approve).bearer_auth(&admin).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let plans: Value = client
        .get(format!("{}/plans", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(plans.as_array().unwrap().len(), 4);

    let response = client
        .post(format!("{}/plans/p2/purchase", base))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["balance"], 100.0);
    assert_eq!(body["user"]["activePlanId"], "p2");

    let history: Value = client
        .get(format!("{}/me/transactions", base))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_reject_withdrawal_with_reason() {
    let base = serve().await;
    let client = reqwest::Client::new();

    let registered: Value = client
        .post(format!("{}/auth/register", base))
        .json(&json!({ "username": "sumon", "phone": "01811112222", "password": "secret1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let user_id = registered["id"].as_str().unwrap().to_string();
    let user = login(&client, &base, "sumon", "secret1").await;
    let admin = login(&client, &base, ADMIN_USERNAME, ADMIN_PASSWORD).await;

    let response = client
        .post(format!("{}/admin/users/{}/balance", base, user_id))
        .bearer_auth(&admin)
        .json(&json!({ "amount": 500.0, "note": "welcome bonus" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let withdrawal: Value = client
        .post(format!("{}/withdrawals", base))
        .bearer_auth(&user)
        .json(&json!({ "amount": 200.0, "method": "Nagad", "accountNumber": "01811112222" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = withdrawal["id"].as_str().unwrap();

    let rejected: Value = client
        .post(format!("{}/admin/withdrawals/{}/reject", base, id))
        .bearer_auth(&admin)
        .json(&json!({ "reason": "Account mismatch" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["rejectionReason"], "Account mismatch");

    let me: Value = client
        .get(format!("{}/me", base))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["balance"], 500.0);
}
