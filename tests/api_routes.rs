//! API integration tests against in-memory stores

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use banking_ledger::channel::EventChannel;
use banking_ledger::domain::Account;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

mod common;

use common::Harness;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post(uri: &str, user: Uuid, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("X-Request-User-Id", user.to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, user: Uuid) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("X-Request-User-Id", user.to_string())
        .body(Body::empty())
        .unwrap()
}

/// Amounts are JSON numbers carried at full precision
fn decimal(value: &Value) -> Decimal {
    value.to_string().parse().unwrap()
}

/// Seed an account owned by `owner`
fn seed_owned(h: &Harness, owner: Uuid, number: &str, balance: Decimal) -> Account {
    let mut account = h.seed(number, "USD", balance);
    account.owner_id = owner;
    h.balances.insert_account(account.clone());
    account
}

#[tokio::test]
async fn test_health_needs_no_principal() {
    let h = Harness::new();
    let response = h
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_principal_header_is_required() {
    let h = Harness::new();
    let app = h.router();

    let request = Request::builder()
        .uri("/api/v1/accounts")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "missing_header");

    let request = Request::builder()
        .uri("/api/v1/accounts")
        .header("X-Request-User-Id", "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_user_id");
}

#[tokio::test]
async fn test_open_and_list_accounts() {
    let h = Harness::new();
    let app = h.router();
    let owner = Uuid::new_v4();

    let (status, created) = send(
        &app,
        post(
            "/api/v1/accounts",
            owner,
            json!({"account_type": "savings", "currency": "EUR"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["currency"], "EUR");
    assert_eq!(created["account_type"], "savings");
    let number = created["account_number"].as_str().unwrap().to_string();
    assert_eq!(number.len(), 12);

    let (status, listed) = send(&app, get("/api/v1/accounts", owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["accounts"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, get(&format!("/api/v1/accounts/{number}"), owner)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        get(&format!("/api/v1/accounts/{number}"), Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_open_account_validation() {
    let h = Harness::new();
    let app = h.router();
    let owner = Uuid::new_v4();

    let (status, body) = send(
        &app,
        post(
            "/api/v1/accounts",
            owner,
            json!({"account_type": "savings", "currency": "XYZ"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_currency");

    let (status, body) = send(
        &app,
        post(
            "/api/v1/accounts",
            owner,
            json!({"account_type": "brokerage", "currency": "USD"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_account_type");

    let request = json!({"account_type": "checking", "currency": "USD", "account_number": "DUP-1"});
    let (status, _) = send(&app, post("/api/v1/accounts", owner, request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(&app, post("/api/v1/accounts", owner, request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "account_exists");
}

#[tokio::test]
async fn test_transfer_endpoint() {
    let h = Harness::new();
    let app = h.router();
    let owner = Uuid::new_v4();
    seed_owned(&h, owner, "SRC-1", dec!(150));
    h.seed("DST-1", "USD", dec!(0));

    let (status, body) = send(
        &app,
        post(
            "/api/v1/transfers",
            owner,
            json!({
                "source_account": "SRC-1",
                "destination_account": "DST-1",
                "amount": 200,
                "currency": "USD"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "insufficient_funds");

    let (status, body) = send(
        &app,
        post(
            "/api/v1/transfers",
            owner,
            json!({
                "source_account": "SRC-1",
                "destination_account": "DST-1",
                "amount": 100,
                "currency": "USD"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["audit"], "queued");
    assert_eq!(decimal(&body["source_balance"]), dec!(50));
    assert_eq!(decimal(&body["destination_balance"]), dec!(100));

    // Moving money out of someone else's account
    let (status, _) = send(
        &app,
        post(
            "/api/v1/transfers",
            Uuid::new_v4(),
            json!({
                "source_account": "SRC-1",
                "destination_account": "DST-1",
                "amount": 1,
                "currency": "USD"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(h.balance("SRC-1").await, dec!(50));
}

#[tokio::test]
async fn test_submit_transaction_then_history() {
    let h = Harness::new();
    let app = h.router();
    let owner = Uuid::new_v4();
    seed_owned(&h, owner, "ACC-1", dec!(10));

    let (status, receipt) = send(
        &app,
        post(
            "/api/v1/transactions",
            owner,
            json!({
                "type": "deposit",
                "account_number": "ACC-1",
                "amount": 15.25,
                "currency": "USD"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let event_id: Uuid = receipt["event_id"].as_str().unwrap().parse().unwrap();

    // Accepted, not applied
    assert_eq!(h.balance("ACC-1").await, dec!(10));

    let delivery = h.channel.receive().await.unwrap();
    h.worker().handle(delivery).await;
    assert_eq!(h.balance("ACC-1").await, dec!(25.25));

    let (status, history) = send(
        &app,
        get("/api/v1/transactions/history?account_number=ACC-1", owner),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let records = history["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["event_id"], event_id.to_string());
    assert_eq!(records[0]["status"], "completed");
    assert_eq!(decimal(&records[0]["amount"]), dec!(15.25));

    let record_id = records[0]["id"].as_str().unwrap();
    let (status, record) = send(&app, get(&format!("/api/v1/transactions/{record_id}"), owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["type"], "deposit");

    let (status, _) = send(
        &app,
        get(&format!("/api/v1/transactions/{record_id}"), Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        get("/api/v1/transactions/history?account_number=ACC-1", Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_submit_rejects_transfer_type_and_outage() {
    let h = Harness::new();
    let app = h.router();
    let owner = Uuid::new_v4();
    seed_owned(&h, owner, "ACC-1", dec!(10));

    let (status, _) = send(
        &app,
        post(
            "/api/v1/transactions",
            owner,
            json!({
                "type": "transfer",
                "account_number": "ACC-1",
                "amount": 1,
                "currency": "USD"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    h.channel.fail_next_publishes(1);
    let (status, body) = send(
        &app,
        post(
            "/api/v1/transactions",
            owner,
            json!({
                "type": "withdrawal",
                "account_number": "ACC-1",
                "amount": 1,
                "currency": "USD"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error_code"], "service_unavailable");
    assert_eq!(h.channel.ready_count(), 0);
}

#[tokio::test]
async fn test_unknown_record_is_not_found() {
    let h = Harness::new();
    let (status, body) = send(
        &h.router(),
        get(&format!("/api/v1/transactions/{}", Uuid::new_v4()), Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "record_not_found");
}
