use std::collections::HashMap;
use std::net::SocketAddr;

use aggregator_client::{Builder, Client, Credentials, Error};
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};

const API_KEY: &str = "short-lived-key";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == API_KEY)
}

async fn auth(Json(body): Json<Value>) -> impl IntoResponse {
    if body["clientId"] == "client-id" && body["clientSecret"] == "client-secret" {
        (StatusCode::OK, Json(json!({ "apiKey": API_KEY })))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "invalid credentials" })),
        )
    }
}

async fn item(headers: HeaderMap, Path(id): Path<String>) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::FORBIDDEN, Json(json!({ "message": "forbidden" })));
    }

    if id == "broken-item" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "connector unavailable" })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "id": id,
            "status": "UPDATED",
            "executionStatus": "SUCCESS",
            "connector": { "id": 201, "name": "Banco Exemplo", "imageUrl": "https://cdn.example/201.svg" }
        })),
    )
}

async fn delete_item(headers: HeaderMap, Path(id): Path<String>) -> impl IntoResponse {
    if !authorized(&headers) || id == "broken-item" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "item not found" })),
        );
    }

    (StatusCode::OK, Json(json!({ "id": id })))
}

async fn accounts(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::FORBIDDEN, Json(json!({ "message": "forbidden" })));
    }

    // A large item lists one account per page.
    if q["itemId"] == "item-many" {
        let page = q.get("page").map(String::as_str).unwrap_or("1");
        let id = format!("acc-{}", page);
        return (
            StatusCode::OK,
            Json(json!({
                "total": 2,
                "totalPages": 2,
                "page": page.parse::<u32>().unwrap(),
                "results": [
                    { "id": id, "itemId": q["itemId"], "type": "BANK", "name": "Conta",
                      "balance": 10, "currencyCode": "BRL" }
                ]
            })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "total": 2,
            "results": [
                { "id": "acc-1", "itemId": q["itemId"], "type": "BANK", "subtype": "CHECKING_ACCOUNT",
                  "name": "Conta Corrente", "balance": 1520.4, "currencyCode": "BRL" },
                { "id": "acc-2", "itemId": q["itemId"], "type": "CREDIT", "subtype": "CREDIT_CARD",
                  "name": "Cartao Gold", "balance": -310, "currencyCode": "BRL" }
            ]
        })),
    )
}

// Serves three transactions split over two pages of two.
async fn transactions(
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::FORBIDDEN, Json(json!({ "message": "forbidden" })));
    }

    if q.get("from").map(String::as_str) != Some("2024-03-01")
        || q.get("to").map(String::as_str) != Some("2024-03-31")
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "unexpected window" })),
        );
    }

    let results = match q.get("page").map(String::as_str) {
        Some("1") => json!([
            { "id": "t1", "description": "Ifood *Restaurante XYZ", "amount": -45.9,
              "date": "2024-03-10T00:00:00.000Z", "balance": 954.1 },
            { "id": "t2", "description": "Salario ACME", "amount": 5000,
              "date": "2024-03-05T00:00:00.000Z", "balance": 1000 }
        ]),
        Some("2") => json!([
            { "id": "t3", "description": "Uber *Trip", "amount": -18.25,
              "date": "2024-03-12T00:00:00.000Z" }
        ]),
        _ => json!([]),
    };

    (
        StatusCode::OK,
        Json(json!({ "total": 3, "totalPages": 2, "page": q["page"], "results": results })),
    )
}

async fn spawn_upstream() -> SocketAddr {
    let router = Router::new()
        .route("/auth", post(auth))
        .route("/items/:id", get(item).delete(delete_item))
        .route("/accounts", get(accounts))
        .route("/transactions", get(transactions));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    addr
}

fn client(addr: SocketAddr, secret: &str) -> Client {
    Builder::new()
        .with_base_url(format!("http://{}", addr))
        .with_credentials(Credentials {
            client_id: "client-id".into(),
            client_secret: secret.into(),
        })
        .with_page_size(2)
        .build()
        .unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn rejected_credentials_surface_as_auth_error() {
    let addr = spawn_upstream().await;

    let err = client(addr, "wrong-secret").authenticate().await.unwrap_err();

    assert!(matches!(err, Error::Auth { status, .. } if status == 401));
    assert!(err.body().unwrap().contains("invalid credentials"));
}

#[tokio::test]
async fn fetch_item_and_accounts() {
    let addr = spawn_upstream().await;
    let session = client(addr, "client-secret").authenticate().await.unwrap();

    let item = session.item("item-42").await.unwrap();
    assert_eq!(item.id, "item-42");
    assert_eq!(item.status, "UPDATED");
    assert_eq!(item.connector.unwrap().name, "Banco Exemplo");

    let accounts = session.accounts("item-42").await.unwrap();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].kind, "BANK");
    assert_eq!(accounts[1].balance.to_string(), "-310");
}

#[tokio::test]
async fn accounts_follow_every_page() {
    let addr = spawn_upstream().await;
    let session = client(addr, "client-secret").authenticate().await.unwrap();

    let accounts = session.accounts("item-many").await.unwrap();

    let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["acc-1", "acc-2"]);
}

#[tokio::test]
async fn non_success_carries_upstream_body() {
    let addr = spawn_upstream().await;
    let session = client(addr, "client-secret").authenticate().await.unwrap();

    let err = session.item("broken-item").await.unwrap_err();

    assert!(matches!(err, Error::Status { status, .. } if status == 500));
    assert!(err.body().unwrap().contains("connector unavailable"));
}

#[tokio::test]
async fn transactions_follow_every_page() {
    let addr = spawn_upstream().await;
    let session = client(addr, "client-secret").authenticate().await.unwrap();

    let txns = session
        .transactions("acc-1", day(2024, 3, 1), day(2024, 3, 31))
        .await
        .unwrap();

    let ids: Vec<&str> = txns.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2", "t3"]);
    assert_eq!(txns[0].date, day(2024, 3, 10));
    assert!(txns[2].balance.is_none());
}

#[tokio::test]
async fn delete_item_reports_upstream_failure() {
    let addr = spawn_upstream().await;
    let session = client(addr, "client-secret").authenticate().await.unwrap();

    assert!(session.delete_item("item-42").await.is_ok());
    assert!(matches!(
        session.delete_item("broken-item").await,
        Err(Error::Status { status, .. }) if status == 404
    ));
}
