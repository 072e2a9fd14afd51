//! HTTP entry point for the hosting runtime. Accepts the scheduled sweep and
//! the user actions as JSON on `POST /`.
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::settings::Settings;
use crate::store::SqliteStore;
use crate::sync::{SyncEngine, SyncError};
use crate::upstream::Login;

const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    #[serde(rename_all = "camelCase")]
    SyncTransactions {
        connection_id: String,
        from: NaiveDate,
        to: NaiveDate,
    },
    #[serde(rename_all = "camelCase")]
    DeleteConnection { connection_id: String },
    #[serde(rename_all = "camelCase")]
    LinkConnection { item_id: String },
}

/// Who is calling: the scheduler holding the service token, or an end user
/// authenticated by the hosting runtime.
#[derive(Debug, PartialEq, Eq)]
enum Caller {
    Service { on_behalf_of: Option<String> },
    User(String),
}

impl Caller {
    fn user_id(&self) -> Option<&str> {
        match self {
            Caller::Service { on_behalf_of } => on_behalf_of.as_deref(),
            Caller::User(user_id) => Some(user_id),
        }
    }
}

#[derive(Debug)]
enum TriggerError {
    Unauthorized(&'static str),
    BadRequest(String),
    Sync(SyncError),
}

impl From<SyncError> for TriggerError {
    fn from(e: SyncError) -> Self {
        TriggerError::Sync(e)
    }
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            TriggerError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.to_string()),
            TriggerError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason),
            TriggerError::Sync(e) => {
                let status = match &e {
                    SyncError::NotFound => StatusCode::NOT_FOUND,
                    SyncError::Auth(_)
                    | SyncError::Aggregator(_)
                    | SyncError::Connection(_)
                    | SyncError::Malformed(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(error = %e, "action failed");
                }
                (status, e.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub struct AppState<L> {
    store: Mutex<SqliteStore>,
    engine: SyncEngine<L>,
    service_token: Option<String>,
}

impl<L> AppState<L> {
    pub fn new(store: SqliteStore, engine: SyncEngine<L>, service_token: Option<String>) -> Self {
        Self {
            store: Mutex::new(store),
            engine,
            service_token,
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn identify(headers: &HeaderMap, service_token: Option<&str>) -> Result<Caller, TriggerError> {
    let user_id = header(headers, USER_HEADER).map(str::to_string);

    if let Some(auth) = header(headers, AUTHORIZATION.as_str()) {
        let token = auth
            .strip_prefix("Bearer ")
            .ok_or(TriggerError::Unauthorized("malformed authorization header"))?;
        return match service_token {
            Some(expected) if expected == token => Ok(Caller::Service {
                on_behalf_of: user_id,
            }),
            _ => Err(TriggerError::Unauthorized("invalid service token")),
        };
    }

    user_id
        .map(Caller::User)
        .ok_or(TriggerError::Unauthorized("missing caller identity"))
}

fn owner(caller: &Caller) -> Result<&str, TriggerError> {
    caller
        .user_id()
        .ok_or_else(|| TriggerError::BadRequest(format!("{} header is required", USER_HEADER)))
}

async fn dispatch<L: Login>(
    state: &AppState<L>,
    caller: Caller,
    action: Option<Action>,
) -> Result<Value, TriggerError> {
    let mut store = state.store.lock().await;

    let body = match action {
        None => {
            if !matches!(caller, Caller::Service { .. }) {
                return Err(TriggerError::Unauthorized("the sweep requires service credentials"));
            }
            let report = state
                .engine
                .sweep(&mut store, Local::now().date_naive())
                .await?;
            json!(report)
        }
        Some(Action::SyncTransactions {
            connection_id,
            from,
            to,
        }) => {
            if from > to {
                return Err(TriggerError::BadRequest(format!(
                    "from {} is after to {}",
                    from, to
                )));
            }
            // Service calls act for whoever owns the connection.
            let user_id = match caller.user_id() {
                Some(user_id) => user_id.to_string(),
                None => store
                    .connections()
                    .get(None, &connection_id)
                    .await
                    .map_err(SyncError::from)?
                    .user_id,
            };
            let result = state
                .engine
                .sync_connection(&mut store, &user_id, &connection_id, from, to)
                .await?;
            json!(result)
        }
        Some(Action::DeleteConnection { connection_id }) => {
            state
                .engine
                .delete_connection(&mut store, caller.user_id(), &connection_id)
                .await?;
            json!({ "deleted": connection_id })
        }
        Some(Action::LinkConnection { item_id }) => {
            let user_id = owner(&caller)?;
            let connection = state
                .engine
                .link_connection(&mut store, user_id, &item_id)
                .await?;
            json!(connection)
        }
    };

    Ok(body)
}

/// An empty body, `null` or an object without an `action` selects the sweep.
fn parse_action(body: &[u8]) -> Result<Option<Action>, TriggerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let invalid = |e: serde_json::Error| TriggerError::BadRequest(format!("invalid action: {}", e));
    let value = serde_json::from_slice::<Value>(body).map_err(invalid)?;
    match &value {
        Value::Null => Ok(None),
        Value::Object(fields) if !fields.contains_key("action") => Ok(None),
        _ => serde_json::from_value::<Action>(value).map(Some).map_err(invalid),
    }
}

async fn trigger<L: Login + 'static>(
    State(state): State<Arc<AppState<L>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, TriggerError> {
    let caller = identify(&headers, state.service_token.as_deref())?;

    let action = parse_action(&body)?;
    info!(?caller, ?action, "action received");

    dispatch(&state, caller, action).await.map(Json)
}

pub fn router<L: Login + 'static>(state: Arc<AppState<L>>) -> Router {
    Router::new()
        .route("/", post(trigger::<L>))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}

pub(crate) async fn serve(settings: Settings) -> Result<()> {
    let store = settings.open_store().await?;
    let engine = settings.sync_engine()?;
    if settings.trigger.service_token.is_none() {
        warn!("no service token configured, the scheduled sweep cannot be triggered");
    }
    let state = Arc::new(AppState::new(
        store,
        engine,
        settings.trigger.service_token.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&settings.trigger.bind).await?;
    info!(addr = %listener.local_addr()?, "trigger listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::categorize::KeywordTable;
    use crate::sync::DEFAULT_WINDOW_DAYS;
    use crate::upstream::fake::{raw, FakeBank};

    const TOKEN: &str = "service-secret";

    fn bank() -> FakeBank {
        FakeBank::default()
            .with_item("item-1", &[("acc-1", "0")])
            .with_transactions(
                "acc-1",
                vec![raw("t1", "Ifood *Pedido", "-32.00", "2024-03-10", None)],
            )
    }

    async fn start(bank: FakeBank) -> SocketAddr {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        let engine = SyncEngine::new(bank, &KeywordTable::builtin(), DEFAULT_WINDOW_DAYS);
        let state = Arc::new(AppState::new(store, engine, Some(TOKEN.to_string())));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        addr
    }

    async fn send(
        addr: SocketAddr,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (u16, Value) {
        let mut request = reqwest::Client::new().post(format!("http://{}/", addr));
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[test]
    fn bearer_token_grants_service_scope() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert_eq!(
            identify(&headers, Some("s3cret")).unwrap(),
            Caller::Service { on_behalf_of: None }
        );
        assert!(identify(&headers, Some("other")).is_err());
        assert!(identify(&headers, None).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, "user-1".parse().unwrap());
        assert_eq!(
            identify(&headers, Some("s3cret")).unwrap(),
            Caller::User("user-1".to_string())
        );

        assert!(identify(&HeaderMap::new(), Some("s3cret")).is_err());
    }

    #[test]
    fn actions_use_camel_case_fields() {
        let action: Action = serde_json::from_str(
            r#"{"action":"sync_transactions","connectionId":"c1","from":"2024-03-01","to":"2024-03-15"}"#,
        )
        .unwrap();

        assert!(matches!(
            action,
            Action::SyncTransactions { connection_id, .. } if connection_id == "c1"
        ));
        assert!(serde_json::from_str::<Action>(r#"{"action":"drop_tables"}"#).is_err());
    }

    #[tokio::test]
    async fn user_links_and_syncs_own_connection() {
        let addr = start(bank()).await;
        let user = [(USER_HEADER, "user-1")];

        let (status, connection) = send(
            addr,
            &user,
            Some(json!({ "action": "link_connection", "itemId": "item-1" })),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(connection["status"], "CONNECTED");
        let connection_id = connection["id"].as_str().unwrap().to_string();

        let (status, result) = send(
            addr,
            &user,
            Some(json!({
                "action": "sync_transactions",
                "connectionId": connection_id,
                "from": "2024-03-01",
                "to": "2024-03-15",
            })),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(result["inserted"], 1);
        assert_eq!(result["total"], 1);

        let (status, _) = send(
            addr,
            &[(USER_HEADER, "user-2")],
            Some(json!({
                "action": "sync_transactions",
                "connectionId": connection_id,
                "from": "2024-03-01",
                "to": "2024-03-15",
            })),
        )
        .await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn sweep_requires_the_service_token() {
        let addr = start(bank()).await;

        let (status, _) = send(addr, &[(USER_HEADER, "user-1")], None).await;
        assert_eq!(status, 401);

        let (status, _) = send(addr, &[("authorization", "Bearer wrong")], None).await;
        assert_eq!(status, 401);

        let bearer = format!("Bearer {}", TOKEN);
        let (status, report) = send(addr, &[("authorization", bearer.as_str())], None).await;
        assert_eq!(status, 200);
        assert_eq!(report["connections_processed"], 0);
        assert_eq!(report["connections_failed"], 0);
        assert!(report.get("outcomes").is_none());
    }

    #[tokio::test]
    async fn empty_object_selects_the_sweep() {
        let addr = start(bank()).await;

        let (status, _) = send(addr, &[(USER_HEADER, "user-1")], Some(json!({}))).await;
        assert_eq!(status, 401);

        let bearer = format!("Bearer {}", TOKEN);
        let (status, report) =
            send(addr, &[("authorization", bearer.as_str())], Some(json!({}))).await;
        assert_eq!(status, 200);
        assert_eq!(report["connections_processed"], 0);
    }

    #[test]
    fn action_selection() {
        assert!(parse_action(b"").unwrap().is_none());
        assert!(parse_action(b" null ").unwrap().is_none());
        assert!(parse_action(b"{}").unwrap().is_none());
        assert!(matches!(
            parse_action(br#"{"action":"link_connection","itemId":"item-1"}"#),
            Ok(Some(Action::LinkConnection { item_id })) if item_id == "item-1"
        ));
        assert!(parse_action(b"[]").is_err());
        assert!(parse_action(br#"{"action":"unknown"}"#).is_err());
        assert!(parse_action(b"{").is_err());
    }

    #[tokio::test]
    async fn upstream_failures_are_bad_gateway() {
        let addr = start(bank().failing("item-1")).await;

        let (status, body) = send(
            addr,
            &[(USER_HEADER, "user-1")],
            Some(json!({ "action": "link_connection", "itemId": "item-1" })),
        )
        .await;

        assert_eq!(status, 502);
        assert!(body["error"].as_str().unwrap().contains("aggregator"));
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let addr = start(bank()).await;
        let user = [(USER_HEADER, "user-1")];

        let (status, _) = send(addr, &user, Some(json!({ "action": "unknown" }))).await;
        assert_eq!(status, 400);

        let (status, _) = send(
            addr,
            &user,
            Some(json!({
                "action": "sync_transactions",
                "connectionId": "c1",
                "from": "2024-03-15",
                "to": "2024-03-01",
            })),
        )
        .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn delete_of_unknown_connection_is_not_found() {
        let addr = start(bank()).await;

        let (status, _) = send(
            addr,
            &[(USER_HEADER, "user-1")],
            Some(json!({ "action": "delete_connection", "connectionId": "missing" })),
        )
        .await;

        assert_eq!(status, 404);
    }
}
