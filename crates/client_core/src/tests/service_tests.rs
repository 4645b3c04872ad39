use super::*;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use shared::{domain::EventKind, protocol::QueryFilter};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone)]
struct ServerState {
    seen: Arc<Mutex<Vec<Value>>>,
    status: StatusCode,
    body: String,
}

async fn handle_query(State(state): State<ServerState>, Json(payload): Json<Value>) -> (StatusCode, String) {
    state.seen.lock().await.push(payload);
    (state.status, state.body.clone())
}

async fn spawn_query_server(
    status: StatusCode,
    body: impl Into<String>,
) -> anyhow::Result<(String, Arc<Mutex<Vec<Value>>>)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = ServerState {
        seen: seen.clone(),
        status,
        body: body.into(),
    };
    let app = Router::new()
        .route("/api/query", post(handle_query))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), seen))
}

#[test]
fn endpoint_is_joined_onto_base_url() {
    let service = HttpQueryService::new("http://127.0.0.1:8080/ui/").expect("service");
    assert_eq!(service.endpoint().as_str(), "http://127.0.0.1:8080/api/query");
}

#[test]
fn rejects_unparseable_base_url() {
    let err = HttpQueryService::new("not a url").err().expect("must fail");
    assert!(err.to_string().contains("invalid server url"));
}

#[tokio::test]
async fn posts_request_and_decodes_page() {
    let body = json!({
        "events": [{ "type": "exec", "pid": 1 }],
        "total": 1,
        "page": 1,
        "limit": 50,
        "totalPages": 1,
        "type_counts": { "exec": 1, "file": 0, "connect": 0 }
    })
    .to_string();
    let (server_url, seen) = spawn_query_server(StatusCode::OK, body)
        .await
        .expect("spawn server");
    let service = HttpQueryService::new(&server_url).expect("service");

    let request = QueryRequest::first_page(
        Some(QueryFilter {
            types: vec![EventKind::Exec],
            ..QueryFilter::default()
        }),
        50,
    );
    let page = service.query(&request).await.expect("query");

    assert_eq!(page.events.len(), 1);
    assert_eq!(page.total, Some(1));
    assert_eq!(page.total_pages, Some(1));
    assert_eq!(page.type_counts.map(|c| c.exec), Some(1));

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["filter"]["types"], json!(["exec"]));
    assert_eq!(seen[0]["page"], json!(1));
    assert_eq!(seen[0]["limit"], json!(50));
}

#[tokio::test]
async fn non_success_status_is_protocol_error() {
    let (server_url, _seen) = spawn_query_server(StatusCode::INTERNAL_SERVER_ERROR, "boom")
        .await
        .expect("spawn server");
    let service = HttpQueryService::new(&server_url).expect("service");

    let err = service
        .query(&QueryRequest::first_page(None, 50))
        .await
        .expect_err("must fail");

    assert_eq!(err, QueryError::Status(500));
    assert_eq!(err.to_string(), "HTTP 500");
}

#[tokio::test]
async fn non_json_body_is_decode_error() {
    let (server_url, _seen) = spawn_query_server(StatusCode::OK, "<html>")
        .await
        .expect("spawn server");
    let service = HttpQueryService::new(&server_url).expect("service");

    let err = service
        .query(&QueryRequest::first_page(None, 50))
        .await
        .expect_err("must fail");

    assert!(matches!(err, QueryError::Decode(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let service = HttpQueryService::new(&format!("http://{addr}")).expect("service");

    let err = service
        .query(&QueryRequest::first_page(None, 50))
        .await
        .expect_err("must fail");

    assert!(matches!(err, QueryError::Transport(_)), "unexpected error: {err}");
}
