#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl MockReply {
    pub fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    pub fn bytes(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be json")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug, Clone)]
struct ServerState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Answers every POST with the next scripted reply, 500 once the script runs out.
pub struct MockServer {
    url: String,
    state: ServerState,
    shutdown_tx: oneshot::Sender<()>,
    server_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(replies: Vec<MockReply>) -> Self {
        let state = ServerState {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .fallback(record_and_reply)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let local_addr = listener
            .local_addr()
            .expect("listener address should resolve");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });

            server.await.expect("test server should run");
        });

        Self {
            url: format!("http://{local_addr}"),
            state,
            shutdown_tx,
            server_task,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Stops the server and hands back every request it saw, in order.
    pub async fn finish(self) -> Vec<RecordedRequest> {
        self.shutdown_tx
            .send(())
            .expect("shutdown signal should send");
        self.server_task.await.expect("server task should join");
        self.state.requests.lock().await.clone()
    }
}

async fn record_and_reply(
    State(state): State<ServerState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    state.requests.lock().await.push(RecordedRequest {
        path: uri.path().to_string(),
        headers,
        body,
    });

    let reply = state.replies.lock().await.pop_front().unwrap_or_else(|| {
        MockReply::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": {"code": "exhausted_test_replies"}}),
        )
    });

    (reply.status, reply.body)
}
