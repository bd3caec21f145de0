//! axum host for an A2A agent.
//!
//! Serves the agent card, `message/send`, `message/stream` (SSE) and the
//! process metrics. The agent logic itself is an [`AgentExecutor`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::types::{
    new_id, AgentCard, Message, MessageSendParams, StreamEvent, TaskArtifactUpdateEvent,
    TaskState, TaskStatus, TaskStatusUpdateEvent, AGENT_CARD_PATH,
};
use crate::jsonrpc::{codes, JsonRpcRequest, JsonRpcResponse};

/// One incoming user turn.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Text parts of the message, joined with newlines.
    pub text: String,
    pub context_id: String,
    pub task_id: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub text: String,
    pub failed: bool,
}

impl AgentReply {
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            failed: false,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            failed: true,
        }
    }
}

/// Agent logic behind an [`AgentServer`]. Failures are replies, not errors.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: AgentRequest) -> AgentReply;
}

#[derive(Clone)]
struct AgentState {
    card: Arc<AgentCard>,
    executor: Arc<dyn AgentExecutor>,
}

pub struct AgentServer {
    card: AgentCard,
    executor: Arc<dyn AgentExecutor>,
}

impl AgentServer {
    pub fn new(card: AgentCard, executor: Arc<dyn AgentExecutor>) -> Self {
        Self { card, executor }
    }

    pub fn router(self) -> Router {
        let state = AgentState {
            card: Arc::new(self.card),
            executor: self.executor,
        };
        Router::new()
            .route(AGENT_CARD_PATH, get(agent_card))
            .route("/", post(handle_rpc))
            .route("/metrics", get(crate::metrics::metrics_handler))
            .with_state(state)
    }

    /// Binds `bind_addr` and serves in a background task until closed.
    ///
    /// An empty card URL is filled in from the bound address.
    pub async fn spawn(mut self, bind_addr: &str) -> std::io::Result<RunningAgentServer> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        if self.card.url.is_empty() {
            self.card.url = format!("http://{}/", local_addr);
        }
        let name = self.card.name.clone();
        tracing::info!(agent = %name, addr = %local_addr, "Agent server listening");
        let app = self.router();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(agent = %name, error = %e, "Agent server failed");
            }
        });

        Ok(RunningAgentServer {
            local_addr,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Serves on `bind_addr` until Ctrl-C.
    pub async fn serve_until_ctrl_c(self, bind_addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        let name = self.card.name.clone();
        tracing::info!(agent = %name, addr = %listener.local_addr()?, "Agent server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        tracing::info!(agent = %name, "Agent server stopped");
        Ok(())
    }
}

/// Handle to a background agent server.
pub struct RunningAgentServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl RunningAgentServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Signals shutdown and waits briefly for the server task.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if tokio::time::timeout(Duration::from_secs(5), join).await.is_err() {
                tracing::warn!(addr = %self.local_addr, "Agent server did not stop in time");
            }
        }
    }
}

impl Drop for RunningAgentServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

async fn agent_card(State(state): State<AgentState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

async fn handle_rpc(State(state): State<AgentState>, body: Bytes) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let response =
                JsonRpcResponse::failure(Value::Null, codes::PARSE_ERROR, format!("Parse error: {}", e));
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let Some(id) = request.id.clone() else {
        return StatusCode::ACCEPTED.into_response();
    };

    let params: MessageSendParams = match request.method.as_str() {
        "message/send" | "message/stream" => {
            match serde_json::from_value(request.params.clone()) {
                Ok(params) => params,
                Err(e) => {
                    let response = JsonRpcResponse::failure(
                        id,
                        codes::INVALID_PARAMS,
                        format!("Invalid params: {}", e),
                    );
                    return Json(response).into_response();
                }
            }
        }
        other => {
            let response = JsonRpcResponse::failure(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            );
            return Json(response).into_response();
        }
    };

    let agent_request = build_request(params.message);
    tracing::debug!(
        agent = %state.card.name,
        method = %request.method,
        context_id = %agent_request.context_id,
        "Message received"
    );

    if request.method == "message/stream" {
        stream_reply(state, id, agent_request).into_response()
    } else {
        let context_id = agent_request.context_id.clone();
        let task_id = agent_request.task_id.clone();
        let reply = state.executor.execute(agent_request).await;
        let message = Message::agent_text(reply.text, &context_id, Some(&task_id));
        let response = match serde_json::to_value(&message) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::failure(id, codes::INTERNAL_ERROR, e.to_string()),
        };
        Json(response).into_response()
    }
}

fn build_request(message: Message) -> AgentRequest {
    let context_id = message.context_id.clone().unwrap_or_else(new_id);
    let task_id = message.task_id.clone().unwrap_or_else(new_id);
    AgentRequest {
        text: message.joined_text(),
        context_id,
        task_id,
        message,
    }
}

/// Emits working, then the answer artifact, then the final status.
fn stream_reply(
    state: AgentState,
    id: Value,
    request: AgentRequest,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<StreamEvent>(16);

    tokio::spawn(async move {
        let context_id = request.context_id.clone();
        let task_id = request.task_id.clone();

        let working = TaskStatusUpdateEvent::new(
            &task_id,
            &context_id,
            TaskStatus::now(TaskState::Working, None),
            false,
        );
        if tx.send(StreamEvent::StatusUpdate(working)).await.is_err() {
            return;
        }

        let reply = state.executor.execute(request).await;

        if !reply.text.is_empty() {
            let artifact = TaskArtifactUpdateEvent::new(&task_id, &context_id, "response", reply.text);
            if tx.send(StreamEvent::ArtifactUpdate(artifact)).await.is_err() {
                return;
            }
        }

        let final_state = if reply.failed {
            TaskState::Failed
        } else {
            TaskState::Completed
        };
        let done = TaskStatusUpdateEvent::new(
            &task_id,
            &context_id,
            TaskStatus::now(final_state, None),
            true,
        );
        let _ = tx.send(StreamEvent::StatusUpdate(done)).await;
    });

    let stream = ReceiverStream::new(rx).map(move |event| {
        let response = match event.to_value() {
            Ok(result) => JsonRpcResponse::success(id.clone(), result),
            Err(e) => JsonRpcResponse::failure(id.clone(), codes::INTERNAL_ERROR, e.to_string()),
        };
        let data = serde_json::to_string(&response).unwrap_or_default();
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::client::A2aClient;
    use crate::a2a::types::AgentSkill;

    struct Shout;

    #[async_trait]
    impl AgentExecutor for Shout {
        async fn execute(&self, request: AgentRequest) -> AgentReply {
            if request.text == "fail" {
                AgentReply::failed("Error: asked to fail")
            } else {
                AgentReply::completed(request.text.to_uppercase())
            }
        }
    }

    fn card() -> AgentCard {
        AgentCard::text_agent(
            "shout",
            "Upper-cases input",
            AgentSkill {
                id: "shout".to_string(),
                name: "Shout".to_string(),
                description: String::new(),
                tags: vec![],
                examples: vec![],
            },
        )
    }

    fn client() -> A2aClient {
        A2aClient::new(Duration::from_secs(5), Duration::from_secs(2)).expect("client")
    }

    #[test]
    fn test_build_request_assigns_context_when_missing() {
        let fresh = build_request(Message::user_text("hi", None));
        assert_eq!(fresh.context_id.len(), 32);
        assert_eq!(fresh.text, "hi");

        let continued = build_request(Message::user_text("hi", Some("ctx-7")));
        assert_eq!(continued.context_id, "ctx-7");
    }

    #[tokio::test]
    async fn test_card_served_with_bound_url() {
        let server = AgentServer::new(card(), Arc::new(Shout))
            .spawn("127.0.0.1:0")
            .await
            .expect("spawn");
        let client = client();

        let fetched = client.get_agent_card(&server.url()).await.expect("card");
        assert_eq!(fetched.name, "shout");
        assert_eq!(fetched.url, format!("{}/", server.url()));
        assert!(client.check_health(&server.url()).await);

        server.close().await;
    }

    #[tokio::test]
    async fn test_send_and_stream_keep_context() {
        let server = AgentServer::new(card(), Arc::new(Shout))
            .spawn("127.0.0.1:0")
            .await
            .expect("spawn");
        let client = client();

        let message = client
            .send_message(&server.url(), "hello", Some("ctx-1"))
            .await
            .expect("send");
        assert_eq!(message.joined_text(), "HELLO");
        assert_eq!(message.context_id.as_deref(), Some("ctx-1"));

        let reply = client
            .send_message_streaming(&server.url(), "  again ", None)
            .await
            .expect("stream");
        assert_eq!(reply.text, "AGAIN");
        assert_eq!(reply.final_state, Some(TaskState::Completed));
        assert!(reply.context_id.is_some());

        let failed = client
            .send_message_streaming(&server.url(), "fail", None)
            .await
            .expect("stream");
        assert_eq!(failed.final_state, Some(TaskState::Failed));
        assert_eq!(failed.text, "Error: asked to fail");

        server.close().await;
    }
}
