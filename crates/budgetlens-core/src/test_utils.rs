//! Test utilities for budgetlens-core
//!
//! A mock LLM HTTP server speaking both the Ollama and the OpenAI chat
//! completions protocols. Extraction prompts are answered with the same
//! `date | description | amount` line parser `MockBackend` uses.

use std::net::SocketAddr;

use axum::{
    extract::Json,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::ai::lines_to_json;

/// Mock LLM server for testing and development
pub struct MockLlmServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockLlmServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate))
            .route("/v1/models", get(handle_models))
            .route("/v1/chat/completions", post(handle_chat));
        Self::serve(app).await
    }

    /// Start a server that answers every request with HTTP 500
    pub async fn start_failing() -> Self {
        let app = Router::new().fallback(|| async {
            (StatusCode::INTERNAL_SERVER_ERROR, "mock failure")
        });
        Self::serve(app).await
    }

    async fn serve(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockLlmServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_tags() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "models": [{"name": "llama3.2:latest", "size": 4_000_000_000u64}]
    }))
}

async fn handle_models() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "object": "list",
        "data": [{"id": "gpt-4o", "object": "model"}]
    }))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}

async fn handle_generate(Json(request): Json<GenerateRequest>) -> Json<GenerateResponse> {
    Json(GenerateResponse {
        model: request.model,
        response: lines_to_json(&request.prompt),
        done: true,
    })
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

async fn handle_chat(Json(request): Json<ChatRequest>) -> Json<serde_json::Value> {
    let prompt = request
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    // Answer with the object wrapper, as a schema-constrained server would
    let transactions: serde_json::Value =
        serde_json::from_str(&lines_to_json(prompt)).unwrap_or_default();
    let content = serde_json::json!({ "transactions": transactions }).to_string();

    Json(serde_json::json!({
        "model": request.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    }))
}
