//! MCP (Model Context Protocol) JSON-RPC handler.
//!
//! [`McpServer`] implements the subset of the
//! [MCP specification](https://spec.modelcontextprotocol.io/) this server
//! needs. It is transport-agnostic: [`run_stdio`] feeds it newline-delimited
//! messages from stdin, and the HTTP transport feeds it `POST /mcp` bodies.
//!
//! ## Supported methods
//!
//! | Method              | Description                      |
//! |---------------------|----------------------------------|
//! | `initialize`        | Handshake, returns capabilities  |
//! | `tools/list`        | List available tool definitions  |
//! | `tools/call`        | Execute a tool and return result |
//! | `ping`              | Liveness check                   |
//!
//! Notifications (requests without an `id`) never produce a response.
//!
//! Credentials are an argument of every call rather than server state: the
//! stdio transport passes the startup environment credentials, the HTTP
//! transport passes whatever it resolved for that request.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, warn};

use crate::client::ClientFactory;
use crate::credentials::Credentials;
use crate::tools;

pub const SERVER_NAME: &str = "datto-rmm-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;

/// Protocol handler shared by both transports.
#[derive(Clone)]
pub struct McpServer {
    factory: Arc<dyn ClientFactory>,
}

impl McpServer {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Handle one raw payload: a single JSON-RPC message or a batch array.
    ///
    /// Returns `None` when nothing should be sent back (notifications only).
    pub async fn handle_payload(
        &self,
        payload: &str,
        credentials: Option<&Credentials>,
    ) -> Option<Value> {
        let message: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                return Some(error_response(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ))
            }
        };

        match message {
            Value::Array(batch) if batch.is_empty() => Some(error_response(
                Value::Null,
                INVALID_REQUEST,
                "Invalid Request: empty batch".to_string(),
            )),
            Value::Array(batch) => {
                let mut responses = Vec::with_capacity(batch.len());
                for message in batch {
                    if let Some(response) = self.handle_message(&message, credentials).await {
                        responses.push(response);
                    }
                }
                (!responses.is_empty()).then(|| Value::Array(responses))
            }
            message => self.handle_message(&message, credentials).await,
        }
    }

    /// Handle one JSON-RPC message.
    pub async fn handle_message(
        &self,
        request: &Value,
        credentials: Option<&Credentials>,
    ) -> Option<Value> {
        if !request.is_object() {
            return Some(error_response(
                Value::Null,
                INVALID_REQUEST,
                "Invalid Request: expected a JSON object".to_string(),
            ));
        }

        let id = request.get("id").cloned();
        let method = request.get("method").and_then(Value::as_str);

        // Notifications (no id) — acknowledge silently
        let Some(id) = id else {
            match method {
                Some("notifications/initialized" | "notifications/cancelled") => {}
                other => debug!("ignoring notification: {}", other.unwrap_or("<none>")),
            }
            return None;
        };

        let Some(method) = method else {
            return Some(error_response(
                id,
                INVALID_REQUEST,
                "Invalid Request: missing method".to_string(),
            ));
        };

        let response = match method {
            "initialize" => success_response(id, initialize_result()),
            "ping" => success_response(id, json!({})),
            "tools/list" => success_response(id, json!({ "tools": tools::tool_definitions() })),
            "tools/call" => {
                let result = self.handle_tools_call(request, credentials).await;
                success_response(id, result)
            }
            _ => error_response(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ),
        };
        Some(response)
    }

    /// Handle `tools/call` — dispatch to the tool layer and wrap its envelope.
    async fn handle_tools_call(&self, request: &Value, credentials: Option<&Credentials>) -> Value {
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        debug!(tool = name, "tools/call");
        tools::handle_tool_call(name, &args, credentials, self.factory.as_ref())
            .await
            .to_json()
    }
}

/// `initialize` result — protocol version, capabilities, and server info.
fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": SERVER_VERSION
        }
    })
}

fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Run the MCP server on stdio, processing JSON-RPC messages until EOF.
pub async fn run_stdio(server: McpServer, credentials: Option<Credentials>) {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("stdin read error: {}", e);
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(response) = server.handle_payload(trimmed, credentials.as_ref()).await {
            write_response(&mut stdout, &response).await;
        }
    }
}

/// Write a JSON-RPC response to stdout (one line, flushed immediately).
async fn write_response(stdout: &mut tokio::io::Stdout, response: &Value) {
    let mut output = serde_json::to_string(response).unwrap_or_default();
    output.push('\n');
    if let Err(e) = stdout.write_all(output.as_bytes()).await {
        warn!("stdout write error: {}", e);
    }
    if let Err(e) = stdout.flush().await {
        warn!("stdout flush error: {}", e);
    }
}
