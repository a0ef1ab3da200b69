#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

//! datto-rmm-mcp library — the building blocks behind the `datto-rmm-mcp` binary.
//!
//! - `config` — CLI, TOML file and environment configuration
//! - `credentials` — API key/secret/platform resolution (env or gateway headers)
//! - `client` — Datto RMM REST client and the `RmmApi` seam
//! - `paging` — paged listings and the bounded collector
//! - `tools` — tool catalog and dispatch
//! - `mcp` — JSON-RPC handling and the stdio transport
//! - `http` — HTTP transport (axum)

pub mod client;
pub mod config;
pub mod credentials;
pub mod http;
pub mod mcp;
pub mod paging;
pub mod tools;

// Re-export key types at crate root for convenience.
pub use client::{ClientError, ClientFactory, DattoClient, DattoClientFactory, RmmApi};
pub use config::{AuthMode, Config, Transport};
pub use credentials::{Credentials, Platform};
pub use mcp::McpServer;
pub use tools::{ToolCall, ToolResult};
