//! `chatmem-runtime` – the memory tool as the model sees it.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`Dispatcher`]: executes [`MemoryCommand`]s against
//!   the store, publishes progress on the status bus and answers with a
//!   [`ToolReply`].  Storage work runs on Tokio's blocking pool.
//! - [`confirm`] – [`ConfirmationLedger`]: per-session two-step
//!   confirmation for `clear_memories` and `delete_memory_file`.
//! - [`tool_calls`] – [`parse_tool_calls`]: turns a raw JSON tool call (or a
//!   batch of them) into commands, and [`tool_schema`] advertises the
//!   command set as JSON schema.
//! - [`refresh`] – [`spawn_refresh_task`]: periodic `refresh_memory` on a
//!   background task.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.
//!
//! [`MemoryCommand`]: chatmem_types::MemoryCommand
//! [`ToolReply`]: chatmem_types::ToolReply

pub mod confirm;
pub mod dispatcher;
pub mod refresh;
pub mod telemetry;
pub mod tool_calls;

pub use confirm::{ConfirmationLedger, PendingAction, Verdict};
pub use dispatcher::{DEFAULT_DOWNLOAD_WINDOW, DispatchConfig, Dispatcher};
pub use refresh::{REFRESH_SESSION, spawn_refresh_task};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use tool_calls::{ToolCall, parse_tool_calls, tool_schema};
