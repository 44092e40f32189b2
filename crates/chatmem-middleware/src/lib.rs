//! `chatmem-middleware` – Status plumbing
//!
//! Routes human-readable progress notifications from the tool dispatcher to
//! whoever is listening (chat UI, CLI, log forwarder) without caring about
//! their meaning.
//!
//! # Modules
//!
//! - [`bus`] – [`StatusBus`]: best-effort broadcast channel of
//!   [`StatusEvent`][chatmem_types::StatusEvent]s with optional per-session
//!   filtering.

pub mod bus;

pub use bus::{SessionSubscriber, StatusBus};
