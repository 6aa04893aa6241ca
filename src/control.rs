//! Control plane primitives: command envelope, auth, history, router.
//!
//! This is a lightweight, transport-agnostic control plane. Transports populate
//! `CommandEnvelope` with an `AuthPayload`; the router dispatches to handlers
//! after auth. History storage is pluggable.

/// Authentication providers and payload verification.
pub mod auth;
/// Built-in [`Command`](command::Command) implementations (config, breaker
/// control, health) dispatched through [`command::CommandFactory`].
pub mod builtin_commands;
/// Parses JSON command args into a [`command::Command`] by label.
pub mod builtin_factory;
/// Extension point for user-defined commands, dispatched by label.
pub mod command;
/// Core command handler traits and built-in command definitions.
pub mod handler;
/// The literal JSONL command channel: parse -> authorize -> validate -> execute -> audit.
pub mod jsonl;
/// Config path validation and prefix/glob matching.
pub mod path;
/// Command router orchestration (auth -> handler -> audit/history).
pub mod router;
/// Transport abstractions.
pub mod transport;
/// Channel-based transport implementation.
pub mod transport_channel;
/// Shared control-plane data types.
pub mod types;

// Re-export everything for convenience and backward compatibility.
pub use auth::*;
pub use builtin_commands::*;
pub use builtin_factory::BuiltInCommandFactory;
pub use command::{Command, CommandFactory};
pub use handler::*;
pub use jsonl::{AllowAllAuthorizer, CommandAuthorizer, TokenSetAuthorizer};
pub use router::*;
pub use transport_channel::{ChannelTransport, TransportError};
pub use types::*;
