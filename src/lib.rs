//! Snowflake Provider
//!
//! The resource reconciliation engine of a Snowflake infrastructure
//! provider, and the gRPC plugin server that exposes it to a host.
//!
//! # Overview
//!
//! For every managed object the engine answers one question: what SQL has
//! to run so the live object matches the user's configuration? The pieces:
//!
//! - **Identifiers** ([`identifier`]): parsing, quoting and canonical
//!   comparison of account, database and schema scoped names
//! - **Descriptors** ([`schema`], [`registry`]): per-attribute type,
//!   mutation class, default policy and equality predicate
//! - **Normaliser** ([`normalizer`]): folds `SHOW`, `DESCRIBE` and
//!   `SHOW PARAMETERS` output into one canonical attribute map
//! - **State upgraders** ([`upgrade`]): lift persisted state written by
//!   older schema versions
//! - **Diff engine** ([`diff`]): three-way diff of prior state, remote view
//!   and configuration into a [`ChangePlan`](types::ChangePlan)
//! - **Reconciler** ([`reconciler`]): renders and runs the plan's
//!   statements with retry, cancellation and a post-apply consistency check
//! - **Provider** ([`provider`]): the lifecycle operations the host calls
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use snowflake_provider::{serve, SnowflakeProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     snowflake_provider::init_logging();
//!     let provider = SnowflakeProvider::new(Arc::new(MyDriverFactory::default()));
//!     serve(provider).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When the provider starts via [`serve`], it outputs a handshake string to stdout:
//!
//! ```text
//! SNOWFLAKE_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `SNOWFLAKE_PROVIDER|<protocol_version>|<address>`
//!
//! The host spawns the provider as a subprocess and connects via gRPC.
//!
//! # Provider Protocol
//!
//! - **GetMetadata**: resource kinds, preview kinds and capabilities
//! - **GetSchema**: provider configuration and resource schemas
//! - **ValidateProviderConfig** / **Configure**: credentials profile,
//!   preview features and retry settings
//! - **Stop**: cancels in-flight calls
//! - **ValidateResourceConfig**: descriptor-level checks; never contacts the remote
//! - **UpgradeResourceState**: runs the state upgrader chain
//! - **PlanResourceChange** / **ApplyResourceChange**: diff and reconcile
//! - **ReadResource**: refresh without mutating
//! - **ImportResourceState**: parse an import identifier into a state stub

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod diff;
pub mod driver;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod normalizer;
pub mod provider;
pub mod reconciler;
pub mod registry;
pub mod resource;
pub mod resources;
pub mod schema;
pub mod server;
pub mod sql;
pub mod testing;
pub mod types;
pub mod upgrade;
pub mod validation;
pub mod value;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use config::{PreviewFeatures, ProviderConfig};
pub use context::CallContext;
pub use driver::{DriverError, DriverFactory, SqlDriver};
pub use error::ProviderError;
pub use identifier::{Identifier, IdentifierError, IdentifierScope};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::SnowflakeProvider;
pub use reconciler::{Reconciler, RetryPolicy};
pub use registry::Registry;
pub use resource::Resource;
pub use schema::{AttributeDescriptor, Diagnostic, ProviderSchema, ResourceSchema};
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    Action, ApplyResult, AttrOp, AttributeChange, ChangePlan, ImportedResource, PersistedState,
    PlanResult, ProviderMetadata, ReadResult, ServerCapabilities, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
