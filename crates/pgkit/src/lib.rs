//! Async execution runtime for PostgreSQL-family databases.
//!
//! One client type serves every PostgreSQL-wire dialect: vanilla Postgres,
//! CockroachDB, Nile (multi-tenant) and AWS DSQL. The client takes SQL
//! strings from an external query builder, runs them through sqlx with
//! retry on transient failures, and translates rows between database
//! columns and application properties using a schema.
//!
//! # Architecture
//!
//! ```text
//! Application / SQL builder
//!           |
//!      Client (client.rs)        lazy init, retry, result shaping
//!           |
//!      Backend (backend/)        pool or single connection
//!           |
//!         SQLx (PostgreSQL driver)
//! ```
//!
//! Construction runs environment detection ([`environment`]) and the pool
//! advisor ([`pool_advisor`]) once. The first query initializes the
//! backend, resolving AWS DSQL tokens through [`credentials`] when needed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pgkit::{create_client, ClientConfig, ColumnDef, RetryPolicy, Schema, TableDef};
//!
//! # async fn example() -> pgkit::Result<()> {
//! let schema = Schema::new().table(
//!     "users",
//!     TableDef::new()
//!         .column("id", ColumnDef::new("SERIAL").primary_key())
//!         .column("firstName", ColumnDef::new("VARCHAR(50)").named("first_name")),
//! );
//!
//! let config = ClientConfig::from_url("postgres://localhost/app").retry(RetryPolicy::default());
//! let client = create_client(schema, "postgres", config)?;
//!
//! let users = client.execute_select("SELECT * FROM users", Some("users")).await?;
//! let total = client.execute_count("SELECT count(*) FROM users").await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Dialects
//!
//! - `postgres`: LISTEN/NOTIFY through [`Client::listen`]
//! - `nile`: tenant scoping through [`Client::with_tenant`]
//! - `cockroachdb`: no LISTEN, no cursors
//! - `awsdsql`: IAM auth tokens as passwords, cached in memory, env and file
//!
//! Feature gaps surface as [`PgKitError::Dialect`] with a suggestion.

/// Driver abstraction and the sqlx backend.
pub mod backend;

/// Client lifecycle, execution with retry and result shaping.
pub mod client;

/// Value coercion between application values and database values.
pub mod coerce;

/// Client configuration structs.
pub mod config;

/// Connection settings from the environment and AWS DSQL tokens.
pub mod credentials;

/// Dialect tags and capability tables.
pub mod dialect;

/// Deployment environment detection.
pub mod environment;

pub mod events;

/// LISTEN/NOTIFY subscriptions.
pub mod listener;

/// Property/column name mapping per table.
pub mod mapping;

/// Environment-aware pool sizing.
pub mod pool_advisor;

pub mod registry;

pub mod result;

/// Retry policy and transient-error classification.
pub mod retry;

/// Schema data model.
pub mod schema;

/// Nile tenant context.
pub mod tenant;

/// Transactions with savepoints.
pub mod transaction;

/// Row validation against the schema.
pub mod validation;

pub mod value;

// Re-exports
pub use pgkit_common::{sql_preview, PgKitError, Result};

pub use backend::{Backend, BackendConnection, ExecutionResult, FieldInfo, PgFamilyBackend};
pub use client::{create_client, Client, ClientState};
pub use config::{
    AwsDsqlConfig, ClientConfig, ConnectionSettings, LogLevel, OnValidationError, PoolSettings,
    SslMode, ValidationPolicy,
};
pub use credentials::{clear_aws_dsql_token, DsqlTokenCache};
pub use dialect::{Capabilities, Dialect, Feature};
pub use environment::{detect_environment, EnvironmentKind, RuntimeEnvironment};
pub use events::{ClientEvent, EventBus};
pub use listener::{Listener, ListenerState, Notification, Subscription};
pub use mapping::{ColumnMapping, ColumnMappings};
pub use registry::{InstanceRegistry, SHUTDOWN_EXIT_CODE};
pub use result::{Metadata, RunResult, SelectResult, TimedResult};
pub use retry::RetryPolicy;
pub use schema::{ColumnDef, DomainCheck, RelationDef, Schema, TableDef};
pub use transaction::{IsolationLevel, Transaction, TransactionOptions};
pub use validation::{ValidationIssue, ValidationReport};
pub use value::{Row, Value};
