//! Driver-facing backend abstraction.
//!
//! The [`Client`](crate::Client) talks to the database only through the
//! [`Backend`] trait; [`pg::PgFamilyBackend`] is the sqlx implementation
//! shared by every PostgreSQL-wire dialect.

use std::sync::Arc;

use async_trait::async_trait;

use crate::listener::ListenerConnector;
use crate::value::Row;
use crate::Result;

pub mod pg;
pub mod rows;

pub use pg::PgFamilyBackend;

/// Column description of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    /// Server type OID
    pub data_type_id: u32,
}

/// Driver-neutral result of one statement.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    /// Rows affected or returned, when the driver reports it
    pub row_count: Option<u64>,
    /// Command tag, e.g. `SELECT` or `INSERT`
    pub command: String,
    pub fields: Vec<FieldInfo>,
}

impl ExecutionResult {
    /// An empty result for `sql`'s command.
    pub fn empty(sql: &str) -> Self {
        Self {
            command: command_tag(sql),
            row_count: Some(0),
            ..Default::default()
        }
    }
}

/// Upper-cased leading keyword of `sql`, used as the command tag.
pub fn command_tag(sql: &str) -> String {
    sql.trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .find(|word| !word.is_empty())
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// A connection checked out for exclusive use (cursors, transactions).
///
/// The connection returns to its pool when dropped.
#[async_trait]
pub trait BackendConnection: Send {
    async fn query(&mut self, sql: &str) -> Result<ExecutionResult>;
}

/// Connection strategy behind a client.
#[async_trait]
pub trait Backend: Send + Sync {
    /// True when queries go through a connection pool.
    fn is_pooled(&self) -> bool;

    /// Open the pool or prepare the single connection.
    async fn initialize(&self) -> Result<()>;

    async fn query(&self, sql: &str) -> Result<ExecutionResult>;

    async fn acquire(&self) -> Result<Box<dyn BackendConnection>>;

    async fn close(&self) -> Result<()>;

    /// Connector for a dedicated LISTEN connection, if the backend has one.
    fn listener_connector(&self) -> Option<Arc<dyn ListenerConnector>> {
        None
    }
}
