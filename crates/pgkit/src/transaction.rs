//! Transactions on a dedicated connection.
//!
//! A [`Transaction`] holds one connection obtained through
//! [`Client::acquire`](crate::Client::acquire) from `BEGIN` until commit or
//! rollback. Dropping an open transaction releases the connection; the
//! server rolls the transaction back when the connection is reset.

use crate::backend::{BackendConnection, ExecutionResult};
use crate::dialect::{Capabilities, Feature};
use crate::{PgKitError, Result};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    /// PostgreSQL default
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn to_sql(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        }
    }
}

/// Options applied with `SET TRANSACTION` right after `BEGIN`.
///
/// ```rust,ignore
/// let options = TransactionOptions::new()
///     .isolation_level(IsolationLevel::Serializable)
///     .read_only()
///     .deferrable(true);
/// let tx = client.begin(options).await?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub access_mode: AccessMode,
    /// Only meaningful for SERIALIZABLE READ ONLY
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    pub fn read_write(mut self) -> Self {
        self.access_mode = AccessMode::ReadWrite;
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    /// Build the `SET TRANSACTION` statement.
    pub fn to_sql(&self) -> String {
        let mut parts = vec![
            format!("ISOLATION LEVEL {}", self.isolation_level.to_sql()),
            self.access_mode.to_sql().to_string(),
        ];

        // DEFERRABLE is only valid for SERIALIZABLE READ ONLY
        if self.isolation_level == IsolationLevel::Serializable
            && self.access_mode == AccessMode::ReadOnly
        {
            if self.deferrable {
                parts.push("DEFERRABLE".to_string());
            } else {
                parts.push("NOT DEFERRABLE".to_string());
            }
        }

        format!("SET TRANSACTION {}", parts.join(", "))
    }
}

/// Validates a plain SQL identifier of at most 63 bytes.
///
/// `kind` names the identifier in error messages (`Savepoint`, `CTE`).
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PgKitError::query(format!("{} name cannot be empty", kind)));
    }
    if name.len() > 63 {
        return Err(PgKitError::query(format!(
            "{} name '{}' exceeds maximum length of 63",
            kind, name
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !first_ok {
        return Err(PgKitError::query(format!(
            "{} name '{}' must start with a letter or underscore",
            kind, name
        )));
    }
    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(PgKitError::query(format!(
            "{} name '{}' contains invalid character '{}'",
            kind, name, bad
        )));
    }
    Ok(())
}

pub fn validate_savepoint_name(name: &str) -> Result<()> {
    validate_identifier("Savepoint", name)
}

/// An open transaction.
pub struct Transaction {
    conn: Box<dyn BackendConnection>,
    options: TransactionOptions,
    capabilities: Option<Capabilities>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Issue `BEGIN` and `SET TRANSACTION` on `conn`.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction cannot be started.
    pub async fn begin(mut conn: Box<dyn BackendConnection>, options: TransactionOptions) -> Result<Self> {
        conn.query("BEGIN").await?;
        if let Err(e) = conn.query(&options.to_sql()).await {
            let _ = conn.query("ROLLBACK").await;
            return Err(e);
        }

        tracing::debug!(
            isolation_level = ?options.isolation_level,
            access_mode = ?options.access_mode,
            deferrable = options.deferrable,
            "Started transaction"
        );

        Ok(Self {
            conn,
            options,
            capabilities: None,
        })
    }

    /// Reject savepoint operations the dialect does not support.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    fn check_savepoint(&self, name: &str) -> Result<()> {
        if let Some(capabilities) = &self.capabilities {
            capabilities.require(Feature::Savepoints)?;
        }
        validate_savepoint_name(name)
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Execute a statement inside the transaction.
    pub async fn query(&mut self, sql: &str) -> Result<ExecutionResult> {
        if sql.trim().is_empty() {
            return Err(PgKitError::connection("SQL query cannot be empty"));
        }
        self.conn.query(sql).await
    }

    /// Commits the transaction.
    pub async fn commit(mut self) -> Result<()> {
        self.conn.query("COMMIT").await?;
        tracing::debug!("Committed transaction");
        Ok(())
    }

    /// Rolls back the transaction.
    pub async fn rollback(mut self) -> Result<()> {
        self.conn.query("ROLLBACK").await?;
        tracing::debug!("Rolled back transaction");
        Ok(())
    }

    /// Creates a savepoint within the transaction.
    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.check_savepoint(name)?;
        self.conn.query(&format!("SAVEPOINT {}", name)).await?;
        tracing::debug!(savepoint = name, "Created savepoint");
        Ok(())
    }

    /// Rolls back to a savepoint.
    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.check_savepoint(name)?;
        self.conn
            .query(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .await?;
        tracing::debug!(savepoint = name, "Rolled back to savepoint");
        Ok(())
    }

    /// Releases a savepoint.
    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.check_savepoint(name)?;
        self.conn
            .query(&format!("RELEASE SAVEPOINT {}", name))
            .await?;
        tracing::debug!(savepoint = name, "Released savepoint");
        Ok(())
    }
}
