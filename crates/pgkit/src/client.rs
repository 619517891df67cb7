//! Client: lazy initialization, retrying execution and result shaping.
//!
//! A [`Client`] is a cheap handle over shared state. It owns a [`Backend`]
//! (pool or single connection), the column mappings built from the schema,
//! and the dialect extras: a [`Listener`] on postgres and a
//! [`TenantContext`] on nile.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, BackendConnection, ExecutionResult, PgFamilyBackend};
use crate::config::{ClientConfig, LogLevel};
use crate::dialect::{Capabilities, Dialect, Feature};
use crate::events::{ClientEvent, EventBus};
use crate::listener::{Listener, Subscription};
use crate::mapping::{ColumnMapping, ColumnMappings};
use crate::registry::{Closeable, InstanceRegistry};
use crate::result::{RunResult, SelectResult, TimedResult};
use crate::retry::{is_transient, RetryPolicy};
use crate::schema::{RelationDef, Schema, TableDef};
use crate::tenant::{set_tenant_sql, TenantContext, RESET_TENANT_SQL};
use crate::transaction::{validate_identifier, Transaction, TransactionOptions};
use crate::validation::{validate_row, ValidationReport};
use crate::value::{Row, Value};
use crate::{sql_preview, PgKitError, Result};

// ============================================================================
// Construction
// ============================================================================

/// Build a client for `dialect` (`postgres`, `nile`, `cockroachdb`, `awsdsql`).
///
/// No connection is opened here; the first query initializes the client.
/// The client is registered with the process-wide registry, which closes it
/// on ctrl-c.
///
/// # Errors
///
/// Configuration errors for unknown or unsupported dialects, missing
/// endpoints and invalid pool settings.
///
/// ```rust,ignore
/// let client = create_client(schema, "postgres", ClientConfig::from_url(url))?;
/// let users = client.execute_select("SELECT * FROM users", Some("users")).await?;
/// ```
pub fn create_client(schema: Schema, dialect: &str, config: ClientConfig) -> Result<Client> {
    let dialect: Dialect = dialect.parse()?;
    let events = EventBus::new();
    let backend = PgFamilyBackend::new(
        dialect.as_str(),
        &config,
        dialect == Dialect::AwsDsql,
        events.clone(),
    )?;

    let registry = InstanceRegistry::global();
    registry.install_shutdown_hook();

    Ok(Client::with_backend(
        schema,
        dialect,
        config,
        Arc::new(backend),
        events,
        registry,
    ))
}

/// Lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    New,
    Initializing,
    Initialized,
    Closed,
}

struct ClientInner {
    dialect: Dialect,
    capabilities: Capabilities,
    schema: Arc<Schema>,
    mappings: ColumnMappings,
    config: ClientConfig,
    backend: Arc<dyn Backend>,
    state: SyncMutex<ClientState>,
    // Serializes initialize and close
    init_gate: Mutex<()>,
    events: EventBus,
    listener: Option<Listener>,
    tenant: Option<TenantContext>,
    registry: Arc<InstanceRegistry>,
    registry_id: OnceCell<u64>,
}

/// Handle to a database client. Clones share the same connections.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("dialect", &self.inner.dialect)
            .field("state", &self.state())
            .field("pooled", &self.inner.backend.is_pooled())
            .field("tables", &self.inner.mappings.len())
            .finish()
    }
}

impl Client {
    /// Build a client over an explicit backend and registry.
    ///
    /// [`create_client`] is the usual entry point; this constructor serves
    /// custom backends.
    pub fn with_backend(
        schema: Schema,
        dialect: Dialect,
        config: ClientConfig,
        backend: Arc<dyn Backend>,
        events: EventBus,
        registry: Arc<InstanceRegistry>,
    ) -> Self {
        let capabilities = dialect.capabilities();
        let mappings = ColumnMappings::build(&schema);

        let listener = if capabilities.listen {
            backend
                .listener_connector()
                .map(|connector| Listener::new(connector, events.clone()))
        } else {
            None
        };
        let tenant = capabilities.tenant.then(TenantContext::new);

        let inner = Arc::new(ClientInner {
            dialect,
            capabilities,
            schema: Arc::new(schema),
            mappings,
            config,
            backend,
            state: SyncMutex::new(ClientState::New),
            init_gate: Mutex::new(()),
            events,
            listener,
            tenant,
            registry,
            registry_id: OnceCell::new(),
        });

        let as_closeable: Arc<dyn Closeable> = inner.clone();
        let weak: Weak<dyn Closeable> = Arc::downgrade(&as_closeable);
        let id = inner.registry.register(weak);
        let _ = inner.registry_id.set(id);

        debug!(dialect = %dialect, tables = inner.mappings.len(), "Client created");
        Self { inner }
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.capabilities
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.inner.capabilities.supports(feature)
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock()
    }

    pub fn is_pooled(&self) -> bool {
        self.inner.backend.is_pooled()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Id of this client in its registry.
    pub fn registry_id(&self) -> Option<u64> {
        self.inner.registry_id.get().copied()
    }

    /// Subscribe to connection, pool and listener events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize the backend once. Concurrent callers wait for the same
    /// attempt; a failed attempt leaves the client `New` so the next call
    /// tries again.
    pub async fn ensure_initialized(&self) -> Result<()> {
        match self.state() {
            ClientState::Initialized => return Ok(()),
            ClientState::Closed => return Err(closed_error()),
            ClientState::New | ClientState::Initializing => {}
        }

        let _gate = self.inner.init_gate.lock().await;
        match self.state() {
            ClientState::Initialized => return Ok(()),
            ClientState::Closed => return Err(closed_error()),
            ClientState::New | ClientState::Initializing => {}
        }

        *self.inner.state.lock() = ClientState::Initializing;
        match self.inner.backend.initialize().await {
            Ok(()) => {
                *self.inner.state.lock() = ClientState::Initialized;
                debug!(dialect = %self.inner.dialect, "Client initialized");
                Ok(())
            }
            Err(e) => {
                *self.inner.state.lock() = ClientState::New;
                if self.inner.config.log_level.allows(LogLevel::Error) {
                    tracing::error!(dialect = %self.inner.dialect, error = %e, "Client initialization failed");
                }
                Err(e)
            }
        }
    }

    /// Close connections and the listener. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.inner.shutdown().await
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute `sql`, retrying transient failures per the retry policy.
    ///
    /// # Errors
    ///
    /// Empty SQL is a connection error and never reaches the driver. Other
    /// errors are the last driver error, annotated with the SQL.
    #[instrument(skip(self, sql), fields(dialect = %self.inner.dialect, sql = %sql_preview(sql)))]
    pub async fn execute_query(&self, sql: &str) -> Result<TimedResult> {
        if sql.trim().is_empty() {
            return Err(PgKitError::connection("SQL query must be a non-empty string"));
        }
        self.ensure_initialized().await?;

        let start = Instant::now();
        let result = match &self.inner.config.retry {
            None => self.inner.backend.query(sql).await?,
            Some(policy) => self.query_with_retry(sql, policy).await?,
        };
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(
            command = %result.command,
            rows = result.rows.len(),
            duration_ms,
            "Query executed"
        );
        Ok(TimedResult {
            result,
            duration_ms,
        })
    }

    async fn query_with_retry(&self, sql: &str, policy: &RetryPolicy) -> Result<ExecutionResult> {
        let mut attempt = 0u32;
        loop {
            match self.inner.backend.query(sql).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < policy.max_retries && is_transient(&e) => {
                    let delay = policy.delay_for_attempt(attempt);
                    if self.inner.config.log_level.allows(LogLevel::Warn) {
                        warn!(
                            attempt = attempt + 1,
                            max_retries = policy.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient error, retrying"
                        );
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a SELECT; with `table`, rows are keyed by property name.
    pub async fn execute_select(&self, sql: &str, table: Option<&str>) -> Result<SelectResult> {
        let timed = self.execute_query(sql).await?;
        let metadata = timed.metadata();
        let rows = match table {
            Some(table) => timed
                .result
                .rows
                .into_iter()
                .map(|row| self.inner.mappings.from_database(table, row))
                .collect(),
            None => timed.result.rows,
        };
        Ok(SelectResult { rows, metadata })
    }

    /// First row of a SELECT, if any.
    pub async fn execute_select_one(&self, sql: &str, table: Option<&str>) -> Result<Option<Row>> {
        let result = self.execute_select(sql, table).await?;
        Ok(result.rows.into_iter().next())
    }

    /// Parse the `count` column of the first row; 0 when absent or unparsable.
    pub async fn execute_count(&self, sql: &str) -> Result<i64> {
        let timed = self.execute_query(sql).await?;
        Ok(timed
            .result
            .rows
            .first()
            .and_then(|row| row.get("count"))
            .map(count_value)
            .unwrap_or(0))
    }

    /// Execute a statement and discard its rows.
    pub async fn execute_run(&self, sql: &str) -> Result<RunResult> {
        let timed = self.execute_query(sql).await?;
        Ok(RunResult {
            success: true,
            metadata: timed.metadata(),
        })
    }

    /// Execute `sql` and return the unshaped driver result.
    pub async fn raw(&self, sql: &str) -> Result<TimedResult> {
        self.execute_query(sql).await
    }

    /// Run `body` with the named common table expressions prepended.
    pub async fn with_cte(
        &self,
        ctes: &[(&str, &str)],
        body: &str,
        table: Option<&str>,
    ) -> Result<SelectResult> {
        self.inner.capabilities.require(Feature::Cte)?;
        let sql = build_cte_sql(ctes, body)?;
        self.execute_select(&sql, table).await
    }

    /// Check out a dedicated connection for cursors or transactions.
    pub async fn acquire(&self) -> Result<Box<dyn BackendConnection>> {
        self.ensure_initialized().await?;
        self.inner.backend.acquire().await
    }

    /// Begin a transaction on a dedicated connection.
    pub async fn begin(&self, options: TransactionOptions) -> Result<Transaction> {
        self.inner.capabilities.require(Feature::Transactions)?;
        let conn = self.acquire().await?;
        let tx = Transaction::begin(conn, options).await?;
        Ok(tx.with_capabilities(self.inner.capabilities))
    }

    // ========================================================================
    // Schema surface
    // ========================================================================

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationDef> {
        self.inner.schema.relations()
    }

    /// Table definition by application key.
    pub fn table(&self, key: &str) -> Option<&TableDef> {
        self.inner.schema.get(key)
    }

    pub fn mapping(&self, table: &str) -> Option<&ColumnMapping> {
        self.inner.mappings.get(table)
    }

    /// Translate a property-keyed row into column names and database values.
    pub fn to_database(&self, table: &str, row: Row) -> Row {
        self.inner.mappings.to_database(table, row)
    }

    /// Translate a column-keyed database row into property names and values.
    pub fn from_database(&self, table: &str, row: Row) -> Row {
        self.inner.mappings.from_database(table, row)
    }

    /// Validate a property-keyed row against `table` using the configured policy.
    pub fn validate(&self, table: &str, row: &Row) -> Result<ValidationReport> {
        match self.inner.mappings.get(table) {
            Some(mapping) => validate_row(mapping, row, &self.inner.config.validation),
            None => Ok(ValidationReport {
                table: table.to_string(),
                issues: Vec::new(),
            }),
        }
    }

    // ========================================================================
    // LISTEN/NOTIFY
    // ========================================================================

    /// Subscribe to a notification channel (postgres only).
    pub async fn listen(&self, channel: &str) -> Result<Subscription> {
        self.inner.capabilities.require(Feature::Listen)?;
        if self.state() == ClientState::Closed {
            return Err(closed_error());
        }
        let Some(listener) = &self.inner.listener else {
            return Err(PgKitError::connection("Backend does not provide a listener connection"));
        };
        listener.subscribe(channel).await
    }

    pub fn listener(&self) -> Option<&Listener> {
        self.inner.listener.as_ref()
    }

    // ========================================================================
    // Tenant context
    // ========================================================================

    fn tenant_context(&self) -> Result<&TenantContext> {
        self.inner.capabilities.require(Feature::Tenant)?;
        self.inner
            .tenant
            .as_ref()
            .ok_or_else(|| PgKitError::Internal("Tenant context missing".to_string()))
    }

    /// Bind the session to tenant `id` (nile only).
    pub async fn set_tenant(&self, id: &str) -> Result<()> {
        let context = self.tenant_context()?;
        let sql = set_tenant_sql(id)?;
        self.execute_query(&sql).await?;
        context.set(Some(id.to_string()));
        debug!(tenant = id, "Tenant set");
        Ok(())
    }

    /// Unbind the current tenant (nile only).
    pub async fn clear_tenant(&self) -> Result<()> {
        let context = self.tenant_context()?;
        self.execute_query(RESET_TENANT_SQL).await?;
        context.set(None);
        debug!("Tenant cleared");
        Ok(())
    }

    /// Current tenant id; always `None` on dialects without tenants.
    pub fn tenant_id(&self) -> Option<String> {
        self.inner.tenant.as_ref().and_then(TenantContext::get)
    }

    /// Run `body` with `id` as the current tenant, then restore the previous
    /// tenant whether `body` succeeded or not.
    pub async fn with_tenant<F, Fut, T>(&self, id: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let context = self.tenant_context()?;
        let previous = context.get();

        self.set_tenant(id).await?;
        let outcome = body().await;

        let restored = match &previous {
            Some(previous) => self.set_tenant(previous).await,
            None => self.clear_tenant().await,
        };
        if let Err(e) = &restored {
            warn!(error = %e, "Failed to restore tenant on the server");
            context.set(previous);
        }

        let value = outcome?;
        restored?;
        Ok(value)
    }
}

// ============================================================================
// Close
// ============================================================================

impl ClientInner {
    async fn shutdown(&self) -> Result<()> {
        let _gate = self.init_gate.lock().await;

        if let Some(id) = self.registry_id.get() {
            self.registry.unregister(*id);
        }
        if let Some(listener) = &self.listener {
            listener.close().await;
        }
        if let Some(tenant) = &self.tenant {
            tenant.set(None);
        }

        let state = *self.state.lock();
        if state != ClientState::Initialized {
            return Ok(());
        }

        let result = self.backend.close().await;
        *self.state.lock() = ClientState::Closed;
        info!(dialect = %self.dialect, "Client closed");
        result
    }
}

#[async_trait]
impl Closeable for ClientInner {
    async fn close(&self) -> Result<()> {
        self.shutdown().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn closed_error() -> PgKitError {
    PgKitError::connection("Client is closed")
}

fn count_value(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        Value::Float(f) => *f as i64,
        Value::Text(s) => s.trim().parse().unwrap_or(0),
        Value::BigInt(n) => i64::try_from(n).unwrap_or(0),
        _ => 0,
    }
}

/// Join `ctes` and `body` into `WITH a AS (...), b AS (...) body`.
pub fn build_cte_sql(ctes: &[(&str, &str)], body: &str) -> Result<String> {
    if body.trim().is_empty() {
        return Err(PgKitError::query("CTE body cannot be empty"));
    }
    if ctes.is_empty() {
        return Ok(body.to_string());
    }

    let mut parts = Vec::with_capacity(ctes.len());
    for (name, query) in ctes {
        validate_identifier("CTE", name)?;
        parts.push(format!("{} AS ({})", name, query.trim()));
    }
    Ok(format!("WITH {} {}", parts.join(", "), body.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[test]
    fn test_build_cte_sql() {
        let sql = build_cte_sql(
            &[("active", "SELECT * FROM users WHERE active"), ("recent", "SELECT 1")],
            "SELECT * FROM active",
        )
        .unwrap();
        assert_eq!(
            sql,
            "WITH active AS (SELECT * FROM users WHERE active), recent AS (SELECT 1) SELECT * FROM active"
        );
        assert_eq!(build_cte_sql(&[], "SELECT 1").unwrap(), "SELECT 1");
        assert!(build_cte_sql(&[("bad name", "SELECT 1")], "SELECT 1").is_err());
        assert!(build_cte_sql(&[("a", "SELECT 1")], "  ").is_err());
    }

    #[test]
    fn test_count_value() {
        assert_eq!(count_value(&Value::Int(7)), 7);
        assert_eq!(count_value(&Value::Text("42".into())), 42);
        assert_eq!(count_value(&Value::Text("n/a".into())), 0);
        assert_eq!(count_value(&Value::BigInt(BigInt::from(9))), 9);
        assert_eq!(count_value(&Value::Null), 0);
    }

    #[test]
    fn test_create_client_rejects_unsupported_dialect() {
        let err = create_client(Schema::new(), "mysql", ClientConfig::from_url("postgres://x/y"))
            .unwrap_err();
        assert!(err.to_string().contains("Supported dialects"));
    }
}
