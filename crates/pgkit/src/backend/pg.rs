//! sqlx backend shared by the PostgreSQL-wire dialects.
//!
//! Runs in one of two modes chosen at construction:
//! - pooled: a `PgPool` sized from the environment-aware defaults
//! - single: one lazily opened `PgConnection`, reopened once on
//!   connection-level failures

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use parking_lot::RwLock;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgListener, PgPool, PgPoolOptions, Postgres};
use sqlx::{Connection, Either, Executor};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{command_tag, rows, Backend, BackendConnection, ExecutionResult};
use crate::config::{AwsDsqlConfig, ClientConfig, ConnectionSettings, LogLevel, PoolSettings, SslMode};
use crate::credentials::{merge_aws_env, merge_postgres_env, DsqlTokenCache};
use crate::environment::{detect_environment_from, EnvSource, ProcessEnv, RuntimeEnvironment};
use crate::events::{ClientEvent, EventBus};
use crate::listener::{ListenerConnection, ListenerConnector, Notification};
use crate::pool_advisor::{effective_pool, smart_pool_defaults, validate_pool_settings};
use crate::{PgKitError, Result};

const DSQL_PORT: u16 = 5432;

// ============================================================================
// Connect target
// ============================================================================

/// Resolved endpoint plus the credential source used for every new connection.
#[derive(Debug)]
pub struct ConnectTarget {
    settings: ConnectionSettings,
    aws: Option<AwsDsqlConfig>,
    pool_ssl: Option<SslMode>,
    application_name: Option<String>,
    token_cache: Arc<DsqlTokenCache>,
}

impl ConnectTarget {
    pub fn is_aws(&self) -> bool {
        self.aws.is_some()
    }

    /// Connection options for a new physical connection.
    ///
    /// On the AWS path the password is a DSQL auth token from the cache.
    pub async fn connect_options(&self) -> Result<PgConnectOptions> {
        Ok(self.connect_options_with_expiry().await?.0)
    }

    /// Connection options plus the expiry (epoch ms) of the token they carry,
    /// `None` off the AWS path.
    pub async fn connect_options_with_expiry(&self) -> Result<(PgConnectOptions, Option<i64>)> {
        let (mut options, expires_at) = match &self.aws {
            Some(aws) => {
                let token = self.token_cache.get_cached_token(aws).await?;
                let hostname = aws.hostname.as_deref().unwrap_or_default();
                let options = PgConnectOptions::new()
                    .host(hostname)
                    .port(DSQL_PORT)
                    .username(aws.user_or_default())
                    .database(aws.database_or_default())
                    .password(&token.token)
                    .ssl_mode(aws.ssl.unwrap_or(SslMode::Require).to_pg());
                (options, Some(token.expires_at))
            }
            None => (self.plain_options()?, None),
        };

        if let Some(name) = &self.application_name {
            options = options.application_name(name);
        }
        Ok((options, expires_at))
    }

    fn plain_options(&self) -> Result<PgConnectOptions> {
        let settings = &self.settings;
        let mut options = match &settings.url {
            Some(url) => PgConnectOptions::from_str(url).map_err(|e| {
                PgKitError::Configuration(format!("Invalid connection URL: {}", e))
            })?,
            None => PgConnectOptions::new(),
        };

        if let Some(host) = &settings.host {
            options = options.host(host);
        }
        if let Some(port) = settings.port {
            options = options.port(port);
        }
        if let Some(database) = &settings.database {
            options = options.database(database);
        }
        if let Some(user) = &settings.user {
            options = options.username(user);
        }
        if let Some(password) = &settings.password {
            options = options.password(password);
        }
        if let Some(ssl) = settings.ssl.or(self.pool_ssl) {
            options = options.ssl_mode(ssl.to_pg());
        }
        Ok(options)
    }
}

// ============================================================================
// Backend
// ============================================================================

/// sqlx-backed [`Backend`] for postgres, nile, cockroachdb and awsdsql.
pub struct PgFamilyBackend {
    dialect: String,
    target: Arc<ConnectTarget>,
    environment: RuntimeEnvironment,
    pool_settings: PoolSettings,
    pooled: bool,
    log_level: LogLevel,
    events: EventBus,
    pool: RwLock<Option<PgPool>>,
    /// Expiry of the DSQL token baked into the pool's connect options
    pool_token_expiry: parking_lot::Mutex<Option<i64>>,
    single: Mutex<Option<PgConnection>>,
}

impl std::fmt::Debug for PgFamilyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool = self.pool.read();
        f.debug_struct("PgFamilyBackend")
            .field("dialect", &self.dialect)
            .field("environment", &self.environment.kind)
            .field("pooled", &self.pooled)
            .field("aws", &self.target.is_aws())
            .field("pool_size", &pool.as_ref().map(|p| p.size()))
            .finish()
    }
}

impl PgFamilyBackend {
    /// Build a backend from the process environment with its own token
    /// memory tier.
    pub fn new(dialect: &str, config: &ClientConfig, force_aws: bool, events: EventBus) -> Result<Self> {
        Self::with_env(
            dialect,
            config,
            force_aws,
            events,
            &ProcessEnv,
            Arc::new(DsqlTokenCache::new()),
        )
    }

    /// Build a backend from an explicit variable source and token cache.
    ///
    /// # Errors
    ///
    /// Configuration errors for missing endpoints, missing AWS settings or
    /// invalid pool settings (`min > max`).
    pub fn with_env(
        dialect: &str,
        config: &ClientConfig,
        force_aws: bool,
        events: EventBus,
        env: &dyn EnvSource,
        token_cache: Arc<DsqlTokenCache>,
    ) -> Result<Self> {
        let environment = detect_environment_from(env);
        let pooled = config.pooling_enabled();
        let log_level = config.log_level;

        let (settings, aws) = if force_aws || config.uses_aws() {
            (ConnectionSettings::default(), Some(merge_aws_env(config.aws.as_ref(), env)?))
        } else {
            (merge_postgres_env(&config.connection, env)?, None)
        };

        if !config.pool.disable_smart_defaults {
            let validation = validate_pool_settings(&config.pool, &environment);
            if log_level.allows(LogLevel::Warn) {
                for warning in &validation.warnings {
                    warn!(dialect, environment = %environment.kind, "{}", warning);
                }
            }
            if !validation.is_valid() {
                return Err(PgKitError::Configuration(format!(
                    "Invalid pool configuration: {}",
                    validation.errors.join("; ")
                )));
            }
            if pooled && log_level.allows(LogLevel::Info) {
                info!(
                    dialect,
                    provider = environment.provider.as_deref().unwrap_or("none"),
                    "{}",
                    smart_pool_defaults(&environment).recommendation
                );
            }
        }

        debug!(dialect, pooled, aws = aws.is_some(), "Backend configured");

        Ok(Self {
            dialect: dialect.to_string(),
            target: Arc::new(ConnectTarget {
                settings,
                aws,
                pool_ssl: config.pool.ssl,
                application_name: config.pool.application_name.clone(),
                token_cache,
            }),
            environment,
            pool_settings: config.pool.clone(),
            pooled,
            log_level,
            events,
            pool: RwLock::new(None),
            pool_token_expiry: parking_lot::Mutex::new(None),
            single: Mutex::new(None),
        })
    }

    pub fn environment(&self) -> &RuntimeEnvironment {
        &self.environment
    }

    pub fn target(&self) -> &Arc<ConnectTarget> {
        &self.target
    }

    fn current_pool(&self) -> Result<PgPool> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| PgKitError::connection("Connection pool is not initialized"))
    }

    async fn open_pool(&self) -> Result<PgPool> {
        let (options, expires_at) = self.target.connect_options_with_expiry().await?;
        *self.pool_token_expiry.lock() = expires_at;
        let effective = effective_pool(&self.pool_settings, &self.environment);

        let on_connect = self.events.clone();
        let on_acquire = self.events.clone();

        let pool = PgPoolOptions::new()
            .min_connections(effective.min)
            .max_connections(effective.max)
            .idle_timeout(effective.idle_timeout)
            .acquire_timeout(effective.connection_timeout)
            .after_connect(move |_conn, _meta| {
                let events = on_connect.clone();
                Box::pin(async move {
                    events.emit(ClientEvent::Connect);
                    Ok(())
                })
            })
            .before_acquire(move |_conn, _meta| {
                let events = on_acquire.clone();
                Box::pin(async move {
                    events.emit(ClientEvent::Acquire);
                    Ok(true)
                })
            })
            .connect_with(options)
            .await?;

        info!(
            dialect = %self.dialect,
            min = effective.min,
            max = effective.max,
            "Connection pool initialized"
        );
        Ok(pool)
    }

    async fn open_single(&self) -> Result<PgConnection> {
        let options = self.target.connect_options().await?;
        let conn = PgConnection::connect_with(&options).await?;
        self.events.emit(ClientEvent::Connect);
        debug!(dialect = %self.dialect, "Single connection opened");
        Ok(conn)
    }

    /// Swap a fresh DSQL token into the pool's connect options once the
    /// current one has expired. Open connections are unaffected; only new
    /// physical connections authenticate.
    async fn refresh_pool_credentials(&self, pool: &PgPool) -> Result<()> {
        let expires_at = *self.pool_token_expiry.lock();
        match expires_at {
            Some(at) if at <= Utc::now().timestamp_millis() => {}
            _ => return Ok(()),
        }

        let (options, expires_at) = self.target.connect_options_with_expiry().await?;
        pool.set_connect_options(options);
        *self.pool_token_expiry.lock() = expires_at;
        debug!(dialect = %self.dialect, "Pool credentials refreshed with a new DSQL token");
        Ok(())
    }

    async fn pool_for_use(&self) -> Result<PgPool> {
        let pool = self.current_pool()?;
        self.refresh_pool_credentials(&pool).await?;
        Ok(pool)
    }

    async fn query_pooled(&self, sql: &str) -> Result<ExecutionResult> {
        let pool = self.pool_for_use().await?;
        match run_query(&pool, sql).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if let Some(recoverable) = pool_error_recoverable(&e) {
                    self.report_pool_error(&e, recoverable);
                }
                Err(e.with_sql(sql))
            }
        }
    }

    async fn query_single(&self, sql: &str) -> Result<ExecutionResult> {
        let mut guard = self.single.lock().await;
        query_reconnecting(self, &mut *guard, &self.dialect, sql).await
    }

    fn report_pool_error(&self, err: &PgKitError, recoverable: bool) {
        if self.log_level.allows(LogLevel::Warn) {
            if recoverable {
                warn!(dialect = %self.dialect, error = %err, "Pool connection error, pool will auto-recover");
            } else {
                tracing::error!(dialect = %self.dialect, error = %err, "Pool fault");
            }
        }
        self.events.emit(ClientEvent::Error {
            message: err.to_string(),
            recoverable,
        });
        if recoverable {
            self.events.emit(ClientEvent::Remove);
        }
    }
}

#[async_trait]
impl Backend for PgFamilyBackend {
    fn is_pooled(&self) -> bool {
        self.pooled
    }

    #[instrument(skip(self), fields(dialect = %self.dialect, pooled = self.pooled))]
    async fn initialize(&self) -> Result<()> {
        if self.pooled {
            let pool = self.open_pool().await?;
            *self.pool.write() = Some(pool);
        } else {
            // Connect eagerly so configuration problems surface at init
            let mut guard = self.single.lock().await;
            if guard.is_none() {
                *guard = Some(self.open_single().await?);
            }
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<ExecutionResult> {
        if self.pooled {
            self.query_pooled(sql).await
        } else {
            self.query_single(sql).await
        }
    }

    async fn acquire(&self) -> Result<Box<dyn BackendConnection>> {
        if self.pooled {
            let pool = self.pool_for_use().await?;
            let conn = match pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    let e = PgKitError::from(e);
                    if let Some(recoverable) = pool_error_recoverable(&e) {
                        self.report_pool_error(&e, recoverable);
                    }
                    return Err(e);
                }
            };
            Ok(Box::new(PooledConnection { conn }))
        } else {
            let conn = self.open_single().await?;
            Ok(Box::new(DedicatedConnection { conn }))
        }
    }

    #[instrument(skip(self), fields(dialect = %self.dialect))]
    async fn close(&self) -> Result<()> {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        let conn = self.single.lock().await.take();
        if let Some(conn) = conn {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing single connection");
            }
        }
        self.events.emit(ClientEvent::End);
        info!("Connections closed");
        Ok(())
    }

    fn listener_connector(&self) -> Option<Arc<dyn ListenerConnector>> {
        Some(Arc::new(PgListenerConnector {
            target: self.target.clone(),
        }))
    }
}

/// Whether a failed pooled operation is a pool event and, if so, whether
/// the pool recovers on its own. Statement-level errors are not pool events.
fn pool_error_recoverable(err: &PgKitError) -> Option<bool> {
    if err.is_connection_error() {
        Some(true)
    } else if matches!(err, PgKitError::Internal(_) | PgKitError::Configuration(_)) {
        Some(false)
    } else {
        None
    }
}

// ============================================================================
// Single-connection mode
// ============================================================================

/// A connection that can run statements.
#[async_trait]
trait Session: Send {
    async fn run(&mut self, sql: &str) -> Result<ExecutionResult>;
}

#[async_trait]
impl Session for PgConnection {
    async fn run(&mut self, sql: &str) -> Result<ExecutionResult> {
        run_query(self, sql).await
    }
}

/// Opens the connection used in single mode.
#[async_trait]
trait SessionOpener: Sync {
    type Session: Session;

    async fn open(&self) -> Result<Self::Session>;
}

#[async_trait]
impl SessionOpener for PgFamilyBackend {
    type Session = PgConnection;

    async fn open(&self) -> Result<PgConnection> {
        self.open_single().await
    }
}

/// Run `sql` on the connection in `slot`, opening it first when empty.
///
/// A connection-class failure drops the connection, opens a new one (which
/// re-resolves credentials) and retries once.
async fn query_reconnecting<O>(
    opener: &O,
    slot: &mut Option<O::Session>,
    dialect: &str,
    sql: &str,
) -> Result<ExecutionResult>
where
    O: SessionOpener + ?Sized,
{
    if slot.is_none() {
        *slot = Some(opener.open().await?);
    }
    let Some(session) = slot.as_mut() else {
        return Err(PgKitError::connection("No database connection"));
    };

    match session.run(sql).await {
        Ok(result) => Ok(result),
        Err(e) if e.is_connection_error() => {
            warn!(dialect, error = %e, "Connection lost, reconnecting and retrying once");
            *slot = None;
            let session = slot.insert(opener.open().await.map_err(|e| e.with_sql(sql))?);
            session.run(sql).await.map_err(|e| e.with_sql(sql))
        }
        Err(e) => Err(e.with_sql(sql)),
    }
}

// ============================================================================
// Dedicated connections
// ============================================================================

struct PooledConnection {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl BackendConnection for PooledConnection {
    async fn query(&mut self, sql: &str) -> Result<ExecutionResult> {
        run_query(&mut *self.conn, sql).await.map_err(|e| e.with_sql(sql))
    }
}

struct DedicatedConnection {
    conn: PgConnection,
}

#[async_trait]
impl BackendConnection for DedicatedConnection {
    async fn query(&mut self, sql: &str) -> Result<ExecutionResult> {
        run_query(&mut self.conn, sql).await.map_err(|e| e.with_sql(sql))
    }
}

/// Execute `sql` with the simple query protocol and drain every result set.
async fn run_query<'e, E>(executor: E, sql: &'e str) -> Result<ExecutionResult>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut stream = executor.fetch_many(sql);
    let mut result = ExecutionResult {
        command: command_tag(sql),
        ..Default::default()
    };
    let mut affected = 0u64;

    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => affected += done.rows_affected(),
            Either::Right(row) => {
                if result.fields.is_empty() {
                    result.fields = rows::fields_of(&row);
                }
                result.rows.push(rows::decode_row(&row)?);
            }
        }
    }

    result.row_count = Some(affected.max(result.rows.len() as u64));
    Ok(result)
}

// ============================================================================
// Listener connections
// ============================================================================

/// Opens LISTEN connections against the backend's endpoint.
pub struct PgListenerConnector {
    target: Arc<ConnectTarget>,
}

#[async_trait]
impl ListenerConnector for PgListenerConnector {
    async fn connect(&self) -> Result<Box<dyn ListenerConnection>> {
        let options = self.target.connect_options().await?;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(options);
        let listener = PgListener::connect_with(&pool).await?;
        Ok(Box::new(SqlxListenerConnection {
            listener,
            _pool: pool,
        }))
    }
}

struct SqlxListenerConnection {
    listener: PgListener,
    _pool: PgPool,
}

#[async_trait]
impl ListenerConnection for SqlxListenerConnection {
    async fn listen(&mut self, channel: &str) -> Result<()> {
        // PgListener quotes the channel as an identifier
        self.listener.listen(channel).await?;
        Ok(())
    }

    async fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.listener.unlisten(channel).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Notification>> {
        let received = self.listener.try_recv().await?;
        Ok(received.map(|n| Notification {
            channel: n.channel().to_string(),
            payload: n.payload().to_string(),
            process_id: n.process_id(),
        }))
    }
}
