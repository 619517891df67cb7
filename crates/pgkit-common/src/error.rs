//! Error types for pgkit

use std::fmt;

use thiserror::Error;

/// Result type alias for pgkit operations
pub type Result<T> = std::result::Result<T, PgKitError>;

/// Maximum number of SQL characters carried in an error message.
pub const SQL_PREVIEW_LEN: usize = 200;

/// Unified error type for all pgkit operations
#[derive(Error, Debug, Clone)]
pub enum PgKitError {
    /// Missing or invalid configuration, unsupported dialect, absent credentials.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid SQL submission or no usable connection.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        /// Driver code (SQLSTATE or network code such as `ECONNRESET`)
        code: Option<String>,
        /// Code of the underlying error this one wraps
        cause_code: Option<String>,
    },

    /// Statement execution failure that is not connection-level.
    #[error("Query error: {message}{}", SqlSuffix(.sql))]
    Query {
        message: String,
        code: Option<String>,
        cause_code: Option<String>,
        /// The SQL that failed, truncated
        sql: Option<String>,
    },

    /// Feature denied by the dialect's capability table.
    #[error("Dialect error: '{feature}' is not supported by the {dialect} dialect{}", SuggestionSuffix(.suggestion))]
    Dialect {
        dialect: String,
        feature: String,
        suggestion: Option<String>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

struct SqlSuffix<'a>(&'a Option<String>);

impl fmt::Display for SqlSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(sql) => write!(f, " (SQL: {})", sql),
            None => Ok(()),
        }
    }
}

struct SuggestionSuffix<'a>(&'a Option<String>);

impl fmt::Display for SuggestionSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(hint) => write!(f, ". {}", hint),
            None => Ok(()),
        }
    }
}

impl PgKitError {
    /// Connection error without a driver code.
    pub fn connection(message: impl Into<String>) -> Self {
        PgKitError::Connection {
            message: message.into(),
            code: None,
            cause_code: None,
        }
    }

    /// Connection error carrying a driver code.
    pub fn connection_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        PgKitError::Connection {
            message: message.into(),
            code: Some(code.into()),
            cause_code: None,
        }
    }

    /// Query error without a driver code.
    pub fn query(message: impl Into<String>) -> Self {
        PgKitError::Query {
            message: message.into(),
            code: None,
            cause_code: None,
            sql: None,
        }
    }

    /// Query error carrying a driver code.
    pub fn query_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        PgKitError::Query {
            message: message.into(),
            code: Some(code.into()),
            cause_code: None,
            sql: None,
        }
    }

    /// Capability denial for `feature` on `dialect`.
    pub fn dialect(
        dialect: impl Into<String>,
        feature: impl Into<String>,
        suggestion: Option<String>,
    ) -> Self {
        PgKitError::Dialect {
            dialect: dialect.into(),
            feature: feature.into(),
            suggestion,
        }
    }

    /// The driver code attached to this error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            PgKitError::Connection { code, .. } | PgKitError::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The code of the wrapped cause, if any.
    pub fn cause_code(&self) -> Option<&str> {
        match self {
            PgKitError::Connection { cause_code, .. } | PgKitError::Query { cause_code, .. } => {
                cause_code.as_deref()
            }
            _ => None,
        }
    }

    /// Records `code` as the cause code of this error.
    pub fn with_cause_code(mut self, code: impl Into<String>) -> Self {
        match &mut self {
            PgKitError::Connection { cause_code, .. } | PgKitError::Query { cause_code, .. } => {
                *cause_code = Some(code.into());
            }
            _ => {}
        }
        self
    }

    /// Annotates the error with the SQL that failed.
    ///
    /// Connection-level errors keep their kind and gain the SQL in the message;
    /// everything that is not already a configuration or dialect error becomes
    /// a query error carrying the truncated statement.
    pub fn with_sql(self, sql: &str) -> Self {
        let preview = sql_preview(sql);
        match self {
            PgKitError::Query {
                message,
                code,
                cause_code,
                ..
            } => PgKitError::Query {
                message,
                code,
                cause_code,
                sql: Some(preview),
            },
            PgKitError::Connection {
                message,
                code,
                cause_code,
            } => PgKitError::Connection {
                message: format!("{} (SQL: {})", message, preview),
                code,
                cause_code,
            },
            PgKitError::Configuration(_) | PgKitError::Dialect { .. } => self,
            other => PgKitError::Query {
                message: other.to_string(),
                code: None,
                cause_code: None,
                sql: Some(preview),
            },
        }
    }

    /// Returns true if this is a connection-level error
    pub fn is_connection_error(&self) -> bool {
        match self {
            PgKitError::Connection { .. } => true,
            _ => self
                .code()
                .map(|code| code.starts_with("08"))
                .unwrap_or(false),
        }
    }
}

/// Truncates SQL for inclusion in errors and logs.
pub fn sql_preview(sql: &str) -> String {
    if sql.chars().count() <= SQL_PREVIEW_LEN {
        sql.to_string()
    } else {
        let mut preview: String = sql.chars().take(SQL_PREVIEW_LEN).collect();
        preview.push_str("...");
        preview
    }
}

impl From<serde_json::Error> for PgKitError {
    fn from(err: serde_json::Error) -> Self {
        PgKitError::Serialization(err.to_string())
    }
}

/// Maps an I/O error to the conventional network error code.
pub fn io_error_code(err: &std::io::Error) -> Option<&'static str> {
    use std::io::ErrorKind;

    let code = match err.kind() {
        ErrorKind::ConnectionReset => "ECONNRESET",
        ErrorKind::ConnectionRefused => "ECONNREFUSED",
        ErrorKind::ConnectionAborted => "ECONNABORTED",
        ErrorKind::TimedOut => "ETIMEDOUT",
        ErrorKind::BrokenPipe => "EPIPE",
        ErrorKind::UnexpectedEof => "ECONNRESET",
        ErrorKind::HostUnreachable => "EHOSTUNREACH",
        ErrorKind::NetworkUnreachable => "ENETUNREACH",
        _ => {
            // tokio surfaces resolver failures as uncategorized errors
            let message = err.to_string();
            if message.contains("lookup address") || message.contains("Name or service not known") {
                "ENOTFOUND"
            } else if message.contains("Temporary failure in name resolution") {
                "EAI_AGAIN"
            } else {
                return None;
            }
        }
    };
    Some(code)
}

// PostgreSQL-specific error conversions (when postgres-errors feature is enabled)
#[cfg(feature = "postgres-errors")]
impl From<sqlx::Error> for PgKitError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => PgKitError::Configuration(err.to_string()),
            Error::Database(db_err) => {
                // See: https://www.postgresql.org/docs/current/errcodes-appendix.html
                match db_err.code() {
                    Some(code) => {
                        let code_str: &str = &code;
                        match code_str {
                            // Connection exception (class 08)
                            c if c.starts_with("08") => {
                                PgKitError::connection_with_code(err.to_string(), c)
                            }
                            // Admin / crash shutdown terminate the session
                            "57P01" | "57P02" | "57P03" => {
                                PgKitError::connection_with_code(err.to_string(), code_str)
                            }
                            c => PgKitError::query_with_code(err.to_string(), c),
                        }
                    }
                    None => PgKitError::query(err.to_string()),
                }
            }
            Error::Io(io_err) => match io_error_code(io_err) {
                Some(code) => PgKitError::connection_with_code(err.to_string(), code),
                None => PgKitError::connection(err.to_string()),
            },
            Error::Tls(_) => PgKitError::connection(err.to_string()),
            Error::Protocol(_) => PgKitError::connection(err.to_string()),
            Error::PoolTimedOut => {
                PgKitError::connection_with_code("Connection pool timed out", "ETIMEDOUT")
            }
            Error::PoolClosed => PgKitError::connection("Connection pool closed"),
            Error::WorkerCrashed => PgKitError::Internal("Worker thread crashed".to_string()),
            Error::RowNotFound => PgKitError::query("Row not found"),
            Error::TypeNotFound { .. } => PgKitError::Deserialization(err.to_string()),
            Error::ColumnDecode { .. } => PgKitError::Deserialization(err.to_string()),
            Error::Decode(_) => PgKitError::Deserialization(err.to_string()),
            _ => PgKitError::query(err.to_string()),
        }
    }
}
