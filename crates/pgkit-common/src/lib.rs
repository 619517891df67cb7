//! Shared types for the pgkit workspace.

pub mod error;

pub use error::{io_error_code, sql_preview, PgKitError, Result, SQL_PREVIEW_LEN};
