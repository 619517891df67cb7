//! Shaped query results.

use crate::backend::{ExecutionResult, FieldInfo};
use crate::value::Row;

/// Metadata attached to every shaped result.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub row_count: Option<u64>,
    pub command: String,
    /// Wall-clock time of the query including retries, in milliseconds
    pub duration_ms: f64,
    pub fields: Vec<FieldInfo>,
}

impl Metadata {
    pub fn from_execution(result: &ExecutionResult, duration_ms: f64) -> Self {
        Self {
            row_count: result.row_count,
            command: result.command.clone(),
            duration_ms,
            fields: result.fields.clone(),
        }
    }
}

/// Raw driver result plus how long it took.
#[derive(Debug, Clone)]
pub struct TimedResult {
    pub result: ExecutionResult,
    pub duration_ms: f64,
}

impl TimedResult {
    pub fn metadata(&self) -> Metadata {
        Metadata::from_execution(&self.result, self.duration_ms)
    }
}

/// Rows of a SELECT, keyed by property name when a table was given.
#[derive(Debug, Clone)]
pub struct SelectResult {
    pub rows: Vec<Row>,
    pub metadata: Metadata,
}

impl SelectResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a statement whose rows are discarded.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    pub metadata: Metadata,
}
