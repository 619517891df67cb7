//! Row validation against the schema before mutating SQL is sent.
//!
//! Checks run per mapped property: type family, `(VAR)CHAR(N)` length,
//! domain predicate, composite sub-fields and enum membership. Null values
//! are never checked.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::coerce::TypeFamily;
use crate::config::{OnValidationError, ValidationPolicy};
use crate::mapping::ColumnMapping;
use crate::schema::ColumnDef;
use crate::value::{Row, Value};
use crate::{PgKitError, Result};

static LENGTH_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:VARCHAR|CHAR|CHARACTER VARYING|CHARACTER)\s*\(\s*(\d+)\s*\)\s*$")
        .unwrap()
});

// ============================================================================
// Issues
// ============================================================================

/// Kind of a single validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Type,
    Length,
    Domain,
    Enum,
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Property path, dotted for composite sub-fields
    pub field: String,
    pub kind: IssueKind,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All failures found in one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub table: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    fn add(&mut self, field: &str, kind: IssueKind, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            field: field.to_string(),
            kind,
            message: message.into(),
        });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} validation error(s) for table '{}': ",
            self.issues.len(),
            self.table
        )?;
        let joined = self
            .issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Validate `row` (keyed by property name) against `mapping`.
///
/// Returns the report of every failure. With `on_error = Throw` a non-empty
/// report becomes one aggregated [`PgKitError::Validation`]; `Warn` and `Log`
/// emit the report through tracing and return `Ok`.
pub fn validate_row(
    mapping: &ColumnMapping,
    row: &Row,
    policy: &ValidationPolicy,
) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        table: mapping.table.clone(),
        issues: Vec::new(),
    };

    if !policy.enabled {
        return Ok(report);
    }

    for shape in mapping.shapes() {
        let Some(value) = row.get(&shape.property) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        check_scalar(&shape.property, &shape.sql_type, shape.family, value, policy, &mut report);

        if let Some(domain) = mapping.domain(&shape.property) {
            if let Err(message) = domain.run(value) {
                report.add(
                    &shape.property,
                    IssueKind::Domain,
                    format!("domain '{}' rejected value: {}", domain.name, message),
                );
            }
        }

        if let Some(fields) = mapping.composite(&shape.property) {
            check_composite(&shape.property, fields, value, policy, &mut report);
        }

        if let (Some(allowed), Value::Text(text)) = (mapping.enum_values(&shape.property), value) {
            check_enum(&shape.property, allowed, text, &mut report);
        }
    }

    if report.is_empty() {
        return Ok(report);
    }

    match policy.on_error {
        OnValidationError::Throw => Err(PgKitError::Validation(report.to_string())),
        OnValidationError::Warn => {
            warn!(table = %report.table, issues = report.issues.len(), "{}", report);
            Ok(report)
        }
        OnValidationError::Log => {
            info!(table = %report.table, issues = report.issues.len(), "{}", report);
            Ok(report)
        }
    }
}

/// Maximum length declared by a `VARCHAR(N)`-style type.
pub fn length_limit(sql_type: &str) -> Option<usize> {
    LENGTH_LIMIT
        .captures(sql_type)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ============================================================================
// Checks
// ============================================================================

fn check_scalar(
    field: &str,
    sql_type: &str,
    family: TypeFamily,
    value: &Value,
    policy: &ValidationPolicy,
    report: &mut ValidationReport,
) {
    if policy.validate_types {
        if let Some(expected) = type_mismatch(family, value) {
            report.add(
                field,
                IssueKind::Type,
                format!("expected {}, got {}", expected, value.type_name()),
            );
            return;
        }
    }

    if policy.validate_length {
        if let (Some(limit), Value::Text(text)) = (length_limit(sql_type), value) {
            let len = text.chars().count();
            if len > limit {
                report.add(
                    field,
                    IssueKind::Length,
                    format!("length {} exceeds maximum {}", len, limit),
                );
            }
        }
    }
}

/// Returns the expected type name when `value` does not fit `family`.
fn type_mismatch(family: TypeFamily, value: &Value) -> Option<&'static str> {
    let ok = match family {
        TypeFamily::Integer => match value {
            Value::Int(_) | Value::BigInt(_) => true,
            Value::Float(f) => f.fract() == 0.0,
            _ => false,
        },
        TypeFamily::Real => matches!(value, Value::Int(_) | Value::Float(_) | Value::BigInt(_)),
        TypeFamily::Text => matches!(value, Value::Text(_)),
        TypeFamily::Boolean => matches!(value, Value::Bool(_)),
        TypeFamily::Uuid => match value {
            Value::Text(s) => uuid::Uuid::parse_str(s).is_ok(),
            _ => false,
        },
        _ => true,
    };

    if ok {
        return None;
    }

    Some(match family {
        TypeFamily::Integer => "integer",
        TypeFamily::Real => "number",
        TypeFamily::Text => "string",
        TypeFamily::Boolean => "boolean",
        TypeFamily::Uuid => "uuid",
        _ => "value",
    })
}

fn check_enum(field: &str, allowed: &[String], text: &str, report: &mut ValidationReport) {
    if !allowed.iter().any(|v| v == text) {
        report.add(
            field,
            IssueKind::Enum,
            format!("'{}' is not one of [{}]", text, allowed.join(", ")),
        );
    }
}

fn check_composite(
    prefix: &str,
    fields: &BTreeMap<String, ColumnDef>,
    value: &Value,
    policy: &ValidationPolicy,
    report: &mut ValidationReport,
) {
    let Value::Object(object) = value else {
        if policy.validate_types {
            report.add(
                prefix,
                IssueKind::Type,
                format!("expected object, got {}", value.type_name()),
            );
        }
        return;
    };

    for (name, def) in fields {
        let Some(sub) = object.get(name) else {
            continue;
        };
        if sub.is_null() {
            continue;
        }
        let path = format!("{}.{}", prefix, name);

        check_scalar(&path, &def.sql_type, TypeFamily::classify(&def.sql_type), sub, policy, report);

        if let Some(domain) = &def.domain {
            if let Err(message) = domain.run(sub) {
                report.add(
                    &path,
                    IssueKind::Domain,
                    format!("domain '{}' rejected value: {}", domain.name, message),
                );
            }
        }
        if let (Some(allowed), Value::Text(text)) = (&def.enum_values, sub) {
            check_enum(&path, allowed, text, report);
        }
        if let Some(nested) = &def.composite {
            check_composite(&path, nested, sub, policy, report);
        }
    }
}
