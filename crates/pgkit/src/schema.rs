//! Schema data model consumed by the runtime.
//!
//! The schema DSL lives outside this crate; this module holds the resulting
//! definitions. Two naming planes co-exist: application keys (used in code)
//! and database names (emitted into SQL).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// SQL type used when a column definition omits one.
pub const DEFAULT_SQL_TYPE: &str = "TEXT";

// ============================================================================
// Column Definition
// ============================================================================

/// Domain check invoked during validation. Returns a failure message on rejection.
pub type DomainCheckFn = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// A named domain predicate attached to a column.
#[derive(Clone)]
pub struct DomainCheck {
    /// Domain name, used in failure messages
    pub name: String,
    pub check: DomainCheckFn,
}

impl DomainCheck {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn run(&self, value: &Value) -> std::result::Result<(), String> {
        (self.check)(value)
    }
}

impl fmt::Debug for DomainCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainCheck")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Foreign key reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Referenced table (database name)
    pub table: String,
    /// Referenced column
    pub column: String,
}

/// Column definition as produced by the schema DSL.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Database column name; `None` means "same as the property name"
    pub column_name: Option<String>,
    /// SQL type string, e.g. `BIGINT` or `VARCHAR(255)`
    pub sql_type: String,
    pub nullable: bool,
    /// Default-value expression
    pub default: Option<String>,
    pub primary_key: bool,
    pub unique: bool,
    pub foreign_key: Option<ForeignKeyRef>,
    /// Allowed values for enumerated columns
    pub enum_values: Option<Vec<String>>,
    pub domain: Option<DomainCheck>,
    /// Sub-fields of a composite type
    pub composite: Option<BTreeMap<String, ColumnDef>>,
}

impl ColumnDef {
    /// Create a column of the given SQL type. An empty type falls back to TEXT.
    pub fn new(sql_type: impl Into<String>) -> Self {
        let sql_type = sql_type.into();
        let sql_type = if sql_type.trim().is_empty() {
            DEFAULT_SQL_TYPE.to_string()
        } else {
            sql_type
        };
        Self {
            column_name: None,
            sql_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            foreign_key: None,
            enum_values: None,
            domain: None,
            composite: None,
        }
    }

    /// Set the database column name.
    pub fn named(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = Some(column_name.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKeyRef {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn domain(mut self, domain: DomainCheck) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn composite_field(mut self, name: impl Into<String>, field: ColumnDef) -> Self {
        self.composite
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), field);
        self
    }

    /// Database column name for the given property.
    pub fn column_name_for<'a>(&'a self, property: &'a str) -> &'a str {
        self.column_name.as_deref().unwrap_or(property)
    }
}

// ============================================================================
// Table Definition
// ============================================================================

/// Table definition keyed by property name.
#[derive(Debug, Clone, Default)]
pub struct TableDef {
    /// Database table name; `None` means "same as the application key"
    pub name: Option<String>,
    /// Property name -> column; `None` for tables declared without columns
    pub columns: Option<BTreeMap<String, ColumnDef>>,
}

impl TableDef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database table name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a column.
    pub fn column(mut self, property: impl Into<String>, column: ColumnDef) -> Self {
        self.columns
            .get_or_insert_with(BTreeMap::new)
            .insert(property.into(), column);
        self
    }
}

// ============================================================================
// Relations
// ============================================================================

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    One,
    Many,
}

/// Relation between two tables, keyed by application table keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub source_table: String,
    pub target_table: String,
    pub kind: RelationKind,
    /// Local properties
    pub fields: Vec<String>,
    /// Referenced properties on the target table
    pub references: Vec<String>,
}

// ============================================================================
// Schema
// ============================================================================

/// Mapping from application table keys to table definitions.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: BTreeMap<String, TableDef>,
    relations: BTreeMap<String, RelationDef>,
    enums: BTreeMap<String, Vec<String>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table under its application key.
    pub fn table(mut self, key: impl Into<String>, table: TableDef) -> Self {
        self.tables.insert(key.into(), table);
        self
    }

    /// Add a named relation.
    pub fn relation(mut self, name: impl Into<String>, relation: RelationDef) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    /// Register an enum type.
    pub fn enum_type<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enums
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Look up a table by application key.
    pub fn get(&self, key: &str) -> Option<&TableDef> {
        self.tables.get(key)
    }

    /// Iterate over `(application key, table)` pairs.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableDef)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationDef> {
        &self.relations
    }

    pub fn enums(&self) -> &BTreeMap<String, Vec<String>> {
        &self.enums
    }

    /// Database name of the table stored under `key`.
    pub fn database_name<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        self.tables
            .get(key)
            .map(|t| t.name.as_deref().unwrap_or(key))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
