//! Per-table column mappings between application property names and
//! database column names.
//!
//! Mappings are precompiled once at client construction into an ordered
//! list of [`ColumnShape`] records so that translation is a tight loop.

use std::collections::{BTreeMap, HashMap};

use crate::coerce::{deserialize_value, serialize_value, TypeFamily};
use crate::schema::{ColumnDef, DomainCheck, Schema};
use crate::value::Row;

/// One mapped column.
#[derive(Debug, Clone)]
pub struct ColumnShape {
    pub property: String,
    pub column: String,
    pub sql_type: String,
    pub family: TypeFamily,
}

/// Bidirectional mapping for a single database table.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    /// Database table name
    pub table: String,
    shapes: Vec<ColumnShape>,
    by_property: HashMap<String, usize>,
    by_column: HashMap<String, usize>,
    enum_values: HashMap<String, Vec<String>>,
    domains: HashMap<String, DomainCheck>,
    composites: HashMap<String, BTreeMap<String, ColumnDef>>,
}

impl ColumnMapping {
    /// Build the mapping for one table's columns.
    pub fn build(table: impl Into<String>, columns: &BTreeMap<String, ColumnDef>) -> Self {
        let mut mapping = ColumnMapping {
            table: table.into(),
            ..Default::default()
        };

        for (property, def) in columns {
            let column = def.column_name_for(property).to_string();
            let idx = mapping.shapes.len();
            mapping.shapes.push(ColumnShape {
                property: property.clone(),
                column: column.clone(),
                sql_type: def.sql_type.clone(),
                family: TypeFamily::classify(&def.sql_type),
            });
            mapping.by_property.insert(property.clone(), idx);
            mapping.by_column.insert(column, idx);

            if let Some(values) = &def.enum_values {
                mapping.enum_values.insert(property.clone(), values.clone());
            }
            if let Some(domain) = &def.domain {
                mapping.domains.insert(property.clone(), domain.clone());
            }
            if let Some(fields) = &def.composite {
                mapping.composites.insert(property.clone(), fields.clone());
            }
        }

        mapping
    }

    pub fn shapes(&self) -> &[ColumnShape] {
        &self.shapes
    }

    pub fn by_property(&self, property: &str) -> Option<&ColumnShape> {
        self.by_property.get(property).map(|&i| &self.shapes[i])
    }

    pub fn by_column(&self, column: &str) -> Option<&ColumnShape> {
        self.by_column.get(column).map(|&i| &self.shapes[i])
    }

    pub fn column_for(&self, property: &str) -> Option<&str> {
        self.by_property(property).map(|s| s.column.as_str())
    }

    pub fn property_for(&self, column: &str) -> Option<&str> {
        self.by_column(column).map(|s| s.property.as_str())
    }

    pub fn enum_values(&self, property: &str) -> Option<&[String]> {
        self.enum_values.get(property).map(Vec::as_slice)
    }

    pub fn domain(&self, property: &str) -> Option<&DomainCheck> {
        self.domains.get(property)
    }

    pub fn composite(&self, property: &str) -> Option<&BTreeMap<String, ColumnDef>> {
        self.composites.get(property)
    }

    /// Translate an application row into a database row.
    ///
    /// Unmapped properties pass through unchanged.
    pub fn to_database(&self, row: Row) -> Row {
        row.into_iter()
            .map(|(key, value)| match self.by_property(&key) {
                Some(shape) => (shape.column.clone(), serialize_value(value, shape.family)),
                None => (key, value),
            })
            .collect()
    }

    /// Translate a database row into an application row.
    pub fn from_database(&self, row: Row) -> Row {
        row.into_iter()
            .map(|(key, value)| match self.by_column(&key) {
                Some(shape) => (shape.property.clone(), deserialize_value(value, shape.family)),
                None => (key, value),
            })
            .collect()
    }
}

/// All mappings of a schema, keyed by database table name.
#[derive(Debug, Clone, Default)]
pub struct ColumnMappings {
    tables: HashMap<String, ColumnMapping>,
    /// Application key -> database table name
    keys: HashMap<String, String>,
}

impl ColumnMappings {
    /// Build mappings for every table that declares columns.
    pub fn build(schema: &Schema) -> Self {
        let mut mappings = ColumnMappings::default();
        for (key, table) in schema.tables() {
            let Some(columns) = &table.columns else {
                continue;
            };
            let name = table.name.as_deref().unwrap_or(key).to_string();
            mappings.keys.insert(key.to_string(), name.clone());
            mappings
                .tables
                .insert(name.clone(), ColumnMapping::build(name, columns));
        }
        mappings
    }

    /// Look up by database table name, falling back to the application key.
    pub fn get(&self, table: &str) -> Option<&ColumnMapping> {
        self.tables.get(table).or_else(|| {
            self.keys
                .get(table)
                .and_then(|name| self.tables.get(name))
        })
    }

    /// Forward-translate a row; rows for unknown tables pass through.
    pub fn to_database(&self, table: &str, row: Row) -> Row {
        match self.get(table) {
            Some(mapping) => mapping.to_database(row),
            None => row,
        }
    }

    /// Inverse-translate a row; rows for unknown tables pass through.
    pub fn from_database(&self, table: &str, row: Row) -> Row {
        match self.get(table) {
            Some(mapping) => mapping.from_database(row),
            None => row,
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
