//! Dialect tags and per-dialect capability tables.

use std::fmt;
use std::str::FromStr;

use crate::{PgKitError, Result};

/// PostgreSQL-wire dialects with a working client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    /// Nile multi-tenant Postgres
    Nile,
    CockroachDb,
    AwsDsql,
}

/// Tags that are recognized but have no client.
pub const UNIMPLEMENTED_DIALECTS: &[&str] =
    &["sqlite", "turso", "mysql", "mariadb", "planetscale", "xata"];

impl Dialect {
    pub const SUPPORTED: [Dialect; 4] = [
        Dialect::Postgres,
        Dialect::Nile,
        Dialect::CockroachDb,
        Dialect::AwsDsql,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Nile => "nile",
            Dialect::CockroachDb => "cockroachdb",
            Dialect::AwsDsql => "awsdsql",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_dialect(*self)
    }

    fn supported_list() -> String {
        Self::SUPPORTED
            .iter()
            .map(Dialect::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn known_list() -> String {
        Self::SUPPORTED
            .iter()
            .map(Dialect::as_str)
            .chain(UNIMPLEMENTED_DIALECTS.iter().copied())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = PgKitError;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().to_ascii_lowercase();
        if let Some(dialect) = Self::SUPPORTED.iter().find(|d| d.as_str() == tag) {
            return Ok(*dialect);
        }
        if UNIMPLEMENTED_DIALECTS.contains(&tag.as_str()) {
            return Err(PgKitError::Configuration(format!(
                "Dialect '{}' is not supported by this runtime yet. Supported dialects: {}",
                tag,
                Self::supported_list()
            )));
        }
        Err(PgKitError::Configuration(format!(
            "Unknown dialect '{}'. Known dialects: {}",
            s,
            Self::known_list()
        )))
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Dialect-gated features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Listen,
    Tenant,
    Returning,
    Json,
    Arrays,
    Cte,
    Transactions,
    Savepoints,
    Upsert,
    Cursors,
    SequenceFunctions,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Listen => "listen",
            Feature::Tenant => "tenant",
            Feature::Returning => "returning",
            Feature::Json => "json",
            Feature::Arrays => "arrays",
            Feature::Cte => "cte",
            Feature::Transactions => "transactions",
            Feature::Savepoints => "savepoints",
            Feature::Upsert => "upsert",
            Feature::Cursors => "cursors",
            Feature::SequenceFunctions => "sequence_functions",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Feature table of one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub dialect: Dialect,
    pub listen: bool,
    pub tenant: bool,
    pub returning: bool,
    pub json: bool,
    pub arrays: bool,
    pub cte: bool,
    pub transactions: bool,
    pub savepoints: bool,
    pub upsert: bool,
    pub cursors: bool,
    pub sequence_functions: bool,
}

impl Capabilities {
    pub fn for_dialect(dialect: Dialect) -> Self {
        let postgres = Capabilities {
            dialect,
            listen: true,
            tenant: false,
            returning: true,
            json: true,
            arrays: true,
            cte: true,
            transactions: true,
            savepoints: true,
            upsert: true,
            cursors: true,
            sequence_functions: true,
        };

        match dialect {
            Dialect::Postgres => postgres,
            Dialect::Nile => Capabilities {
                listen: false,
                tenant: true,
                ..postgres
            },
            Dialect::CockroachDb => Capabilities {
                listen: false,
                cursors: false,
                sequence_functions: false,
                ..postgres
            },
            Dialect::AwsDsql => Capabilities {
                listen: false,
                json: false,
                savepoints: false,
                sequence_functions: false,
                ..postgres
            },
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Listen => self.listen,
            Feature::Tenant => self.tenant,
            Feature::Returning => self.returning,
            Feature::Json => self.json,
            Feature::Arrays => self.arrays,
            Feature::Cte => self.cte,
            Feature::Transactions => self.transactions,
            Feature::Savepoints => self.savepoints,
            Feature::Upsert => self.upsert,
            Feature::Cursors => self.cursors,
            Feature::SequenceFunctions => self.sequence_functions,
        }
    }

    /// Fail with a dialect error when `feature` is not supported.
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.supports(feature) {
            return Ok(());
        }
        Err(PgKitError::dialect(
            self.dialect.as_str(),
            feature.as_str(),
            suggestion(self.dialect, feature),
        ))
    }
}

fn suggestion(dialect: Dialect, feature: Feature) -> Option<String> {
    let text = match (dialect, feature) {
        (_, Feature::Listen) => "use the postgres dialect for LISTEN/NOTIFY subscriptions",
        (_, Feature::Tenant) => "use the nile dialect for tenant-scoped sessions",
        (Dialect::AwsDsql, Feature::Json) => "store JSON documents as TEXT and parse them in the application",
        (Dialect::AwsDsql, Feature::Savepoints) => "split the work into separate transactions",
        (Dialect::CockroachDb, Feature::Cursors) => "page results with LIMIT/OFFSET or keyset pagination",
        (_, Feature::SequenceFunctions) => "use UUID primary keys instead of sequences",
        _ => return None,
    };
    Some(text.to_string())
}
