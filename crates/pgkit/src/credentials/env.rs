//! Folding environment variables into connection configuration.
//!
//! User-provided fields always win over the environment.

use crate::config::{AwsDsqlConfig, ConnectionSettings, SslMode};
use crate::environment::EnvSource;
use crate::{PgKitError, Result};

fn first_var(env: &dyn EnvSource, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env.var(key))
}

/// Merge the standard Postgres variables into `settings`.
///
/// # Errors
///
/// Returns a configuration error when neither the settings nor the
/// environment provide a URL or a host plus database.
pub fn merge_postgres_env(
    settings: &ConnectionSettings,
    env: &dyn EnvSource,
) -> Result<ConnectionSettings> {
    let port = match settings.port {
        Some(port) => Some(port),
        None => match first_var(env, &["DATABASE_PORT", "PGPORT"]) {
            Some(raw) => Some(raw.parse::<u16>().map_err(|_| {
                PgKitError::Configuration(format!("Invalid database port '{}'", raw))
            })?),
            None => None,
        },
    };

    let ssl = match settings.ssl {
        Some(ssl) => Some(ssl),
        None => match first_var(env, &["DATABASE_SSL", "PGSSLMODE"]) {
            Some(raw) => Some(raw.parse::<SslMode>()?),
            None => None,
        },
    };

    let merged = ConnectionSettings {
        url: settings
            .url
            .clone()
            .or_else(|| first_var(env, &["DATABASE_URL"])),
        host: settings
            .host
            .clone()
            .or_else(|| first_var(env, &["DATABASE_HOST", "PGHOST"])),
        port,
        database: settings
            .database
            .clone()
            .or_else(|| first_var(env, &["DATABASE_NAME", "PGDATABASE"])),
        user: settings
            .user
            .clone()
            .or_else(|| first_var(env, &["DATABASE_USER", "PGUSER"])),
        password: settings
            .password
            .clone()
            .or_else(|| first_var(env, &["DATABASE_PASSWORD", "PGPASSWORD"])),
        ssl,
    };

    if !merged.is_complete() {
        return Err(PgKitError::Configuration(
            "Missing database connection: provide a url, or host and database \
             (or set DATABASE_URL / PGHOST and PGDATABASE)"
                .to_string(),
        ));
    }

    Ok(merged)
}

/// Merge the AWS variables into the DSQL sub-configuration.
///
/// # Errors
///
/// Returns a configuration error when hostname or region is missing.
pub fn merge_aws_env(aws: Option<&AwsDsqlConfig>, env: &dyn EnvSource) -> Result<AwsDsqlConfig> {
    let base = aws.cloned().unwrap_or_default();

    let merged = AwsDsqlConfig {
        hostname: base
            .hostname
            .or_else(|| first_var(env, &["AWS_DATABASE_HOST"])),
        region: base
            .region
            .or_else(|| first_var(env, &["AWS_REGION", "AWS_DEFAULT_REGION"])),
        access_key_id: base
            .access_key_id
            .or_else(|| first_var(env, &["AWS_ACCESS_KEY_ID"])),
        secret_access_key: base
            .secret_access_key
            .or_else(|| first_var(env, &["AWS_SECRET_ACCESS_KEY"])),
        session_token: base
            .session_token
            .or_else(|| first_var(env, &["AWS_SESSION_TOKEN"])),
        database: base
            .database
            .or_else(|| first_var(env, &["AWS_DATABASE_NAME"])),
        ..base
    };

    if merged.hostname.is_none() || merged.region.is_none() {
        return Err(PgKitError::Configuration(
            "Missing AWS DSQL configuration: hostname and region are required \
             (or set AWS_DATABASE_HOST and AWS_REGION)"
                .to_string(),
        ));
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_fills_missing_fields() {
        let vars = env(&[
            ("PGHOST", "db.internal"),
            ("PGPORT", "6432"),
            ("PGDATABASE", "app"),
            ("PGUSER", "svc"),
            ("PGPASSWORD", "pw"),
            ("PGSSLMODE", "require"),
        ]);
        let merged = merge_postgres_env(&ConnectionSettings::default(), &vars).unwrap();
        assert_eq!(merged.host.as_deref(), Some("db.internal"));
        assert_eq!(merged.port, Some(6432));
        assert_eq!(merged.database.as_deref(), Some("app"));
        assert_eq!(merged.user.as_deref(), Some("svc"));
        assert_eq!(merged.password.as_deref(), Some("pw"));
        assert_eq!(merged.ssl, Some(SslMode::Require));
    }

    #[test]
    fn test_database_prefix_wins_over_pg_prefix() {
        let vars = env(&[("DATABASE_HOST", "a"), ("PGHOST", "b"), ("PGDATABASE", "d")]);
        let merged = merge_postgres_env(&ConnectionSettings::default(), &vars).unwrap();
        assert_eq!(merged.host.as_deref(), Some("a"));
    }

    #[test]
    fn test_user_fields_win() {
        let vars = env(&[("DATABASE_URL", "postgres://env/db")]);
        let settings = ConnectionSettings::from_url("postgres://user/db");
        let merged = merge_postgres_env(&settings, &vars).unwrap();
        assert_eq!(merged.url.as_deref(), Some("postgres://user/db"));
    }

    #[test]
    fn test_missing_endpoint_is_configuration_error() {
        let vars = env(&[("PGHOST", "only-host")]);
        let err = merge_postgres_env(&ConnectionSettings::default(), &vars).unwrap_err();
        assert!(matches!(err, PgKitError::Configuration(_)));
    }

    #[test]
    fn test_invalid_port_is_configuration_error() {
        let vars = env(&[("DATABASE_URL", "postgres://x/y"), ("PGPORT", "abc")]);
        assert!(merge_postgres_env(&ConnectionSettings::default(), &vars).is_err());
    }

    #[test]
    fn test_aws_env_merge() {
        let vars = env(&[
            ("AWS_DATABASE_HOST", "cluster.dsql.us-east-1.on.aws"),
            ("AWS_DEFAULT_REGION", "us-east-1"),
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "SECRET"),
        ]);
        let merged = merge_aws_env(None, &vars).unwrap();
        assert_eq!(merged.hostname.as_deref(), Some("cluster.dsql.us-east-1.on.aws"));
        assert_eq!(merged.region.as_deref(), Some("us-east-1"));
        assert_eq!(merged.access_key_id.as_deref(), Some("AKID"));
    }

    #[test]
    fn test_aws_region_prefers_aws_region() {
        let vars = env(&[
            ("AWS_DATABASE_HOST", "h"),
            ("AWS_REGION", "eu-west-1"),
            ("AWS_DEFAULT_REGION", "us-east-1"),
        ]);
        let merged = merge_aws_env(None, &vars).unwrap();
        assert_eq!(merged.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_aws_missing_region_is_error() {
        let vars = env(&[("AWS_DATABASE_HOST", "h")]);
        assert!(matches!(
            merge_aws_env(None, &vars).unwrap_err(),
            PgKitError::Configuration(_)
        ));
    }
}
