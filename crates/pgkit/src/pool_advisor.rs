//! Environment-aware pool sizing defaults and advisory validation.

use std::time::Duration;

use crate::config::PoolSettings;
use crate::environment::{EnvironmentKind, RuntimeEnvironment};

/// Recommended pool parameters for an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDefaults {
    pub min: u32,
    pub max: u32,
    pub idle_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub recommendation: String,
}

/// Effective pool parameters after merging user overrides into defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePool {
    pub min: u32,
    pub max: u32,
    pub idle_timeout: Duration,
    pub connection_timeout: Duration,
    pub application_name: Option<String>,
}

/// Outcome of validating user pool settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl PoolValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Connections above which any environment risks exhausting the server.
const MAX_CONNECTIONS_WARNING: u32 = 20;
/// Idle minimum above which a traditional server wastes connections.
const MIN_CONNECTIONS_WARNING: u32 = 5;

/// Smart defaults for the detected environment.
pub fn smart_pool_defaults(env: &RuntimeEnvironment) -> PoolDefaults {
    let provider = env.provider.as_deref().unwrap_or("unknown provider");
    match env.kind {
        EnvironmentKind::Edge => PoolDefaults {
            min: 0,
            max: 1,
            idle_timeout_ms: 1_000,
            connection_timeout_ms: 5_000,
            recommendation: format!(
                "Edge runtime detected ({}): using a single short-lived connection (max=1, idle=1s)",
                provider
            ),
        },
        EnvironmentKind::Serverless => PoolDefaults {
            min: 0,
            max: 1,
            idle_timeout_ms: 10_000,
            connection_timeout_ms: 5_000,
            recommendation: format!(
                "Serverless environment detected ({}): using max=1 connection per instance, idle=10s; \
                 put an external pooler in front of the database for high concurrency",
                provider
            ),
        },
        EnvironmentKind::Traditional => PoolDefaults {
            min: 0,
            max: 10,
            idle_timeout_ms: 30_000,
            connection_timeout_ms: 10_000,
            recommendation: "Traditional server environment: using pool max=10, idle=30s".to_string(),
        },
    }
}

/// Validate user pool settings against the environment.
///
/// Validation is advisory except for `min > max`, which is recorded as an error.
pub fn validate_pool_settings(settings: &PoolSettings, env: &RuntimeEnvironment) -> PoolValidation {
    let defaults = smart_pool_defaults(env);
    let mut result = PoolValidation::default();

    let min = settings.min.unwrap_or(defaults.min);
    let max = settings.max.unwrap_or(defaults.max);

    if min > max {
        result.errors.push(format!(
            "Pool min ({}) is greater than max ({})",
            min, max
        ));
        result.warnings.push(format!(
            "Pool min ({}) exceeds max ({}); min would be clamped to {}",
            min, max, max
        ));
    }

    if env.is_constrained() && max > 1 {
        result.warnings.push(format!(
            "Pool max={} in a {} environment opens a pool per instance; recommended config: \
             {{ min: {}, max: {}, idle_timeout_ms: {} }}",
            max, env.kind, defaults.min, defaults.max, defaults.idle_timeout_ms
        ));
    }

    if max > MAX_CONNECTIONS_WARNING {
        result.warnings.push(format!(
            "Pool max={} is high and may exhaust database connections across instances",
            max
        ));
    }

    if env.kind == EnvironmentKind::Traditional && min > MIN_CONNECTIONS_WARNING {
        result.warnings.push(format!(
            "Pool min={} keeps idle connections open and wastes server resources",
            min
        ));
    }

    result
}

/// Merge user overrides into the environment defaults.
///
/// With `disable_smart_defaults`, unset fields fall back to the traditional
/// defaults instead of the environment-derived ones.
pub fn effective_pool(settings: &PoolSettings, env: &RuntimeEnvironment) -> EffectivePool {
    let defaults = if settings.disable_smart_defaults {
        smart_pool_defaults(&RuntimeEnvironment::traditional())
    } else {
        smart_pool_defaults(env)
    };

    let max = settings.max.unwrap_or(defaults.max).max(1);
    let min = settings.min.unwrap_or(defaults.min).min(max);

    EffectivePool {
        min,
        max,
        idle_timeout: Duration::from_millis(settings.idle_timeout_ms.unwrap_or(defaults.idle_timeout_ms)),
        connection_timeout: Duration::from_millis(
            settings
                .connection_timeout_ms
                .unwrap_or(defaults.connection_timeout_ms),
        ),
        application_name: settings.application_name.clone(),
    }
}
