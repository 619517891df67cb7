//! Runtime environment detection.
//!
//! Classifies the process as traditional, serverless or edge from
//! inspectable environment variables. Detection only classifies; it never
//! configures anything.

use std::collections::HashMap;
use std::fmt;

/// Source of environment variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;

    /// False when the runtime exposes no process environment at all.
    fn available(&self) -> bool {
        true
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// An environment that cannot be inspected.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEnv;

impl EnvSource for UnavailableEnv {
    fn var(&self, _key: &str) -> Option<String> {
        None
    }

    fn available(&self) -> bool {
        false
    }
}

/// Runtime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentKind {
    Traditional,
    Serverless,
    Edge,
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvironmentKind::Traditional => "traditional",
            EnvironmentKind::Serverless => "serverless",
            EnvironmentKind::Edge => "edge",
        };
        write!(f, "{}", s)
    }
}

/// Result of environment detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    pub kind: EnvironmentKind,
    pub provider: Option<String>,
    /// Every indicator variable that was present
    pub detected: Vec<String>,
}

impl RuntimeEnvironment {
    pub fn traditional() -> Self {
        Self {
            kind: EnvironmentKind::Traditional,
            provider: None,
            detected: Vec::new(),
        }
    }

    pub fn is_constrained(&self) -> bool {
        matches!(self.kind, EnvironmentKind::Serverless | EnvironmentKind::Edge)
    }
}

/// Edge runtimes, checked before serverless because some platforms expose both.
const EDGE_INDICATORS: &[(&str, Option<&str>, &str)] = &[
    ("NEXT_RUNTIME", Some("edge"), "vercel-edge"),
    ("VERCEL_EDGE", None, "vercel-edge"),
    ("CF_PAGES", None, "cloudflare"),
    ("DENO_DEPLOYMENT_ID", None, "deno-deploy"),
    ("EDGE_RUNTIME", None, "edge-runtime"),
];

/// Function-hosting platforms.
const SERVERLESS_INDICATORS: &[(&str, &str)] = &[
    ("AWS_LAMBDA_FUNCTION_NAME", "aws-lambda"),
    ("VERCEL", "vercel"),
    ("NETLIFY", "netlify"),
    ("K_SERVICE", "gcp-cloud-run"),
    ("FUNCTION_TARGET", "gcp-cloud-functions"),
    ("AZURE_FUNCTIONS_ENVIRONMENT", "azure-functions"),
    ("RAILWAY_ENVIRONMENT", "railway"),
    ("RENDER", "render"),
    ("FLY_APP_NAME", "fly"),
];

/// Detect the environment of the current process.
pub fn detect_environment() -> RuntimeEnvironment {
    detect_environment_from(&ProcessEnv)
}

/// Detect the environment from an arbitrary variable source.
pub fn detect_environment_from(env: &dyn EnvSource) -> RuntimeEnvironment {
    if !env.available() {
        return RuntimeEnvironment {
            kind: EnvironmentKind::Edge,
            provider: Some("cloudflare".to_string()),
            detected: Vec::new(),
        };
    }

    let edge: Vec<(&str, &str)> = EDGE_INDICATORS
        .iter()
        .filter(|(key, expected, _)| match (env.var(key), expected) {
            (Some(value), Some(expected)) => value.eq_ignore_ascii_case(expected),
            (Some(_), None) => true,
            (None, _) => false,
        })
        .map(|(key, _, provider)| (*key, *provider))
        .collect();

    let serverless: Vec<(&str, &str)> = SERVERLESS_INDICATORS
        .iter()
        .filter(|(key, _)| env.var(key).is_some())
        .map(|(key, provider)| (*key, *provider))
        .collect();

    let detected: Vec<String> = edge
        .iter()
        .chain(serverless.iter())
        .map(|(key, _)| key.to_string())
        .collect();

    // A Vercel function running on the edge runtime is an edge deployment
    if let Some((_, provider)) = edge.iter().find(|(_, p)| *p == "vercel-edge") {
        return RuntimeEnvironment {
            kind: EnvironmentKind::Edge,
            provider: Some(provider.to_string()),
            detected,
        };
    }

    if let Some((_, provider)) = serverless.first() {
        return RuntimeEnvironment {
            kind: EnvironmentKind::Serverless,
            provider: Some(provider.to_string()),
            detected,
        };
    }

    if let Some((_, provider)) = edge.first() {
        return RuntimeEnvironment {
            kind: EnvironmentKind::Edge,
            provider: Some(provider.to_string()),
            detected,
        };
    }

    RuntimeEnvironment {
        kind: EnvironmentKind::Traditional,
        provider: None,
        detected,
    }
}
