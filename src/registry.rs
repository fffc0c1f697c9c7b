//! Declarative service registry: alarm/service key -> ownership metadata.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

/// Resolved registry entry for a service.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub service: String,
    pub env: String,
    #[serde(default)]
    pub log_groups: Vec<String>,
    #[serde(default)]
    pub repo_local_path: String,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub runbook_url: String,
    #[serde(default)]
    pub dashboard_url: String,
}

impl RegistryEntry {
    /// Fallback for keys the registry does not know.
    pub fn unknown() -> Self {
        Self {
            service: "unknown-service".to_string(),
            env: "unknown".to_string(),
            log_groups: vec!["/aws/lambda/unknown".to_string()],
            repo_local_path: String::new(),
            owners: Vec::new(),
            runbook_url: String::new(),
            dashboard_url: String::new(),
        }
    }

    /// First configured log group, with the unknown-service default.
    pub fn primary_log_group(&self) -> &str {
        self.log_groups
            .first()
            .map(String::as_str)
            .unwrap_or("/aws/lambda/default")
    }
}

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    alarms: BTreeMap<String, RegistryEntry>,
    #[serde(default)]
    services: BTreeMap<String, RegistryEntry>,
}

/// Config-driven service/env resolver with `${VAR}` interpolation.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    alarms: BTreeMap<String, RegistryEntry>,
    services: BTreeMap<String, RegistryEntry>,
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"))
}

/// Expand `${VAR}` references against the process environment. Unset
/// variables are left in place, matching shell-style expansion of configs.
pub fn expand_env_vars(text: &str) -> String {
    var_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

impl ServiceRegistry {
    /// Load the registry from a TOML document, expanding `${VAR}` on load.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Load from a path, degrading to an empty registry when the file is
    /// missing or malformed. Every lookup then resolves to the fallback.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(registry) => registry,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Service registry unavailable, using fallback resolution");
                Self::default()
            }
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(raw);
        let file: RegistryFile = toml::from_str(&expanded)?;
        Ok(Self {
            alarms: file.alarms,
            services: file.services,
        })
    }

    /// Look up an alarm key, then a service key; unknown keys resolve to the
    /// fallback entry.
    pub fn resolve(&self, key: &str) -> RegistryEntry {
        self.alarms
            .get(key)
            .or_else(|| self.services.get(key))
            .cloned()
            .unwrap_or_else(RegistryEntry::unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[alarms."iats-demo-high-error-rate"]
service = "checkout-api"
env = "prod"
log_groups = ["/aws/lambda/checkout-api"]
repo_local_path = "/repos/checkout-api"
owners = ["oncall-checkout@example.com"]
runbook_url = "https://runbooks.example.com/checkout-api"
dashboard_url = "https://grafana.example.com/d/checkout"

[services."checkout-api"]
service = "checkout-api"
env = "prod"
log_groups = ["/aws/lambda/checkout-api"]
"#;

    #[test]
    fn test_resolve_alarm_key() {
        let registry = ServiceRegistry::parse(SAMPLE).expect("parse");
        let entry = registry.resolve("iats-demo-high-error-rate");
        assert_eq!(entry.service, "checkout-api");
        assert_eq!(entry.env, "prod");
        assert_eq!(entry.primary_log_group(), "/aws/lambda/checkout-api");
        assert_eq!(entry.owners.len(), 1);
    }

    #[test]
    fn test_resolve_falls_through_to_service_key() {
        let registry = ServiceRegistry::parse(SAMPLE).expect("parse");
        let entry = registry.resolve("checkout-api");
        assert_eq!(entry.service, "checkout-api");
    }

    #[test]
    fn test_unknown_key_yields_fallback() {
        let registry = ServiceRegistry::parse(SAMPLE).expect("parse");
        let entry = registry.resolve("never-heard-of-it");
        assert_eq!(entry.service, "unknown-service");
        assert_eq!(entry.env, "unknown");
    }

    #[test]
    fn test_env_var_interpolation() {
        std::env::set_var("IATS_TEST_REPO_ROOT", "/srv/repos");
        let raw = r#"
[services."svc"]
service = "svc"
env = "prod"
repo_local_path = "${IATS_TEST_REPO_ROOT}/svc"
"#;
        let registry = ServiceRegistry::parse(raw).expect("parse");
        assert_eq!(registry.resolve("svc").repo_local_path, "/srv/repos/svc");
    }

    #[test]
    fn test_unset_env_var_left_in_place() {
        assert_eq!(
            expand_env_vars("${IATS_DEFINITELY_UNSET_VAR}/x"),
            "${IATS_DEFINITELY_UNSET_VAR}/x"
        );
    }
}
