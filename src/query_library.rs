//! Logs Insights query template library keyed by alarm name.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
struct QueryEntry {
    #[serde(default)]
    query: String,
}

/// Named queries in document order. TOML tables deserialize through a map
/// visitor so the declaration order in the config file is preserved.
#[derive(Debug, Default, Clone)]
struct OrderedQueries(Vec<(String, String)>);

impl<'de> Deserialize<'de> for OrderedQueries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedQueriesVisitor;

        impl<'de> Visitor<'de> for OrderedQueriesVisitor {
            type Value = OrderedQueries;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a table of named query entries")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((name, entry)) = map.next_entry::<String, QueryEntry>()? {
                    if !entry.query.is_empty() {
                        entries.push((name, entry.query));
                    }
                }
                Ok(OrderedQueries(entries))
            }
        }

        deserializer.deserialize_map(OrderedQueriesVisitor)
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueryLibraryFile {
    #[serde(default)]
    default: OrderedQueries,
    #[serde(default)]
    alarms: BTreeMap<String, OrderedQueries>,
}

/// Query template library. The `default` block is merged first and
/// alarm-specific entries override it by name.
#[derive(Debug, Default)]
pub struct QueryLibrary {
    default: Vec<(String, String)>,
    alarms: BTreeMap<String, Vec<(String, String)>>,
}

impl QueryLibrary {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Load from a path, degrading to an empty library when missing.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(library) => library,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Query library unavailable, triage will run without templates");
                Self::default()
            }
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let file: QueryLibraryFile = toml::from_str(raw)?;
        Ok(Self {
            default: file.default.0,
            alarms: file
                .alarms
                .into_iter()
                .map(|(alarm, block)| (alarm, block.0))
                .collect(),
        })
    }

    /// Named queries for an alarm: default templates first in declaration
    /// order, alarm-specific entries overriding in place, alarm-only
    /// queries appended last.
    pub fn queries_for(&self, alarm_name: Option<&str>) -> Vec<(String, String)> {
        let mut merged = self.default.clone();
        if let Some(block) = alarm_name.and_then(|name| self.alarms.get(name)) {
            for (name, query) in block {
                match merged.iter_mut().find(|(existing, _)| existing == name) {
                    Some((_, existing_query)) => *existing_query = query.clone(),
                    None => merged.push((name.clone(), query.clone())),
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[default.errors]
query = "fields @timestamp, @message | filter @message like /ERROR/ | sort @timestamp desc | limit 200"

[default.patterns]
query = "fields @message | stats count() by @message | sort count() desc | limit 50"

[alarms."iats-demo-high-error-rate".errors]
query = "fields @timestamp, @message | filter @message like /Traceback|ERROR/ | sort @timestamp desc | limit 200"

[alarms."iats-demo-latency-p99".latency]
query = "fields @timestamp, @duration | filter @duration > 1000 | sort @duration desc | limit 100"
"#;

    #[test]
    fn test_default_block_applies_to_unknown_alarm() {
        let library = QueryLibrary::parse(SAMPLE).expect("parse");
        let queries = library.queries_for(Some("other-alarm"));
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().any(|(name, _)| name == "errors"));
    }

    #[test]
    fn test_alarm_block_overrides_default_in_place() {
        let library = QueryLibrary::parse(SAMPLE).expect("parse");
        let queries = library.queries_for(Some("iats-demo-high-error-rate"));
        assert_eq!(queries.len(), 2);
        // The override keeps the default's position.
        assert_eq!(queries[0].0, "errors");
        assert!(queries[0].1.contains("Traceback"));
        assert_eq!(queries[1].0, "patterns");
    }

    #[test]
    fn test_alarm_only_queries_append_after_defaults() {
        let library = QueryLibrary::parse(SAMPLE).expect("parse");
        let queries = library.queries_for(Some("iats-demo-latency-p99"));
        let names: Vec<&str> = queries.iter().map(|(name, _)| name.as_str()).collect();
        // Defaults keep their declared order; a capped run drops the
        // alarm-only extra before it drops any default query.
        assert_eq!(names, vec!["errors", "patterns", "latency"]);
    }

    #[test]
    fn test_declaration_order_beats_alphabetical_order() {
        let raw = r#"
[default.zeta]
query = "fields @message | limit 10"

[default.alpha]
query = "fields @message | limit 20"
"#;
        let library = QueryLibrary::parse(raw).expect("parse");
        let queries = library.queries_for(None);
        let names: Vec<&str> = queries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_no_alarm_name_uses_defaults() {
        let library = QueryLibrary::parse(SAMPLE).expect("parse");
        assert_eq!(library.queries_for(None).len(), 2);
    }
}
