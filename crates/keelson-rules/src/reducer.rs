//! Runtime reducers built from triggered reducer rules

use serde_json::{json, Map, Value};
use tracing::info;

use keelson_common::{Lifecycle, Result};

use crate::diff::Changelog;
use crate::extractor::{match_rules_against_diff, RuleExtractor};
use crate::spec::ReducerLifecycle;

/// A reducer to apply while a configuration change is in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Reducer {
    /// Template data key
    pub key: String,
    /// Observed previous value
    pub from: Option<Value>,
    /// Observed requested value
    pub to: Option<Value>,
    /// When the reducer applies
    pub lifecycle: ReducerLifecycle,
    /// Path of the rule that produced it
    pub path: String,
}

/// A collection of reducers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reducers(Vec<Reducer>);

impl Reducers {
    /// Build the reducers a phase needs for this changelog.
    ///
    /// Each matched rule contributes all of its reducer entries, carrying the
    /// observed values of the change that matched it.
    pub fn build(
        changelog: &Changelog,
        extractor: &RuleExtractor,
        phase: Lifecycle,
    ) -> Result<Self> {
        let rules = extractor.reducer_rules(phase)?;
        let mut reducers = Vec::new();

        for matched in match_rules_against_diff(&rules, changelog) {
            if let Some(description) = &matched.rule.description {
                info!(phase = %phase, path = %matched.rule.path, "{}", description);
            }
            for r in matched.rule.reducers {
                reducers.push(Reducer {
                    key: r.key,
                    from: r.from,
                    to: r.to,
                    lifecycle: r.lifecycle,
                    path: matched.rule.path.clone(),
                });
            }
        }

        Ok(Self(reducers))
    }

    /// Reducers with the given lifecycle tag
    pub fn by_lifecycle(&self, lifecycle: ReducerLifecycle) -> Reducers {
        Self(
            self.0
                .iter()
                .filter(|r| r.lifecycle == lifecycle)
                .cloned()
                .collect(),
        )
    }

    /// `{key: {from, to}}` map; a later reducer with the same key wins
    pub fn to_map(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|r| {
                (
                    r.key.clone(),
                    json!({
                        "from": r.from.clone().unwrap_or(Value::Null),
                        "to": r.to.clone().unwrap_or(Value::Null),
                    }),
                )
            })
            .collect()
    }

    /// Merge the reducer map into `base` under `namespace`.
    ///
    /// Entries already present under the namespace are kept unless a reducer
    /// uses the same key. A non-object base is replaced by an object.
    pub fn combine(&self, base: &Value, namespace: &str) -> Value {
        let mut merged = match base {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let mut section = match merged.remove(namespace) {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        section.extend(self.to_map());
        merged.insert(namespace.to_string(), Value::Object(section));
        Value::Object(merged)
    }

    /// Number of reducers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no reducer was triggered
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate reducers in rule order
    pub fn iter(&self) -> std::slice::Iter<'_, Reducer> {
        self.0.iter()
    }
}

impl From<Vec<Reducer>> for Reducers {
    fn from(reducers: Vec<Reducer>) -> Self {
        Self(reducers)
    }
}
