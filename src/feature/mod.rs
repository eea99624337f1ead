mod record;
mod scope;
mod variant;

use std::collections::{BTreeMap, HashMap};

pub use record::{FeatureRecord, OverrideRecord, StrategyRecord, VariantRecord};
pub use scope::Scope;
pub use variant::Variant;
pub(crate) use variant::VariantDefinition;

use crate::Context;
use crate::strategy::{CompiledStrategy, StrategyRegistry};

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("Serializing / deserializing the snapshot failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("The snapshot is neither a list of features nor an object with a `features` list")]
    UnexpectedShape,
}

/// Decodes snapshot bytes into flag records.
///
/// Accepts a bare JSON array of records, or the `{ "features": [...] }`
/// envelope returned by the flag-management API.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<FeatureRecord>, SnapshotError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    let records = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut envelope) => envelope
            .remove("features")
            .ok_or(SnapshotError::UnexpectedShape)?,
        _ => return Err(SnapshotError::UnexpectedShape),
    };

    Ok(serde_json::from_value(records)?)
}

pub fn encode_snapshot(records: &[FeatureRecord]) -> Result<Vec<u8>, SnapshotError> {
    Ok(serde_json::to_vec(records)?)
}

/// One flag of this client's scope, with its strategies already resolved.
#[derive(Clone, Debug)]
pub struct FeatureDefinition {
    name: String,
    enabled: bool,
    strategies: Vec<CompiledStrategy>,
    variants: Vec<VariantDefinition>,
}

impl FeatureDefinition {
    pub(crate) fn compile(name: &str, record: FeatureRecord, registry: &StrategyRegistry) -> Self {
        let strategies = record
            .strategies
            .iter()
            .map(|s| {
                let compiled = registry.compile(&s.name, &s.parameters);
                if !compiled.is_resolved() {
                    tracing::warn!(
                        feature = name,
                        strategy = %s.name,
                        "Unknown strategy, it will never match"
                    );
                }
                compiled
            })
            .collect();

        Self {
            name: name.to_string(),
            enabled: record.enabled,
            strategies,
            variants: record.variants.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn strategies(&self) -> &[CompiledStrategy] {
        &self.strategies
    }

    /// The flag-level switch wins; otherwise any matching strategy enables
    /// the flag. An enabled flag without strategies is on for everyone.
    pub fn is_enabled(&self, context: &Context) -> bool {
        if !self.enabled {
            return false;
        }

        if self.strategies.is_empty() {
            return true;
        }

        self.strategies.iter().any(|s| s.matches(context))
    }

    pub fn get_variant(&self, context: &Context) -> Variant {
        if !self.is_enabled(context) {
            return Variant::disabled();
        }

        variant::select(&self.variants, &self.name, context)
    }
}

/// All flags of one scope, keyed by their unqualified name.
#[derive(Clone, Debug, Default)]
pub struct Features {
    definitions: HashMap<String, FeatureDefinition>,
}

impl Features {
    pub fn build(
        records: impl IntoIterator<Item = FeatureRecord>,
        scope: &Scope,
        registry: &StrategyRegistry,
    ) -> Self {
        let mut definitions = HashMap::new();

        for record in records {
            let Some(name) = scope.strip(&record.name).map(String::from) else {
                tracing::trace!(feature = %record.name, "Skipping feature outside of our scope");
                continue;
            };

            let definition = FeatureDefinition::compile(&name, record, registry);
            if definitions.insert(name.clone(), definition).is_some() {
                tracing::debug!(feature = %name, "Duplicate feature in snapshot, keeping the last");
            }
        }

        Self { definitions }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureDefinition> {
        self.definitions.get(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Parsed membership lists of a flag, keyed by parameter name.
    ///
    /// Strategies that appear more than once contribute the union of their
    /// lists.
    pub fn provisioning(&self, name: &str) -> Option<BTreeMap<String, Vec<String>>> {
        let definition = self.get(name)?;
        let mut lists: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (key, values) in definition.strategies.iter().filter_map(|s| s.provisioning()) {
            let list = lists.entry(key.to_string()).or_default();
            for value in values {
                if !list.contains(value) {
                    list.push(value.clone());
                }
            }
        }

        Some(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, enabled: bool, strategies: &[(&str, &str, &str)]) -> FeatureRecord {
        FeatureRecord {
            name: name.into(),
            enabled,
            strategies: strategies
                .iter()
                .map(|(strategy, key, value)| StrategyRecord {
                    name: strategy.to_string(),
                    parameters: [(key.to_string(), value.to_string())].into(),
                })
                .collect(),
            variants: vec![],
        }
    }

    fn build(records: Vec<FeatureRecord>) -> Features {
        Features::build(records, &Scope::new("acme", "prod"), &StrategyRegistry::new())
    }

    #[test]
    fn keeps_only_this_scope_and_strips_the_prefix() {
        let features = build(vec![
            record("acme.prod.new_ui", true, &[]),
            record("acme.staging.new_ui", true, &[]),
            record("other.prod.checkout", true, &[]),
            record("garbage", true, &[]),
        ]);

        assert_eq!(features.len(), 1);
        assert!(features.get("new_ui").is_some());
        assert!(features.get("acme.prod.new_ui").is_none());
    }

    #[test]
    fn disabled_flag_ignores_matching_strategies() {
        let features = build(vec![record(
            "acme.prod.new_ui",
            false,
            &[("default", "", ""), ("EnableForDomains", "domain_names", "shop")],
        )]);
        let flag = features.get("new_ui").unwrap();

        assert!(!flag.is_enabled(&Context::new().with("domain_names", "shop")));
        assert_eq!(
            flag.get_variant(&Context::new().with("domain_names", "shop")),
            Variant::disabled()
        );
    }

    #[test]
    fn strategies_are_or_combined() {
        let features = build(vec![record(
            "acme.prod.new_ui",
            true,
            &[
                ("NotARealStrategy", "x", "y"),
                ("EnableForDomains", "domain_names", "shop, blog"),
                ("EnableForPartners", "partner_names", "haptik"),
            ],
        )]);
        let flag = features.get("new_ui").unwrap();

        assert!(flag.is_enabled(&Context::new().with("domain_names", "blog")));
        assert!(flag.is_enabled(&Context::new().with("partner_names", "haptik")));
        assert!(!flag.is_enabled(&Context::new().with("domain_names", "other")));
    }

    #[test]
    fn enabled_flag_without_strategies_is_on() {
        let features = build(vec![record("acme.prod.new_ui", true, &[])]);
        assert!(features.get("new_ui").unwrap().is_enabled(&Context::new()));
    }

    #[test]
    fn provisioning_accumulates_lists_per_parameter() {
        let features = build(vec![record(
            "acme.prod.new_ui",
            true,
            &[
                ("EnableForDomains", "domain_names", "shop, blog"),
                ("EnableForDomains", "domain_names", "blog, docs"),
                ("EnableForTeams", "team_ids", ""),
            ],
        )]);

        let lists = features.provisioning("new_ui").unwrap();
        assert_eq!(lists["domain_names"], vec!["shop", "blog", "docs"]);
        assert!(lists["team_ids"].is_empty());
        assert!(features.provisioning("missing").is_none());
    }

    #[test]
    fn later_duplicates_replace_earlier_ones() {
        let features = build(vec![
            record("acme.prod.new_ui", true, &[]),
            record("acme.prod.new_ui", false, &[]),
        ]);
        assert!(!features.get("new_ui").unwrap().enabled());
    }

    #[test]
    fn decodes_array_and_envelope_snapshots() {
        let array = br#"[{"name": "acme.prod.a", "enabled": true, "strategies": []}]"#;
        let envelope = br#"{"version": 1, "features": [{"name": "acme.prod.a", "enabled": true}]}"#;

        assert_eq!(decode_snapshot(array).unwrap().len(), 1);
        assert_eq!(decode_snapshot(envelope).unwrap()[0].name, "acme.prod.a");
    }

    #[test]
    fn rejects_garbled_snapshots() {
        assert!(matches!(decode_snapshot(b"\x80\x04pickle"), Err(SnapshotError::Json(_))));
        assert!(matches!(decode_snapshot(b"42"), Err(SnapshotError::UnexpectedShape)));
        assert!(matches!(decode_snapshot(b"{}"), Err(SnapshotError::UnexpectedShape)));
    }

    #[test]
    fn encoded_snapshots_decode_back() {
        let records = vec![record(
            "acme.prod.new_ui",
            true,
            &[("EnableForDomains", "domain_names", "shop")],
        )];
        assert_eq!(decode_snapshot(&encode_snapshot(&records).unwrap()).unwrap(), records);
    }
}
