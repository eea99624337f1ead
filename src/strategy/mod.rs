//! Activation strategies.
//!
//! A flag carries an ordered list of `(strategy name, parameters)` pairs.
//! When a snapshot is loaded every pair is compiled once, through the
//! [`StrategyRegistry`], into a [`CompiledStrategy`] holding its parsed
//! provisioning, so evaluation never looks names up again.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::Context;

mod membership;
mod network;
mod rollout;

pub(crate) use membership::Membership;
pub(crate) use network::{AddressList, HostNames};
pub(crate) use rollout::{Identifier, Rollout, Stickiness, normalized_hash};

/// Raw parameters of one strategy, as delivered in the snapshot.
pub type Parameters = BTreeMap<String, String>;

/// Splits a comma-separated parameter into trimmed, non-empty elements.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

/// A caller-supplied activation strategy.
///
/// Custom strategies receive the raw parameters of the strategy entry on
/// every call.
pub trait Strategy: Send + Sync + 'static {
    fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool;
}

impl<F> Strategy for F
where
    F: Fn(&Parameters, &Context) -> bool + Send + Sync + 'static,
{
    fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool {
        self(parameters, context)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    Default,
    EnableForDomains,
    EnableForPartners,
    EnableForBusinesses,
    EnableForExperts,
    EnableForTeams,
    UserWithId,
    GradualRolloutUserId,
    GradualRolloutSessionId,
    GradualRolloutRandom,
    FlexibleRollout,
    ApplicationHostname,
    RemoteAddress,
}

impl Builtin {
    pub const ALL: [Builtin; 13] = [
        Builtin::Default,
        Builtin::EnableForDomains,
        Builtin::EnableForPartners,
        Builtin::EnableForBusinesses,
        Builtin::EnableForExperts,
        Builtin::EnableForTeams,
        Builtin::UserWithId,
        Builtin::GradualRolloutUserId,
        Builtin::GradualRolloutSessionId,
        Builtin::GradualRolloutRandom,
        Builtin::FlexibleRollout,
        Builtin::ApplicationHostname,
        Builtin::RemoteAddress,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Default => "default",
            Builtin::EnableForDomains => "EnableForDomains",
            Builtin::EnableForPartners => "EnableForPartners",
            Builtin::EnableForBusinesses => "EnableForBusinesses",
            Builtin::EnableForExperts => "EnableForExperts",
            Builtin::EnableForTeams => "EnableForTeams",
            Builtin::UserWithId => "userWithId",
            Builtin::GradualRolloutUserId => "gradualRolloutUserId",
            Builtin::GradualRolloutSessionId => "gradualRolloutSessionId",
            Builtin::GradualRolloutRandom => "gradualRolloutRandom",
            Builtin::FlexibleRollout => "flexibleRollout",
            Builtin::ApplicationHostname => "applicationHostname",
            Builtin::RemoteAddress => "remoteAddress",
        }
    }

    fn compile(&self, parameters: &Parameters) -> Predicate {
        match self {
            Builtin::Default => Predicate::Default,
            Builtin::EnableForDomains => {
                Predicate::Membership(Membership::same_key("domain_names", parameters))
            }
            Builtin::EnableForPartners => {
                Predicate::Membership(Membership::same_key("partner_names", parameters))
            }
            Builtin::EnableForBusinesses => {
                Predicate::Membership(Membership::same_key("business_via_names", parameters))
            }
            Builtin::EnableForExperts => {
                Predicate::Membership(Membership::same_key("expert_emails", parameters))
            }
            Builtin::EnableForTeams => {
                Predicate::Membership(Membership::same_key("team_ids", parameters))
            }
            Builtin::UserWithId => {
                Predicate::Membership(Membership::new("userId", "userIds", parameters))
            }
            Builtin::GradualRolloutUserId => Predicate::Rollout(Rollout::from_parameters(
                "percentage",
                Stickiness::Field("userId".into()),
                parameters,
            )),
            Builtin::GradualRolloutSessionId => Predicate::Rollout(Rollout::from_parameters(
                "percentage",
                Stickiness::Field("sessionId".into()),
                parameters,
            )),
            Builtin::GradualRolloutRandom => Predicate::Rollout(Rollout::from_parameters(
                "percentage",
                Stickiness::Random,
                parameters,
            )),
            Builtin::FlexibleRollout => {
                let stickiness = parameters
                    .get("stickiness")
                    .map(|s| Stickiness::parse(s))
                    .unwrap_or(Stickiness::Default);
                Predicate::Rollout(Rollout::from_parameters("rollout", stickiness, parameters))
            }
            Builtin::ApplicationHostname => {
                Predicate::ApplicationHostname(HostNames::from_parameters(parameters))
            }
            Builtin::RemoteAddress => {
                Predicate::RemoteAddress(AddressList::from_parameters(parameters))
            }
        }
    }
}

/// What a strategy name resolves to.
#[derive(Clone)]
pub enum StrategyKind {
    Builtin(Builtin),
    Custom(Arc<dyn Strategy>),
}

impl std::fmt::Debug for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            StrategyKind::Custom(_) => f.debug_tuple("Custom").finish(),
        }
    }
}

/// Maps strategy names to implementations.
///
/// Starts out with every [`Builtin`]. Custom strategies replace a built-in
/// registered under the same name.
#[derive(Clone, Debug)]
pub struct StrategyRegistry {
    strategies: HashMap<String, StrategyKind>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Builtin::ALL
                .iter()
                .map(|b| (b.name().to_string(), StrategyKind::Builtin(*b)))
                .collect(),
        }
    }

    pub fn with_custom(
        mut self,
        custom: impl IntoIterator<Item = (String, Arc<dyn Strategy>)>,
    ) -> Self {
        for (name, strategy) in custom {
            self.insert(name, strategy);
        }
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, strategy: Arc<dyn Strategy>) {
        let name = name.into();
        if let Some(StrategyKind::Builtin(_)) = self.strategies.get(&name) {
            tracing::debug!(strategy = %name, "Custom strategy overrides a built-in");
        }
        self.strategies.insert(name, StrategyKind::Custom(strategy));
    }

    pub fn resolve(&self, name: &str) -> Option<&StrategyKind> {
        self.strategies.get(name)
    }

    pub(crate) fn compile(&self, name: &str, parameters: &Parameters) -> CompiledStrategy {
        let predicate = match self.resolve(name) {
            Some(StrategyKind::Builtin(builtin)) => builtin.compile(parameters),
            Some(StrategyKind::Custom(strategy)) => Predicate::Custom {
                strategy: strategy.clone(),
                parameters: parameters.clone(),
            },
            None => Predicate::Unknown,
        };

        CompiledStrategy {
            name: name.to_string(),
            predicate,
        }
    }
}

#[derive(Clone)]
pub(crate) enum Predicate {
    Default,
    Membership(Membership),
    Rollout(Rollout),
    ApplicationHostname(HostNames),
    RemoteAddress(AddressList),
    Custom {
        strategy: Arc<dyn Strategy>,
        parameters: Parameters,
    },
    Unknown,
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Default => write!(f, "Default"),
            Predicate::Membership(m) => f.debug_tuple("Membership").field(m).finish(),
            Predicate::Rollout(r) => f.debug_tuple("Rollout").field(r).finish(),
            Predicate::ApplicationHostname(h) => {
                f.debug_tuple("ApplicationHostname").field(h).finish()
            }
            Predicate::RemoteAddress(a) => f.debug_tuple("RemoteAddress").field(a).finish(),
            Predicate::Custom { parameters, .. } => {
                f.debug_struct("Custom").field("parameters", parameters).finish()
            }
            Predicate::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A strategy entry resolved against the registry.
#[derive(Clone, Debug)]
pub struct CompiledStrategy {
    name: String,
    predicate: Predicate,
}

impl CompiledStrategy {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.predicate, Predicate::Unknown)
    }

    pub fn matches(&self, context: &Context) -> bool {
        match &self.predicate {
            Predicate::Default => true,
            Predicate::Membership(m) => m.matches(context),
            Predicate::Rollout(r) => r.matches(context),
            Predicate::ApplicationHostname(h) => h.matches(context),
            Predicate::RemoteAddress(a) => a.matches(context),
            Predicate::Custom {
                strategy,
                parameters,
            } => strategy.is_enabled(parameters, context),
            Predicate::Unknown => false,
        }
    }

    /// The parameter key and parsed list of a membership strategy.
    pub(crate) fn provisioning(&self) -> Option<(&str, &[String])> {
        match &self.predicate {
            Predicate::Membership(m) => Some((m.parameter_key(), m.values())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_list_trims_every_element() {
        assert_eq!(parse_list("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(parse_list(" Platform Demo,haptik "), vec!["Platform Demo", "haptik"]);
    }

    #[test]
    fn parse_list_of_empty_value_is_empty() {
        assert!(parse_list("").is_empty());
        assert!(parse_list(" , ,").is_empty());
    }

    #[test]
    fn every_builtin_resolves_by_name() {
        let registry = StrategyRegistry::new();
        for builtin in Builtin::ALL {
            assert!(matches!(
                registry.resolve(builtin.name()),
                Some(StrategyKind::Builtin(b)) if *b == builtin
            ));
        }
    }

    #[test]
    fn unknown_strategy_never_matches() {
        let compiled = StrategyRegistry::new().compile("NoSuchStrategy", &Parameters::new());
        assert!(!compiled.is_resolved());
        assert!(!compiled.matches(&Context::new().with("domain_names", "shop")));
    }

    #[test]
    fn custom_strategy_overrides_builtin() {
        let registry = StrategyRegistry::new().with_custom([(
            "EnableForDomains".to_string(),
            Arc::new(|_: &Parameters, _: &Context| true) as Arc<dyn Strategy>,
        )]);

        let compiled = registry.compile("EnableForDomains", &params(&[("domain_names", "")]));
        assert!(compiled.matches(&Context::new()));
    }

    #[test]
    fn custom_strategy_sees_raw_parameters() {
        let registry = StrategyRegistry::new().with_custom([(
            "EnableForRegions".to_string(),
            Arc::new(|p: &Parameters, c: &Context| {
                let regions = parse_list(p.get("regions").map(String::as_str).unwrap_or(""));
                c.get("region").is_some_and(|r| regions.iter().any(|v| v == r))
            }) as Arc<dyn Strategy>,
        )]);

        let compiled = registry.compile("EnableForRegions", &params(&[("regions", "eu, us")]));
        assert!(compiled.matches(&Context::new().with("region", "us")));
        assert!(!compiled.matches(&Context::new().with("region", "apac")));
    }

    #[test]
    fn default_strategy_always_matches() {
        let compiled = StrategyRegistry::new().compile("default", &Parameters::new());
        assert!(compiled.matches(&Context::new()));
    }

    #[test]
    fn membership_builtins_use_their_own_keys() {
        let registry = StrategyRegistry::new();
        let cases = [
            ("EnableForDomains", "domain_names"),
            ("EnableForPartners", "partner_names"),
            ("EnableForBusinesses", "business_via_names"),
            ("EnableForExperts", "expert_emails"),
            ("EnableForTeams", "team_ids"),
        ];

        for (strategy, key) in cases {
            let compiled = registry.compile(strategy, &params(&[(key, "x, y")]));
            assert!(compiled.matches(&Context::new().with(key, "y")), "{strategy}");
            assert!(!compiled.matches(&Context::new().with(key, "z")), "{strategy}");
            assert_eq!(
                compiled.provisioning(),
                Some((key, &["x".to_string(), "y".to_string()][..]))
            );
        }
    }
}
