use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub(crate) const APP_NAME_KEY: &str = "appName";
pub(crate) const ENVIRONMENT_KEY: &str = "environment";

/// Request-time attributes a flag is evaluated against.
///
/// Lookups consult the top-level attributes first and fall back to the
/// nested `properties` mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attributes.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .or_else(|| self.properties.get(key))
            .map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Context {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            attributes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            properties: BTreeMap::new(),
        }
    }
}

/// Attributes injected into every evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StaticContext {
    pub(crate) app_name: String,
    pub(crate) environment: String,
}

impl StaticContext {
    /// Returns a copy of `context` with the static attributes applied on top.
    pub(crate) fn merge(&self, context: &Context) -> Context {
        let mut merged = context.clone();
        merged.insert(APP_NAME_KEY, self.app_name.clone());
        merged.insert(ENVIRONMENT_KEY, self.environment.clone());
        merged
    }
}
