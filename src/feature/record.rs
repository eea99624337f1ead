use serde::{Deserialize, Deserializer, Serialize};

use crate::strategy::Parameters;

/// One flag as delivered by the flag-management service.
///
/// ```json
/// {
///   "name": "acme.production.new_ui",
///   "enabled": true,
///   "strategies": [
///     { "name": "EnableForPartners", "parameters": { "partner_names": "Platform Demo, acme" } }
///   ]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub name: String,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub strategies: Vec<StrategyRecord>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub variants: Vec<VariantRecord>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRecord {
    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "parameters")]
    pub parameters: Parameters,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub name: String,

    #[serde(default)]
    pub weight: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub overrides: Vec<OverrideRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    #[serde(rename = "contextName")]
    pub context_name: String,

    #[serde(default)]
    pub values: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Parameter values are canonically comma-separated strings. Numbers, bools
// and lists of scalars are folded into that form.
fn parameters<'de, D>(deserializer: D) -> Result<Parameters, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<std::collections::BTreeMap<String, serde_json::Value>> =
        Option::deserialize(deserializer)?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, scalar_string(value)))
        .collect())
}

fn scalar_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(scalar_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
