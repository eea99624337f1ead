use serde::{Deserialize, Serialize};

use super::{OverrideRecord, VariantRecord};
use crate::Context;
use crate::strategy::{Identifier, Stickiness, normalized_hash};

pub(crate) const DISABLED_VARIANT: &str = "disabled";

/// The variant answer of a flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Variant {
    /// `{ name: "disabled", enabled: false }`
    pub fn disabled() -> Self {
        Self {
            name: DISABLED_VARIANT.to_string(),
            enabled: false,
            payload: None,
        }
    }

    pub(crate) fn enabled_without_variants() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct VariantDefinition {
    name: String,
    weight: u32,
    payload: Option<serde_json::Value>,
    stickiness: Stickiness,
    overrides: Vec<OverrideRecord>,
}

impl From<VariantRecord> for VariantDefinition {
    fn from(record: VariantRecord) -> Self {
        Self {
            name: record.name,
            weight: record.weight,
            payload: record.payload,
            stickiness: record
                .stickiness
                .as_deref()
                .map(Stickiness::parse)
                .unwrap_or(Stickiness::Default),
            overrides: record.overrides,
        }
    }
}

impl VariantDefinition {
    fn as_variant(&self) -> Variant {
        Variant {
            name: self.name.clone(),
            enabled: true,
            payload: self.payload.clone(),
        }
    }

    fn is_overridden(&self, context: &Context) -> bool {
        self.overrides.iter().any(|o| {
            context
                .get(&o.context_name)
                .is_some_and(|v| o.values.iter().any(|candidate| candidate == v))
        })
    }
}

/// Picks the variant for an enabled flag; `group` is the feature name.
pub(crate) fn select(variants: &[VariantDefinition], group: &str, context: &Context) -> Variant {
    if let Some(overridden) = variants.iter().find(|v| v.is_overridden(context)) {
        return overridden.as_variant();
    }

    let Some(total) = variants
        .iter()
        .try_fold(0u32, |total, v| total.checked_add(v.weight))
    else {
        tracing::warn!(feature = group, "Variant weights overflow, ignoring the variants");
        return Variant::enabled_without_variants();
    };
    if total == 0 {
        return Variant::enabled_without_variants();
    }

    let stickiness = &variants[0].stickiness;
    let identifier = match stickiness {
        Stickiness::Default => context
            .get("userId")
            .or_else(|| context.get("sessionId"))
            .or_else(|| context.get("remoteAddress"))
            .map_or(Identifier::Random, Identifier::Sticky),
        other => other.identifier(context),
    };

    let target = match identifier {
        Identifier::Sticky(id) => normalized_hash(id, group, total),
        Identifier::Random | Identifier::Missing => rand::random_range(1..=total),
    };

    let mut counter = 0;
    for variant in variants {
        counter += variant.weight;
        if counter >= target {
            return variant.as_variant();
        }
    }

    Variant::enabled_without_variants()
}
