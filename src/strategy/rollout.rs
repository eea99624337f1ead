use super::Parameters;
use crate::Context;

/// Buckets `identifier` into `1..=modulus` for the given group.
pub(crate) fn normalized_hash(identifier: &str, group: &str, modulus: u32) -> u32 {
    let key = format!("{group}:{identifier}");
    let hash = murmur3::murmur3_32(&mut std::io::Cursor::new(key.as_bytes()), 0)
        .unwrap_or_default();

    hash % modulus.max(1) + 1
}

/// Parses a percentage parameter, clamped to `0..=100`.
pub(crate) fn parse_percentage(value: Option<&String>) -> u32 {
    let Some(value) = value else {
        return 0;
    };

    match value.trim().parse::<f64>() {
        Ok(pct) if pct.is_finite() => pct.clamp(0.0, 100.0) as u32,
        _ => {
            tracing::warn!(%value, "Unparseable rollout percentage, treating it as 0");
            0
        }
    }
}

/// Which context attribute pins a caller to a rollout bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Stickiness {
    /// `userId`, then `sessionId`, then random.
    Default,
    Random,
    Field(String),
}

impl Stickiness {
    pub(crate) fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "default" => Stickiness::Default,
            "random" => Stickiness::Random,
            field => Stickiness::Field(field.to_string()),
        }
    }

    pub(crate) fn identifier<'c>(&self, context: &'c Context) -> Identifier<'c> {
        match self {
            Stickiness::Random => Identifier::Random,
            Stickiness::Default => context
                .get("userId")
                .or_else(|| context.get("sessionId"))
                .map_or(Identifier::Random, Identifier::Sticky),
            Stickiness::Field(field) => context
                .get(field)
                .map_or(Identifier::Missing, Identifier::Sticky),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Identifier<'c> {
    Sticky(&'c str),
    Random,
    /// A named stickiness field that is absent from the context.
    Missing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Rollout {
    percentage: u32,
    group_id: String,
    stickiness: Stickiness,
}

impl Rollout {
    pub(crate) fn from_parameters(
        percentage_key: &str,
        stickiness: Stickiness,
        parameters: &Parameters,
    ) -> Self {
        Self {
            percentage: parse_percentage(parameters.get(percentage_key)),
            group_id: parameters.get("groupId").cloned().unwrap_or_default(),
            stickiness,
        }
    }

    pub(crate) fn matches(&self, context: &Context) -> bool {
        if self.percentage == 0 {
            return false;
        }

        let bucket = match self.stickiness.identifier(context) {
            Identifier::Sticky(id) => normalized_hash(id, &self.group_id, 100),
            Identifier::Random => rand::random_range(1..=100),
            Identifier::Missing => return false,
        };

        bucket <= self.percentage
    }
}
