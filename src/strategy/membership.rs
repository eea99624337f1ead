use super::{Parameters, parse_list};
use crate::Context;

/// Matches when a context attribute is one of a provisioned list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Membership {
    context_key: String,
    parameter_key: String,
    values: Vec<String>,
}

impl Membership {
    pub(crate) fn new(
        context_key: impl Into<String>,
        parameter_key: impl Into<String>,
        parameters: &Parameters,
    ) -> Self {
        let parameter_key = parameter_key.into();
        let values = parameters
            .get(&parameter_key)
            .map(|v| parse_list(v))
            .unwrap_or_default();

        Self {
            context_key: context_key.into(),
            parameter_key,
            values,
        }
    }

    pub(crate) fn same_key(key: &str, parameters: &Parameters) -> Self {
        Self::new(key, key, parameters)
    }

    pub(crate) fn parameter_key(&self) -> &str {
        &self.parameter_key
    }

    pub(crate) fn values(&self) -> &[String] {
        &self.values
    }

    pub(crate) fn matches(&self, context: &Context) -> bool {
        let Some(value) = context.get(&self.context_key) else {
            return false;
        };

        self.values.iter().any(|v| v == value)
    }
}
