/// The tenant/environment pair a client instance serves.
///
/// Qualified flag names have the form `{tenant}.{environment}.{feature}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    tenant: String,
    environment: String,
}

impl Scope {
    pub fn new(tenant: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            environment: environment.into(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn qualify(&self, feature: &str) -> String {
        format!("{}.{}.{feature}", self.tenant, self.environment)
    }

    /// Removes this scope's prefix from a qualified name.
    ///
    /// Returns `None` for names belonging to another scope or without a
    /// feature part. Only the leading prefix is stripped.
    pub fn strip<'a>(&self, qualified: &'a str) -> Option<&'a str> {
        let mut parts = qualified.splitn(3, '.');
        let tenant = parts.next()?;
        let environment = parts.next()?;
        let feature = parts.next()?;

        (tenant == self.tenant && environment == self.environment && !feature.is_empty())
            .then_some(feature)
    }

    /// The value of the `environment` static context attribute.
    pub(crate) fn context_label(&self) -> String {
        format!("{}|{}", self.tenant, self.environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_only_matching_scopes() {
        let scope = Scope::new("acme", "prod");

        assert_eq!(scope.strip("acme.prod.new_ui"), Some("new_ui"));
        assert_eq!(scope.strip("acme.staging.new_ui"), None);
        assert_eq!(scope.strip("other.prod.new_ui"), None);
        assert_eq!(scope.strip("acme.prod"), None);
        assert_eq!(scope.strip("acme.prod."), None);
    }

    #[test]
    fn strips_the_prefix_once() {
        let scope = Scope::new("acme", "prod");
        assert_eq!(scope.strip("acme.prod.acme.prod.x"), Some("acme.prod.x"));
    }

    #[test]
    fn qualify_inverts_strip() {
        let scope = Scope::new("acme", "prod");
        assert_eq!(scope.qualify("new_ui"), "acme.prod.new_ui");
        assert_eq!(scope.strip(&scope.qualify("new_ui")), Some("new_ui"));
    }
}
