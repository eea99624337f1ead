#[derive(serde::Deserialize, serde::Serialize, Clone, Debug, PartialEq, Eq)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new() -> InstanceId {
        InstanceId(format!("toggle-client-{}", uuid::Uuid::now_v7()))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.0)
    }
}

#[derive(serde::Deserialize, serde::Serialize, Clone, Debug, PartialEq, Eq)]
pub struct AppName(String);

impl Default for AppName {
    fn default() -> Self {
        Self(env!("CARGO_PKG_NAME").to_string())
    }
}

impl From<String> for AppName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AppName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AppName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AppName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_instance_ids_are_distinct() {
        assert_ne!(InstanceId::new(), InstanceId::new());
        assert!(InstanceId::new().to_string().starts_with("toggle-client-"));
    }
}
