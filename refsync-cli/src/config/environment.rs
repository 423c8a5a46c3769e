//! Environment connection settings resolved from process environment

use anyhow::{Context, Result};

/// Connection details for one Dynamics 365 environment
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub name: String,
    /// Organization URL (e.g., "https://contoso.crm4.dynamics.com")
    pub url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Environment {
    /// Resolve `{NAME}_URL`, `{NAME}_TENANT_ID`, `{NAME}_CLIENT_ID` and
    /// `{NAME}_CLIENT_SECRET` for the given environment name
    pub fn from_env(name: &str) -> Result<Self> {
        Self::from_lookup(name, |key| std::env::var(key).ok())
    }

    /// Same as [`Environment::from_env`] with an injectable variable source
    pub fn from_lookup(name: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let prefix = env_prefix(name);
        let get = |suffix: &str| {
            let key = format!("{}_{}", prefix, suffix);
            lookup(&key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Environment variable {} is not set", key))
        };

        Ok(Self {
            name: name.to_string(),
            url: get("URL")?.trim_end_matches('/').to_string(),
            tenant_id: get("TENANT_ID")?,
            client_id: get("CLIENT_ID")?,
            client_secret: get("CLIENT_SECRET")?,
        })
    }
}

/// "uat-west" -> "UAT_WEST"
fn env_prefix(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("UAT_WEST_URL", "https://uat.crm4.dynamics.com/"),
            ("UAT_WEST_TENANT_ID", "tenant"),
            ("UAT_WEST_CLIENT_ID", "client"),
            ("UAT_WEST_CLIENT_SECRET", "secret"),
        ]
        .into_iter()
        .collect();

        let env = Environment::from_lookup("uat-west", |k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(env.url, "https://uat.crm4.dynamics.com");
        assert_eq!(env.client_secret, "secret");
    }

    #[test]
    fn test_missing_variable_names_the_key() {
        let err = Environment::from_lookup("dev", |_| None).unwrap_err();
        assert!(err.to_string().contains("DEV_URL"));
    }
}
