//! This module controls configuration loading from the process environment.
//! Every required value must be present and non-empty, otherwise the exporter
//! refuses to start. Crashes are most likely to originate from this code,
//! intentionally.

use std::{fmt, time::Duration};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// One or more required variables are absent or empty.
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    /// A variable is present but its value cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// The variable name
        key: &'static str,
        /// The offending value
        value: String,
        /// Why the value was refused
        reason: String,
    },
}

/// Variable holding the Azure subscription id.
pub const SUBSCRIPTION_ID: &str = "subscription_id";
/// Variable holding the resource group whose VMs are exported.
pub const RESOURCE_GROUP: &str = "resource_group";
/// Variable holding the service principal's tenant id.
pub const TENANT_ID: &str = "tenant_id";
/// Variable holding the service principal's client id.
pub const CLIENT_ID: &str = "client_id";
/// Variable holding the service principal's client secret.
pub const CLIENT_SECRET: &str = "client_secret";
/// Variable holding the listen port.
pub const PORT: &str = "port";
/// Variable overriding the identity authority host.
pub const AUTHORITY_HOST: &str = "authority_host";
/// Variable overriding the Resource Manager endpoint.
pub const RESOURCE_MANAGER_ENDPOINT: &str = "resource_manager_endpoint";
/// Variable overriding the per-request timeout towards Azure.
pub const REQUEST_TIMEOUT_SECONDS: &str = "request_timeout_seconds";

/// Required variables, in the order they are reported when missing.
pub const REQUIRED: [&str; 5] = [
    SUBSCRIPTION_ID,
    RESOURCE_GROUP,
    TENANT_ID,
    CLIENT_ID,
    CLIENT_SECRET,
];

/// Default listen port
#[must_use]
pub fn default_port() -> u16 {
    8005
}

/// Default per-request timeout towards Azure
#[must_use]
pub fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Main configuration struct for this program
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Subscription holding the resource group
    pub subscription_id: String,
    /// Resource group whose VMs are exported
    pub resource_group: String,
    /// Service principal tenant
    pub tenant_id: String,
    /// Service principal client id
    pub client_id: String,
    /// Service principal client secret
    pub client_secret: String,
    /// Port the scrape endpoint listens on
    pub port: u16,
    /// Identity authority host, `None` for the public cloud
    pub authority_host: Option<String>,
    /// Resource Manager endpoint, `None` for the public cloud
    pub resource_manager_endpoint: Option<String>,
    /// Timeout applied to every request towards Azure
    pub request_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("port", &self.port)
            .field("authority_host", &self.authority_host)
            .field("resource_manager_endpoint", &self.resource_manager_endpoint)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::from_lookup`].
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value if set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Missing`] naming every required variable that is
    /// unset or empty, or [`Error::Invalid`] for the first optional variable
    /// whose value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let missing: Vec<&'static str> = REQUIRED
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Missing(missing));
        }
        let required = |key: &'static str| get(key).ok_or_else(|| Error::Missing(vec![key]));

        let port = match get(PORT) {
            None => default_port(),
            Some(value) => value.trim().parse::<u16>().map_err(|e| Error::Invalid {
                key: PORT,
                value,
                reason: e.to_string(),
            })?,
        };

        let request_timeout = match get(REQUEST_TIMEOUT_SECONDS) {
            None => default_request_timeout(),
            Some(value) => match value.trim().parse::<u64>() {
                Ok(0) => {
                    return Err(Error::Invalid {
                        key: REQUEST_TIMEOUT_SECONDS,
                        value,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Ok(secs) => Duration::from_secs(secs),
                Err(e) => {
                    return Err(Error::Invalid {
                        key: REQUEST_TIMEOUT_SECONDS,
                        value,
                        reason: e.to_string(),
                    });
                }
            },
        };

        Ok(Self {
            subscription_id: required(SUBSCRIPTION_ID)?,
            resource_group: required(RESOURCE_GROUP)?,
            tenant_id: required(TENANT_ID)?,
            client_id: required(CLIENT_ID)?,
            client_secret: required(CLIENT_SECRET)?,
            port,
            authority_host: get(AUTHORITY_HOST),
            resource_manager_endpoint: get(RESOURCE_MANAGER_ENDPOINT),
            request_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn complete() -> HashMap<String, String> {
        env(&[
            ("subscription_id", "sub-1"),
            ("resource_group", "rg-1"),
            ("tenant_id", "tenant-1"),
            ("client_id", "client-1"),
            ("client_secret", "hunter2"),
        ])
    }

    fn load(vars: &HashMap<String, String>) -> Result<Config, Error> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn complete_environment_uses_defaults() {
        let config = load(&complete()).expect("complete environment is valid");
        assert_eq!(config.subscription_id, "sub-1");
        assert_eq!(config.resource_group, "rg-1");
        assert_eq!(config.port, default_port());
        assert_eq!(config.request_timeout, default_request_timeout());
        assert!(config.authority_host.is_none());
        assert!(config.resource_manager_endpoint.is_none());
    }

    #[test]
    fn each_required_variable_is_enforced() {
        for key in REQUIRED {
            let mut vars = complete();
            vars.remove(key);
            assert_eq!(load(&vars), Err(Error::Missing(vec![key])), "{key}");
        }
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut vars = complete();
        vars.insert("client_secret".to_string(), String::new());
        assert_eq!(load(&vars), Err(Error::Missing(vec![CLIENT_SECRET])));
    }

    #[test]
    fn all_missing_variables_are_reported_in_order() {
        let err = load(&HashMap::new()).expect_err("empty environment is invalid");
        assert_eq!(err, Error::Missing(REQUIRED.to_vec()));
        assert_eq!(
            err.to_string(),
            "missing required environment variables: subscription_id, resource_group, tenant_id, client_id, client_secret"
        );
    }

    #[test]
    fn port_override_is_parsed() {
        let mut vars = complete();
        vars.insert("port".to_string(), "9100".to_string());
        assert_eq!(load(&vars).expect("valid port").port, 9100);
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let mut vars = complete();
        vars.insert("port".to_string(), "eighty".to_string());
        match load(&vars) {
            Err(Error::Invalid { key, value, .. }) => {
                assert_eq!(key, PORT);
                assert_eq!(value, "eighty");
            }
            other => panic!("expected invalid port, got {other:?}"),
        }
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut vars = complete();
        vars.insert("request_timeout_seconds".to_string(), "0".to_string());
        assert!(matches!(
            load(&vars),
            Err(Error::Invalid {
                key: REQUEST_TIMEOUT_SECONDS,
                ..
            })
        ));
    }

    #[test]
    fn sovereign_cloud_endpoints_are_read() {
        let mut vars = complete();
        vars.insert(
            "authority_host".to_string(),
            "https://login.microsoftonline.us".to_string(),
        );
        vars.insert(
            "resource_manager_endpoint".to_string(),
            "https://management.usgovcloudapi.net".to_string(),
        );
        let config = load(&vars).expect("valid config");
        assert_eq!(
            config.authority_host.as_deref(),
            Some("https://login.microsoftonline.us")
        );
        assert_eq!(
            config.resource_manager_endpoint.as_deref(),
            Some("https://management.usgovcloudapi.net")
        );
    }

    #[test]
    fn debug_output_redacts_secret() {
        let config = load(&complete()).expect("valid config");
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
