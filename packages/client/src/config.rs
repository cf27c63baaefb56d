//! Client configuration.
//!
//! ```json
//! {
//!     "timeout_ms": 10000,
//!     "soap_version": "1.2",
//!     "action_rule": "empty",
//!     "headers": { "X-Api-Key": "secret" }
//! }
//! ```
//!
//! Every field is optional; missing fields take the values of
//! [`ClientConfig::default`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use soapcall_message::Error;

use crate::codec::SoapVersion;
use crate::endpoint::ActionRule;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Whole-request timeout. Expiry completes the call with a
    /// `Client.Timeout` fault.
    pub timeout_ms: u64,

    pub soap_version: SoapVersion,

    /// How the action is derived when a call does not pass one.
    pub action_rule: ActionRule,

    /// Emit `xsi:type` attributes on primitive arguments.
    pub type_annotations: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Extra HTTP headers sent with every request.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            soap_version: SoapVersion::default(),
            action_rule: ActionRule::default(),
            type_annotations: true,
            user_agent: None,
            headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Config {
            message: e.to_string(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_soap_version(mut self, version: SoapVersion) -> Self {
        self.soap_version = version;
        self
    }

    pub fn with_action_rule(mut self, rule: ActionRule) -> Self {
        self.action_rule = rule;
        self
    }

    pub fn with_type_annotations(mut self, enabled: bool) -> Self {
        self.type_annotations = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.soap_version, SoapVersion::Soap11);
        assert_eq!(config.action_rule, ActionRule::NamespaceAndOperation);
        assert!(config.type_annotations);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn empty_json_gives_defaults() {
        assert_eq!(ClientConfig::from_json("{}").unwrap(), ClientConfig::default());
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config = ClientConfig::from_json(
            r#"{
                "timeout_ms": 500,
                "soap_version": "1.2",
                "action_rule": "empty",
                "headers": {"X-Api-Key": "secret"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.soap_version, SoapVersion::Soap12);
        assert_eq!(config.action_rule, ActionRule::Empty);
        assert!(config.type_annotations);
        assert_eq!(config.headers.get("X-Api-Key"), Some(&"secret".to_string()));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = ClientConfig::from_json(r#"{"timeout_ms": "soon"}"#).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn builders_chain() {
        let config = ClientConfig::default()
            .with_timeout(Duration::from_secs(2))
            .with_soap_version(SoapVersion::Soap12)
            .with_type_annotations(false)
            .with_user_agent("soapcall-test")
            .with_header("A", "b");
        assert_eq!(config.timeout_ms, 2000);
        assert_eq!(config.soap_version, SoapVersion::Soap12);
        assert!(!config.type_annotations);
        assert_eq!(config.user_agent.as_deref(), Some("soapcall-test"));
        assert_eq!(config.headers.len(), 1);
    }
}
