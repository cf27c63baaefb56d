//! Endpoint binding: where calls go and how their action is chosen.

use serde::{Deserialize, Serialize};
use url::Url;

use soapcall_message::Error;

/// Rule for the action sent with a call that does not name one.
///
/// Services disagree here: some route on `namespace + operation`, others
/// insist on an empty action. The rule is explicit so nothing is guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRule {
    /// The namespace, a `/` unless the namespace already ends with one, then
    /// the operation name.
    #[default]
    NamespaceAndOperation,
    /// Always the empty string.
    Empty,
}

impl ActionRule {
    pub fn derive(&self, namespace: &str, operation: &str) -> String {
        match self {
            ActionRule::NamespaceAndOperation => {
                if namespace.is_empty() || namespace.ends_with('/') {
                    format!("{}{}", namespace, operation)
                } else {
                    format!("{}/{}", namespace, operation)
                }
            }
            ActionRule::Empty => String::new(),
        }
    }
}

/// Target URL plus the XML namespace that qualifies operation names.
///
/// Fixed for the lifetime of a client and shared read-only by its calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    namespace: String,
}

impl Endpoint {
    /// Parse and validate an `http` or `https` endpoint.
    pub fn new(url: &str, namespace: impl Into<String>) -> Result<Self, Error> {
        let url = Url::parse(url).map_err(|e| Error::InvalidEndpoint {
            message: format!("{}: {}", url, e),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::InvalidEndpoint {
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        Ok(Self {
            url,
            namespace: namespace.into(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Path component of the URL, quoted in synthesized fault descriptions.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The action for `operation`: `explicit` when given, even if empty,
    /// otherwise whatever `rule` derives.
    pub fn resolve_action(&self, rule: ActionRule, operation: &str, explicit: Option<&str>) -> String {
        match explicit {
            Some(action) => action.to_string(),
            None => rule.derive(&self.namespace, operation),
        }
    }
}
