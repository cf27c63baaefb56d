//! HTTP transport abstraction.
//!
//! The dispatcher hands every request to a [`Transport`]. The production
//! implementation is [`ReqwestTransport`]; tests substitute a mock so no
//! network is needed.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use soapcall_message::Error;

use crate::config::ClientConfig;

/// An encoded request ready to be POSTed.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Whatever the peer answered, success or not.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Check if the response status indicates success (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not reach the peer.
    Connect,
    /// The peer did not answer in time.
    Timeout,
    Other,
}

/// A request that never produced a response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::TransportFailure {
            message: err.message,
        }
    }
}

/// Sends encoded requests.
///
/// Implementations block until the peer answers or the request fails; the
/// dispatcher decides which thread that happens on.
pub trait Transport: Send + Sync {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport using a blocking reqwest client.
pub struct ReqwestTransport {
    client: Client,
    default_headers: Vec<(String, String)>,
}

impl ReqwestTransport {
    /// Create a new transport with the given timeout.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        Self::from_config(&ClientConfig::default().with_timeout(timeout))
    }

    /// Create with default timeout of 30 seconds.
    pub fn with_default_timeout() -> Result<Self, Error> {
        Self::from_config(&ClientConfig::default())
    }

    /// Honors the timeout, user agent, and extra headers of `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, Error> {
        let mut builder = Client::builder().timeout(config.timeout());
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().map_err(|e| Error::Config {
            message: format!("cannot build HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            default_headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.default_headers.iter().chain(&request.headers) {
            let header_name = HeaderName::try_from(name.as_str())
                .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
            let header_value = HeaderValue::try_from(value.as_str())
                .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
            headers.insert(header_name, header_value);
        }

        let response = self
            .client
            .post(&request.url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .map_err(classify)?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("Unknown")
            .to_string();

        let mut resp_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                resp_headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = response.bytes().map_err(classify)?.to_vec();

        Ok(TransportResponse {
            status,
            status_text,
            headers: resp_headers,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, describe(&err))
}

/// The error and its sources, joined with `: `.
fn describe(err: &dyn StdError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Mock transport for testing.
///
/// Returns predefined responses based on the request URL.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::{Arc, Condvar, Mutex};

    #[derive(Clone, Default)]
    pub struct MockTransport {
        /// Responses keyed by request URL.
        responses: Arc<Mutex<HashMap<String, TransportResponse>>>,
        default_response: Arc<Mutex<Option<TransportResponse>>>,
        recorded_requests: Arc<Mutex<Vec<TransportRequest>>>,
        failure: Arc<Mutex<Option<TransportError>>>,
        /// While true, `send` blocks until `release` is called.
        held: Arc<(Mutex<bool>, Condvar)>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_response(self, url: impl Into<String>, response: TransportResponse) -> Self {
            self.responses.lock().unwrap().insert(url.into(), response);
            self
        }

        pub fn with_default_response(self, response: TransportResponse) -> Self {
            *self.default_response.lock().unwrap() = Some(response);
            self
        }

        /// Fail every request with `kind`.
        pub fn fail_with(self, kind: TransportErrorKind, message: impl Into<String>) -> Self {
            *self.failure.lock().unwrap() = Some(TransportError::new(kind, message));
            self
        }

        /// Block every `send` until [`MockTransport::release`].
        pub fn held(self) -> Self {
            *self.held.0.lock().unwrap() = true;
            self
        }

        pub fn release(&self) {
            let (lock, cvar) = &*self.held;
            *lock.lock().unwrap() = false;
            cvar.notify_all();
        }

        pub fn recorded_requests(&self) -> Vec<TransportRequest> {
            self.recorded_requests.lock().unwrap().clone()
        }

        /// A response carrying `body` as text.
        pub fn response(status: u16, body: &str) -> TransportResponse {
            TransportResponse {
                status,
                status_text: http::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown")
                    .to_string(),
                headers: HashMap::new(),
                body: body.as_bytes().to_vec(),
            }
        }

        /// A 200 SOAP 1.1 envelope wrapping `payload`.
        pub fn envelope(payload: &str) -> TransportResponse {
            Self::response(
                200,
                &format!(
                    r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>{}</soap:Body></soap:Envelope>"#,
                    payload
                ),
            )
        }
    }

    impl Transport for MockTransport {
        fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
            self.recorded_requests.lock().unwrap().push(request.clone());

            {
                let (lock, cvar) = &*self.held;
                let mut held = lock.lock().unwrap();
                while *held {
                    held = cvar.wait(held).unwrap();
                }
            }

            if let Some(err) = self.failure.lock().unwrap().clone() {
                return Err(err);
            }

            if let Some(response) = self.responses.lock().unwrap().get(&request.url) {
                return Ok(response.clone());
            }

            if let Some(ref response) = *self.default_response.lock().unwrap() {
                return Ok(response.clone());
            }

            Ok(Self::response(404, ""))
        }
    }
}
