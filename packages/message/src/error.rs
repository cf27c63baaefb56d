//! Error types shared by every soapcall crate.

use crate::message::Fault;

/// Errors raised by the message model and the client.
///
/// `TypeMismatch` and `InvalidState` are programmer misuse and are returned
/// straight to the caller. The remaining kinds describe remote or transport
/// trouble; the client folds them into fault messages before they reach the
/// RPC surface.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("type mismatch: cannot read {found} as {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid state: {message}")]
    InvalidState { message: String },

    #[error("transport failure: {message}")]
    TransportFailure { message: String },

    #[error("remote fault: {0}")]
    RemoteFault(Fault),

    #[error("parse failure: {message}")]
    ParseFailure { message: String },

    #[error("encode failure: {message}")]
    Encode { message: String },

    #[error("invalid endpoint: {message}")]
    InvalidEndpoint { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState {
            message: message.into(),
        }
    }

    pub fn parse_failure(message: impl Into<String>) -> Self {
        Error::ParseFailure {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mismatch_display() {
        let e = Error::TypeMismatch {
            expected: "integer",
            found: "boolean",
        };
        assert_eq!(
            e.to_string(),
            "type mismatch: cannot read boolean as integer"
        );
    }

    #[test]
    fn remote_fault_display_uses_fault_string() {
        let e = Error::RemoteFault(Fault::new("soap:Server", "boom"));
        let display = e.to_string();
        assert!(display.contains("Fault code: soap:Server"));
        assert!(display.contains("boom"));
    }

    #[test]
    fn transport_failure_display() {
        let e = Error::TransportFailure {
            message: "connection refused".to_string(),
        };
        assert_eq!(e.to_string(), "transport failure: connection refused");
    }
}
