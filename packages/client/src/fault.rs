//! Fault normalization.
//!
//! Every way a call can go wrong ends up here and leaves as a fault
//! [`Message`]. Callers never see a transport error or a parse error
//! directly; they check [`Message::is_fault`].

use tracing::warn;

use soapcall_message::{Error, Fault, Message};

use crate::codec::{CallContext, Codec};
use crate::transport::{TransportError, TransportErrorKind, TransportResponse};

/// The caller, the request, or the local transport is at fault.
pub const CLIENT: &str = "Client";
/// The peer failed without sending a fault envelope.
pub const SERVER: &str = "Server";
/// The peer did not answer before the configured timeout.
pub const TIMEOUT: &str = "Client.Timeout";

/// Turn whatever the transport produced into the call's result.
///
/// A fault envelope is passed on verbatim whatever the HTTP status. A
/// readable envelope with a success status is the result. Otherwise a fault
/// is synthesized that names `path`.
pub fn normalize(
    outcome: Result<TransportResponse, TransportError>,
    codec: &dyn Codec,
    ctx: &CallContext<'_>,
    path: &str,
) -> Message {
    match outcome {
        Ok(response) => from_response(&response, codec, ctx, path),
        Err(err) => from_transport_error(&err, path),
    }
}

pub fn from_response(
    response: &TransportResponse,
    codec: &dyn Codec,
    ctx: &CallContext<'_>,
    path: &str,
) -> Message {
    match codec.decode(ctx, &response.body) {
        Ok(message) if message.is_fault() => message,
        Ok(message) if response.is_success() => message,
        Ok(_) | Err(_) if !response.is_success() => {
            let code = if response.is_server_error() {
                SERVER
            } else {
                CLIENT
            };
            synthesized(
                code,
                format!(
                    "HTTP {} {} ({})",
                    response.status, response.status_text, path
                ),
            )
        }
        Ok(message) => message,
        Err(err) => from_error(&err, path),
    }
}

pub fn from_transport_error(err: &TransportError, path: &str) -> Message {
    match err.kind {
        TransportErrorKind::Timeout => {
            synthesized(TIMEOUT, format!("{} ({})", err.message, path))
        }
        TransportErrorKind::Connect | TransportErrorKind::Other => {
            from_error(&Error::from(err.clone()), path)
        }
    }
}

/// Fold any error into a fault message. A `RemoteFault` keeps its record;
/// a `TransportFailure` keeps its bare diagnostic.
pub fn from_error(err: &Error, path: &str) -> Message {
    match err {
        Error::RemoteFault(fault) => Message::from_fault(fault.clone()),
        Error::TransportFailure { message } => {
            synthesized(CLIENT, format!("{} ({})", message, path))
        }
        other => synthesized(CLIENT, format!("{} ({})", other, path)),
    }
}

fn synthesized(code: &str, description: String) -> Message {
    warn!(code, %description, "call completed with a local fault");
    Message::from_fault(Fault::new(code, description))
}
