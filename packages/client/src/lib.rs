//! # soapcall-client
//!
//! Calling operations on a remote SOAP endpoint.
//!
//! ## Blocking calls
//!
//! [`SoapClient::call`] sends the request on the calling thread and returns
//! the result message:
//!
//! ```no_run
//! use soapcall_client::SoapClient;
//! use soapcall_message::Message;
//!
//! let client = SoapClient::new(
//!     "http://www.mathertel.de/AJAXEngine/S02_AJAXCoreSamples/CalcService.asmx",
//!     "http://www.mathertel.de/CalcFactors/",
//! )?;
//! let request = Message::new()
//!     .with_argument("number1", 42)
//!     .with_argument("number2", 43);
//!
//! let reply = client.call("AddInteger", &request);
//! if reply.is_fault() {
//!     eprintln!("{}", reply.fault_as_string()?);
//! } else {
//!     assert_eq!(reply.first_value().as_integer()?, 85);
//! }
//! # Ok::<(), soapcall_message::Error>(())
//! ```
//!
//! ## Non-blocking calls
//!
//! [`SoapClient::async_call`] returns a [`PendingCall`] straight away. Learn
//! that it finished by blocking on it, by awaiting it, or by attaching a
//! [`PendingCallWatcher`] whose handlers run on an [`EventLoop`].
//!
//! ## Faults
//!
//! Calls never return transport errors. Connection failures, timeouts, HTTP
//! errors and unreadable responses all become fault messages; see
//! [`fault`] for the codes used.

pub mod client;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod event_loop;
pub mod fault;
pub mod pending;
pub mod transport;
pub mod watcher;

pub use client::SoapClient;
pub use codec::{CallContext, Codec, SoapCodec, SoapVersion};
pub use config::ClientConfig;
pub use endpoint::{ActionRule, Endpoint};
pub use event_loop::EventLoop;
pub use pending::{CallState, PendingCall};
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportErrorKind, TransportRequest,
    TransportResponse,
};
pub use watcher::PendingCallWatcher;

pub use soapcall_message::{Error, Fault, Message, Value};
