//! soapcall: a client core for SOAP-style remote procedure calls.
//!
//! The work is split across two crates, both re-exported here:
//! - [`message`] (`soapcall-message`): the `Value` / `Message` / `Fault` model
//! - [`client`] (`soapcall-client`): the dispatcher, pending calls, watchers
//!   and the event loop they report to
//!
//! Most programs only need the [`prelude`].

pub use soapcall_client as client;
pub use soapcall_message as message;

pub use soapcall_client::{
    ActionRule, ClientConfig, EventLoop, PendingCall, PendingCallWatcher, SoapClient,
};
pub use soapcall_message::{Error, Fault, Message, Value};

pub mod prelude {
    pub use soapcall_client::{EventLoop, PendingCall, PendingCallWatcher, SoapClient};
    pub use soapcall_message::{Message, Value};
}
