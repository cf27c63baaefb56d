//! soapcall message model
//!
//! The payload types exchanged with a remote peer:
//! - `Value`: a primitive, a nested message, or a sequence of values
//! - `Message`: an ordered, named argument list, optionally carrying a `Fault`
//! - `Error`: the error taxonomy shared by the whole soapcall stack
//!
//! # Example
//!
//! ```rust
//! use soapcall_message::{Message, Value};
//!
//! let mut request = Message::new();
//! request.add_argument("number1", 42);
//! request.add_argument("number2", 43);
//!
//! assert_eq!(request.value("number1").as_integer().unwrap(), 42);
//! assert!(request.value("missing").is_null());
//! assert_eq!(request.value_at(1), &Value::Integer(43));
//! ```

mod error;
mod message;
mod value;

pub use error::Error;
pub use message::{Argument, Fault, Message};
pub use value::Value;
