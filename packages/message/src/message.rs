//! Ordered, named argument lists and the fault record they may carry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::ABSENT;
use crate::{Error, Value};

/// One named entry of a [`Message`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Structured error returned by the remote peer or synthesized locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub code: String,
    pub description: String,
    /// Free-form detail text, when the peer sent any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Fault {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Renders `Fault code: <code>\nFault description: <description>`.
///
/// This format is relied upon by callers for diagnostics and comparisons.
impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fault code: {}\nFault description: {}",
            self.code, self.description
        )
    }
}

/// The full argument list of a request, or the full result of a response.
///
/// Names may repeat. Lookups by name return the first match; use
/// [`Message::values`] or [`Message::value_nth`] to reach the others.
/// Missing names and indices yield the absent value rather than an error.
///
/// A response message may carry a [`Fault`]. Check [`Message::is_fault`]
/// before treating the arguments as a successful result: a fault message can
/// still hold diagnostic arguments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    arguments: Vec<Argument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fault: Option<Fault>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fault message with no arguments.
    pub fn from_fault(fault: Fault) -> Self {
        Self {
            arguments: Vec::new(),
            fault: Some(fault),
        }
    }

    /// Builder form of [`Message::add_argument`].
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_argument(name, value);
        self
    }

    /// Append an argument. Duplicate names are kept.
    pub fn add_argument(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.arguments.push(Argument::new(name, value));
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// First value named `name`, or the absent value.
    pub fn value(&self, name: &str) -> &Value {
        self.value_nth(name, 0)
    }

    /// The `n`th value named `name` (zero based), or the absent value.
    pub fn value_nth(&self, name: &str, n: usize) -> &Value {
        self.arguments
            .iter()
            .filter(|arg| arg.name == name)
            .nth(n)
            .map(|arg| &arg.value)
            .unwrap_or(&ABSENT)
    }

    /// Every value named `name`, in order.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.arguments
            .iter()
            .filter(move |arg| arg.name == name)
            .map(|arg| &arg.value)
    }

    /// Value at position `index`, or the absent value.
    pub fn value_at(&self, index: usize) -> &Value {
        self.arguments
            .get(index)
            .map(|arg| &arg.value)
            .unwrap_or(&ABSENT)
    }

    /// First value of the list, or the absent value when empty.
    pub fn first_value(&self) -> &Value {
        self.value_at(0)
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// The fault record. Asking a non-fault message is an `InvalidState` error.
    pub fn fault(&self) -> Result<&Fault, Error> {
        self.fault
            .as_ref()
            .ok_or_else(|| Error::invalid_state("message does not carry a fault"))
    }

    pub fn set_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    /// See [`Fault`]'s `Display` for the format.
    pub fn fault_as_string(&self) -> Result<String, Error> {
        self.fault().map(|fault| fault.to_string())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fault) = &self.fault {
            write!(f, "Fault({}: {})", fault.code, fault.description)?;
            if self.arguments.is_empty() {
                return Ok(());
            }
            write!(f, " ")?;
        }
        write!(f, "{{")?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", arg.name, arg.value)?;
        }
        write!(f, "}}")
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Message {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut message = Message::new();
        for (name, value) in iter {
            message.add_argument(name, value);
        }
        message
    }
}
