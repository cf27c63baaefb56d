//! Wire codec: turns messages into SOAP envelopes and back.
//!
//! The [`Codec`] trait is the seam; [`SoapCodec`] is the default SOAP 1.1 /
//! 1.2 implementation built on `quick-xml`.

use std::borrow::Cow;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use soapcall_message::{Error, Fault, Message, Value};

const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
const SOAP_ENC_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// What a codec needs to know about the call being encoded or decoded.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub namespace: &'a str,
    pub operation: &'a str,
    pub action: &'a str,
}

/// Converts messages to request bodies and response bodies to messages.
pub trait Codec: Send + Sync {
    /// HTTP headers describing a request body, content type included.
    fn request_headers(&self, action: &str) -> Vec<(String, String)>;

    fn encode(&self, ctx: &CallContext<'_>, message: &Message) -> Result<Vec<u8>, Error>;

    /// Decode a response body. A fault envelope decodes to a fault message;
    /// anything unreadable is a `ParseFailure`.
    fn decode(&self, ctx: &CallContext<'_>, body: &[u8]) -> Result<Message, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SoapVersion {
    #[default]
    #[serde(rename = "1.1")]
    Soap11,
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    pub fn envelope_namespace(&self) -> &'static str {
        match self {
            SoapVersion::Soap11 => "http://schemas.xmlsoap.org/soap/envelope/",
            SoapVersion::Soap12 => "http://www.w3.org/2003/05/soap-envelope",
        }
    }
}

/// SOAP envelope codec.
#[derive(Debug, Clone)]
pub struct SoapCodec {
    version: SoapVersion,
    type_annotations: bool,
}

impl Default for SoapCodec {
    fn default() -> Self {
        Self::new(SoapVersion::default())
    }
}

impl SoapCodec {
    pub fn new(version: SoapVersion) -> Self {
        Self {
            version,
            type_annotations: true,
        }
    }

    /// Toggle `xsi:type` attributes on encoded primitives.
    pub fn with_type_annotations(mut self, enabled: bool) -> Self {
        self.type_annotations = enabled;
        self
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    fn write_value(
        &self,
        writer: &mut Writer<Vec<u8>>,
        name: &str,
        value: &Value,
    ) -> Result<(), Error> {
        check_element_name(name)?;
        let mut start = BytesStart::new(name);

        let text: Option<Cow<'_, str>> = match value {
            Value::Null => {
                start.push_attribute(("xsi:nil", "true"));
                return emit(writer, Event::Empty(start));
            }
            Value::Bool(b) => Some(Cow::Owned(b.to_string())),
            Value::Integer(i) => Some(Cow::Owned(i.to_string())),
            Value::Float(f) => Some(Cow::Owned(f.to_string())),
            Value::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Struct(_) | Value::Array(_) => None,
        };

        if self.type_annotations {
            if let Some(xsd_type) = xsd_type_of(value) {
                start.push_attribute(("xsi:type", xsd_type));
            }
        }

        emit(writer, Event::Start(start))?;
        match value {
            Value::Struct(message) => {
                for arg in message.arguments() {
                    self.write_value(writer, &arg.name, &arg.value)?;
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.write_value(writer, "item", item)?;
                }
            }
            _ => {
                if let Some(text) = text {
                    emit(writer, Event::Text(BytesText::new(&text)))?;
                }
            }
        }
        emit(writer, Event::End(BytesEnd::new(name)))
    }
}

impl Codec for SoapCodec {
    fn request_headers(&self, action: &str) -> Vec<(String, String)> {
        match self.version {
            SoapVersion::Soap11 => vec![
                (
                    "Content-Type".to_string(),
                    "text/xml; charset=utf-8".to_string(),
                ),
                ("SOAPAction".to_string(), format!("\"{}\"", action)),
            ],
            SoapVersion::Soap12 => {
                let content_type = if action.is_empty() {
                    "application/soap+xml; charset=utf-8".to_string()
                } else {
                    format!("application/soap+xml; charset=utf-8; action=\"{}\"", action)
                };
                vec![("Content-Type".to_string(), content_type)]
            }
        }
    }

    fn encode(&self, ctx: &CallContext<'_>, message: &Message) -> Result<Vec<u8>, Error> {
        check_element_name(ctx.operation)?;
        let mut writer = Writer::new(Vec::new());

        emit(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;

        let mut envelope = BytesStart::new("soap:Envelope");
        envelope.push_attribute(("xmlns:soap", self.version.envelope_namespace()));
        envelope.push_attribute(("xmlns:xsi", XSI_NS));
        envelope.push_attribute(("xmlns:xsd", XSD_NS));
        if self.type_annotations {
            envelope.push_attribute(("xmlns:soapenc", SOAP_ENC_NS));
        }
        emit(&mut writer, Event::Start(envelope))?;
        emit(&mut writer, Event::Start(BytesStart::new("soap:Body")))?;

        let mut operation = BytesStart::new(ctx.operation);
        if !ctx.namespace.is_empty() {
            operation.push_attribute(("xmlns", ctx.namespace));
        }
        emit(&mut writer, Event::Start(operation))?;
        for arg in message.arguments() {
            self.write_value(&mut writer, &arg.name, &arg.value)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new(ctx.operation)))?;

        emit(&mut writer, Event::End(BytesEnd::new("soap:Body")))?;
        emit(&mut writer, Event::End(BytesEnd::new("soap:Envelope")))?;

        Ok(writer.into_inner())
    }

    fn decode(&self, _ctx: &CallContext<'_>, body: &[u8]) -> Result<Message, Error> {
        let root = parse_document(body)?;
        if root.name != "Envelope" {
            return Err(Error::parse_failure(format!(
                "expected a SOAP Envelope, found <{}>",
                root.name
            )));
        }

        let body = root
            .child("Body")
            .ok_or_else(|| Error::parse_failure("response has no SOAP Body"))?;

        let Some(payload) = body.children.first() else {
            return Ok(Message::new());
        };

        if payload.name == "Fault" {
            return decode_fault(payload);
        }

        if payload.children.is_empty() && !payload.text.trim().is_empty() {
            let mut message = Message::new();
            message.add_argument(payload.name.clone(), element_value(payload)?);
            return Ok(message);
        }

        children_to_message(payload)
    }
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), Error> {
    writer.write_event(event).map_err(|e| Error::Encode {
        message: e.to_string(),
    })
}

/// Element names must be XML qualified names: an optional `prefix:` and a
/// local part, each starting with a letter or `_` and continuing with
/// letters, digits, `-`, `.` or `_`.
fn check_element_name(name: &str) -> Result<(), Error> {
    let mut parts = name.split(':');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), None, _) => is_ncname(local),
        (Some(prefix), Some(local), None) => is_ncname(prefix) && is_ncname(local),
        _ => false,
    };
    if !valid {
        return Err(Error::Encode {
            message: format!("'{}' is not a valid element name", name),
        });
    }
    Ok(())
}

fn is_ncname(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => chars
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_')),
        _ => false,
    }
}

fn xsd_type_of(value: &Value) -> Option<&'static str> {
    match value {
        Value::Bool(_) => Some("xsd:boolean"),
        Value::Integer(i) if i32::try_from(*i).is_ok() => Some("xsd:int"),
        Value::Integer(_) => Some("xsd:long"),
        Value::Float(_) => Some("xsd:double"),
        Value::Text(_) => Some("xsd:string"),
        Value::Array(_) => Some("soapenc:Array"),
        Value::Null | Value::Struct(_) => None,
    }
}

/// A parsed element with namespace prefixes stripped.
#[derive(Debug, Default)]
struct Element {
    name: String,
    /// (local name, value); namespace declarations are dropped.
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, Error> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::parse_failure(e.to_string()))?;
            if attr.key.as_ref().starts_with(b"xmlns") {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::parse_failure(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `xsi:type` with its prefix removed.
    fn xsi_type(&self) -> Option<&str> {
        self.attribute("type")
            .map(|t| t.rsplit(':').next().unwrap_or(t))
    }

    /// All descendant text, space separated.
    fn flat_text(&self) -> String {
        let mut parts = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }

    fn collect_text<'a>(&'a self, parts: &mut Vec<&'a str>) {
        let text = self.text.trim();
        if !text.is_empty() {
            parts.push(text);
        }
        for child in &self.children {
            child.collect_text(parts);
        }
    }
}

fn parse_document(body: &[u8]) -> Result<Element, Error> {
    let mut reader = Reader::from_reader(body);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(Error::parse_failure(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        };

        match event {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| Error::parse_failure("unbalanced closing tag"))?;
                // Leaf text is kept verbatim; around child elements it is layout.
                if !element.children.is_empty() {
                    element.text = element.text.trim().to_string();
                }
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| Error::parse_failure(e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| Error::parse_failure(e.to_string()))?;
                    top.text.push_str(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::parse_failure("unexpected end of document"));
    }
    root.ok_or_else(|| Error::parse_failure("empty response body"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    }
}

fn children_to_message(element: &Element) -> Result<Message, Error> {
    let mut message = Message::new();
    for child in &element.children {
        message.add_argument(child.name.clone(), element_value(child)?);
    }
    Ok(message)
}

fn element_value(element: &Element) -> Result<Value, Error> {
    if matches!(element.attribute("nil"), Some("true") | Some("1")) {
        return Ok(Value::Null);
    }

    let xsi_type = element.xsi_type();
    let is_array = xsi_type == Some("Array") || element.attribute("arrayType").is_some();

    if is_array {
        let items = element
            .children
            .iter()
            .map(element_value)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(items));
    }

    if !element.children.is_empty() {
        return Ok(Value::Struct(children_to_message(element)?));
    }

    // Typed primitives collapse surrounding whitespace; strings do not.
    let text = element.text.trim();
    let invalid = |kind: &str| {
        Error::parse_failure(format!(
            "element <{}> holds '{}', not a valid {}",
            element.name, text, kind
        ))
    };

    match xsi_type {
        Some("boolean") => match text {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid("boolean")),
        },
        Some(
            "int" | "long" | "short" | "byte" | "integer" | "unsignedInt" | "unsignedShort"
            | "unsignedByte" | "unsignedLong" | "positiveInteger" | "negativeInteger"
            | "nonNegativeInteger" | "nonPositiveInteger",
        ) => text
            .parse()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Some("double" | "float" | "decimal") => text
            .parse()
            .map(Value::Float)
            .map_err(|_| invalid("number")),
        _ => Ok(Value::Text(element.text.clone())),
    }
}

fn decode_fault(fault: &Element) -> Result<Message, Error> {
    // SOAP 1.1 uses faultcode/faultstring/detail, SOAP 1.2 Code/Reason/Detail.
    let code = fault
        .child("faultcode")
        .map(|c| c.text.trim().to_string())
        .or_else(|| {
            fault
                .child("Code")
                .and_then(|c| c.child("Value"))
                .map(|v| v.text.trim().to_string())
        })
        .unwrap_or_default();

    let description = fault
        .child("faultstring")
        .map(|s| s.text.trim().to_string())
        .or_else(|| {
            fault
                .child("Reason")
                .and_then(|r| r.child("Text"))
                .map(|t| t.text.trim().to_string())
        })
        .unwrap_or_default();

    let mut record = Fault::new(code, description);
    let mut message = Message::new();

    if let Some(detail) = fault.child("detail").or_else(|| fault.child("Detail")) {
        let text = detail.flat_text();
        if !text.is_empty() {
            record = record.with_detail(text);
        }
        for child in &detail.children {
            message.add_argument(child.name.clone(), element_value(child)?);
        }
    }
    if let Some(actor) = fault.child("faultactor").or_else(|| fault.child("Role")) {
        message.add_argument("faultactor", actor.text.trim().to_string());
    }

    message.set_fault(record);
    Ok(message)
}
