//! Response body decoding into a JSON tree.
//!
//! XML is folded into JSON so a single path syntax serves every format:
//! attributes become `@name` keys, text beside child elements becomes
//! `#text`, and repeated siblings collapse into an array.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use enrichkit_shared::{EnrichError, Result};

use crate::document::Expect;

/// Decode `body` as declared by the connector's `response.expect`.
pub fn decode_body(body: &str, expect: Expect) -> Result<Value> {
    match expect {
        Expect::Json => serde_json::from_str(body)
            .map_err(|e| EnrichError::upstream_fatal(format!("response is not valid JSON: {e}"))),
        Expect::Xml => xml_to_json(body),
        Expect::Text => Ok(Value::String(body.to_string())),
    }
}

struct Frame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut children = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(xml_error)?;
            let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr.unescape_value().map_err(xml_error)?;
            children.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            children,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let value = if self.children.is_empty() {
            Value::String(self.text)
        } else {
            let mut children = self.children;
            if !self.text.is_empty() {
                children.insert("#text".into(), Value::String(self.text));
            }
            Value::Object(children)
        };
        (self.name, value)
    }
}

fn xml_error(e: impl std::fmt::Display) -> EnrichError {
    EnrichError::upstream_fatal(format!("response is not valid XML: {e}"))
}

/// Insert a child, turning repeated names into arrays.
fn attach(parent: &mut Map<String, Value>, name: String, value: Value) {
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            parent.insert(name, value);
        }
    }
}

/// Convert an XML document into `{ root_name: ... }`.
pub fn xml_to_json(body: &str) -> Result<Value> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut root = Map::new();
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.children, name, value),
                    None => attach(&mut root, name, value),
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_error)?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| xml_error("closing tag without an opening tag"))?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.children, name, value),
                    None => attach(&mut root, name, value),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(xml_error("document ended inside an element"));
    }
    if root.is_empty() {
        return Err(xml_error("document has no root element"));
    }
    Ok(Value::Object(root))
}
