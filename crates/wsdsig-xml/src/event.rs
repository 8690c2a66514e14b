#![forbid(unsafe_code)]

//! Owned pull events produced by an [`XmlRead`](crate::XmlRead).

use wsdsig_core::Result;

use crate::sink::XmlSink;

/// A namespace-resolved attribute. Namespace declarations are not attributes
/// here; they live in [`StartElement::namespace_declarations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: String,
    pub local_name: String,
    pub namespace_uri: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub prefix: String,
    pub local_name: String,
    pub namespace_uri: String,
    /// `(prefix, uri)` pairs declared on this element, in document order.
    pub namespace_declarations: Vec<(String, String)>,
    pub attributes: Vec<Attribute>,
    /// Written as `<x/>`. Readers still deliver a matching [`XmlEvent::End`].
    pub is_empty: bool,
}

impl StartElement {
    pub fn is(&self, local_name: &str, namespace_uri: &str) -> bool {
        self.local_name == local_name && self.namespace_uri == namespace_uri
    }

    /// Value of the unqualified attribute `local_name`.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attribute_ns(local_name, "")
    }

    pub fn attribute_ns(&self, local_name: &str, namespace_uri: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name == local_name && a.namespace_uri == namespace_uri)
            .map(|a| a.value.as_str())
    }

    pub fn qualified_name(&self) -> String {
        if self.prefix.is_empty() {
            self.local_name.clone()
        } else {
            format!("{}:{}", self.prefix, self.local_name)
        }
    }

    /// Writes the start tag (declarations and attributes included) but not
    /// the end tag.
    pub fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        sink.start_element(&self.prefix, &self.local_name, &self.namespace_uri)?;
        for (prefix, uri) in &self.namespace_declarations {
            sink.namespace_declaration(prefix, uri)?;
        }
        for attr in &self.attributes {
            sink.attribute(&attr.prefix, &attr.local_name, &attr.namespace_uri, &attr.value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    Start(StartElement),
    End,
    Text(String),
    CData(String),
    Comment(String),
    Whitespace(String),
    ProcessingInstruction { target: String, data: String },
    Eof,
}

impl XmlEvent {
    pub fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        match self {
            XmlEvent::Start(start) => start.write_to(sink),
            XmlEvent::End => sink.end_element(),
            XmlEvent::Text(text) => sink.text(text),
            XmlEvent::CData(text) => sink.cdata(text),
            XmlEvent::Comment(text) => sink.comment(text),
            XmlEvent::Whitespace(text) => sink.whitespace(text),
            XmlEvent::ProcessingInstruction { target, data } => {
                sink.processing_instruction(target, data)
            }
            XmlEvent::Eof => Ok(()),
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            XmlEvent::Start(start) => format!("<{}>", start.qualified_name()),
            XmlEvent::End => "end tag".into(),
            XmlEvent::Text(_) | XmlEvent::CData(_) => "text".into(),
            XmlEvent::Comment(_) => "comment".into(),
            XmlEvent::Whitespace(_) => "whitespace".into(),
            XmlEvent::ProcessingInstruction { .. } => "processing instruction".into(),
            XmlEvent::Eof => "end of input".into(),
        }
    }
}
