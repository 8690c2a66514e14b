#![forbid(unsafe_code)]

//! Namespace-aware pull reading over `quick-xml`.

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use wsdsig_core::{Error, Result};

use crate::event::{Attribute, StartElement, XmlEvent};
use crate::namespace::NamespaceScopes;
use crate::sink::XmlSink;

/// A forward-only source of [`XmlEvent`]s.
///
/// Every `Start` is matched by exactly one `End`, including for empty
/// elements.
pub trait XmlRead {
    /// Returns the next event without consuming it.
    fn peek(&mut self) -> Result<&XmlEvent>;

    fn next_event(&mut self) -> Result<XmlEvent>;

    /// The namespace bindings in effect for the next event. Declarations on a
    /// peeked but unconsumed start tag are not included.
    fn namespaces_in_scope(&self) -> Vec<(String, String)>;
}

/// Reads XML text with `quick-xml`, resolving namespace prefixes and
/// applying XML end-of-line and attribute-value normalization.
///
/// Document type declarations are rejected.
pub struct XmlReader<R> {
    inner: Reader<R>,
    buf: Vec<u8>,
    peeked: Option<XmlEvent>,
    pending_end: bool,
    scopes: NamespaceScopes,
    open: usize,
}

impl<'a> XmlReader<&'a [u8]> {
    pub fn from_xml(xml: &'a str) -> Self {
        Self::new(xml.as_bytes())
    }
}

impl<R: BufRead> XmlReader<R> {
    pub fn new(source: R) -> Self {
        let mut inner = Reader::from_reader(source);
        inner.config_mut().trim_text(false);
        Self {
            inner,
            buf: Vec::new(),
            peeked: None,
            pending_end: false,
            scopes: NamespaceScopes::new(),
            open: 0,
        }
    }

    fn read_raw(&mut self) -> Result<XmlEvent> {
        if self.pending_end {
            self.pending_end = false;
            return Ok(XmlEvent::End);
        }
        loop {
            self.buf.clear();
            let position = self.inner.buffer_position();
            let event = self
                .inner
                .read_event_into(&mut self.buf)
                .map_err(|e| Error::XmlParse(format!("at byte {position}: {e}")))?;
            let converted = match event {
                Event::Start(e) => XmlEvent::Start(resolve_start(&self.scopes, &e, false)?),
                Event::Empty(e) => {
                    self.pending_end = true;
                    XmlEvent::Start(resolve_start(&self.scopes, &e, true)?)
                }
                Event::End(_) => XmlEvent::End,
                Event::Text(e) => {
                    let text = unescape_text(&e)?;
                    if text.is_empty() {
                        continue;
                    }
                    if text.chars().all(is_xml_whitespace) {
                        XmlEvent::Whitespace(text)
                    } else {
                        XmlEvent::Text(text)
                    }
                }
                Event::CData(e) => XmlEvent::CData(normalize_newlines(utf8(&e)?)),
                Event::Comment(e) => XmlEvent::Comment(normalize_newlines(utf8(&e)?)),
                Event::PI(e) => XmlEvent::ProcessingInstruction {
                    target: utf8(e.target())?.to_string(),
                    data: normalize_newlines(utf8(e.content())?.trim_start()),
                },
                Event::Decl(_) => continue,
                Event::DocType(_) => {
                    return Err(Error::XmlParse("document type declarations are not allowed".into()))
                }
                Event::Eof => XmlEvent::Eof,
            };
            return Ok(converted);
        }
    }
}

impl<R: BufRead> XmlRead for XmlReader<R> {
    fn peek(&mut self) -> Result<&XmlEvent> {
        if self.peeked.is_none() {
            let event = self.read_raw()?;
            self.peeked = Some(event);
        }
        match &self.peeked {
            Some(event) => Ok(event),
            None => Err(Error::InvalidState("peek buffer is empty".into())),
        }
    }

    fn next_event(&mut self) -> Result<XmlEvent> {
        let event = match self.peeked.take() {
            Some(event) => event,
            None => self.read_raw()?,
        };
        match &event {
            XmlEvent::Start(start) => {
                self.scopes.push(start.namespace_declarations.clone());
                self.open += 1;
            }
            XmlEvent::End => {
                if self.open == 0 {
                    return Err(Error::XmlStructure("end tag without matching start tag".into()));
                }
                self.scopes.pop();
                self.open -= 1;
            }
            XmlEvent::Eof if self.open > 0 => {
                return Err(Error::XmlStructure(format!(
                    "input ended with {} unclosed element(s)",
                    self.open
                )));
            }
            _ => {}
        }
        Ok(event)
    }

    fn namespaces_in_scope(&self) -> Vec<(String, String)> {
        self.scopes.in_scope()
    }
}

/// Forwards every consumed event to a set of sinks while reading.
///
/// Peeked events are forwarded only once they are consumed.
pub struct TeeReader<'a, R: XmlRead + ?Sized> {
    inner: &'a mut R,
    sinks: Vec<&'a mut dyn XmlSink>,
}

impl<'a, R: XmlRead + ?Sized> TeeReader<'a, R> {
    pub fn new(inner: &'a mut R, sinks: Vec<&'a mut dyn XmlSink>) -> Self {
        Self { inner, sinks }
    }
}

impl<R: XmlRead + ?Sized> XmlRead for TeeReader<'_, R> {
    fn peek(&mut self) -> Result<&XmlEvent> {
        self.inner.peek()
    }

    fn next_event(&mut self) -> Result<XmlEvent> {
        let event = self.inner.next_event()?;
        for sink in self.sinks.iter_mut() {
            event.write_to(&mut **sink)?;
        }
        Ok(event)
    }

    fn namespaces_in_scope(&self) -> Vec<(String, String)> {
        self.inner.namespaces_in_scope()
    }
}

fn resolve_start(
    scopes: &NamespaceScopes,
    e: &BytesStart<'_>,
    is_empty: bool,
) -> Result<StartElement> {
    let name = utf8(e.name().into_inner())?;

    let mut namespace_declarations = Vec::new();
    let mut raw_attributes = Vec::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|err| Error::XmlParse(format!("malformed attribute on <{name}>: {err}")))?;
        let key = utf8(attr.key.into_inner())?;
        let value = unescape_attribute(&attr.value)?;
        if key == "xmlns" {
            namespace_declarations.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespace_declarations.push((prefix.to_string(), value));
        } else {
            raw_attributes.push((key, value));
        }
    }

    let (prefix, local_name) = split_qname(name);
    let namespace_uri = scopes
        .lookup_with(&namespace_declarations, prefix)
        .ok_or_else(|| Error::XmlParse(format!("unbound namespace prefix '{prefix}' on <{name}>")))?
        .to_string();

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (attr_prefix, attr_local) = split_qname(key);
        let attr_ns = if attr_prefix.is_empty() {
            String::new()
        } else {
            scopes
                .lookup_with(&namespace_declarations, attr_prefix)
                .ok_or_else(|| {
                    Error::XmlParse(format!(
                        "unbound namespace prefix '{attr_prefix}' on attribute {key}"
                    ))
                })?
                .to_string()
        };
        attributes.push(Attribute {
            prefix: attr_prefix.to_string(),
            local_name: attr_local.to_string(),
            namespace_uri: attr_ns,
            value,
        });
    }

    Ok(StartElement {
        prefix: prefix.to_string(),
        local_name: local_name.to_string(),
        namespace_uri,
        namespace_declarations,
        attributes,
        is_empty,
    })
}

fn split_qname(name: &str) -> (&str, &str) {
    name.split_once(':').unwrap_or(("", name))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))
}

fn is_xml_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// XML end-of-line handling: `\r\n` and lone `\r` become `\n`.
fn normalize_newlines(raw: &str) -> String {
    if !raw.contains('\r') {
        return raw.to_string();
    }
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

fn unescape_text(raw: &[u8]) -> Result<String> {
    let normalized = normalize_newlines(utf8(raw)?);
    quick_xml::escape::unescape(&normalized)
        .map(|text| text.into_owned())
        .map_err(|e| Error::XmlParse(format!("bad character reference: {e}")))
}

/// Literal tabs and newlines in attribute values become spaces; character
/// references survive.
fn unescape_attribute(raw: &[u8]) -> Result<String> {
    let normalized: String = normalize_newlines(utf8(raw)?)
        .chars()
        .map(|c| if matches!(c, '\t' | '\n') { ' ' } else { c })
        .collect();
    quick_xml::escape::unescape(&normalized)
        .map(|value| value.into_owned())
        .map_err(|e| Error::XmlParse(format!("bad character reference: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsdsig_core::ns;

    fn events(xml: &str) -> Vec<XmlEvent> {
        let mut reader = XmlReader::from_xml(xml);
        let mut out = Vec::new();
        loop {
            let event = reader.next_event().unwrap();
            if event == XmlEvent::Eof {
                break;
            }
            out.push(event);
        }
        out
    }

    #[test]
    fn resolves_element_and_attribute_namespaces() {
        let xml = r#"<a:root xmlns:a="urn:a" xmlns="urn:d"><child a:x="1" y="2"/></a:root>"#;
        let evs = events(xml);
        match &evs[0] {
            XmlEvent::Start(s) => {
                assert!(s.is("root", "urn:a"));
                assert_eq!(s.namespace_declarations.len(), 2);
                assert!(s.attributes.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        match &evs[1] {
            XmlEvent::Start(s) => {
                assert!(s.is("child", "urn:d"));
                assert!(s.is_empty);
                assert_eq!(s.attribute_ns("x", "urn:a"), Some("1"));
                assert_eq!(s.attribute("y"), Some("2"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(evs[2], XmlEvent::End);
        assert_eq!(evs[3], XmlEvent::End);
    }

    #[test]
    fn xml_prefix_attribute_resolves() {
        let evs = events(r#"<r xml:lang="en"/>"#);
        match &evs[0] {
            XmlEvent::Start(s) => assert_eq!(s.attribute_ns("lang", ns::XML), Some("en")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unbound_prefix_is_an_error() {
        let mut reader = XmlReader::from_xml("<p:r/>");
        assert!(matches!(reader.next_event(), Err(Error::XmlParse(_))));
    }

    #[test]
    fn doctype_is_rejected() {
        let mut reader = XmlReader::from_xml("<!DOCTYPE r []><r/>");
        assert!(reader.next_event().is_err());
    }

    #[test]
    fn whitespace_and_text_are_distinguished() {
        let evs = events("<r>\n  <a>x</a></r>");
        assert_eq!(evs[1], XmlEvent::Whitespace("\n  ".into()));
        assert_eq!(evs[3], XmlEvent::Text("x".into()));
    }

    #[test]
    fn newlines_are_normalized_but_references_survive() {
        let evs = events("<r>a\r\nb&#xD;c</r>");
        assert_eq!(evs[1], XmlEvent::Text("a\nb\rc".into()));
    }

    #[test]
    fn attribute_values_are_normalized() {
        let evs = events("<r a=\"x\ty\nz&#x9;\"/>");
        match &evs[0] {
            XmlEvent::Start(s) => assert_eq!(s.attribute("a"), Some("x y z\t")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn scope_excludes_peeked_start_tag() {
        let mut reader = XmlReader::from_xml(r#"<a xmlns:p="urn:p"><b xmlns:q="urn:q"/></a>"#);
        reader.next_event().unwrap();
        assert!(matches!(reader.peek().unwrap(), XmlEvent::Start(_)));
        assert_eq!(
            reader.namespaces_in_scope(),
            vec![("p".to_string(), "urn:p".to_string())]
        );
    }

    #[test]
    fn unclosed_element_is_an_error() {
        let mut reader = XmlReader::from_xml("<a><b></b>");
        let mut result = Ok(XmlEvent::End);
        for _ in 0..4 {
            result = reader.next_event();
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }
}
