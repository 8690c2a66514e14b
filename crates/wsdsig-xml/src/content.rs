#![forbid(unsafe_code)]

//! Pull-parsing helpers for element-structured documents.

use base64::Engine;
use wsdsig_core::{Error, Result};

use crate::event::{StartElement, XmlEvent};
use crate::reader::XmlRead;

/// Consumes whitespace, comments and processing instructions.
pub fn skip_misc(reader: &mut dyn XmlRead) -> Result<()> {
    loop {
        let skippable = matches!(
            reader.peek()?,
            XmlEvent::Whitespace(_) | XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction { .. }
        );
        if !skippable {
            return Ok(());
        }
        reader.next_event()?;
    }
}

/// Returns `true` if the next significant event starts `local_name` in
/// `namespace_uri`.
pub fn is_start_element(
    reader: &mut dyn XmlRead,
    local_name: &str,
    namespace_uri: &str,
) -> Result<bool> {
    skip_misc(reader)?;
    Ok(matches!(reader.peek()?, XmlEvent::Start(s) if s.is(local_name, namespace_uri)))
}

pub fn read_start_element(
    reader: &mut dyn XmlRead,
    local_name: &str,
    namespace_uri: &str,
) -> Result<StartElement> {
    skip_misc(reader)?;
    match reader.next_event()? {
        XmlEvent::Start(start) if start.is(local_name, namespace_uri) => Ok(start),
        other => Err(Error::MissingElement(format!(
            "expected {local_name} ({namespace_uri}), found {}",
            other.describe()
        ))),
    }
}

pub fn read_end_element(reader: &mut dyn XmlRead) -> Result<()> {
    skip_misc(reader)?;
    match reader.next_event()? {
        XmlEvent::End => Ok(()),
        other => Err(Error::XmlStructure(format!(
            "expected end tag, found {}",
            other.describe()
        ))),
    }
}

/// Consumes the next element, start tag through end tag.
pub fn skip_element(reader: &mut dyn XmlRead) -> Result<()> {
    skip_misc(reader)?;
    match reader.next_event()? {
        XmlEvent::Start(_) => {}
        other => {
            return Err(Error::XmlStructure(format!(
                "expected an element, found {}",
                other.describe()
            )))
        }
    }
    let mut depth = 1usize;
    while depth > 0 {
        match reader.next_event()? {
            XmlEvent::Start(_) => depth += 1,
            XmlEvent::End => depth -= 1,
            XmlEvent::Eof => {
                return Err(Error::XmlStructure("input ended inside an element".into()))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Reads the character content of the current element up to and including
/// its end tag. Comments are ignored; child elements are an error.
pub fn read_element_content_as_string(reader: &mut dyn XmlRead) -> Result<String> {
    let mut content = String::new();
    loop {
        match reader.next_event()? {
            XmlEvent::Text(t) | XmlEvent::CData(t) | XmlEvent::Whitespace(t) => {
                content.push_str(&t)
            }
            XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction { .. } => {}
            XmlEvent::End => return Ok(content),
            other => {
                return Err(Error::XmlStructure(format!(
                    "unexpected {} in text-only element",
                    other.describe()
                )))
            }
        }
    }
}

/// Accumulates every text and whitespace node of the current element and
/// decodes the whole block as base64 once the end tag is reached.
pub fn read_element_content_as_base64(reader: &mut dyn XmlRead) -> Result<Vec<u8>> {
    let content = read_element_content_as_string(reader)?;
    decode_base64(&content)
}

/// Decodes base64 text, ignoring embedded XML whitespace.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let cleaned: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| Error::Base64(e.to_string()))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::XmlReader;

    #[test]
    fn base64_content_spans_multiple_text_nodes() {
        let xml = "<v>AAEC\n  <!-- split -->AwQF\n</v>";
        let mut reader = XmlReader::from_xml(xml);
        read_start_element(&mut reader, "v", "").unwrap();
        let bytes = read_element_content_as_base64(&mut reader).unwrap();
        assert_eq!(bytes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn bad_base64_is_reported() {
        let mut reader = XmlReader::from_xml("<v>not*base64</v>");
        read_start_element(&mut reader, "v", "").unwrap();
        assert!(matches!(
            read_element_content_as_base64(&mut reader),
            Err(Error::Base64(_))
        ));
    }

    #[test]
    fn child_element_in_text_content_is_rejected() {
        let mut reader = XmlReader::from_xml("<v>a<b/></v>");
        read_start_element(&mut reader, "v", "").unwrap();
        assert!(read_element_content_as_string(&mut reader).is_err());
    }

    #[test]
    fn missing_element_names_what_was_found() {
        let mut reader = XmlReader::from_xml("<a/>");
        let err = read_start_element(&mut reader, "b", "").unwrap_err();
        assert!(matches!(err, Error::MissingElement(msg) if msg.contains("<a>")));
    }

    #[test]
    fn skip_element_consumes_nested_content() {
        let mut reader = XmlReader::from_xml("<r><a><b/>t</a><c/></r>");
        read_start_element(&mut reader, "r", "").unwrap();
        skip_element(&mut reader).unwrap();
        assert!(is_start_element(&mut reader, "c", "").unwrap());
    }
}
