#![forbid(unsafe_code)]

//! Plain XML text serialization.

use wsdsig_core::{Error, Result};

use crate::sink::XmlSink;

/// Serializes sink calls to XML text.
///
/// Elements with no content are written as `<x/>`. Carriage returns and
/// attribute whitespace are written as character references so the text
/// reads back to the same values.
#[derive(Debug, Default)]
pub struct TextWriter {
    out: String,
    open: Vec<String>,
    start_tag_open: bool,
}

impl TextWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }

    fn close_start_tag(&mut self) {
        if self.start_tag_open {
            self.out.push('>');
            self.start_tag_open = false;
        }
    }

    fn require_start_tag(&self) -> Result<()> {
        if self.start_tag_open {
            Ok(())
        } else {
            Err(Error::XmlStructure("attribute written outside a start tag".into()))
        }
    }
}

fn qualified(prefix: &str, local_name: &str) -> String {
    if prefix.is_empty() {
        local_name.to_string()
    } else {
        format!("{prefix}:{local_name}")
    }
}

fn push_escaped_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn push_escaped_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

impl XmlSink for TextWriter {
    fn start_element(&mut self, prefix: &str, local_name: &str, _namespace_uri: &str) -> Result<()> {
        self.close_start_tag();
        let name = qualified(prefix, local_name);
        self.out.push('<');
        self.out.push_str(&name);
        self.open.push(name);
        self.start_tag_open = true;
        Ok(())
    }

    fn namespace_declaration(&mut self, prefix: &str, namespace_uri: &str) -> Result<()> {
        self.require_start_tag()?;
        if prefix.is_empty() {
            self.out.push_str(" xmlns=\"");
        } else {
            self.out.push_str(" xmlns:");
            self.out.push_str(prefix);
            self.out.push_str("=\"");
        }
        push_escaped_attr(&mut self.out, namespace_uri);
        self.out.push('"');
        Ok(())
    }

    fn attribute(
        &mut self,
        prefix: &str,
        local_name: &str,
        _namespace_uri: &str,
        value: &str,
    ) -> Result<()> {
        self.require_start_tag()?;
        self.out.push(' ');
        self.out.push_str(&qualified(prefix, local_name));
        self.out.push_str("=\"");
        push_escaped_attr(&mut self.out, value);
        self.out.push('"');
        Ok(())
    }

    fn end_element(&mut self) -> Result<()> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| Error::XmlStructure("end element without open element".into()))?;
        if self.start_tag_open {
            self.out.push_str("/>");
            self.start_tag_open = false;
        } else {
            self.out.push_str("</");
            self.out.push_str(&name);
            self.out.push('>');
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.close_start_tag();
        push_escaped_text(&mut self.out, text);
        Ok(())
    }

    fn cdata(&mut self, text: &str) -> Result<()> {
        self.close_start_tag();
        // "]]>" cannot appear inside a CDATA section.
        self.out.push_str("<![CDATA[");
        self.out.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
        self.out.push_str("]]>");
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.close_start_tag();
        self.out.push_str("<!--");
        self.out.push_str(text);
        self.out.push_str("-->");
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.close_start_tag();
        self.out.push_str("<?");
        self.out.push_str(target);
        if !data.is_empty() {
            self.out.push(' ');
            self.out.push_str(data);
        }
        self.out.push_str("?>");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::XmlReader;
    use crate::stream::TokenStream;

    #[test]
    fn writes_nested_elements_and_escapes() {
        let mut w = TextWriter::new();
        w.start_element("ds", "Signature", "urn:ds").unwrap();
        w.namespace_declaration("ds", "urn:ds").unwrap();
        w.attribute("", "Id", "", "a\"b").unwrap();
        w.start_element("ds", "Empty", "urn:ds").unwrap();
        w.end_element().unwrap();
        w.text("1 < 2 & 3\r").unwrap();
        w.end_element().unwrap();
        assert_eq!(
            w.into_string(),
            r#"<ds:Signature xmlns:ds="urn:ds" Id="a&quot;b"><ds:Empty/>1 &lt; 2 &amp; 3&#xD;</ds:Signature>"#
        );
    }

    #[test]
    fn attribute_after_content_is_rejected() {
        let mut w = TextWriter::new();
        w.start_element("", "a", "").unwrap();
        w.text("x").unwrap();
        assert!(w.attribute("", "k", "", "v").is_err());
    }

    #[test]
    fn written_text_reads_back_identically() {
        let xml = "<a k=\"x&#x9;y&#xA;\">t&#xD;<?p d?><!--c--></a>";
        let mut reader = XmlReader::from_xml(xml);
        let stream = TokenStream::record(&mut reader).unwrap();
        let mut w = TextWriter::new();
        stream.write_to(&mut w).unwrap();
        let text = w.into_string();

        let mut again = XmlReader::from_xml(&text);
        let reparsed = TokenStream::record(&mut again).unwrap();
        assert_eq!(reparsed.entries(), stream.entries());
    }
}
