#![forbid(unsafe_code)]

//! The push side of the XML model.

use wsdsig_core::Result;

/// Receives a well-formed sequence of XML writing calls.
///
/// Namespace declarations and attributes belong to the most recent
/// `start_element` and must arrive before any of its content. Text and
/// attribute values are passed unescaped; escaping is the sink's concern.
pub trait XmlSink {
    fn start_element(&mut self, prefix: &str, local_name: &str, namespace_uri: &str)
        -> Result<()>;

    /// Declares `prefix` (empty for the default namespace) on the current element.
    fn namespace_declaration(&mut self, prefix: &str, namespace_uri: &str) -> Result<()>;

    fn attribute(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace_uri: &str,
        value: &str,
    ) -> Result<()>;

    fn end_element(&mut self) -> Result<()>;

    fn text(&mut self, text: &str) -> Result<()>;

    fn whitespace(&mut self, text: &str) -> Result<()> {
        self.text(text)
    }

    fn cdata(&mut self, text: &str) -> Result<()>;

    fn comment(&mut self, text: &str) -> Result<()>;

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()>;
}

/// Writes `<prefix:local>text</prefix:local>`.
pub fn write_text_element(
    sink: &mut dyn XmlSink,
    prefix: &str,
    local_name: &str,
    namespace_uri: &str,
    text: &str,
) -> Result<()> {
    sink.start_element(prefix, local_name, namespace_uri)?;
    sink.text(text)?;
    sink.end_element()
}
