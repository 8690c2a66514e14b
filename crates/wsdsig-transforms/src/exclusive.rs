#![forbid(unsafe_code)]

//! Exclusive canonicalization as a reference transform.

use log::debug;
use wsdsig_c14n::{format_prefix_list, parse_prefix_list, C14nMode};
use wsdsig_core::{ns, Error, Result};
use wsdsig_crypto::{HashEngine, HashWriter};
use wsdsig_xml::content::{read_end_element, read_start_element, skip_misc};
use wsdsig_xml::{XmlEvent, XmlRead, XmlSink};

use crate::transform::{Transform, TransformInput};

/// `http://www.w3.org/2001/10/xml-exc-c14n#`, with or without comments,
/// optionally carrying an `InclusiveNamespaces` prefix list.
#[derive(Debug, Clone)]
pub struct ExclusiveC14nTransform {
    mode: C14nMode,
    inclusive_prefixes: Vec<String>,
}

impl ExclusiveC14nTransform {
    pub fn new(mode: C14nMode) -> Self {
        Self {
            mode,
            inclusive_prefixes: Vec::new(),
        }
    }

    /// `prefixes` uses "" for the default namespace.
    pub fn with_inclusive_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.inclusive_prefixes = prefixes;
        self
    }

    pub fn mode(&self) -> C14nMode {
        self.mode
    }

    pub fn inclusive_prefixes(&self) -> &[String] {
        &self.inclusive_prefixes
    }

    /// Reads the content of a `<Transform>` element whose start tag has
    /// been consumed, through its end tag.
    pub fn read_from(mode: C14nMode, reader: &mut dyn XmlRead) -> Result<Self> {
        let inclusive_prefixes = read_inclusive_namespaces(reader)?;
        read_end_element(reader)?;
        Ok(Self {
            mode,
            inclusive_prefixes,
        })
    }
}

impl Transform for ExclusiveC14nTransform {
    fn uri(&self) -> &str {
        self.mode.uri()
    }

    fn process(&self, input: &TransformInput) -> Result<TransformInput> {
        let bytes = input.canonicalize_into(self.mode, &self.inclusive_prefixes, Vec::new())?;
        Ok(TransformInput::Bytes(bytes))
    }

    fn process_and_digest(&self, input: &TransformInput, hash: Box<dyn HashEngine>) -> Result<Vec<u8>> {
        let writer =
            input.canonicalize_into(self.mode, &self.inclusive_prefixes, HashWriter::new(hash))?;
        debug!("digesting {} canonical bytes", writer.written());
        Ok(writer.finalize())
    }

    fn needs_inclusive_context(&self) -> bool {
        !self.inclusive_prefixes.is_empty()
    }

    fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        sink.start_element(ns::DSIG_PREFIX, ns::node::TRANSFORM, ns::DSIG)?;
        sink.attribute("", ns::attr::ALGORITHM, "", self.uri())?;
        write_inclusive_namespaces(sink, &self.inclusive_prefixes)?;
        sink.end_element()
    }
}

/// Reads an optional `<ec:InclusiveNamespaces PrefixList="..."/>` child.
pub fn read_inclusive_namespaces(reader: &mut dyn XmlRead) -> Result<Vec<String>> {
    skip_misc(reader)?;
    let start = match reader.peek()? {
        XmlEvent::Start(s) if s.is(ns::node::INCLUSIVE_NAMESPACES, ns::EXC_C14N) => {
            read_start_element(reader, ns::node::INCLUSIVE_NAMESPACES, ns::EXC_C14N)?
        }
        XmlEvent::Start(s) => {
            return Err(Error::XmlStructure(format!(
                "unexpected element {} in exclusive canonicalization parameters",
                s.qualified_name()
            )))
        }
        _ => return Ok(Vec::new()),
    };
    let list = start
        .attribute(ns::attr::PREFIX_LIST)
        .ok_or_else(|| Error::MissingAttribute(ns::attr::PREFIX_LIST.into()))?;
    let prefixes = parse_prefix_list(list);
    read_end_element(reader)?;
    Ok(prefixes)
}

/// Writes `<ec:InclusiveNamespaces>` when `prefixes` is non-empty.
pub fn write_inclusive_namespaces(sink: &mut dyn XmlSink, prefixes: &[String]) -> Result<()> {
    if prefixes.is_empty() {
        return Ok(());
    }
    sink.start_element(ns::EXC_C14N_PREFIX, ns::node::INCLUSIVE_NAMESPACES, ns::EXC_C14N)?;
    sink.namespace_declaration(ns::EXC_C14N_PREFIX, ns::EXC_C14N)?;
    sink.attribute("", ns::attr::PREFIX_LIST, "", &format_prefix_list(prefixes))?;
    sink.end_element()
}
