#![forbid(unsafe_code)]

//! Exclusive XML Canonicalization (exc-C14N) for the wsdsig engine.
//!
//! Canonical output is produced by [`ExcC14nWriter`], an [`XmlSink`] that
//! writes octets to any `io::Write`. Callers stream a live read, a replayed
//! [`TokenStream`] or programmatically written XML through it, typically
//! straight into a hash engine.

pub mod escape;
pub mod exclusive;
pub mod render;

use std::io::Write;

use wsdsig_core::{algorithm, ns, Error, Result};
use wsdsig_xml::{TokenStream, XmlReader, XmlSink};

pub use exclusive::ExcC14nWriter;

/// Local name of the element that carries inclusive-prefix context through
/// a buffered replay. It is never rendered.
const CONTEXT_WRAPPER: &str = "InclusiveNamespaceContext";

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C14nMode {
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

impl C14nMode {
    /// Get the algorithm URI for this mode.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::EXC_C14N => Some(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(self, Self::ExclusiveWithComments)
    }
}

/// Splits an `InclusiveNamespaces` `PrefixList`, mapping `#default` to "".
pub fn parse_prefix_list(list: &str) -> Vec<String> {
    list.split_ascii_whitespace()
        .map(|p| {
            if p == ns::DEFAULT_PREFIX_TOKEN {
                String::new()
            } else {
                p.to_string()
            }
        })
        .collect()
}

/// Formats prefixes back into `PrefixList` syntax.
pub fn format_prefix_list(prefixes: &[String]) -> String {
    prefixes
        .iter()
        .map(|p| {
            if p.is_empty() {
                ns::DEFAULT_PREFIX_TOKEN
            } else {
                p.as_str()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonicalize a recorded stream into `out`, honoring its exclusion rule.
///
/// When inclusive prefixes are requested and the stream carries a namespace
/// context, the stream is replayed through [`canonicalize_buffered`] so the
/// listed prefixes keep the bindings they had where the stream was read.
pub fn canonicalize_stream<W: Write>(
    tokens: &TokenStream,
    mode: C14nMode,
    inclusive_prefixes: &[String],
    out: W,
) -> Result<W> {
    if !inclusive_prefixes.is_empty() && !tokens.context().is_empty() {
        return canonicalize_buffered(tokens, tokens.context(), mode, inclusive_prefixes, out);
    }
    let mut writer = ExcC14nWriter::new(out, mode.with_comments(), inclusive_prefixes);
    tokens.write_to(&mut writer)?;
    writer.finish()
}

/// Canonicalize `tokens` as if they appeared beneath the namespace `context`.
///
/// The tokens are buffered once through the binary token codec, beneath a
/// synthetic wrapper element that declares the context bindings named by
/// `inclusive_prefixes`. The wrapper is not rendered.
pub fn canonicalize_buffered<W: Write>(
    tokens: &TokenStream,
    context: &[(String, String)],
    mode: C14nMode,
    inclusive_prefixes: &[String],
    out: W,
) -> Result<W> {
    let mut wrapped = TokenStream::new();
    wrapped.start_element("", CONTEXT_WRAPPER, "")?;
    for (prefix, uri) in context {
        if inclusive_prefixes.iter().any(|p| p == prefix) {
            wrapped.namespace_declaration(prefix, uri)?;
        }
    }
    tokens.write_to(&mut wrapped)?;
    wrapped.add_end_element()?;
    wrapped.finish()?;

    let buffered = TokenStream::from_binary(&wrapped.to_binary()?)?;
    let mut writer = ExcC14nWriter::new(out, mode.with_comments(), inclusive_prefixes)
        .with_transparent_root();
    buffered.write_to(&mut writer)?;
    writer.finish()
}

/// Canonicalize an XML document given as text.
pub fn canonicalize(xml: &str, mode: C14nMode, inclusive_prefixes: &[String]) -> Result<Vec<u8>> {
    let mut reader = XmlReader::from_xml(xml);
    let doc = TokenStream::record_document(&mut reader)?;
    if doc.is_empty() {
        return Err(Error::Canonicalization("document has no content".into()));
    }
    canonicalize_stream(&doc, mode, inclusive_prefixes, Vec::new())
}
