#![forbid(unsafe_code)]

//! The transform trait and the data flowing between transforms.

use std::io::Write;

use wsdsig_c14n::C14nMode;
use wsdsig_core::{Error, Result};
use wsdsig_crypto::{HashEngine, HashWriter};
use wsdsig_xml::{TokenStream, XmlReader, XmlSink};

/// Data flowing through a transform chain.
#[derive(Debug, Clone)]
pub enum TransformInput {
    /// A recorded XML subtree or document. Comments are only canonicalized
    /// when `comments` is set.
    Tokens { tokens: TokenStream, comments: bool },
    /// Raw octets, e.g. the output of a previous transform.
    Bytes(Vec<u8>),
}

impl TransformInput {
    /// Recorded XML whose comments are not part of the signed content.
    pub fn tokens(tokens: TokenStream) -> Self {
        Self::Tokens {
            tokens,
            comments: false,
        }
    }

    /// Recorded XML whose comments are signed along with it.
    pub fn tokens_with_comments(tokens: TokenStream) -> Self {
        Self::Tokens {
            tokens,
            comments: true,
        }
    }

    /// The recorded tokens, or the bytes parsed as an XML document.
    pub fn to_tokens(&self) -> Result<TokenStream> {
        match self {
            Self::Tokens { tokens, .. } => Ok(tokens.clone()),
            Self::Bytes(bytes) => parse_bytes(bytes),
        }
    }

    /// Canonicalizes this input into `out`.
    ///
    /// Comments survive only when the mode keeps them and the input allows
    /// them. Raw bytes are parsed and canonicalized through a buffered
    /// replay, since there is no live reader to stream from.
    pub fn canonicalize_into<W: Write>(
        &self,
        mode: C14nMode,
        inclusive_prefixes: &[String],
        out: W,
    ) -> Result<W> {
        match self {
            Self::Tokens { tokens, comments } => {
                let mode = if *comments { mode } else { C14nMode::Exclusive };
                wsdsig_c14n::canonicalize_stream(tokens, mode, inclusive_prefixes, out)
            }
            Self::Bytes(bytes) => {
                let doc = parse_bytes(bytes)?;
                wsdsig_c14n::canonicalize_buffered(&doc, &[], mode, inclusive_prefixes, out)
            }
        }
    }
}

fn parse_bytes(bytes: &[u8]) -> Result<TokenStream> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Transform(format!("transform input is not UTF-8: {e}")))?;
    let mut reader = XmlReader::from_xml(text);
    let doc = TokenStream::record_document(&mut reader)?;
    if doc.is_empty() {
        return Err(Error::Transform("transform input has no XML content".into()));
    }
    Ok(doc)
}

/// One step of a reference's transform chain.
pub trait Transform {
    /// The algorithm URI for this transform.
    fn uri(&self) -> &str;

    /// Apply the transform as a pure mapping.
    fn process(&self, input: &TransformInput) -> Result<TransformInput>;

    /// Apply the transform as the last step of a chain, streaming its
    /// output into `hash`.
    fn process_and_digest(&self, input: &TransformInput, hash: Box<dyn HashEngine>) -> Result<Vec<u8>> {
        let output = match self.process(input)? {
            TransformInput::Bytes(bytes) => bytes,
            TransformInput::Tokens { .. } => {
                return Err(Error::Transform(format!(
                    "transform {} does not produce octets",
                    self.uri()
                )))
            }
        };
        let mut writer = HashWriter::new(hash);
        writer.write_all(&output)?;
        Ok(writer.finalize())
    }

    /// Whether this transform needs the namespace bindings in scope where
    /// its input was read.
    fn needs_inclusive_context(&self) -> bool {
        false
    }

    /// Serializes the `<Transform>` element.
    fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()>;
}
