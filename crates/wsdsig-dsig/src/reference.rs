#![forbid(unsafe_code)]

//! `<ds:Reference>`: one URI, its transform chain and its digest.

use log::debug;
use wsdsig_core::{algorithm, ns, Error, Result};
use wsdsig_crypto::constant_time_eq;
use wsdsig_transforms::{Transform, TransformChain, TransformFactory, TransformInput};
use wsdsig_xml::content::{
    encode_base64, is_start_element, read_element_content_as_base64, read_end_element,
    read_start_element, skip_misc,
};
use wsdsig_xml::sink::write_text_element;
use wsdsig_xml::{TokenStream, XmlEvent, XmlRead, XmlSink};

use crate::context::DsigContext;

/// A reference to signed content.
///
/// The digest value is written by [`compute_and_set_digest`] on the sign
/// path or read from XML on the verify path, and never changed by
/// verification. `verified` only ever goes from `false` to `true`.
///
/// [`compute_and_set_digest`]: Reference::compute_and_set_digest
#[derive(Debug)]
pub struct Reference {
    id: Option<String>,
    uri: String,
    type_: Option<String>,
    digest_method: String,
    digest_value: Option<Vec<u8>>,
    chain: TransformChain,
    resolved_source: Option<TransformInput>,
    verified: bool,
}

impl Reference {
    pub fn new(uri: impl Into<String>, digest_method: impl Into<String>) -> Self {
        Self {
            id: None,
            uri: uri.into(),
            type_: None,
            digest_method: digest_method.into(),
            digest_value: None,
            chain: TransformChain::new(),
            resolved_source: None,
            verified: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }

    pub fn with_transform(mut self, transform: Box<dyn Transform>) -> Self {
        self.chain.push(transform);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn type_(&self) -> Option<&str> {
        self.type_.as_deref()
    }

    pub fn digest_method(&self) -> &str {
        &self.digest_method
    }

    pub fn digest_value(&self) -> Option<&[u8]> {
        self.digest_value.as_deref()
    }

    pub fn transforms(&self) -> &TransformChain {
        &self.chain
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// The id of the element this reference points at. The empty string
    /// stands for the whole document (`""` and `#xpointer(/)`).
    pub fn extract_referred_id(&self) -> Result<&str> {
        referred_id(&self.uri)
    }

    /// Comments are part of the signed content only for xpointer URIs.
    pub fn includes_comments(&self) -> bool {
        self.uri.starts_with("#xpointer(")
    }

    /// Binds the recorded content this reference points at.
    pub fn bind_source(&mut self, tokens: TokenStream) {
        let input = if self.includes_comments() {
            TransformInput::tokens_with_comments(tokens)
        } else {
            TransformInput::tokens(tokens)
        };
        self.resolved_source = Some(input);
    }

    /// Binds already-transformed or external content.
    pub fn set_resolved_source(&mut self, input: TransformInput) {
        self.resolved_source = Some(input);
    }

    fn is_single_str_transform(&self) -> bool {
        self.chain.len() == 1
            && self
                .chain
                .get(0)
                .is_some_and(|t| t.uri() == algorithm::STR_TRANSFORM)
    }

    fn compute_digest(&self, ctx: &DsigContext) -> Result<Vec<u8>> {
        let source = self
            .resolved_source
            .as_ref()
            .ok_or_else(|| Error::UnresolvedReference(self.uri.clone()))?;
        if self.chain.is_empty() {
            return Err(Error::EmptyTransformChain);
        }
        self.chain
            .transform_to_digest(source, &ctx.registry, &self.digest_method)
    }

    /// Runs the transform chain over the bound source and stores the digest.
    pub fn compute_and_set_digest(&mut self, ctx: &DsigContext) -> Result<()> {
        let value = self.compute_digest(ctx)?;
        debug!("computed digest for reference {:?}", self.uri);
        self.digest_value = Some(value);
        Ok(())
    }

    /// Recomputes the digest and compares it with the stored value.
    pub fn check_digest(&self, ctx: &DsigContext) -> Result<bool> {
        let expected = self
            .digest_value
            .as_deref()
            .ok_or_else(|| Error::InvalidState(format!("reference {:?} has no digest value", self.uri)))?;
        let actual = self.compute_digest(ctx)?;
        Ok(constant_time_eq(&actual, expected))
    }

    /// Verifies this reference against `source` if `id` is the element it
    /// points at.
    ///
    /// A reference whose only transform is the STR-Transform also matches
    /// the security token reference its URI names, as reported by the
    /// context's token resolver. Returns `Ok(false)` when `id` does not
    /// match or the reference is already verified.
    pub fn ensure_digest_validity_if_id_matches(
        &mut self,
        id: &str,
        source: &TokenStream,
        ctx: &DsigContext,
    ) -> Result<bool> {
        if self.verified {
            return Ok(false);
        }
        let referred = self.extract_referred_id()?;
        let matches = referred == id
            || (self.is_single_str_transform()
                && ctx
                    .token_resolver()
                    .and_then(|r| r.token_id(referred))
                    .is_some_and(|token| token == id));
        if !matches {
            return Ok(false);
        }

        self.bind_source(source.clone());
        if !self.check_digest(ctx)? {
            debug!("digest mismatch for reference {:?}", self.uri);
            return Err(Error::DigestVerificationFailed);
        }
        debug!("verified reference {:?}", self.uri);
        self.verified = true;
        Ok(true)
    }

    /// Reads a `<ds:Reference>` element.
    pub fn read_from(reader: &mut dyn XmlRead, factory: &TransformFactory) -> Result<Self> {
        let start = read_start_element(reader, ns::node::REFERENCE, ns::DSIG)?;
        let uri = start
            .attribute(ns::attr::URI)
            .ok_or_else(|| Error::MissingAttribute(format!("{} on Reference", ns::attr::URI)))?;
        let mut reference = Reference::new(uri, "");
        reference.id = start.attribute(ns::attr::ID).map(str::to_owned);
        reference.type_ = start.attribute(ns::attr::TYPE).map(str::to_owned);

        if is_start_element(reader, ns::node::TRANSFORMS, ns::DSIG)? {
            reference.chain = TransformChain::read_from(reader, factory)?;
        }

        let method = read_start_element(reader, ns::node::DIGEST_METHOD, ns::DSIG)?;
        reference.digest_method = method
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on DigestMethod".into()))?
            .to_owned();
        read_end_element(reader)?;

        read_start_element(reader, ns::node::DIGEST_VALUE, ns::DSIG)?;
        reference.digest_value = Some(read_element_content_as_base64(reader)?);

        skip_misc(reader)?;
        if let XmlEvent::Start(s) = reader.peek()? {
            return Err(Error::XmlStructure(format!(
                "unexpected element {} in Reference",
                s.qualified_name()
            )));
        }
        read_end_element(reader)?;
        Ok(reference)
    }

    /// Writes the `<ds:Reference>` element. The digest must be computed.
    pub fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        let digest = self.digest_value.as_deref().ok_or_else(|| {
            Error::InvalidState(format!("digest of reference {:?} not computed", self.uri))
        })?;
        sink.start_element(ns::DSIG_PREFIX, ns::node::REFERENCE, ns::DSIG)?;
        if let Some(id) = &self.id {
            sink.attribute("", ns::attr::ID, "", id)?;
        }
        if let Some(type_) = &self.type_ {
            sink.attribute("", ns::attr::TYPE, "", type_)?;
        }
        sink.attribute("", ns::attr::URI, "", &self.uri)?;
        if !self.chain.is_empty() {
            self.chain.write_to(sink)?;
        }
        sink.start_element(ns::DSIG_PREFIX, ns::node::DIGEST_METHOD, ns::DSIG)?;
        sink.attribute("", ns::attr::ALGORITHM, "", &self.digest_method)?;
        sink.end_element()?;
        write_text_element(
            sink,
            ns::DSIG_PREFIX,
            ns::node::DIGEST_VALUE,
            ns::DSIG,
            &encode_base64(digest),
        )?;
        sink.end_element()
    }
}

/// `#id`, `#xpointer(id('id'))`, or the whole document.
fn referred_id(uri: &str) -> Result<&str> {
    if uri.is_empty() {
        return Ok("");
    }
    let fragment = uri
        .strip_prefix('#')
        .ok_or_else(|| Error::InvalidUri(format!("{uri} is not a same-document reference")))?;
    let Some(pointer) = fragment
        .strip_prefix("xpointer(")
        .and_then(|p| p.strip_suffix(')'))
    else {
        if fragment.is_empty() {
            return Err(Error::InvalidUri(format!("{uri} has an empty fragment")));
        }
        return Ok(fragment);
    };
    if pointer == "/" {
        return Ok("");
    }
    pointer
        .strip_prefix("id(")
        .and_then(|p| p.strip_suffix(')'))
        .and_then(|quoted| {
            quoted
                .strip_prefix('\'')
                .and_then(|q| q.strip_suffix('\''))
                .or_else(|| quoted.strip_prefix('"').and_then(|q| q.strip_suffix('"')))
        })
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidUri(format!("unsupported xpointer {uri}")))
}
