#![forbid(unsafe_code)]

//! `<ds:SignedInfo>`: the references and methods covered by the signature
//! value, and the canonical form the signature is computed over.

use std::io::Write;

use log::{debug, warn};
use wsdsig_c14n::{C14nMode, ExcC14nWriter};
use wsdsig_core::{algorithm, ns, Error, Result};
use wsdsig_crypto::{HashEngine, HashWriter};
use wsdsig_transforms::exclusive::{read_inclusive_namespaces, write_inclusive_namespaces};
use wsdsig_transforms::TransformFactory;
use wsdsig_xml::content::{
    is_start_element, read_end_element, read_start_element, skip_element, skip_misc,
};
use wsdsig_xml::{TeeReader, TokenStream, XmlEvent, XmlRead, XmlSink};

use crate::context::DsigContext;
use crate::reference::Reference;

/// How the canonical form of a parsed `SignedInfo` is reproduced.
#[derive(Debug, Clone)]
enum Received {
    /// Canonical octets captured while the element was read.
    Captured(Vec<u8>),
    /// The recorded element, canonicalized on demand under the namespace
    /// context it was read in.
    Deferred(TokenStream),
}

#[derive(Debug)]
pub struct SignedInfo {
    id: Option<String>,
    canonicalization_method: String,
    inclusive_prefixes: Vec<String>,
    signature_method: String,
    references: Vec<Reference>,
    received: Option<Received>,
    /// Bindings in scope where the signature will be placed.
    context: Vec<(String, String)>,
}

impl SignedInfo {
    /// A `SignedInfo` canonicalized with exclusive c14n.
    pub fn new(signature_method: impl Into<String>) -> Self {
        Self {
            id: None,
            canonicalization_method: algorithm::EXC_C14N.to_owned(),
            inclusive_prefixes: Vec::new(),
            signature_method: signature_method.into(),
            references: Vec::new(),
            received: None,
            context: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Only the exclusive c14n URIs are accepted when hashing.
    pub fn with_canonicalization_method(mut self, uri: impl Into<String>) -> Self {
        self.canonicalization_method = uri.into();
        self
    }

    /// `prefixes` uses "" for the default namespace.
    pub fn with_inclusive_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.inclusive_prefixes = prefixes;
        self
    }

    /// Sets the namespace bindings in scope at the `SignedInfo` element in
    /// the document it will be sent in. Inclusive prefixes pull their
    /// declarations from these bindings when signing.
    pub fn set_inclusive_context(&mut self, bindings: Vec<(String, String)>) {
        self.context = bindings;
    }

    pub fn add_reference(&mut self, reference: Reference) {
        self.references.push(reference);
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn canonicalization_method(&self) -> &str {
        &self.canonicalization_method
    }

    pub fn inclusive_prefixes(&self) -> &[String] {
        &self.inclusive_prefixes
    }

    pub fn signature_method(&self) -> &str {
        &self.signature_method
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut [Reference] {
        &mut self.references
    }

    /// Namespace bindings in scope at the element: where a parsed
    /// `SignedInfo` was read (empty unless canonicalization was deferred),
    /// or as set for signing.
    pub fn inclusive_context(&self) -> &[(String, String)] {
        match &self.received {
            Some(Received::Deferred(tokens)) => tokens.context(),
            Some(Received::Captured(_)) => &[],
            None => &self.context,
        }
    }

    /// Computes every reference digest, in order.
    pub fn compute_reference_digests(&mut self, ctx: &DsigContext) -> Result<()> {
        if self.references.is_empty() {
            return Err(Error::NoReferences);
        }
        for reference in &mut self.references {
            reference.compute_and_set_digest(ctx)?;
        }
        debug!("computed {} reference digest(s)", self.references.len());
        Ok(())
    }

    fn mode(&self) -> Result<C14nMode> {
        C14nMode::from_uri(&self.canonicalization_method).ok_or_else(|| {
            warn!(
                "rejected SignedInfo canonicalization method {}",
                self.canonicalization_method
            );
            Error::UnsupportedAlgorithm(format!(
                "canonicalization method: {}",
                self.canonicalization_method
            ))
        })
    }

    /// Writes the canonical form of this `SignedInfo` into `out`.
    ///
    /// A parsed `SignedInfo` reproduces the octets as received; one built
    /// for signing is written through a canonicalizing writer, replayed
    /// under its inclusive context when prefixes are listed.
    pub fn canonicalize_into<W: Write>(&self, out: W) -> Result<W> {
        let mode = self.mode()?;
        match &self.received {
            Some(Received::Captured(bytes)) => {
                let mut out = out;
                out.write_all(bytes)?;
                Ok(out)
            }
            Some(Received::Deferred(tokens)) => {
                wsdsig_c14n::canonicalize_stream(tokens, mode, &self.inclusive_prefixes, out)
            }
            None if !self.inclusive_prefixes.is_empty() && !self.context.is_empty() => {
                let mut tokens = TokenStream::with_context(self.context.clone());
                self.write_to(&mut tokens)?;
                tokens.finish()?;
                wsdsig_c14n::canonicalize_stream(&tokens, mode, &self.inclusive_prefixes, out)
            }
            None => {
                let mut writer =
                    ExcC14nWriter::new(out, mode.with_comments(), &self.inclusive_prefixes);
                self.write_to(&mut writer)?;
                writer.finish()
            }
        }
    }

    /// Hashes the canonical form with `hash`.
    pub fn compute_hash(&self, hash: Box<dyn HashEngine>) -> Result<Vec<u8>> {
        let writer = self.canonicalize_into(HashWriter::new(hash))?;
        debug!("hashed {} canonical SignedInfo bytes", writer.written());
        Ok(writer.finalize())
    }

    /// Offers `source`, the element with id `id`, to each unverified
    /// reference. Returns `true` if one of them matched and verified.
    pub fn ensure_digest_validity_if_id_matches(
        &mut self,
        id: &str,
        source: &TokenStream,
        ctx: &DsigContext,
    ) -> Result<bool> {
        for reference in &mut self.references {
            if reference.ensure_digest_validity_if_id_matches(id, source, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn ensure_all_references_verified(&self) -> Result<()> {
        match self.references.iter().find(|r| !r.is_verified()) {
            Some(unverified) => Err(Error::UnresolvedReference(unverified.uri().to_owned())),
            None => Ok(()),
        }
    }

    /// Reads a `<ds:SignedInfo>` element.
    ///
    /// The exclusive canonical form is captured while the element is read.
    /// When the element asks for inclusive prefixes or comments, the
    /// element is recorded instead and canonicalized on demand.
    pub fn read_from(reader: &mut dyn XmlRead, factory: &TransformFactory) -> Result<Self> {
        skip_misc(reader)?;
        let context = reader.namespaces_in_scope();
        let mut capture = ExcC14nWriter::new(Vec::new(), false, &[]);
        let mut recorded = TokenStream::with_context(context);
        let mut info = {
            let sinks: Vec<&mut dyn XmlSink> = vec![&mut capture, &mut recorded];
            let mut tee = TeeReader::new(&mut *reader, sinks);
            Self::read_element(&mut tee, factory)?
        };
        recorded.finish()?;
        let captured = capture.finish()?;

        let capturable = info.canonicalization_method == algorithm::EXC_C14N
            && info.inclusive_prefixes.is_empty();
        info.received = Some(if capturable {
            Received::Captured(captured)
        } else {
            debug!("deferring SignedInfo canonicalization");
            Received::Deferred(recorded.trim())
        });
        Ok(info)
    }

    fn read_element(reader: &mut dyn XmlRead, factory: &TransformFactory) -> Result<Self> {
        let start = read_start_element(reader, ns::node::SIGNED_INFO, ns::DSIG)?;

        let c14n = read_start_element(reader, ns::node::CANONICALIZATION_METHOD, ns::DSIG)?;
        let canonicalization_method = c14n
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on CanonicalizationMethod".into()))?
            .to_owned();
        let inclusive_prefixes = read_inclusive_namespaces(reader)?;
        read_end_element(reader)?;

        let method = read_start_element(reader, ns::node::SIGNATURE_METHOD, ns::DSIG)?;
        let signature_method = method
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on SignatureMethod".into()))?
            .to_owned();
        // Method parameters (HMACOutputLength) are ignored.
        loop {
            skip_misc(reader)?;
            if !matches!(reader.peek()?, XmlEvent::Start(_)) {
                break;
            }
            skip_element(reader)?;
        }
        read_end_element(reader)?;

        let mut references = Vec::new();
        while is_start_element(reader, ns::node::REFERENCE, ns::DSIG)? {
            references.push(Reference::read_from(reader, factory)?);
        }
        if references.is_empty() {
            return Err(Error::NoReferences);
        }
        read_end_element(reader)?;

        Ok(Self {
            id: start.attribute(ns::attr::ID).map(str::to_owned),
            canonicalization_method,
            inclusive_prefixes,
            signature_method,
            references,
            received: None,
            context: Vec::new(),
        })
    }

    /// Writes the `<ds:SignedInfo>` element.
    pub fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        sink.start_element(ns::DSIG_PREFIX, ns::node::SIGNED_INFO, ns::DSIG)?;
        if let Some(id) = &self.id {
            sink.attribute("", ns::attr::ID, "", id)?;
        }
        sink.start_element(ns::DSIG_PREFIX, ns::node::CANONICALIZATION_METHOD, ns::DSIG)?;
        sink.attribute("", ns::attr::ALGORITHM, "", &self.canonicalization_method)?;
        write_inclusive_namespaces(sink, &self.inclusive_prefixes)?;
        sink.end_element()?;
        sink.start_element(ns::DSIG_PREFIX, ns::node::SIGNATURE_METHOD, ns::DSIG)?;
        sink.attribute("", ns::attr::ALGORITHM, "", &self.signature_method)?;
        sink.end_element()?;
        for reference in &self.references {
            reference.write_to(sink)?;
        }
        sink.end_element()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsdsig_crypto::digest;
    use wsdsig_transforms::ExclusiveC14nTransform;
    use wsdsig_xml::{TextWriter, XmlReader};

    fn record(xml: &str) -> TokenStream {
        let mut reader = XmlReader::from_xml(xml);
        TokenStream::record(&mut reader).unwrap()
    }

    fn signed_info(ctx: &DsigContext) -> SignedInfo {
        let mut info = SignedInfo::new(algorithm::HMAC_SHA1);
        let mut reference = Reference::new("#body", algorithm::SHA1)
            .with_transform(Box::new(ExclusiveC14nTransform::new(C14nMode::Exclusive)));
        reference.bind_source(record(r#"<b Id="body">text</b>"#));
        info.add_reference(reference);
        info.compute_reference_digests(ctx).unwrap();
        info
    }

    /// Serializes `info` inside an envelope that binds `ds` and `extra`.
    fn embed(info: &SignedInfo, extra: &str) -> String {
        let mut writer = TextWriter::new();
        info.write_to(&mut writer).unwrap();
        format!(
            r#"<env:Envelope xmlns:env="urn:env" xmlns:ds="{}" {extra}>{}</env:Envelope>"#,
            ns::DSIG,
            writer.as_str()
        )
    }

    fn parse(xml: &str) -> SignedInfo {
        let mut reader = XmlReader::from_xml(xml);
        reader.next_event().unwrap();
        SignedInfo::read_from(&mut reader, &TransformFactory::new()).unwrap()
    }

    #[test]
    fn no_references_is_an_error() {
        let mut info = SignedInfo::new(algorithm::RSA_SHA1);
        assert!(matches!(
            info.compute_reference_digests(&DsigContext::new()),
            Err(Error::NoReferences)
        ));
    }

    #[test]
    fn captured_bytes_match_send_side() {
        let ctx = DsigContext::new();
        let info = signed_info(&ctx);
        let sent = info.canonicalize_into(Vec::new()).unwrap();
        let text = String::from_utf8(sent.clone()).unwrap();
        assert!(text.starts_with(&format!(r#"<ds:SignedInfo xmlns:ds="{}">"#, ns::DSIG)));
        assert!(!text.contains("urn:env"));

        let parsed = parse(&embed(&info, ""));
        assert!(matches!(parsed.received, Some(Received::Captured(_))));
        assert_eq!(parsed.canonicalize_into(Vec::new()).unwrap(), sent);

        let hash = |i: &SignedInfo| i.compute_hash(digest::from_uri(algorithm::SHA1).unwrap()).unwrap();
        assert_eq!(hash(&parsed), hash(&info));
    }

    #[test]
    fn inclusive_prefixes_defer_and_pull_in_context() {
        let ctx = DsigContext::new();
        let mut info = signed_info(&ctx).with_inclusive_prefixes(vec!["env".into()]);
        let bare = String::from_utf8(info.canonicalize_into(Vec::new()).unwrap()).unwrap();
        assert!(!bare.contains(r#"xmlns:env="#));

        info.set_inclusive_context(vec![
            ("env".into(), "urn:env".into()),
            ("ds".into(), ns::DSIG.into()),
        ]);
        let sent = info.canonicalize_into(Vec::new()).unwrap();
        assert!(String::from_utf8(sent.clone()).unwrap().starts_with(&format!(
            r#"<ds:SignedInfo xmlns:ds="{}" xmlns:env="urn:env">"#,
            ns::DSIG
        )));

        let parsed = parse(&embed(&info, ""));
        assert!(matches!(parsed.received, Some(Received::Deferred(_))));
        assert!(parsed
            .inclusive_context()
            .iter()
            .any(|(p, u)| p == "env" && u == "urn:env"));
        assert_eq!(parsed.canonicalize_into(Vec::new()).unwrap(), sent);
    }

    #[test]
    fn context_without_inclusive_prefixes_changes_nothing() {
        let ctx = DsigContext::new();
        let mut info = signed_info(&ctx);
        let plain = info.canonicalize_into(Vec::new()).unwrap();
        info.set_inclusive_context(vec![("env".into(), "urn:env".into())]);
        assert_eq!(info.canonicalize_into(Vec::new()).unwrap(), plain);
    }

    #[test]
    fn unsupported_canonicalization_is_rejected_when_hashing() {
        let ctx = DsigContext::new();
        let info = signed_info(&ctx)
            .with_canonicalization_method("http://www.w3.org/TR/2001/REC-xml-c14n-20010315");
        let parsed = parse(&embed(&info, ""));
        assert!(matches!(
            parsed.compute_hash(digest::from_uri(algorithm::SHA1).unwrap()),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn whitespace_inside_signed_info_is_signed_as_received() {
        let xml = format!(
            r##"<ds:SignedInfo xmlns:ds="{ds}">
  <ds:CanonicalizationMethod Algorithm="{exc}"/>
  <ds:SignatureMethod Algorithm="{hmac}"/>
  <ds:Reference URI="#a"><ds:Transforms><ds:Transform Algorithm="{exc}"/></ds:Transforms><ds:DigestMethod Algorithm="{sha1}"/><ds:DigestValue>AAAA</ds:DigestValue></ds:Reference>
</ds:SignedInfo>"##,
            ds = ns::DSIG,
            exc = algorithm::EXC_C14N,
            hmac = algorithm::HMAC_SHA1,
            sha1 = algorithm::SHA1,
        );
        let mut reader = XmlReader::from_xml(&xml);
        let parsed = SignedInfo::read_from(&mut reader, &TransformFactory::new()).unwrap();
        let bytes = parsed.canonicalize_into(Vec::new()).unwrap();
        assert_eq!(bytes, wsdsig_c14n::canonicalize(&xml, C14nMode::Exclusive, &[]).unwrap());
        assert_eq!(parsed.references().len(), 1);
    }

    #[test]
    fn unverified_reference_is_unresolved() {
        let ctx = DsigContext::new();
        let mut info = signed_info(&ctx);
        assert!(matches!(
            info.ensure_all_references_verified(),
            Err(Error::UnresolvedReference(uri)) if uri == "#body"
        ));
        let body = record(r#"<b Id="body">text</b>"#);
        assert!(!info.ensure_digest_validity_if_id_matches("x", &body, &ctx).unwrap());
        assert!(info.ensure_digest_validity_if_id_matches("body", &body, &ctx).unwrap());
        info.ensure_all_references_verified().unwrap();
    }

    #[test]
    fn signed_info_without_references_is_malformed() {
        let xml = format!(
            r#"<ds:SignedInfo xmlns:ds="{}"><ds:CanonicalizationMethod Algorithm="{}"/><ds:SignatureMethod Algorithm="{}"/></ds:SignedInfo>"#,
            ns::DSIG,
            algorithm::EXC_C14N,
            algorithm::RSA_SHA1
        );
        let mut reader = XmlReader::from_xml(&xml);
        assert!(matches!(
            SignedInfo::read_from(&mut reader, &TransformFactory::new()),
            Err(Error::NoReferences)
        ));
    }
}
