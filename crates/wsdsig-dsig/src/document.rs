#![forbid(unsafe_code)]

//! Signing and verifying whole documents.
//!
//! The document is recorded once. References are resolved by walking its
//! elements and matching their `Id`, `wsu:Id` or configured id attributes;
//! a `""` reference covers the whole document minus the signature itself.

use std::collections::HashSet;

use log::debug;
use wsdsig_core::{ns, Error, Result};
use wsdsig_crypto::SecurityKey;
use wsdsig_xml::stream::{attribute_at, is_start_of};
use wsdsig_xml::{ExclusionRule, TextWriter, TokenEntry, TokenStream, XmlReader, XmlSink};

use crate::context::DsigContext;
use crate::signature::Signature;

fn record(doc_xml: &str) -> Result<TokenStream> {
    let mut reader = XmlReader::from_xml(doc_xml);
    let doc = TokenStream::record_document(&mut reader)?;
    if doc.is_empty() {
        return Err(Error::XmlStructure("document has no content".into()));
    }
    Ok(doc)
}

/// Every `(start index, id)` in document order. Ids must be unique.
fn element_ids<'a>(doc: &'a TokenStream, ctx: &DsigContext) -> Result<Vec<(usize, &'a str)>> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for index in doc.element_starts() {
        let candidates = [
            attribute_at(doc, index, ns::attr::ID, ""),
            attribute_at(doc, index, ns::attr::ID, ns::WSU),
        ]
        .into_iter()
        .chain(ctx.id_attrs.iter().map(|name| attribute_at(doc, index, name, "")));
        for id in candidates.flatten() {
            if !seen.insert(id) {
                return Err(Error::XmlStructure(format!("duplicate element id {id}")));
            }
            ids.push((index, id));
        }
    }
    Ok(ids)
}

/// Number of elements open at token `index`.
fn depth_at(doc: &TokenStream, index: usize) -> usize {
    doc.entries()[..index]
        .iter()
        .fold(0, |depth: usize, entry| match entry {
            TokenEntry::StartElement {
                is_empty: false, ..
            } => depth + 1,
            TokenEntry::EndElement => depth.saturating_sub(1),
            _ => depth,
        })
}

/// Namespace bindings in scope for the children of the element at `index`.
fn bindings_inside(doc: &TokenStream, index: usize) -> Vec<(String, String)> {
    let mut bindings = doc.namespaces_in_scope_at(index);
    let declarations = doc.entries()[index + 1..]
        .iter()
        .take_while(|e| e.is_attribute())
        .filter_map(TokenEntry::as_namespace_declaration);
    for (prefix, uri) in declarations {
        bind(&mut bindings, prefix, uri);
    }
    bindings
}

fn bind(bindings: &mut Vec<(String, String)>, prefix: &str, uri: &str) {
    match bindings.iter_mut().find(|(p, _)| p == prefix) {
        Some(binding) => binding.1 = uri.to_owned(),
        None => bindings.push((prefix.to_owned(), uri.to_owned())),
    }
}

/// Resolves the references of an unsigned `signature` against `doc_xml`
/// and signs it. The document itself is left untouched.
///
/// When the `SignedInfo` lists inclusive prefixes, set the bindings of the
/// place the signature will go with [`SignedInfo::set_inclusive_context`]
/// before calling this.
///
/// [`SignedInfo::set_inclusive_context`]: crate::SignedInfo::set_inclusive_context
pub fn sign_detached(
    doc_xml: &str,
    signature: Signature,
    key: &SecurityKey,
    ctx: &DsigContext,
) -> Result<Signature> {
    sign_recorded(&record(doc_xml)?, signature, key, ctx)
}

fn sign_recorded(
    doc: &TokenStream,
    mut signature: Signature,
    key: &SecurityKey,
    ctx: &DsigContext,
) -> Result<Signature> {
    let ids = element_ids(doc, ctx)?;
    for reference in signature.signed_info_mut()?.references_mut() {
        let referred = reference.extract_referred_id()?.to_owned();
        let source = if referred.is_empty() {
            doc.clone()
        } else {
            let (index, _) = ids
                .iter()
                .find(|(_, id)| *id == referred)
                .ok_or_else(|| Error::UnresolvedReference(reference.uri().to_owned()))?;
            doc.subtree(*index)?
        };
        reference.bind_source(source);
    }
    signature.sign(key, ctx)?;
    Ok(signature)
}

/// Signs `doc_xml` and appends the signature as the last child of the
/// document element.
pub fn sign_enveloped(
    doc_xml: &str,
    mut signature: Signature,
    key: &SecurityKey,
    ctx: &DsigContext,
) -> Result<String> {
    let doc = record(doc_xml)?;
    let root = doc
        .element_starts()
        .next()
        .ok_or_else(|| Error::XmlStructure("document has no element".into()))?;
    let mut context = bindings_inside(&doc, root);
    bind(&mut context, ns::DSIG_PREFIX, ns::DSIG);
    signature.signed_info_mut()?.set_inclusive_context(context);

    let signature = sign_recorded(&doc, signature, key, ctx)?;
    let mut writer = TextWriter::new();
    doc.write_to(&mut Enveloping {
        inner: &mut writer,
        signature: &signature,
        depth: 0,
    })?;
    Ok(writer.into_string())
}

/// Verifies the first `<ds:Signature>` in `doc_xml` with `key`.
///
/// The signature value is checked first; then every element carrying an
/// id is offered to the references, and every reference must have been
/// matched. Returns the fully verified signature.
pub fn verify_document(doc_xml: &str, key: &SecurityKey, ctx: &DsigContext) -> Result<Signature> {
    let doc = record(doc_xml)?;
    let signature_index = doc
        .element_starts()
        .find(|&i| is_start_of(&doc.entries()[i], ns::node::SIGNATURE, ns::DSIG))
        .ok_or_else(|| Error::MissingElement(ns::node::SIGNATURE.into()))?;
    let mut reader = doc.subtree(signature_index)?.reader()?;
    let mut signature = Signature::read_from(&mut reader, &ctx.transforms)?;
    signature.start_signature_verification(key, ctx)?;

    let mut enveloping = doc.clone();
    enveloping.set_element_exclusion(ExclusionRule::AtDepth {
        local_name: ns::node::SIGNATURE.into(),
        namespace_uri: ns::DSIG.into(),
        depth: depth_at(&doc, signature_index),
    });
    signature.ensure_digest_validity_if_id_matches("", &enveloping, ctx)?;

    let ids = element_ids(&doc, ctx)?;
    debug!("offering {} identified element(s) to the references", ids.len());
    let signature_depth = depth_at(&doc, signature_index);
    for (index, id) in ids {
        let mut source = doc.subtree(index)?;
        if index != signature_index && doc.element_range(index)?.contains(&signature_index) {
            source.set_element_exclusion(ExclusionRule::AtDepth {
                local_name: ns::node::SIGNATURE.into(),
                namespace_uri: ns::DSIG.into(),
                depth: signature_depth - depth_at(&doc, index),
            });
        }
        signature.ensure_digest_validity_if_id_matches(id, &source, ctx)?;
    }
    signature.complete_signature_verification()?;
    Ok(signature)
}

/// Forwards a replay, inserting the signature before the document
/// element's end tag.
struct Enveloping<'a> {
    inner: &'a mut dyn XmlSink,
    signature: &'a Signature,
    depth: usize,
}

impl XmlSink for Enveloping<'_> {
    fn start_element(&mut self, prefix: &str, local_name: &str, namespace_uri: &str) -> Result<()> {
        self.depth += 1;
        self.inner.start_element(prefix, local_name, namespace_uri)
    }

    fn namespace_declaration(&mut self, prefix: &str, namespace_uri: &str) -> Result<()> {
        self.inner.namespace_declaration(prefix, namespace_uri)
    }

    fn attribute(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace_uri: &str,
        value: &str,
    ) -> Result<()> {
        self.inner.attribute(prefix, local_name, namespace_uri, value)
    }

    fn end_element(&mut self) -> Result<()> {
        self.depth -= 1;
        if self.depth == 0 {
            self.signature.write_to(&mut *self.inner)?;
        }
        self.inner.end_element()
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.inner.text(text)
    }

    fn whitespace(&mut self, text: &str) -> Result<()> {
        self.inner.whitespace(text)
    }

    fn cdata(&mut self, text: &str) -> Result<()> {
        self.inner.cdata(text)
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.inner.comment(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.inner.processing_instruction(target, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsdsig_c14n::C14nMode;
    use wsdsig_core::algorithm;
    use wsdsig_transforms::ExclusiveC14nTransform;

    use crate::reference::Reference;
    use crate::signature::SignatureState;
    use crate::signed_info::SignedInfo;

    const ENVELOPE: &str = r#"<soap:Envelope xmlns:soap="urn:soap" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd"><soap:Header><ts wsu:Id="ts">2026</ts></soap:Header><soap:Body Id="body"><op>1</op></soap:Body></soap:Envelope>"#;

    fn exc() -> Box<ExclusiveC14nTransform> {
        Box::new(ExclusiveC14nTransform::new(C14nMode::Exclusive))
    }

    fn template(uris: &[&str]) -> Signature {
        let mut info = SignedInfo::new(algorithm::HMAC_SHA1);
        for uri in uris {
            info.add_reference(Reference::new(*uri, algorithm::SHA1).with_transform(exc()));
        }
        Signature::new(info)
    }

    fn key() -> SecurityKey {
        SecurityKey::symmetric(b"shared secret".to_vec())
    }

    #[test]
    fn enveloped_roundtrip_over_ids() {
        let ctx = DsigContext::new();
        let signed = sign_enveloped(ENVELOPE, template(&["#body", "#ts"]), &key(), &ctx).unwrap();
        assert!(signed.ends_with("</ds:Signature></soap:Envelope>"));
        let signature = verify_document(&signed, &key(), &ctx).unwrap();
        assert_eq!(signature.state(), SignatureState::FullyVerified);
    }

    #[test]
    fn whole_document_reference_excludes_the_signature() {
        let ctx = DsigContext::new();
        let signed = sign_enveloped(ENVELOPE, template(&[""]), &key(), &ctx).unwrap();
        verify_document(&signed, &key(), &ctx).unwrap();
    }

    #[test]
    fn signed_info_prefix_bound_on_the_envelope_round_trips() {
        let ctx = DsigContext::new();
        let mut info =
            SignedInfo::new(algorithm::HMAC_SHA1).with_inclusive_prefixes(vec!["soap".into()]);
        info.add_reference(Reference::new("#body", algorithm::SHA1).with_transform(exc()));

        let signed = sign_enveloped(ENVELOPE, Signature::new(info), &key(), &ctx).unwrap();
        let signature = verify_document(&signed, &key(), &ctx).unwrap();
        assert_eq!(signature.state(), SignatureState::FullyVerified);
    }

    #[test]
    fn reference_to_the_document_element_excludes_the_signature() {
        let ctx = DsigContext::new();
        let doc = r#"<root Id="r"><item>x</item></root>"#;
        let signed = sign_enveloped(doc, template(&["#r"]), &key(), &ctx).unwrap();
        verify_document(&signed, &key(), &ctx).unwrap();

        let nested = r#"<root><outer Id="o"><inner Id="i">x</inner></outer></root>"#;
        let signed = sign_enveloped(nested, template(&["#o", "#i"]), &key(), &ctx).unwrap();
        verify_document(&signed, &key(), &ctx).unwrap();
    }

    #[test]
    fn tampered_body_fails_digest() {
        let ctx = DsigContext::new();
        let signed = sign_enveloped(ENVELOPE, template(&["#body"]), &key(), &ctx).unwrap();
        let tampered = signed.replace("<op>1</op>", "<op>2</op>");
        assert!(matches!(
            verify_document(&tampered, &key(), &ctx),
            Err(Error::DigestVerificationFailed)
        ));
    }

    #[test]
    fn missing_target_is_unresolved() {
        let ctx = DsigContext::new();
        assert!(matches!(
            sign_detached(ENVELOPE, template(&["#nowhere"]), &key(), &ctx),
            Err(Error::UnresolvedReference(_))
        ));

        let signed = sign_enveloped(ENVELOPE, template(&["#body"]), &key(), &ctx).unwrap();
        let moved = signed.replace(r#"Id="body""#, r#"Id="elsewhere""#);
        assert!(matches!(
            verify_document(&moved, &key(), &ctx),
            Err(Error::UnresolvedReference(_))
        ));
    }

    #[test]
    fn configured_id_attributes_are_matched() {
        let mut ctx = DsigContext::new();
        ctx.add_id_attr("ID");
        let doc = r#"<root><item ID="i1">x</item></root>"#;
        let signed = sign_enveloped(doc, template(&["#i1"]), &key(), &ctx).unwrap();
        verify_document(&signed, &key(), &ctx).unwrap();

        assert!(matches!(
            verify_document(&signed, &key(), &DsigContext::new()),
            Err(Error::UnresolvedReference(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let ctx = DsigContext::new();
        let doc = r#"<root><a Id="x"/><b Id="x"/></root>"#;
        assert!(matches!(
            sign_detached(doc, template(&["#x"]), &key(), &ctx),
            Err(Error::XmlStructure(_))
        ));
    }

    #[test]
    fn document_without_signature() {
        assert!(matches!(
            verify_document(ENVELOPE, &key(), &DsigContext::new()),
            Err(Error::MissingElement(_))
        ));
    }

    #[test]
    fn depth_counts_open_elements() {
        let doc = record("<a><b/><c><d/></c></a>").unwrap();
        let starts: Vec<_> = doc.element_starts().collect();
        let depths: Vec<_> = starts.iter().map(|&i| depth_at(&doc, i)).collect();
        assert_eq!(depths, [0, 1, 1, 2]);
    }
}
