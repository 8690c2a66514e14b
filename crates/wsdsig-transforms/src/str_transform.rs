#![forbid(unsafe_code)]

//! The WS-Security STR-Transform.
//!
//! The input is a `wsse:SecurityTokenReference`; the transform replaces it
//! with the security token it points at and canonicalizes the token.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use wsdsig_c14n::C14nMode;
use wsdsig_core::{algorithm, ns, Error, Result};
use wsdsig_crypto::{HashEngine, HashWriter};
use wsdsig_xml::content::{read_end_element, read_start_element};
use wsdsig_xml::stream::{attribute_at, is_start_of};
use wsdsig_xml::{TokenStream, XmlRead, XmlSink};

use crate::exclusive::{read_inclusive_namespaces, write_inclusive_namespaces};
use crate::transform::{Transform, TransformInput};

/// Dereferences security token references.
pub trait TokenReferenceResolver {
    /// The id of the token that the `SecurityTokenReference` with id
    /// `reference_id` points at.
    fn token_id(&self, reference_id: &str) -> Option<String>;

    /// Returns the token that `reference`, a recorded
    /// `SecurityTokenReference`, points at.
    fn resolve(&self, reference: &TokenStream) -> Result<TokenStream>;
}

/// A resolver over tokens registered by id.
///
/// A reference resolves through its `wsse:Reference URI="#id"` child.
#[derive(Debug, Clone, Default)]
pub struct TokenMap {
    tokens: HashMap<String, TokenStream>,
    references: HashMap<String, String>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_token(&mut self, id: impl Into<String>, token: TokenStream) {
        self.tokens.insert(id.into(), token);
    }

    /// Records that the reference with id `reference_id` points at the
    /// token with id `token_id`.
    pub fn insert_reference(&mut self, reference_id: impl Into<String>, token_id: impl Into<String>) {
        self.references.insert(reference_id.into(), token_id.into());
    }
}

impl TokenReferenceResolver for TokenMap {
    fn token_id(&self, reference_id: &str) -> Option<String> {
        self.references.get(reference_id).cloned()
    }

    fn resolve(&self, reference: &TokenStream) -> Result<TokenStream> {
        let uri = reference
            .element_starts()
            .filter(|&i| is_start_of(&reference.entries()[i], ns::node::REFERENCE, ns::WSSE))
            .find_map(|i| attribute_at(reference, i, ns::attr::URI, ""))
            .ok_or_else(|| {
                Error::UnresolvedReference("security token reference has no wsse:Reference".into())
            })?;
        let id = uri
            .strip_prefix('#')
            .ok_or_else(|| Error::InvalidUri(format!("token reference {uri} is not local")))?;
        self.tokens
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnresolvedReference(format!("no security token with id {id}")))
    }
}

/// The STR-Transform, parameterized by the canonicalization applied to the
/// dereferenced token.
#[derive(Clone)]
pub struct StrTransform {
    canonicalization: C14nMode,
    inclusive_prefixes: Vec<String>,
    resolver: Option<Arc<dyn TokenReferenceResolver>>,
}

impl std::fmt::Debug for StrTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrTransform")
            .field("canonicalization", &self.canonicalization)
            .field("inclusive_prefixes", &self.inclusive_prefixes)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl StrTransform {
    pub fn new(canonicalization: C14nMode, resolver: Option<Arc<dyn TokenReferenceResolver>>) -> Self {
        Self {
            canonicalization,
            inclusive_prefixes: Vec::new(),
            resolver,
        }
    }

    pub fn canonicalization(&self) -> C14nMode {
        self.canonicalization
    }

    /// Reads the `<wsse:TransformationParameters>` content of a
    /// `<Transform>` element whose start tag has been consumed, through its
    /// end tag.
    pub fn read_from(
        reader: &mut dyn XmlRead,
        resolver: Option<Arc<dyn TokenReferenceResolver>>,
    ) -> Result<Self> {
        read_start_element(reader, ns::node::TRANSFORMATION_PARAMETERS, ns::WSSE)?;
        let method = read_start_element(reader, ns::node::CANONICALIZATION_METHOD, ns::DSIG)?;
        let uri = method
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute(ns::attr::ALGORITHM.into()))?;
        let canonicalization = C14nMode::from_uri(uri).ok_or_else(|| {
            Error::UnsupportedAlgorithm(format!("STR-Transform canonicalization: {uri}"))
        })?;
        let inclusive_prefixes = read_inclusive_namespaces(reader)?;
        read_end_element(reader)?; // CanonicalizationMethod
        read_end_element(reader)?; // TransformationParameters
        read_end_element(reader)?; // Transform
        Ok(Self {
            canonicalization,
            inclusive_prefixes,
            resolver,
        })
    }

    /// Replaces a `SecurityTokenReference` input with its token. Any other
    /// input is taken to be the token already.
    fn dereference(&self, input: &TransformInput) -> Result<TransformInput> {
        let tokens = input.to_tokens()?;
        let is_reference = tokens
            .entries()
            .first()
            .is_some_and(|e| is_start_of(e, ns::node::SECURITY_TOKEN_REFERENCE, ns::WSSE));
        if !is_reference {
            return Ok(input.clone());
        }
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            Error::Transform("STR-Transform requires a token reference resolver".into())
        })?;
        let token = resolver.resolve(&tokens)?;
        debug!("STR-Transform dereferenced a token of {} entries", token.len());
        Ok(TransformInput::tokens(token))
    }
}

impl Transform for StrTransform {
    fn uri(&self) -> &str {
        algorithm::STR_TRANSFORM
    }

    fn process(&self, input: &TransformInput) -> Result<TransformInput> {
        let token = self.dereference(input)?;
        let bytes = token.canonicalize_into(self.canonicalization, &self.inclusive_prefixes, Vec::new())?;
        Ok(TransformInput::Bytes(bytes))
    }

    fn process_and_digest(&self, input: &TransformInput, hash: Box<dyn HashEngine>) -> Result<Vec<u8>> {
        let token = self.dereference(input)?;
        let writer = token.canonicalize_into(
            self.canonicalization,
            &self.inclusive_prefixes,
            HashWriter::new(hash),
        )?;
        Ok(writer.finalize())
    }

    fn needs_inclusive_context(&self) -> bool {
        !self.inclusive_prefixes.is_empty()
    }

    fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        sink.start_element(ns::DSIG_PREFIX, ns::node::TRANSFORM, ns::DSIG)?;
        sink.attribute("", ns::attr::ALGORITHM, "", algorithm::STR_TRANSFORM)?;
        sink.start_element(ns::WSSE_PREFIX, ns::node::TRANSFORMATION_PARAMETERS, ns::WSSE)?;
        sink.namespace_declaration(ns::WSSE_PREFIX, ns::WSSE)?;
        sink.start_element(ns::DSIG_PREFIX, ns::node::CANONICALIZATION_METHOD, ns::DSIG)?;
        sink.attribute("", ns::attr::ALGORITHM, "", self.canonicalization.uri())?;
        write_inclusive_namespaces(sink, &self.inclusive_prefixes)?;
        sink.end_element()?;
        sink.end_element()?;
        sink.end_element()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsdsig_xml::{TextWriter, XmlReader};

    const TOKEN: &str = r#"<wsse:BinarySecurityToken xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" Id="tok">MIIB</wsse:BinarySecurityToken>"#;

    const STR: &str = r##"<wsse:SecurityTokenReference xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" Id="str"><wsse:Reference URI="#tok"/></wsse:SecurityTokenReference>"##;

    fn record(xml: &str) -> TokenStream {
        let mut reader = XmlReader::from_xml(xml);
        TokenStream::record(&mut reader).unwrap()
    }

    fn resolver() -> Arc<dyn TokenReferenceResolver> {
        let mut map = TokenMap::new();
        map.insert_token("tok", record(TOKEN));
        map.insert_reference("str", "tok");
        Arc::new(map)
    }

    #[test]
    fn token_map_resolves_references() {
        let map = resolver();
        assert_eq!(map.token_id("str").as_deref(), Some("tok"));
        assert_eq!(map.token_id("other"), None);
        let token = map.resolve(&record(STR)).unwrap();
        assert_eq!(token.entries(), record(TOKEN).entries());
    }

    #[test]
    fn dereferences_and_canonicalizes_the_token() {
        let transform = StrTransform::new(C14nMode::Exclusive, Some(resolver()));
        let TransformInput::Bytes(out) = transform
            .process(&TransformInput::tokens(record(STR)))
            .unwrap()
        else {
            panic!("expected bytes");
        };
        let direct = TransformInput::tokens(record(TOKEN))
            .canonicalize_into(C14nMode::Exclusive, &[], Vec::new())
            .unwrap();
        assert_eq!(out, direct);
        assert!(String::from_utf8(out).unwrap().starts_with("<wsse:BinarySecurityToken"));
    }

    #[test]
    fn token_input_is_used_directly() {
        let transform = StrTransform::new(C14nMode::Exclusive, None);
        assert!(transform.process(&TransformInput::tokens(record(TOKEN))).is_ok());
        assert!(transform.process(&TransformInput::tokens(record(STR))).is_err());
    }

    #[test]
    fn unknown_token_is_unresolved() {
        let map = TokenMap::new();
        assert!(matches!(
            map.resolve(&record(STR)),
            Err(Error::UnresolvedReference(_))
        ));
    }

    #[test]
    fn transformation_parameters_roundtrip() {
        let transform = StrTransform::new(C14nMode::Exclusive, None);
        let mut writer = TextWriter::new();
        transform.write_to(&mut writer).unwrap();
        let wrapped = format!(r#"<w xmlns:ds="{}">{}</w>"#, ns::DSIG, writer.as_str());

        let mut reader = XmlReader::from_xml(&wrapped);
        reader.next_event().unwrap();
        read_start_element(&mut reader, ns::node::TRANSFORM, ns::DSIG).unwrap();
        let parsed = StrTransform::read_from(&mut reader, None).unwrap();
        assert_eq!(parsed.canonicalization(), C14nMode::Exclusive);
    }

    #[test]
    fn non_exclusive_canonicalization_is_unsupported() {
        let xml = format!(
            r#"<ds:Transform xmlns:ds="{}" xmlns:wsse="{}"><wsse:TransformationParameters><ds:CanonicalizationMethod Algorithm="http://www.w3.org/TR/2001/REC-xml-c14n-20010315"/></wsse:TransformationParameters></ds:Transform>"#,
            ns::DSIG,
            ns::WSSE
        );
        let mut reader = XmlReader::from_xml(&xml);
        reader.next_event().unwrap();
        assert!(matches!(
            StrTransform::read_from(&mut reader, None),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}
