#![forbid(unsafe_code)]

//! Ordered transform chains.

use log::debug;
use wsdsig_core::{ns, Error, Result};
use wsdsig_crypto::AlgorithmRegistry;
use wsdsig_xml::content::{is_start_element, read_end_element, read_start_element};
use wsdsig_xml::{XmlRead, XmlSink};

use crate::factory::TransformFactory;
use crate::transform::{Transform, TransformInput};

/// The transforms of one reference, applied in order.
#[derive(Default)]
pub struct TransformChain {
    transforms: Vec<Box<dyn Transform>>,
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.transforms.iter().map(|t| t.uri()))
            .finish()
    }
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn Transform> {
        self.transforms.get(index).map(|t| t.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Transform> + '_ {
        self.transforms.iter().map(|t| t.as_ref())
    }

    /// `true` if any transform needs the inclusive namespace context of
    /// its input.
    pub fn needs_inclusive_context(&self) -> bool {
        self.transforms.iter().any(|t| t.needs_inclusive_context())
    }

    /// Reads a `<ds:Transforms>` element. A chain without transforms is
    /// rejected.
    pub fn read_from(reader: &mut dyn XmlRead, factory: &TransformFactory) -> Result<Self> {
        read_start_element(reader, ns::node::TRANSFORMS, ns::DSIG)?;
        let mut chain = TransformChain::new();
        while is_start_element(reader, ns::node::TRANSFORM, ns::DSIG)? {
            let start = read_start_element(reader, ns::node::TRANSFORM, ns::DSIG)?;
            chain.push(factory.read_transform(&start, reader)?);
        }
        read_end_element(reader)?;
        if chain.is_empty() {
            return Err(Error::EmptyTransformChain);
        }
        Ok(chain)
    }

    /// Writes the `<ds:Transforms>` element.
    pub fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        sink.start_element(ns::DSIG_PREFIX, ns::node::TRANSFORMS, ns::DSIG)?;
        for transform in &self.transforms {
            transform.write_to(sink)?;
        }
        sink.end_element()
    }

    /// Runs `input` through the chain and digests the result with
    /// `digest_uri`. Every transform but the last is a pure mapping; the
    /// last streams its output into the hash.
    pub fn transform_to_digest(
        &self,
        input: &TransformInput,
        registry: &AlgorithmRegistry,
        digest_uri: &str,
    ) -> Result<Vec<u8>> {
        let Some((last, leading)) = self.transforms.split_last() else {
            return Err(Error::EmptyTransformChain);
        };
        let hash = registry.hash(digest_uri)?;

        let mut current: Option<TransformInput> = None;
        for transform in leading {
            debug!("applying transform {}", transform.uri());
            let next = transform.process(current.as_ref().unwrap_or(input))?;
            current = Some(next);
        }
        debug!("applying final transform {} into {digest_uri}", last.uri());
        last.process_and_digest(current.as_ref().unwrap_or(input), hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wsdsig_c14n::C14nMode;
    use wsdsig_core::algorithm;
    use wsdsig_crypto::digest;
    use wsdsig_xml::{StartElement, TextWriter, TokenStream, XmlReader};

    use crate::exclusive::ExclusiveC14nTransform;
    use crate::str_transform::{StrTransform, TokenMap};

    fn transforms_xml(body: &str) -> String {
        format!(r#"<ds:Transforms xmlns:ds="{}">{body}</ds:Transforms>"#, ns::DSIG)
    }

    #[test]
    fn empty_chain_is_rejected() {
        let chain = TransformChain::new();
        let input = TransformInput::Bytes(b"<a/>".to_vec());
        assert!(matches!(
            chain.transform_to_digest(&input, &AlgorithmRegistry::new(), algorithm::SHA1),
            Err(Error::EmptyTransformChain)
        ));

        let xml = transforms_xml("");
        let mut reader = XmlReader::from_xml(&xml);
        assert!(matches!(
            TransformChain::read_from(&mut reader, &TransformFactory::new()),
            Err(Error::EmptyTransformChain)
        ));
    }

    #[test]
    fn unknown_transform_is_unsupported() {
        let xml = transforms_xml(
            r#"<ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#base64"/>"#,
        );
        let mut reader = XmlReader::from_xml(&xml);
        assert!(matches!(
            TransformChain::read_from(&mut reader, &TransformFactory::new()),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn chain_roundtrips_through_xml() {
        let mut chain = TransformChain::new();
        chain.push(Box::new(
            ExclusiveC14nTransform::new(C14nMode::Exclusive).with_inclusive_prefixes(vec!["p".into()]),
        ));
        chain.push(Box::new(StrTransform::new(C14nMode::Exclusive, None)));
        assert!(chain.needs_inclusive_context());

        let mut writer = TextWriter::new();
        chain.write_to(&mut writer).unwrap();
        let xml = writer.into_string().replacen(
            "<ds:Transforms",
            &format!(r#"<ds:Transforms xmlns:ds="{}""#, ns::DSIG),
            1,
        );

        let mut reader = XmlReader::from_xml(&xml);
        let parsed = TransformChain::read_from(&mut reader, &TransformFactory::new()).unwrap();
        let uris: Vec<_> = parsed.iter().map(|t| t.uri().to_string()).collect();
        assert_eq!(uris, [algorithm::EXC_C14N, algorithm::STR_TRANSFORM]);
        assert!(parsed.needs_inclusive_context());
    }

    #[test]
    fn multi_step_chain_feeds_last_transform() {
        let mut chain = TransformChain::new();
        chain.push(Box::new(ExclusiveC14nTransform::new(C14nMode::Exclusive)));
        chain.push(Box::new(ExclusiveC14nTransform::new(C14nMode::Exclusive)));

        let input = TransformInput::Bytes(br#"<r xmlns:u="urn:u"><e b="2" a="1"/></r>"#.to_vec());
        let value = chain
            .transform_to_digest(&input, &AlgorithmRegistry::new(), algorithm::SHA256)
            .unwrap();
        assert_eq!(
            value,
            digest::digest(algorithm::SHA256, br#"<r><e a="1" b="2"></e></r>"#).unwrap()
        );
    }

    struct Identity;

    impl Transform for Identity {
        fn uri(&self) -> &str {
            "urn:test:identity"
        }
        fn process(&self, input: &TransformInput) -> Result<TransformInput> {
            Ok(input.clone())
        }
        fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
            sink.start_element(ns::DSIG_PREFIX, ns::node::TRANSFORM, ns::DSIG)?;
            sink.attribute("", ns::attr::ALGORITHM, "", self.uri())?;
            sink.end_element()
        }
    }

    fn read_identity(
        _start: &StartElement,
        reader: &mut dyn XmlRead,
        _factory: &TransformFactory,
    ) -> Result<Box<dyn Transform>> {
        read_end_element(reader)?;
        Ok(Box::new(Identity))
    }

    #[test]
    fn custom_transform_is_registered_by_uri() {
        let mut factory = TransformFactory::new();
        factory.register("urn:test:identity", read_identity);
        let xml = transforms_xml(&format!(
            r#"<ds:Transform Algorithm="urn:test:identity"/><ds:Transform Algorithm="{}"/>"#,
            algorithm::EXC_C14N
        ));
        let mut reader = XmlReader::from_xml(&xml);
        let chain = TransformChain::read_from(&mut reader, &factory).unwrap();
        assert_eq!(chain.len(), 2);

        let input = TransformInput::Bytes(b"<x/>".to_vec());
        let value = chain
            .transform_to_digest(&input, &AlgorithmRegistry::new(), algorithm::SHA1)
            .unwrap();
        assert_eq!(value, digest::digest(algorithm::SHA1, b"<x></x>").unwrap());
    }

    #[test]
    fn str_transform_uses_factory_resolver() {
        let token_xml = r#"<t Id="tok">secret</t>"#;
        let mut reader = XmlReader::from_xml(token_xml);
        let mut map = TokenMap::new();
        map.insert_token("tok", TokenStream::record(&mut reader).unwrap());
        let factory = TransformFactory::new().with_resolver(Arc::new(map));

        let xml = transforms_xml(&format!(
            r#"<ds:Transform xmlns:wsse="{wsse}" Algorithm="{str}"><wsse:TransformationParameters><ds:CanonicalizationMethod Algorithm="{exc}"/></wsse:TransformationParameters></ds:Transform>"#,
            wsse = ns::WSSE,
            str = algorithm::STR_TRANSFORM,
            exc = algorithm::EXC_C14N,
        ));
        let mut reader = XmlReader::from_xml(&xml);
        let chain = TransformChain::read_from(&mut reader, &factory).unwrap();

        let reference = format!(
            r##"<wsse:SecurityTokenReference xmlns:wsse="{}"><wsse:Reference URI="#tok"/></wsse:SecurityTokenReference>"##,
            ns::WSSE
        );
        let mut reader = XmlReader::from_xml(&reference);
        let input = TransformInput::tokens(TokenStream::record(&mut reader).unwrap());
        let value = chain
            .transform_to_digest(&input, &AlgorithmRegistry::new(), algorithm::SHA1)
            .unwrap();
        assert_eq!(
            value,
            digest::digest(algorithm::SHA1, br#"<t Id="tok">secret</t>"#).unwrap()
        );
    }
}
