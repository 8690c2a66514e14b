#![forbid(unsafe_code)]

//! Instantiates transforms from their `<Transform Algorithm=...>` elements.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use wsdsig_c14n::C14nMode;
use wsdsig_core::{algorithm, ns, Error, Result};
use wsdsig_xml::{StartElement, XmlRead};

use crate::exclusive::ExclusiveC14nTransform;
use crate::str_transform::{StrTransform, TokenReferenceResolver};
use crate::transform::Transform;

/// Reads a custom transform. Called with the `<Transform>` start tag already
/// consumed; must consume the element's content through its end tag.
pub type TransformReader =
    fn(&StartElement, &mut dyn XmlRead, &TransformFactory) -> Result<Box<dyn Transform>>;

/// Maps transform algorithm URIs to transform readers.
#[derive(Clone, Default)]
pub struct TransformFactory {
    custom: HashMap<String, TransformReader>,
    resolver: Option<Arc<dyn TokenReferenceResolver>>,
}

impl std::fmt::Debug for TransformFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformFactory")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl TransformFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resolver STR-Transforms use to dereference tokens.
    pub fn with_resolver(mut self, resolver: Arc<dyn TokenReferenceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn resolver(&self) -> Option<&Arc<dyn TokenReferenceResolver>> {
        self.resolver.as_ref()
    }

    /// Registers a reader for `uri`. Custom readers take precedence over
    /// the built-in transforms.
    pub fn register(&mut self, uri: impl Into<String>, reader: TransformReader) {
        self.custom.insert(uri.into(), reader);
    }

    /// Builds the transform for a `<Transform>` element whose start tag has
    /// just been read, consuming its content.
    pub fn read_transform(
        &self,
        start: &StartElement,
        reader: &mut dyn XmlRead,
    ) -> Result<Box<dyn Transform>> {
        let uri = start
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute(ns::attr::ALGORITHM.into()))?;

        if let Some(custom) = self.custom.get(uri) {
            return custom(start, reader, self);
        }
        match uri {
            algorithm::EXC_C14N => Ok(Box::new(ExclusiveC14nTransform::read_from(
                C14nMode::Exclusive,
                reader,
            )?)),
            algorithm::EXC_C14N_WITH_COMMENTS => Ok(Box::new(ExclusiveC14nTransform::read_from(
                C14nMode::ExclusiveWithComments,
                reader,
            )?)),
            algorithm::STR_TRANSFORM => Ok(Box::new(StrTransform::read_from(
                reader,
                self.resolver.clone(),
            )?)),
            _ => {
                warn!("rejected transform algorithm {uri}");
                Err(Error::UnsupportedAlgorithm(format!("transform: {uri}")))
            }
        }
    }
}
