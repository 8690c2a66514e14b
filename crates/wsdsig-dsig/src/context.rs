#![forbid(unsafe_code)]

//! Algorithm engines and configuration shared by signature operations.

use std::sync::Arc;

use wsdsig_crypto::AlgorithmRegistry;
use wsdsig_transforms::{TokenReferenceResolver, TransformFactory};

/// Context for XML-DSig operations.
#[derive(Debug, Default)]
pub struct DsigContext {
    /// Hash, keyed-hash and signature engines, including the FIPS flag.
    pub registry: AlgorithmRegistry,
    /// Transform instantiation for `<Transforms>` parsing.
    pub transforms: TransformFactory,
    /// Additional ID attribute names, besides `Id` and `wsu:Id`.
    pub id_attrs: Vec<String>,
}

impl DsigContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the FIPS-approved SHA-256 engine for RSA-SHA256.
    pub fn with_fips_required(mut self, required: bool) -> Self {
        self.registry = self.registry.with_fips_required(required);
        self
    }

    pub fn with_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_transform_factory(mut self, factory: TransformFactory) -> Self {
        self.transforms = factory;
        self
    }

    /// Install the resolver STR-Transforms dereference tokens through.
    pub fn with_token_resolver(mut self, resolver: Arc<dyn TokenReferenceResolver>) -> Self {
        self.transforms = self.transforms.with_resolver(resolver);
        self
    }

    /// Add an ID attribute name to match during document walks.
    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }

    pub fn fips_required(&self) -> bool {
        self.registry.fips_required()
    }

    pub(crate) fn token_resolver(&self) -> Option<&Arc<dyn TokenReferenceResolver>> {
        self.transforms.resolver()
    }
}
