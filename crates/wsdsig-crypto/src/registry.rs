#![forbid(unsafe_code)]

//! The algorithm registry: maps algorithm URIs to engines.
//!
//! Standard URIs dispatch through the static tables of each module.
//! Applications can register [`AlgorithmProvider`]s on a registry value;
//! providers are consulted first, in registration order.

use log::{debug, warn};
use wsdsig_core::{algorithm, Error, Result};

use crate::cipher::CipherAlgorithm;
use crate::digest::HashEngine;
use crate::keywrap::KeyWrapAlgorithm;
use crate::sign::SignatureFormatter;

/// A source of custom algorithm engines.
///
/// Every method returns `None` for URIs the provider does not handle.
pub trait AlgorithmProvider {
    fn hash(&self, _uri: &str) -> Option<Box<dyn HashEngine>> {
        None
    }

    fn keyed_hash(&self, _uri: &str, _key: &[u8]) -> Option<Result<Box<dyn HashEngine>>> {
        None
    }

    fn asymmetric(&self, _uri: &str) -> Option<Box<dyn SignatureFormatter>> {
        None
    }

    fn key_wrap(&self, _uri: &str) -> Option<Box<dyn KeyWrapAlgorithm>> {
        None
    }

    fn cipher(&self, _uri: &str) -> Option<Box<dyn CipherAlgorithm>> {
        None
    }
}

/// Resolves algorithm URIs to hash, keyed-hash, signature, key wrap and
/// cipher engines.
#[derive(Default)]
pub struct AlgorithmRegistry {
    fips_required: bool,
    providers: Vec<Box<dyn AlgorithmProvider>>,
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("fips_required", &self.fips_required)
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require FIPS-approved engines where a substitution exists.
    pub fn with_fips_required(mut self, required: bool) -> Self {
        self.fips_required = required;
        self
    }

    /// Register a custom provider. Providers are consulted before the
    /// built-in tables.
    pub fn register(&mut self, provider: Box<dyn AlgorithmProvider>) {
        self.providers.push(provider);
    }

    pub fn fips_required(&self) -> bool {
        self.fips_required
    }

    /// Look up a hash engine by digest URI.
    pub fn hash(&self, uri: &str) -> Result<Box<dyn HashEngine>> {
        if let Some(engine) = self.providers.iter().find_map(|p| p.hash(uri)) {
            debug!("using custom hash engine for {uri}");
            return Ok(engine);
        }
        crate::digest::from_uri(uri).map_err(|e| rejected(uri, e))
    }

    /// Look up a keyed hash engine by signature method URI.
    pub fn keyed_hash(&self, uri: &str, key: &[u8]) -> Result<Box<dyn HashEngine>> {
        if let Some(engine) = self.providers.iter().find_map(|p| p.keyed_hash(uri, key)) {
            debug!("using custom keyed hash engine for {uri}");
            return engine;
        }
        crate::digest::keyed_from_uri(uri, key).map_err(|e| rejected(uri, e))
    }

    /// Look up an asymmetric signature formatter by signature method URI.
    pub fn asymmetric(&self, uri: &str) -> Result<Box<dyn SignatureFormatter>> {
        if let Some(formatter) = self.providers.iter().find_map(|p| p.asymmetric(uri)) {
            debug!("using custom signature formatter for {uri}");
            return Ok(formatter);
        }
        crate::sign::from_uri(uri).map_err(|e| rejected(uri, e))
    }

    /// Look up a key wrap engine by URI.
    pub fn key_wrap(&self, uri: &str) -> Result<Box<dyn KeyWrapAlgorithm>> {
        if let Some(kw) = self.providers.iter().find_map(|p| p.key_wrap(uri)) {
            return Ok(kw);
        }
        crate::keywrap::from_uri(uri).map_err(|e| rejected(uri, e))
    }

    /// Look up a block cipher by URI.
    pub fn cipher(&self, uri: &str) -> Result<Box<dyn CipherAlgorithm>> {
        if let Some(cipher) = self.providers.iter().find_map(|p| p.cipher(uri)) {
            return Ok(cipher);
        }
        crate::cipher::from_uri(uri).map_err(|e| rejected(uri, e))
    }

    /// The FIPS-approved SHA-256 engine: a provider registered for SHA-256
    /// if there is one, otherwise the built-in engine.
    pub fn fips_sha256(&self) -> Result<Box<dyn HashEngine>> {
        self.hash(algorithm::SHA256)
    }
}

fn rejected(uri: &str, err: Error) -> Error {
    warn!("rejected algorithm {uri}");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hashes nothing and always yields a fixed value.
    struct FixedHash(Vec<u8>);

    impl HashEngine for FixedHash {
        fn update(&mut self, _data: &[u8]) {}
        fn finalize(self: Box<Self>) -> Vec<u8> {
            self.0
        }
        fn uri(&self) -> &str {
            "urn:test:fixed"
        }
        fn output_size(&self) -> usize {
            self.0.len()
        }
    }

    struct FixedProvider;

    impl AlgorithmProvider for FixedProvider {
        fn hash(&self, uri: &str) -> Option<Box<dyn HashEngine>> {
            (uri == "urn:test:fixed").then(|| Box::new(FixedHash(vec![7; 4])) as Box<dyn HashEngine>)
        }
    }

    #[test]
    fn builtin_algorithms_resolve() {
        let registry = AlgorithmRegistry::new();
        assert!(!registry.fips_required());
        assert_eq!(registry.hash(algorithm::SHA1).unwrap().output_size(), 20);
        assert_eq!(
            registry.keyed_hash(algorithm::HMAC_SHA256, b"k").unwrap().output_size(),
            32
        );
        assert!(registry.asymmetric(algorithm::RSA_SHA256).is_ok());
        assert!(registry.key_wrap(algorithm::KW_AES128).is_ok());
        assert!(registry.cipher(algorithm::AES256_CBC).is_ok());
    }

    #[test]
    fn unknown_algorithms_are_unsupported() {
        let registry = AlgorithmRegistry::new();
        assert!(matches!(
            registry.hash("http://www.w3.org/2001/04/xmldsig-more#md5"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            registry.asymmetric(algorithm::HMAC_SHA1),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn custom_provider_is_consulted_first() {
        let mut registry = AlgorithmRegistry::new();
        registry.register(Box::new(FixedProvider));
        assert_eq!(registry.hash("urn:test:fixed").unwrap().finalize(), vec![7; 4]);
        // Built-ins remain reachable.
        assert_eq!(registry.hash(algorithm::SHA256).unwrap().output_size(), 32);
    }

    #[test]
    fn fips_sha256_falls_back_to_builtin() {
        let registry = AlgorithmRegistry::new().with_fips_required(true);
        assert!(registry.fips_required());
        let mut engine = registry.fips_sha256().unwrap();
        engine.update(b"hello");
        assert_eq!(
            hex::encode(engine.finalize()),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
