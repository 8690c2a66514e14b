#![forbid(unsafe_code)]

//! Asymmetric signature formatters (RSA PKCS#1 v1.5, DSA).
//!
//! A formatter never hashes: the caller hashes the canonical `SignedInfo`
//! and hands over the hash value together with the name of the hash
//! algorithm that produced it.

use signature::hazmat::{PrehashSigner, PrehashVerifier};
use wsdsig_core::{algorithm, Error, Result};

use crate::key::SecurityKey;

/// Length of each DSA signature component in the XML-DSig encoding.
const DSA_COMPONENT_LEN: usize = 20;

/// The hash algorithm a formatter signs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashName {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashName {
    /// The conventional short name, e.g. `SHA256`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }

    /// The digest URI of this hash algorithm.
    pub fn digest_uri(&self) -> &'static str {
        match self {
            Self::Sha1 => algorithm::SHA1,
            Self::Sha256 => algorithm::SHA256,
            Self::Sha384 => algorithm::SHA384,
            Self::Sha512 => algorithm::SHA512,
        }
    }

    pub fn from_digest_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::SHA1 => Some(Self::Sha1),
            algorithm::SHA256 => Some(Self::Sha256),
            algorithm::SHA384 => Some(Self::Sha384),
            algorithm::SHA512 => Some(Self::Sha512),
            _ => None,
        }
    }
}

impl std::fmt::Display for HashName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signs and verifies precomputed hash values.
pub trait SignatureFormatter {
    /// Signature method URI.
    fn uri(&self) -> &str;
    /// The hash algorithm this signature method prescribes.
    fn hash_name(&self) -> HashName;
    fn sign_hash(&self, key: &SecurityKey, hash_name: HashName, hash: &[u8]) -> Result<Vec<u8>>;
    fn verify_hash(
        &self,
        key: &SecurityKey,
        hash_name: HashName,
        hash: &[u8],
        signature: &[u8],
    ) -> Result<bool>;
}

/// Create a signature formatter from a signature method URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn SignatureFormatter>> {
    match uri {
        algorithm::RSA_SHA1 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA1, hash: HashName::Sha1 })),
        algorithm::RSA_SHA256 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA256, hash: HashName::Sha256 })),
        algorithm::RSA_SHA512 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA512, hash: HashName::Sha512 })),
        algorithm::DSA_SHA1 => Ok(Box::new(DsaSha1)),
        _ => Err(Error::UnsupportedAlgorithm(format!("signature algorithm: {uri}"))),
    }
}

// ── RSA PKCS#1 v1.5 ─────────────────────────────────────────────────

struct RsaPkcs1v15 {
    uri: &'static str,
    hash: HashName,
}

fn pkcs1v15_scheme(hash: HashName) -> rsa::Pkcs1v15Sign {
    match hash {
        HashName::Sha1 => rsa::Pkcs1v15Sign::new::<sha1::Sha1>(),
        HashName::Sha256 => rsa::Pkcs1v15Sign::new::<sha2::Sha256>(),
        HashName::Sha384 => rsa::Pkcs1v15Sign::new::<sha2::Sha384>(),
        HashName::Sha512 => rsa::Pkcs1v15Sign::new::<sha2::Sha512>(),
    }
}

impl SignatureFormatter for RsaPkcs1v15 {
    fn uri(&self) -> &str {
        self.uri
    }

    fn hash_name(&self) -> HashName {
        self.hash
    }

    fn sign_hash(&self, key: &SecurityKey, hash_name: HashName, hash: &[u8]) -> Result<Vec<u8>> {
        let SecurityKey::Rsa {
            private: Some(private_key),
            ..
        } = key
        else {
            return Err(Error::Key("RSA private key required".into()));
        };
        private_key
            .sign(pkcs1v15_scheme(hash_name), hash)
            .map_err(|e| Error::Crypto(format!("RSA sign: {e}")))
    }

    fn verify_hash(
        &self,
        key: &SecurityKey,
        hash_name: HashName,
        hash: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let SecurityKey::Rsa { public, .. } = key else {
            return Err(Error::Key("RSA key required".into()));
        };
        Ok(public
            .verify(pkcs1v15_scheme(hash_name), hash, signature)
            .is_ok())
    }
}

// ── DSA ──────────────────────────────────────────────────────────────

/// DSA with SHA-1. The signature value is `r || s`, each component
/// left-padded to 20 bytes.
struct DsaSha1;

impl SignatureFormatter for DsaSha1 {
    fn uri(&self) -> &str {
        algorithm::DSA_SHA1
    }

    fn hash_name(&self) -> HashName {
        HashName::Sha1
    }

    fn sign_hash(&self, key: &SecurityKey, hash_name: HashName, hash: &[u8]) -> Result<Vec<u8>> {
        if hash_name != HashName::Sha1 {
            return Err(Error::UnsupportedAlgorithm(format!("DSA with {hash_name}")));
        }
        let SecurityKey::Dsa {
            private: Some(private_key),
            ..
        } = key
        else {
            return Err(Error::Key("DSA private key required".into()));
        };
        let sig: dsa::Signature = private_key
            .sign_prehash(hash)
            .map_err(|e| Error::Crypto(format!("DSA sign: {e}")))?;

        let mut out = vec![0u8; 2 * DSA_COMPONENT_LEN];
        put_component(&mut out[..DSA_COMPONENT_LEN], &sig.r().to_bytes_be())?;
        put_component(&mut out[DSA_COMPONENT_LEN..], &sig.s().to_bytes_be())?;
        Ok(out)
    }

    fn verify_hash(
        &self,
        key: &SecurityKey,
        hash_name: HashName,
        hash: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        if hash_name != HashName::Sha1 {
            return Err(Error::UnsupportedAlgorithm(format!("DSA with {hash_name}")));
        }
        let SecurityKey::Dsa { public, .. } = key else {
            return Err(Error::Key("DSA key required".into()));
        };
        if signature.len() != 2 * DSA_COMPONENT_LEN {
            return Ok(false);
        }
        let (r, s) = signature.split_at(DSA_COMPONENT_LEN);
        let Ok(sig) = dsa::Signature::from_components(
            dsa::BigUint::from_bytes_be(r),
            dsa::BigUint::from_bytes_be(s),
        ) else {
            return Ok(false);
        };
        Ok(public.verify_prehash(hash, &sig).is_ok())
    }
}

/// Copy a big-endian integer into `slot`, left-padded with zeros.
fn put_component(slot: &mut [u8], bytes: &[u8]) -> Result<()> {
    if bytes.len() > slot.len() {
        return Err(Error::Crypto(format!(
            "DSA component is {} bytes, expected at most {}",
            bytes.len(),
            slot.len()
        )));
    }
    let offset = slot.len() - bytes.len();
    slot[offset..].copy_from_slice(bytes);
    Ok(())
}
