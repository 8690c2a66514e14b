#![forbid(unsafe_code)]

//! Key material used to sign and verify.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use wsdsig_core::{Error, Result};

/// A signing or verification key.
///
/// A symmetric key selects the keyed-hash path; RSA and DSA keys select the
/// hash-then-format path. Asymmetric keys without a private half can only
/// verify.
#[derive(Clone)]
pub enum SecurityKey {
    Symmetric(Vec<u8>),
    Rsa {
        private: Option<rsa::RsaPrivateKey>,
        public: rsa::RsaPublicKey,
    },
    Dsa {
        private: Option<dsa::SigningKey>,
        public: dsa::VerifyingKey,
    },
}

impl std::fmt::Debug for SecurityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symmetric(k) => write!(f, "symmetric key ({} bytes)", k.len()),
            Self::Rsa { private, public } => {
                let bits = public.size() * 8;
                if private.is_some() {
                    write!(f, "RSA-{bits} private+public key")
                } else {
                    write!(f, "RSA-{bits} public key")
                }
            }
            Self::Dsa { private, .. } => {
                if private.is_some() {
                    write!(f, "DSA private+public key")
                } else {
                    write!(f, "DSA public key")
                }
            }
        }
    }
}

impl SecurityKey {
    pub fn symmetric(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Symmetric(bytes.into())
    }

    pub fn rsa_private(key: rsa::RsaPrivateKey) -> Self {
        let public = key.to_public_key();
        Self::Rsa {
            private: Some(key),
            public,
        }
    }

    pub fn rsa_public(key: rsa::RsaPublicKey) -> Self {
        Self::Rsa {
            private: None,
            public: key,
        }
    }

    pub fn dsa_private(key: dsa::SigningKey) -> Self {
        let public = key.verifying_key().clone();
        Self::Dsa {
            private: Some(key),
            public,
        }
    }

    pub fn dsa_public(key: dsa::VerifyingKey) -> Self {
        Self::Dsa {
            private: None,
            public: key,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Symmetric(_))
    }

    pub fn has_private(&self) -> bool {
        match self {
            Self::Symmetric(_) => true,
            Self::Rsa { private, .. } => private.is_some(),
            Self::Dsa { private, .. } => private.is_some(),
        }
    }

    /// The verification-only half of this key. Symmetric keys are returned
    /// unchanged.
    pub fn to_public(&self) -> Self {
        match self {
            Self::Symmetric(k) => Self::Symmetric(k.clone()),
            Self::Rsa { public, .. } => Self::rsa_public(public.clone()),
            Self::Dsa { public, .. } => Self::dsa_public(public.clone()),
        }
    }

    /// Load an RSA key from PEM text.
    ///
    /// Accepts PKCS#8 and PKCS#1 private keys, and SubjectPublicKeyInfo and
    /// PKCS#1 public keys.
    pub fn from_rsa_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(Self::rsa_private(key));
        }
        if let Ok(key) = rsa::RsaPrivateKey::from_pkcs1_pem(pem) {
            return Ok(Self::rsa_private(key));
        }
        if let Ok(key) = rsa::RsaPublicKey::from_public_key_pem(pem) {
            return Ok(Self::rsa_public(key));
        }
        rsa::RsaPublicKey::from_pkcs1_pem(pem)
            .map(Self::rsa_public)
            .map_err(|e| Error::Key(format!("not an RSA key in PEM form: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    fn rsa_key() -> rsa::RsaPrivateKey {
        rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    #[test]
    fn debug_never_shows_key_material() {
        let key = SecurityKey::symmetric(vec![0xAA; 16]);
        assert_eq!(format!("{key:?}"), "symmetric key (16 bytes)");

        let rsa = SecurityKey::rsa_private(rsa_key());
        assert_eq!(format!("{rsa:?}"), "RSA-1024 private+public key");
        assert_eq!(format!("{:?}", rsa.to_public()), "RSA-1024 public key");
    }

    #[test]
    fn private_half_is_tracked() {
        let rsa = SecurityKey::rsa_private(rsa_key());
        assert!(rsa.has_private());
        assert!(!rsa.to_public().has_private());
        assert!(!rsa.is_symmetric());
        assert!(SecurityKey::symmetric(b"k".to_vec()).is_symmetric());
    }

    #[test]
    fn loads_pem_private_and_public_keys() {
        let private = rsa_key();
        let pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
        assert!(SecurityKey::from_rsa_pem(&pem).unwrap().has_private());

        let public_pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        assert!(!SecurityKey::from_rsa_pem(&public_pem).unwrap().has_private());

        assert!(SecurityKey::from_rsa_pem("not a key").is_err());
    }
}
