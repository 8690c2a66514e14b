#![forbid(unsafe_code)]

//! Hash and keyed-hash (HMAC) engines.

use std::io;

use digest::Digest;
use hmac::{Hmac, Mac};
use wsdsig_core::{algorithm, Error, Result};

/// An incremental hash or keyed hash.
///
/// Engines are consumed by [`finalize`](HashEngine::finalize), so one
/// engine produces exactly one value.
pub trait HashEngine {
    /// Feed data into the hash.
    fn update(&mut self, data: &[u8]);
    /// Finalize and return the hash value.
    fn finalize(self: Box<Self>) -> Vec<u8>;
    /// Algorithm URI.
    fn uri(&self) -> &str;
    /// Length of the finalized value in bytes.
    fn output_size(&self) -> usize;
}

/// Create a hash engine from a digest algorithm URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn HashEngine>> {
    match uri {
        algorithm::SHA1 => Ok(Box::new(Sha1Digest::new())),
        algorithm::SHA256 => Ok(Box::new(Sha256Digest::new())),
        algorithm::SHA384 => Ok(Box::new(Sha384Digest::new())),
        algorithm::SHA512 => Ok(Box::new(Sha512Digest::new())),
        _ => Err(Error::UnsupportedAlgorithm(format!("digest algorithm: {uri}"))),
    }
}

/// Create an HMAC engine from a signature method URI and a shared key.
pub fn keyed_from_uri(uri: &str, key: &[u8]) -> Result<Box<dyn HashEngine>> {
    match uri {
        algorithm::HMAC_SHA1 => Ok(Box::new(HmacSha1::new(key)?)),
        algorithm::HMAC_SHA256 => Ok(Box::new(HmacSha256::new(key)?)),
        _ => Err(Error::UnsupportedAlgorithm(format!("keyed hash algorithm: {uri}"))),
    }
}

/// Compute a digest in one shot.
pub fn digest(uri: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut hasher = from_uri(uri)?;
    hasher.update(data);
    Ok(hasher.finalize())
}

/// Adapts a [`HashEngine`] to `io::Write` so canonical output can be
/// streamed straight into it.
pub struct HashWriter {
    engine: Box<dyn HashEngine>,
    written: usize,
}

impl HashWriter {
    pub fn new(engine: Box<dyn HashEngine>) -> Self {
        Self { engine, written: 0 }
    }

    /// Number of bytes hashed so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finalize(self) -> Vec<u8> {
        self.engine.finalize()
    }
}

impl io::Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.engine.update(buf);
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compare two digest or MAC values. Lengths are compared first; equal
/// lengths are compared in constant time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

// ── Concrete implementations ─────────────────────────────────────────

macro_rules! impl_digest {
    ($name:ident, $hasher:ty, $uri:expr) => {
        struct $name {
            inner: $hasher,
        }

        impl $name {
            fn new() -> Self {
                Self {
                    inner: <$hasher>::new(),
                }
            }
        }

        impl HashEngine for $name {
            fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn uri(&self) -> &str {
                $uri
            }

            fn output_size(&self) -> usize {
                <$hasher as Digest>::output_size()
            }
        }
    };
}

impl_digest!(Sha1Digest, sha1::Sha1, algorithm::SHA1);
impl_digest!(Sha256Digest, sha2::Sha256, algorithm::SHA256);
impl_digest!(Sha384Digest, sha2::Sha384, algorithm::SHA384);
impl_digest!(Sha512Digest, sha2::Sha512, algorithm::SHA512);

macro_rules! impl_hmac {
    ($name:ident, $hasher:ty, $uri:expr) => {
        struct $name {
            inner: Hmac<$hasher>,
        }

        impl $name {
            fn new(key: &[u8]) -> Result<Self> {
                let inner = <Hmac<$hasher> as Mac>::new_from_slice(key)
                    .map_err(|e| Error::Key(format!("HMAC key: {e}")))?;
                Ok(Self { inner })
            }
        }

        impl HashEngine for $name {
            fn update(&mut self, data: &[u8]) {
                Mac::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                self.inner.finalize().into_bytes().to_vec()
            }

            fn uri(&self) -> &str {
                $uri
            }

            fn output_size(&self) -> usize {
                <$hasher as Digest>::output_size()
            }
        }
    };
}

impl_hmac!(HmacSha1, sha1::Sha1, algorithm::HMAC_SHA1);
impl_hmac!(HmacSha256, sha2::Sha256, algorithm::HMAC_SHA256);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256() {
        let result = digest(algorithm::SHA256, b"hello").unwrap();
        assert_eq!(
            hex::encode(result),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_sha1() {
        let result = digest(algorithm::SHA1, b"abc").unwrap();
        assert_eq!(hex::encode(result), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn output_sizes() {
        for (uri, size) in [
            (algorithm::SHA1, 20),
            (algorithm::SHA256, 32),
            (algorithm::SHA384, 48),
            (algorithm::SHA512, 64),
        ] {
            let engine = from_uri(uri).unwrap();
            assert_eq!(engine.output_size(), size);
            assert_eq!(engine.uri(), uri);
            assert_eq!(engine.finalize().len(), size);
        }
    }

    #[test]
    fn hmac_sha1_rfc2202_case_2() {
        let mut mac = keyed_from_uri(algorithm::HMAC_SHA1, b"Jefe").unwrap();
        mac.update(b"what do ya want ");
        mac.update(b"for nothing?");
        assert_eq!(
            hex::encode(mac.finalize()),
            "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_case_2() {
        let mut mac = keyed_from_uri(algorithm::HMAC_SHA256, b"Jefe").unwrap();
        mac.update(b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac.finalize()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn hash_writer_streams_into_engine() {
        let mut writer = HashWriter::new(from_uri(algorithm::SHA256).unwrap());
        write!(writer, "hel").unwrap();
        writer.write_all(b"lo").unwrap();
        assert_eq!(writer.written(), 5);
        assert_eq!(writer.finalize(), digest(algorithm::SHA256, b"hello").unwrap());
    }

    #[test]
    fn constant_time_comparison() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn unknown_uris_are_rejected() {
        assert!(from_uri("urn:nope").is_err());
        assert!(keyed_from_uri(algorithm::RSA_SHA1, b"k").is_err());
    }
}
