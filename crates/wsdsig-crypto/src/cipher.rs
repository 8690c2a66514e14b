#![forbid(unsafe_code)]

//! CBC block ciphers used by XML Encryption (AES-CBC, Triple-DES-CBC).
//!
//! Ciphertext is laid out as `IV || blocks`. The padding length lives in the
//! last plaintext byte; filler bytes are not checked, so both PKCS#7 and
//! ISO 10126 padding decrypt.

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use wsdsig_core::{algorithm, Error, Result};

/// A symmetric block cipher in CBC mode.
pub trait CipherAlgorithm {
    fn uri(&self) -> &str;
    fn key_size(&self) -> usize;
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Create a cipher from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn CipherAlgorithm>> {
    let (uri, cipher, key_size) = match uri {
        algorithm::AES128_CBC => (algorithm::AES128_CBC, BlockCipher::Aes, 16),
        algorithm::AES192_CBC => (algorithm::AES192_CBC, BlockCipher::Aes, 24),
        algorithm::AES256_CBC => (algorithm::AES256_CBC, BlockCipher::Aes, 32),
        algorithm::TRIPLEDES_CBC => (algorithm::TRIPLEDES_CBC, BlockCipher::TripleDes, 24),
        _ => return Err(Error::UnsupportedAlgorithm(format!("cipher: {uri}"))),
    };
    Ok(Box::new(Cbc {
        uri,
        cipher,
        key_size,
    }))
}

#[derive(Debug, Clone, Copy)]
enum BlockCipher {
    Aes,
    TripleDes,
}

impl BlockCipher {
    fn block_size(self) -> usize {
        match self {
            Self::Aes => 16,
            Self::TripleDes => 8,
        }
    }
}

struct Cbc {
    uri: &'static str,
    cipher: BlockCipher,
    key_size: usize,
}

macro_rules! cbc_apply {
    ($mode:ident, $block:ty, $key:expr, $iv:expr, $buf:expr, $encrypt:expr) => {{
        if $encrypt {
            let len = $buf.len();
            cbc::Encryptor::<$block>::new_from_slices($key, $iv)
                .map_err(|e| Error::Crypto(format!("{} init: {e}", stringify!($mode))))?
                .encrypt_padded_mut::<NoPadding>($buf, len)
                .map_err(|e| Error::Crypto(format!("{} encrypt: {e}", stringify!($mode))))?;
        } else {
            cbc::Decryptor::<$block>::new_from_slices($key, $iv)
                .map_err(|e| Error::Crypto(format!("{} init: {e}", stringify!($mode))))?
                .decrypt_padded_mut::<NoPadding>($buf)
                .map_err(|e| Error::Crypto(format!("{} decrypt: {e}", stringify!($mode))))?;
        }
    }};
}

impl Cbc {
    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(Error::Key(format!(
                "expected {} byte key, got {}",
                self.key_size,
                key.len()
            )));
        }
        Ok(())
    }

    /// Run the block cipher over block-aligned `buf` in place.
    fn apply(&self, key: &[u8], iv: &[u8], buf: &mut [u8], encrypt: bool) -> Result<()> {
        match (self.cipher, self.key_size) {
            (BlockCipher::Aes, 16) => cbc_apply!(AES, aes::Aes128, key, iv, buf, encrypt),
            (BlockCipher::Aes, 24) => cbc_apply!(AES, aes::Aes192, key, iv, buf, encrypt),
            (BlockCipher::Aes, 32) => cbc_apply!(AES, aes::Aes256, key, iv, buf, encrypt),
            (BlockCipher::TripleDes, _) => cbc_apply!(TripleDES, des::TdesEde3, key, iv, buf, encrypt),
            (_, n) => return Err(Error::Key(format!("unsupported AES key size {n}"))),
        }
        Ok(())
    }
}

impl CipherAlgorithm for Cbc {
    fn uri(&self) -> &str {
        self.uri
    }

    fn key_size(&self) -> usize {
        self.key_size
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;
        let block = self.cipher.block_size();

        let mut iv = vec![0u8; block];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut buf = pad(plaintext, block);
        self.apply(key, &iv, &mut buf, true)?;

        iv.extend_from_slice(&buf);
        Ok(iv)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;
        let block = self.cipher.block_size();
        if data.len() < 2 * block || data.len() % block != 0 {
            return Err(Error::Crypto(format!(
                "ciphertext length {} is not a whole number of {block}-byte blocks",
                data.len()
            )));
        }

        let (iv, ciphertext) = data.split_at(block);
        let mut buf = ciphertext.to_vec();
        self.apply(key, iv, &mut buf, false)?;
        unpad(buf, block)
    }
}

fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad_len = block_size - (data.len() % block_size);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

fn unpad(mut data: Vec<u8>, block_size: usize) -> Result<Vec<u8>> {
    let pad_len = data.last().copied().unwrap_or(0) as usize;
    if pad_len == 0 || pad_len > block_size || pad_len > data.len() {
        return Err(Error::Crypto("invalid padding".into()));
    }
    data.truncate(data.len() - pad_len);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_roundtrip() {
        let padded = pad(b"hello", 16);
        assert_eq!(padded.len(), 16);
        assert_eq!(padded[15], 11);
        assert_eq!(unpad(padded, 16).unwrap(), b"hello");
        assert_eq!(pad(b"12345678", 8).len(), 16);
    }

    #[test]
    fn iso10126_padding_is_accepted() {
        let mut data = b"hello world!".to_vec();
        data.extend_from_slice(&[0xAB, 0xCD, 0xEF, 0x04]);
        assert_eq!(unpad(data, 16).unwrap(), b"hello world!");
        assert!(unpad(vec![1, 2, 3, 0], 16).is_err());
        assert!(unpad(vec![1, 2, 3, 17], 16).is_err());
    }

    #[test]
    fn all_ciphers_roundtrip() {
        let plaintexts: &[&[u8]] = &[
            b"",
            b"A",
            b"Exactly16bytes!!",
            b"This is a much longer message that spans several blocks.",
        ];
        for (uri, key_size) in [
            (algorithm::AES128_CBC, 16),
            (algorithm::AES192_CBC, 24),
            (algorithm::AES256_CBC, 32),
            (algorithm::TRIPLEDES_CBC, 24),
        ] {
            let cipher = from_uri(uri).unwrap();
            assert_eq!(cipher.uri(), uri);
            assert_eq!(cipher.key_size(), key_size);
            let key: Vec<u8> = (0..key_size as u8).collect();
            for pt in plaintexts {
                let ct = cipher.encrypt(&key, pt).unwrap();
                assert_eq!(cipher.decrypt(&key, &ct).unwrap(), *pt, "{uri}");
            }
        }
    }

    #[test]
    fn wrong_key_length_and_truncation_are_rejected() {
        let cipher = from_uri(algorithm::AES128_CBC).unwrap();
        assert!(cipher.encrypt(&[0u8; 15], b"x").is_err());
        let ct = cipher.encrypt(&[0u8; 16], b"x").unwrap();
        assert!(cipher.decrypt(&[0u8; 16], &ct[..20]).is_err());
        assert!(from_uri("http://example.com/fake-cipher").is_err());
    }
}
