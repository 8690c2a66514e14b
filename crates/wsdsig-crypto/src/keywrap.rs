#![forbid(unsafe_code)]

//! Key wrap engines: AES-KW (RFC 3394) and CMS Triple-DES key wrap
//! (RFC 3217).

use aes_kw::Kek;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use wsdsig_core::{algorithm, Error, Result};

/// A symmetric key wrap algorithm.
pub trait KeyWrapAlgorithm {
    fn uri(&self) -> &str;
    /// Required key-encryption-key length in bytes.
    fn kek_size(&self) -> usize;
    fn wrap(&self, kek: &[u8], key_data: &[u8]) -> Result<Vec<u8>>;
    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>>;
}

/// Create a key wrap engine from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn KeyWrapAlgorithm>> {
    match uri {
        algorithm::KW_AES128 => Ok(Box::new(AesKeyWrap { kek_size: 16, uri: algorithm::KW_AES128 })),
        algorithm::KW_AES192 => Ok(Box::new(AesKeyWrap { kek_size: 24, uri: algorithm::KW_AES192 })),
        algorithm::KW_AES256 => Ok(Box::new(AesKeyWrap { kek_size: 32, uri: algorithm::KW_AES256 })),
        algorithm::KW_TRIPLEDES => Ok(Box::new(TripleDesKeyWrap)),
        _ => Err(Error::UnsupportedAlgorithm(format!("key wrap: {uri}"))),
    }
}

fn check_kek(kek: &[u8], expected: usize) -> Result<()> {
    if kek.len() != expected {
        return Err(Error::Key(format!(
            "expected {expected} byte KEK, got {}",
            kek.len()
        )));
    }
    Ok(())
}

// ── AES-KW ───────────────────────────────────────────────────────────

struct AesKeyWrap {
    kek_size: usize,
    uri: &'static str,
}

/// Run `$op` with a `Kek` of the AES variant matching the KEK length.
macro_rules! with_aes_kek {
    ($kek_bytes:expr, $kek:ident => $op:expr) => {
        match $kek_bytes.len() {
            16 => {
                let $kek = Kek::<aes::Aes128>::new($kek_bytes.into());
                $op
            }
            24 => {
                let $kek = Kek::<aes::Aes192>::new($kek_bytes.into());
                $op
            }
            32 => {
                let $kek = Kek::<aes::Aes256>::new($kek_bytes.into());
                $op
            }
            n => return Err(Error::Key(format!("unsupported AES KEK size {n}"))),
        }
    };
}

impl KeyWrapAlgorithm for AesKeyWrap {
    fn uri(&self) -> &str {
        self.uri
    }

    fn kek_size(&self) -> usize {
        self.kek_size
    }

    fn wrap(&self, kek_bytes: &[u8], key_data: &[u8]) -> Result<Vec<u8>> {
        check_kek(kek_bytes, self.kek_size)?;
        if key_data.len() < 16 || key_data.len() % 8 != 0 {
            return Err(Error::Crypto(format!(
                "AES-KW key data must be a multiple of 8 bytes and at least 16, got {}",
                key_data.len()
            )));
        }
        let mut out = vec![0u8; key_data.len() + 8];
        with_aes_kek!(kek_bytes, kek => kek
            .wrap(key_data, &mut out)
            .map_err(|e| Error::Crypto(format!("AES-KW wrap: {e}")))?);
        Ok(out)
    }

    fn unwrap(&self, kek_bytes: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
        check_kek(kek_bytes, self.kek_size)?;
        if wrapped.len() < 24 || wrapped.len() % 8 != 0 {
            return Err(Error::Crypto("AES-KW wrapped key has an invalid length".into()));
        }
        let mut out = vec![0u8; wrapped.len() - 8];
        with_aes_kek!(kek_bytes, kek => kek
            .unwrap(wrapped, &mut out)
            .map_err(|e| Error::Crypto(format!("AES-KW unwrap: {e}")))?);
        Ok(out)
    }
}

// ── Triple-DES key wrap ──────────────────────────────────────────────

struct TripleDesKeyWrap;

const TDES_KEK_LEN: usize = 24;

/// Fixed IV of the second encryption pass (RFC 3217 section 3.2).
const TDES_KW_IV: [u8; 8] = [0x4a, 0xdd, 0xa2, 0x2c, 0x79, 0xe8, 0x21, 0x05];

/// CMS key checksum: the first 8 bytes of SHA-1 over the key.
fn cms_checksum(key_data: &[u8]) -> [u8; 8] {
    use sha1::Digest;
    let hash = sha1::Sha1::digest(key_data);
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

impl KeyWrapAlgorithm for TripleDesKeyWrap {
    fn uri(&self) -> &str {
        algorithm::KW_TRIPLEDES
    }

    fn kek_size(&self) -> usize {
        TDES_KEK_LEN
    }

    fn wrap(&self, kek: &[u8], key_data: &[u8]) -> Result<Vec<u8>> {
        use rand::RngCore;

        check_kek(kek, TDES_KEK_LEN)?;
        let mut wkcks = key_data.to_vec();
        wkcks.extend_from_slice(&cms_checksum(key_data));

        let mut iv = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut temp = iv.to_vec();
        temp.extend_from_slice(&tdes_cbc(kek, &iv, &wkcks, true)?);
        temp.reverse();
        tdes_cbc(kek, &TDES_KW_IV, &temp, true)
    }

    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
        check_kek(kek, TDES_KEK_LEN)?;
        if wrapped.len() < 24 {
            return Err(Error::Crypto("3DES-KW wrapped key is too short".into()));
        }

        let mut temp = tdes_cbc(kek, &TDES_KW_IV, wrapped, false)?;
        temp.reverse();
        let (iv, encrypted) = temp.split_at(8);
        let mut iv_block = [0u8; 8];
        iv_block.copy_from_slice(iv);

        let wkcks = tdes_cbc(kek, &iv_block, encrypted, false)?;
        let (key_data, checksum) = wkcks.split_at(wkcks.len() - 8);
        if checksum != cms_checksum(key_data) {
            return Err(Error::Crypto("3DES-KW key checksum mismatch".into()));
        }
        Ok(key_data.to_vec())
    }
}

/// Unpadded 3DES-CBC over block-aligned data.
fn tdes_cbc(key: &[u8], iv: &[u8; 8], data: &[u8], encrypt: bool) -> Result<Vec<u8>> {
    if data.len() % 8 != 0 {
        return Err(Error::Crypto("3DES-KW data is not block aligned".into()));
    }
    let mut buf = data.to_vec();
    if encrypt {
        cbc::Encryptor::<des::TdesEde3>::new_from_slices(key, iv)
            .map_err(|e| Error::Crypto(format!("3DES init: {e}")))?
            .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
            .map_err(|e| Error::Crypto(format!("3DES encrypt: {e}")))?;
    } else {
        cbc::Decryptor::<des::TdesEde3>::new_from_slices(key, iv)
            .map_err(|e| Error::Crypto(format!("3DES init: {e}")))?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|e| Error::Crypto(format!("3DES decrypt: {e}")))?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw_for(kek: &[u8]) -> Box<dyn KeyWrapAlgorithm> {
        from_uri(match kek.len() {
            16 => algorithm::KW_AES128,
            24 => algorithm::KW_AES192,
            _ => algorithm::KW_AES256,
        })
        .unwrap()
    }

    /// RFC 3394 section 4 vectors: (KEK, key data, wrapped).
    const RFC3394: &[(&str, &str, &str)] = &[
        (
            "000102030405060708090A0B0C0D0E0F",
            "00112233445566778899AABBCCDDEEFF",
            "1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5",
        ),
        (
            "000102030405060708090A0B0C0D0E0F1011121314151617",
            "00112233445566778899AABBCCDDEEFF",
            "96778B25AE6CA435F92B5B97C050AED2468AB8A17AD84E5D",
        ),
        (
            "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F",
            "00112233445566778899AABBCCDDEEFF0001020304050607",
            "A8F9BC1612C68B3FF6E6F4FBE30E71E4769C8B80A32CB8958CD5D17D6B254DA1",
        ),
        (
            "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F",
            "00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F",
            "28C9F404C4B810F4CBCCB35CFB87F8263F5786E2D80ED326CBC7F0E71A99F43BFB988B9B7A02DD21",
        ),
    ];

    #[test]
    fn aes_kw_known_answers() {
        for (kek, pt, ct) in RFC3394 {
            let (kek, pt, ct) = (
                hex::decode(kek).unwrap(),
                hex::decode(pt).unwrap(),
                hex::decode(ct).unwrap(),
            );
            let kw = kw_for(&kek);
            assert_eq!(kw.wrap(&kek, &pt).unwrap(), ct);
            assert_eq!(kw.unwrap(&kek, &ct).unwrap(), pt);
        }
    }

    #[test]
    fn aes_kw_detects_corruption() {
        let kek = [7u8; 16];
        let kw = from_uri(algorithm::KW_AES128).unwrap();
        let mut wrapped = kw.wrap(&kek, &[9u8; 32]).unwrap();
        wrapped[3] ^= 0x01;
        assert!(kw.unwrap(&kek, &wrapped).is_err());
    }

    #[test]
    fn aes_kw_rejects_wrong_kek_size() {
        let kw = from_uri(algorithm::KW_AES256).unwrap();
        assert!(matches!(kw.wrap(&[0u8; 16], &[0u8; 16]), Err(Error::Key(_))));
    }

    #[test]
    fn tdes_key_wrap_roundtrip() {
        let kek: Vec<u8> = (1..=24).collect();
        let key_data: Vec<u8> = (0xa1..=0xb8).collect();
        let kw = from_uri(algorithm::KW_TRIPLEDES).unwrap();
        let wrapped = kw.wrap(&kek, &key_data).unwrap();
        assert_eq!(wrapped.len(), key_data.len() + 16);
        assert_eq!(kw.unwrap(&kek, &wrapped).unwrap(), key_data);

        let mut tampered = wrapped.clone();
        tampered[0] ^= 0x80;
        assert!(kw.unwrap(&kek, &tampered).is_err());
    }
}
