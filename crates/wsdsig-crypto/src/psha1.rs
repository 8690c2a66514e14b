#![forbid(unsafe_code)]

//! P_SHA-1 key derivation (the TLS 1.0 `P_hash` construction over
//! HMAC-SHA1) and WS-Trust combined-entropy key computation.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use wsdsig_core::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

const BLOCK_LEN: usize = 20;

fn hmac(secret: &[u8], parts: &[&[u8]]) -> Result<[u8; BLOCK_LEN]> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(secret)
        .map_err(|e| Error::Key(format!("P_SHA1 secret: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; BLOCK_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Derive `length` bytes of P_SHA1(secret, seed), starting `offset` bytes
/// into the output stream.
///
/// ```text
/// A(0) = seed
/// A(i) = HMAC_SHA1(secret, A(i-1))
/// P_SHA1 = HMAC_SHA1(secret, A(1) || seed) || HMAC_SHA1(secret, A(2) || seed) || ...
/// ```
pub fn psha1(secret: &[u8], seed: &[u8], length: usize, offset: usize) -> Result<Vec<u8>> {
    let end = offset
        .checked_add(length)
        .ok_or_else(|| Error::Crypto("P_SHA1 output range overflows".into()))?;

    let mut stream = Vec::with_capacity(end + BLOCK_LEN);
    let mut a = hmac(secret, &[seed])?;
    while stream.len() < end {
        stream.extend_from_slice(&hmac(secret, &[&a, seed])?);
        a = hmac(secret, &[&a])?;
    }
    Ok(stream[offset..end].to_vec())
}

/// Compute a WS-Trust `CK/PSHA1` proof key from requestor and issuer
/// entropy. The requestor entropy is the secret and the issuer entropy
/// the seed.
pub fn compute_combined_key(
    requestor_entropy: &[u8],
    issuer_entropy: &[u8],
    key_size_bits: usize,
) -> Result<Vec<u8>> {
    if key_size_bits == 0 || key_size_bits % 8 != 0 {
        return Err(Error::Crypto(format!(
            "combined key size must be a positive multiple of 8 bits, got {key_size_bits}"
        )));
    }
    if requestor_entropy.is_empty() || issuer_entropy.is_empty() {
        return Err(Error::Key("combined key requires both entropies".into()));
    }
    psha1(requestor_entropy, issuer_entropy, key_size_bits / 8, 0)
}
