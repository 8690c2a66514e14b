#![forbid(unsafe_code)]

//! Algorithm URI constants.
//!
//! Each constant is the URI string that appears in `Algorithm` attributes
//! of XML-DSig, XML-Enc and WS-Security documents.

// ── Canonicalization ─────────────────────────────────────────────────

pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

// ── Digest algorithms ────────────────────────────────────────────────

pub const SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

// ── Asymmetric signature algorithms ──────────────────────────────────

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const DSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#dsa-sha1";

// ── HMAC signature algorithms ────────────────────────────────────────

pub const HMAC_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha1";
pub const HMAC_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha256";

// ── Block cipher algorithms ──────────────────────────────────────────

pub const AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const AES192_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes192-cbc";
pub const AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const TRIPLEDES_CBC: &str = "http://www.w3.org/2001/04/xmlenc#tripledes-cbc";

// ── Key wrap algorithms ──────────────────────────────────────────────

pub const KW_AES128: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes128";
pub const KW_AES192: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes192";
pub const KW_AES256: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes256";
pub const KW_TRIPLEDES: &str = "http://www.w3.org/2001/04/xmlenc#kw-tripledes";

// ── Key derivation ───────────────────────────────────────────────────

pub const PSHA1_KEY_DERIVATION: &str = "http://schemas.xmlsoap.org/ws/2005/02/sc/dk/p_sha1";
pub const PSHA1_KEY_DERIVATION_DEC2005: &str =
    "http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512/dk/p_sha1";
pub const PSHA1_COMPUTED_KEY: &str = "http://schemas.xmlsoap.org/ws/2005/02/trust/CK/PSHA1";
pub const PSHA1_COMPUTED_KEY_DEC2005: &str =
    "http://docs.oasis-open.org/ws-sx/ws-trust/200512/CK/PSHA1";

// ── Transform algorithms ─────────────────────────────────────────────

pub const STR_TRANSFORM: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#STR-Transform";

/// Returns `true` for the two Exclusive C14N URIs, the only
/// canonicalization methods a `SignedInfo` may declare.
pub fn is_exclusive_c14n(uri: &str) -> bool {
    uri == EXC_C14N || uri == EXC_C14N_WITH_COMMENTS
}
