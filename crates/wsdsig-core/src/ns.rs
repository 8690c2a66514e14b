#![forbid(unsafe_code)]

//! XML namespace constants used across the workspace.

/// XML Digital Signature namespace
pub const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Exclusive C14N namespace (for `InclusiveNamespaces`)
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// WS-Security extension namespace
pub const WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";

/// WS-Security utility namespace (`wsu:Id`)
pub const WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";

/// XML namespace
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";

/// XMLNS namespace
pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";

/// Conventional prefix for the DSig namespace.
pub const DSIG_PREFIX: &str = "ds";

/// Conventional prefix for `InclusiveNamespaces`.
pub const EXC_C14N_PREFIX: &str = "ec";

/// Conventional prefix for WS-Security elements.
pub const WSSE_PREFIX: &str = "wsse";

// ── Element names ────────────────────────────────────────────────────

pub mod node {
    pub const SIGNATURE: &str = "Signature";
    pub const SIGNED_INFO: &str = "SignedInfo";
    pub const CANONICALIZATION_METHOD: &str = "CanonicalizationMethod";
    pub const SIGNATURE_METHOD: &str = "SignatureMethod";
    pub const SIGNATURE_VALUE: &str = "SignatureValue";
    pub const DIGEST_METHOD: &str = "DigestMethod";
    pub const DIGEST_VALUE: &str = "DigestValue";
    pub const REFERENCE: &str = "Reference";
    pub const TRANSFORMS: &str = "Transforms";
    pub const TRANSFORM: &str = "Transform";
    pub const KEY_INFO: &str = "KeyInfo";
    pub const INCLUSIVE_NAMESPACES: &str = "InclusiveNamespaces";

    // WS-Security
    pub const SECURITY_TOKEN_REFERENCE: &str = "SecurityTokenReference";
    pub const TRANSFORMATION_PARAMETERS: &str = "TransformationParameters";
}

// ── Attribute names ──────────────────────────────────────────────────

pub mod attr {
    pub const ID: &str = "Id";
    pub const URI: &str = "URI";
    pub const TYPE: &str = "Type";
    pub const ALGORITHM: &str = "Algorithm";
    pub const PREFIX_LIST: &str = "PrefixList";
}

/// The prefix list keyword for the default namespace.
pub const DEFAULT_PREFIX_TOKEN: &str = "#default";
