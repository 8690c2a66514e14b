#![forbid(unsafe_code)]

/// Errors produced by the wsdsig XML-Signature engine.
///
/// Verification failures are deliberately coarse: a tampered `SignedInfo`,
/// a tampered `SignatureValue` and a wrong key all surface as
/// [`Error::SignatureVerificationFailed`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("invalid XML structure: {0}")]
    XmlStructure(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("digest verification failed")]
    DigestVerificationFailed,

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("invalid URI reference: {0}")]
    InvalidUri(String),

    #[error("empty transform chain")]
    EmptyTransformChain,

    #[error("SignedInfo has no references")]
    NoReferences,

    #[error("unable to resolve reference URI: {0}")]
    UnresolvedReference(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("length {length} exceeds remaining buffer of {remaining} bytes")]
    LengthOutOfBounds { length: usize, remaining: usize },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
