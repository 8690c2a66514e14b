#![forbid(unsafe_code)]

//! Cryptographic engines for the wsdsig engine.
//!
//! Every engine is looked up by algorithm URI through an
//! [`AlgorithmRegistry`], which also carries the FIPS policy flag and any
//! custom [`AlgorithmProvider`]s.

pub mod cipher;
pub mod digest;
pub mod key;
pub mod keywrap;
pub mod psha1;
pub mod registry;
pub mod sign;

pub use cipher::CipherAlgorithm;
pub use digest::{constant_time_eq, HashEngine, HashWriter};
pub use key::SecurityKey;
pub use keywrap::KeyWrapAlgorithm;
pub use psha1::{compute_combined_key, psha1};
pub use registry::{AlgorithmProvider, AlgorithmRegistry};
pub use sign::{HashName, SignatureFormatter};
