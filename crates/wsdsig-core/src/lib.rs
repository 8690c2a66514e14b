#![forbid(unsafe_code)]

//! Shared definitions for the wsdsig XML-Signature engine: the error type,
//! algorithm URIs and namespace constants.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, Result};
