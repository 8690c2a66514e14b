#![forbid(unsafe_code)]

//! XML Digital Signature (XML-DSig) processing for WS-Security.
//!
//! [`Reference`], [`SignedInfo`] and [`Signature`] model the `<ds:Signature>`
//! element graph; [`document`] drives them over whole documents.

pub mod context;
pub mod document;
pub mod reference;
pub mod signature;
pub mod signed_info;

pub use context::DsigContext;
pub use document::{sign_detached, sign_enveloped, verify_document};
pub use reference::Reference;
pub use signature::{Signature, SignatureState};
pub use signed_info::SignedInfo;
