#![forbid(unsafe_code)]

//! Streaming XML plumbing for the wsdsig engine.
//!
//! A namespace-aware pull reader over `quick-xml`, the push-side [`XmlSink`]
//! trait, and [`TokenStream`], which records a forward-only read so it can be
//! replayed into any sink later, optionally with element subtrees excluded.

pub mod binary;
pub mod content;
pub mod event;
pub mod namespace;
pub mod reader;
pub mod sink;
pub mod stream;
pub mod token;
pub mod writer;

pub use event::{Attribute, StartElement, XmlEvent};
pub use namespace::NamespaceScopes;
pub use reader::{TeeReader, XmlRead, XmlReader};
pub use sink::XmlSink;
pub use stream::{ExclusionRule, TokenCursor, TokenReader, TokenStream};
pub use token::{ContentKind, TokenEntry};
pub use writer::TextWriter;
