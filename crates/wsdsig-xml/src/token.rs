#![forbid(unsafe_code)]

//! Token entries recorded by a [`TokenStream`](crate::TokenStream).

use wsdsig_core::ns;

/// The kind of a character-content token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    CData,
    Comment,
    Whitespace,
}

/// One recorded XML node.
///
/// Namespace declarations are recorded as attributes in the XMLNS namespace:
/// `xmlns:p="…"` has prefix `xmlns` and local name `p`, while `xmlns="…"` has
/// an empty prefix and local name `xmlns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEntry {
    StartElement {
        prefix: String,
        local_name: String,
        namespace_uri: String,
        is_empty: bool,
    },
    Attribute {
        prefix: String,
        local_name: String,
        namespace_uri: String,
        value: String,
    },
    Content {
        kind: ContentKind,
        value: String,
    },
    ProcessingInstruction {
        target: String,
        data: String,
    },
    EndElement,
}

impl TokenEntry {
    pub fn is_attribute(&self) -> bool {
        matches!(self, TokenEntry::Attribute { .. })
    }

    /// For a namespace declaration attribute, returns the declared prefix
    /// (empty for the default namespace) and the bound URI.
    pub fn as_namespace_declaration(&self) -> Option<(&str, &str)> {
        match self {
            TokenEntry::Attribute {
                prefix,
                local_name,
                namespace_uri,
                value,
            } if namespace_uri == ns::XMLNS => {
                if prefix.is_empty() && local_name == "xmlns" {
                    Some(("", value))
                } else {
                    Some((local_name, value))
                }
            }
            _ => None,
        }
    }

    /// Builds the attribute entry that records `xmlns:prefix="uri"`.
    pub fn namespace_declaration(prefix: &str, namespace_uri: &str) -> Self {
        if prefix.is_empty() {
            TokenEntry::Attribute {
                prefix: String::new(),
                local_name: "xmlns".into(),
                namespace_uri: ns::XMLNS.into(),
                value: namespace_uri.into(),
            }
        } else {
            TokenEntry::Attribute {
                prefix: "xmlns".into(),
                local_name: prefix.into(),
                namespace_uri: ns::XMLNS.into(),
                value: namespace_uri.into(),
            }
        }
    }
}
