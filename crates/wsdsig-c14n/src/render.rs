#![forbid(unsafe_code)]

//! Namespace declaration and attribute rendering for C14N start tags.

use std::cmp::Ordering;
use std::io::{self, Write};

use crate::escape;

/// A namespace declaration to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// The prefix ("" for default namespace).
    pub prefix: String,
    /// The namespace URI ("" undeclares the default namespace).
    pub uri: String,
}

impl NsDecl {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        if self.prefix.is_empty() {
            out.write_all(b" xmlns=\"")?;
        } else {
            out.write_all(b" xmlns:")?;
            out.write_all(self.prefix.as_bytes())?;
            out.write_all(b"=\"")?;
        }
        escape::write_attr(out, &self.uri)?;
        out.write_all(b"\"")
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> Ordering {
        // Default namespace (empty prefix) sorts first, then by prefix.
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub prefix: String,
    pub local_name: String,
    /// "" for no namespace.
    pub namespace_uri: String,
    pub value: String,
}

impl Attr {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(b" ")?;
        if !self.prefix.is_empty() {
            out.write_all(self.prefix.as_bytes())?;
            out.write_all(b":")?;
        }
        out.write_all(self.local_name.as_bytes())?;
        out.write_all(b"=\"")?;
        escape::write_attr(out, &self.value)?;
        out.write_all(b"\"")
    }
}

impl Ord for Attr {
    fn cmp(&self, other: &Self) -> Ordering {
        // Unqualified attributes first by local name, then qualified ones by
        // (namespace URI, local name).
        match (self.namespace_uri.is_empty(), other.namespace_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .namespace_uri
                .cmp(&other.namespace_uri)
                .then_with(|| self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(prefix: &str, local: &str, ns: &str) -> Attr {
        Attr {
            prefix: prefix.into(),
            local_name: local.into(),
            namespace_uri: ns.into(),
            value: String::new(),
        }
    }

    #[test]
    fn attributes_sort_by_namespace_then_local_name() {
        let mut attrs = vec![
            attr("z", "k", "urn:b"),
            attr("a", "k", "urn:c"),
            attr("", "b", ""),
            attr("y", "a", "urn:b"),
            attr("", "a", ""),
        ];
        attrs.sort();
        let order: Vec<_> = attrs
            .iter()
            .map(|a| format!("{}:{}", a.prefix, a.local_name))
            .collect();
        assert_eq!(order, [":a", ":b", "y:a", "z:k", "a:k"]);
    }

    #[test]
    fn default_namespace_declaration_sorts_first() {
        let mut decls = vec![
            NsDecl { prefix: "b".into(), uri: "u".into() },
            NsDecl { prefix: "".into(), uri: "u".into() },
            NsDecl { prefix: "a".into(), uri: "u".into() },
        ];
        decls.sort();
        let prefixes: Vec<_> = decls.iter().map(|d| d.prefix.as_str()).collect();
        assert_eq!(prefixes, ["", "a", "b"]);
    }

    #[test]
    fn renders_declarations_and_attributes() {
        let mut out = Vec::new();
        NsDecl { prefix: "".into(), uri: "".into() }.write_to(&mut out).unwrap();
        Attr {
            prefix: "p".into(),
            local_name: "id".into(),
            namespace_uri: "urn:p".into(),
            value: "a\"b".into(),
        }
        .write_to(&mut out)
        .unwrap();
        assert_eq!(out, b" xmlns=\"\" p:id=\"a&quot;b\"");
    }
}
