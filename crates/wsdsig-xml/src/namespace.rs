#![forbid(unsafe_code)]

//! Namespace prefix scoping.

use std::collections::BTreeMap;

use wsdsig_core::ns;

/// A stack of namespace declaration frames, one per open element.
#[derive(Debug, Clone, Default)]
pub struct NamespaceScopes {
    frames: Vec<Vec<(String, String)>>,
}

impl NamespaceScopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope whose outermost frame holds `bindings`.
    pub fn with_bindings(bindings: &[(String, String)]) -> Self {
        Self {
            frames: vec![bindings.to_vec()],
        }
    }

    pub fn push(&mut self, declarations: Vec<(String, String)>) {
        self.frames.push(declarations);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Resolves `prefix`, with the empty prefix meaning the default namespace.
    ///
    /// The `xml` prefix is always bound. An undeclared default namespace
    /// resolves to the empty string.
    pub fn lookup(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(ns::XML);
        }
        for frame in self.frames.iter().rev() {
            if let Some((_, uri)) = frame.iter().rev().find(|(p, _)| p == prefix) {
                return Some(uri.as_str());
            }
        }
        if prefix.is_empty() {
            Some("")
        } else {
            None
        }
    }

    /// Like [`lookup`](Self::lookup), but consults `pending` declarations
    /// first, for an element whose frame has not been pushed yet.
    pub fn lookup_with<'a>(
        &'a self,
        pending: &'a [(String, String)],
        prefix: &str,
    ) -> Option<&'a str> {
        match pending.iter().rev().find(|(p, _)| p == prefix) {
            Some((_, uri)) => Some(uri.as_str()),
            None => self.lookup(prefix),
        }
    }

    /// The effective bindings, sorted by prefix. A default namespace reset to
    /// the empty string is omitted.
    pub fn in_scope(&self) -> Vec<(String, String)> {
        let mut bindings = BTreeMap::new();
        for frame in &self.frames {
            for (prefix, uri) in frame {
                bindings.insert(prefix.clone(), uri.clone());
            }
        }
        bindings
            .into_iter()
            .filter(|(prefix, uri)| !(prefix.is_empty() && uri.is_empty()))
            .collect()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(p: &str, u: &str) -> (String, String) {
        (p.to_string(), u.to_string())
    }

    #[test]
    fn inner_frames_shadow_outer() {
        let mut scopes = NamespaceScopes::new();
        scopes.push(vec![decl("a", "urn:outer"), decl("", "urn:default")]);
        scopes.push(vec![decl("a", "urn:inner")]);
        assert_eq!(scopes.lookup("a"), Some("urn:inner"));
        assert_eq!(scopes.lookup(""), Some("urn:default"));
        scopes.pop();
        assert_eq!(scopes.lookup("a"), Some("urn:outer"));
    }

    #[test]
    fn xml_prefix_is_always_bound() {
        let scopes = NamespaceScopes::new();
        assert_eq!(scopes.lookup("xml"), Some(ns::XML));
        assert_eq!(scopes.lookup("nope"), None);
        assert_eq!(scopes.lookup(""), Some(""));
    }

    #[test]
    fn in_scope_drops_reset_default() {
        let mut scopes = NamespaceScopes::new();
        scopes.push(vec![decl("", "urn:d"), decl("b", "urn:b")]);
        scopes.push(vec![decl("", "")]);
        assert_eq!(scopes.in_scope(), vec![decl("b", "urn:b")]);
    }

    #[test]
    fn pending_declarations_win() {
        let mut scopes = NamespaceScopes::new();
        scopes.push(vec![decl("p", "urn:old")]);
        let pending = vec![decl("p", "urn:new")];
        assert_eq!(scopes.lookup_with(&pending, "p"), Some("urn:new"));
    }
}
