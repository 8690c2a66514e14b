#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N) as a streaming [`XmlSink`].
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//! With comments: `http://www.w3.org/2001/10/xml-exc-c14n#WithComments`
//!
//! Only "visibly utilized" namespace declarations are output. A prefix is
//! visibly utilized by an element if:
//! 1. it is the prefix of the element's tag name, or
//! 2. it is the prefix of one of the element's attributes, or
//! 3. it appears in the InclusiveNamespaces PrefixList.
//!
//! A declaration is skipped when the nearest output ancestor already
//! rendered the same binding.

use std::collections::BTreeMap;
use std::io::Write;

use wsdsig_core::{Error, Result};
use wsdsig_xml::{NamespaceScopes, XmlSink};

use crate::escape;
use crate::render::{Attr, NsDecl};

struct PendingElement {
    prefix: String,
    local_name: String,
    namespace_uri: String,
    declarations: Vec<(String, String)>,
    attributes: Vec<Attr>,
    hidden: bool,
}

enum OpenElement {
    Rendered(String),
    Hidden,
}

/// Writes the Exclusive C14N form of whatever is written into it.
///
/// The writer accepts a whole document or a single element subtree. Start
/// tags are buffered until the first content call so that namespace
/// declarations and attributes can be sorted.
pub struct ExcC14nWriter<W: Write> {
    out: W,
    with_comments: bool,
    /// Inclusive prefixes, with "" for `#default`.
    inclusive_prefixes: Vec<String>,
    scopes: NamespaceScopes,
    rendered: Vec<BTreeMap<String, String>>,
    open: Vec<OpenElement>,
    pending: Option<PendingElement>,
    transparent_root: bool,
    element_seen: bool,
}

impl<W: Write> ExcC14nWriter<W> {
    /// `inclusive_prefixes` uses "" for the default namespace; see
    /// [`parse_prefix_list`](crate::parse_prefix_list).
    pub fn new(out: W, with_comments: bool, inclusive_prefixes: &[String]) -> Self {
        Self {
            out,
            with_comments,
            inclusive_prefixes: inclusive_prefixes.to_vec(),
            scopes: NamespaceScopes::new(),
            rendered: Vec::new(),
            open: Vec::new(),
            pending: None,
            transparent_root: false,
            element_seen: false,
        }
    }

    /// The outermost element is not rendered. Its namespace declarations stay
    /// in scope, so a wrapper can supply inclusive-prefix context.
    pub fn with_transparent_root(mut self) -> Self {
        self.transparent_root = true;
        self
    }

    /// Treats `bindings` as declared on an unrendered ancestor.
    pub fn with_context(mut self, bindings: &[(String, String)]) -> Self {
        self.scopes = NamespaceScopes::with_bindings(bindings);
        self
    }

    /// Completes the output and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.flush_pending()?;
        if !self.open.is_empty() {
            return Err(Error::Canonicalization(format!(
                "{} element(s) left open",
                self.open.len()
            )));
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn output_depth(&self) -> usize {
        self.rendered.len()
    }

    fn flush_pending(&mut self) -> Result<()> {
        let Some(element) = self.pending.take() else {
            return Ok(());
        };
        self.scopes.push(element.declarations);
        if element.hidden {
            self.open.push(OpenElement::Hidden);
            return Ok(());
        }

        let parent = self.rendered.last().cloned().unwrap_or_default();

        let mut utilized: BTreeMap<String, String> = BTreeMap::new();
        utilized.insert(element.prefix.clone(), element.namespace_uri.clone());
        for attr in &element.attributes {
            if !attr.prefix.is_empty() {
                utilized.insert(attr.prefix.clone(), attr.namespace_uri.clone());
            }
        }
        for prefix in &self.inclusive_prefixes {
            if let Some(uri) = self.scopes.lookup(prefix) {
                utilized
                    .entry(prefix.clone())
                    .or_insert_with(|| uri.to_string());
            }
        }

        let mut ns_decls = Vec::new();
        for (prefix, uri) in utilized {
            if prefix == "xml" {
                continue;
            }
            let previous = parent.get(&prefix);
            if uri.is_empty() {
                // Only the default namespace can be undeclared.
                if prefix.is_empty() && previous.is_some_and(|p| !p.is_empty()) {
                    ns_decls.push(NsDecl { prefix, uri });
                }
                continue;
            }
            if previous != Some(&uri) {
                ns_decls.push(NsDecl { prefix, uri });
            }
        }
        ns_decls.sort();

        let mut attributes = element.attributes;
        attributes.sort();

        let name = if element.prefix.is_empty() {
            element.local_name
        } else {
            format!("{}:{}", element.prefix, element.local_name)
        };

        self.out.write_all(b"<")?;
        self.out.write_all(name.as_bytes())?;
        for decl in &ns_decls {
            decl.write_to(&mut self.out)?;
        }
        for attr in &attributes {
            attr.write_to(&mut self.out)?;
        }
        self.out.write_all(b">")?;

        let mut rendered = parent;
        for decl in ns_decls {
            rendered.insert(decl.prefix, decl.uri);
        }
        self.rendered.push(rendered);
        self.open.push(OpenElement::Rendered(name));
        self.element_seen = true;
        Ok(())
    }

    /// Comments and PIs outside the document element are separated from it
    /// by a line feed.
    fn write_top_level(&mut self, node: impl FnOnce(&mut W) -> std::io::Result<()>) -> Result<()> {
        if self.output_depth() == 0 {
            if self.element_seen {
                self.out.write_all(b"\n")?;
                node(&mut self.out)?;
            } else {
                node(&mut self.out)?;
                self.out.write_all(b"\n")?;
            }
        } else {
            node(&mut self.out)?;
        }
        Ok(())
    }

    fn pending_mut(&mut self) -> Result<&mut PendingElement> {
        self.pending.as_mut().ok_or_else(|| {
            Error::Canonicalization("attribute written outside a start tag".into())
        })
    }
}

impl<W: Write> XmlSink for ExcC14nWriter<W> {
    fn start_element(&mut self, prefix: &str, local_name: &str, namespace_uri: &str) -> Result<()> {
        self.flush_pending()?;
        let hidden = self.transparent_root && self.open.is_empty() && !self.element_seen;
        self.pending = Some(PendingElement {
            prefix: prefix.to_string(),
            local_name: local_name.to_string(),
            namespace_uri: namespace_uri.to_string(),
            declarations: Vec::new(),
            attributes: Vec::new(),
            hidden,
        });
        Ok(())
    }

    fn namespace_declaration(&mut self, prefix: &str, namespace_uri: &str) -> Result<()> {
        self.pending_mut()?
            .declarations
            .push((prefix.to_string(), namespace_uri.to_string()));
        Ok(())
    }

    fn attribute(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace_uri: &str,
        value: &str,
    ) -> Result<()> {
        self.pending_mut()?.attributes.push(Attr {
            prefix: prefix.to_string(),
            local_name: local_name.to_string(),
            namespace_uri: namespace_uri.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn end_element(&mut self) -> Result<()> {
        self.flush_pending()?;
        match self.open.pop() {
            Some(OpenElement::Rendered(name)) => {
                self.out.write_all(b"</")?;
                self.out.write_all(name.as_bytes())?;
                self.out.write_all(b">")?;
                self.rendered.pop();
            }
            Some(OpenElement::Hidden) => {}
            None => {
                return Err(Error::Canonicalization(
                    "end element without open element".into(),
                ))
            }
        }
        self.scopes.pop();
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        if self.output_depth() > 0 {
            escape::write_text(&mut self.out, text)?;
        }
        Ok(())
    }

    fn cdata(&mut self, text: &str) -> Result<()> {
        self.text(text)
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        if !self.with_comments {
            return Ok(());
        }
        self.write_top_level(|out| {
            out.write_all(b"<!--")?;
            out.write_all(text.as_bytes())?;
            out.write_all(b"-->")
        })
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.flush_pending()?;
        self.write_top_level(|out| {
            out.write_all(b"<?")?;
            out.write_all(target.as_bytes())?;
            if !data.is_empty() {
                out.write_all(b" ")?;
                escape::write_pi(out, data)?;
            }
            out.write_all(b"?>")
        })
    }
}
