#![forbid(unsafe_code)]

//! Recording and replay of forward-only XML reads.

use std::collections::VecDeque;
use std::ops::Range;

use wsdsig_core::{ns, Error, Result};

use crate::content::skip_misc;
use crate::event::{Attribute, StartElement, XmlEvent};
use crate::namespace::NamespaceScopes;
use crate::reader::XmlRead;
use crate::sink::XmlSink;
use crate::token::{ContentKind, TokenEntry};

/// Selects the element subtrees dropped when a [`TokenStream`] is replayed.
/// Depth 0 is the outermost recorded element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExclusionRule {
    #[default]
    None,
    AnyDepth {
        local_name: String,
        namespace_uri: String,
    },
    AtDepth {
        local_name: String,
        namespace_uri: String,
        depth: usize,
    },
}

impl ExclusionRule {
    pub fn matches(&self, local_name: &str, namespace_uri: &str, depth: usize) -> bool {
        match self {
            ExclusionRule::None => false,
            ExclusionRule::AnyDepth {
                local_name: l,
                namespace_uri: n,
            } => l == local_name && n == namespace_uri,
            ExclusionRule::AtDepth {
                local_name: l,
                namespace_uri: n,
                depth: d,
            } => *d == depth && l == local_name && n == namespace_uri,
        }
    }
}

/// A flat, replayable recording of XML tokens.
///
/// A stream is appended to while recording and becomes immutable once
/// [`finish`](Self::finish)ed. Alongside the tokens it keeps the namespace
/// bindings that were in scope at the recorded element, so a replay can
/// reproduce the prefix context the element was read in.
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    entries: Vec<TokenEntry>,
    context: Vec<(String, String)>,
    exclusion: ExclusionRule,
    open: Vec<usize>,
    done: bool,
}

impl TokenStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a recording whose root was read under `context` bindings.
    pub fn with_context(context: Vec<(String, String)>) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    /// Records exactly one element subtree from `reader`.
    pub fn record(reader: &mut dyn XmlRead) -> Result<TokenStream> {
        skip_misc(reader)?;
        let mut stream = TokenStream::with_context(reader.namespaces_in_scope());
        match reader.next_event()? {
            XmlEvent::Start(start) => start.write_to(&mut stream)?,
            other => {
                return Err(Error::MissingElement(format!(
                    "expected an element to record, found {}",
                    other.describe()
                )))
            }
        }
        let mut depth = 1usize;
        while depth > 0 {
            let event = reader.next_event()?;
            match &event {
                XmlEvent::Start(_) => depth += 1,
                XmlEvent::End => depth -= 1,
                XmlEvent::Eof => {
                    return Err(Error::XmlStructure("input ended inside a recorded element".into()))
                }
                _ => {}
            }
            event.write_to(&mut stream)?;
        }
        stream.finish()?;
        Ok(stream)
    }

    /// Records every remaining event of `reader` up to end of input.
    /// Whitespace outside the document element is dropped.
    pub fn record_document(reader: &mut dyn XmlRead) -> Result<TokenStream> {
        let mut stream = TokenStream::new();
        loop {
            let event = reader.next_event()?;
            match &event {
                XmlEvent::Eof => break,
                XmlEvent::Whitespace(_) if stream.open.is_empty() => continue,
                _ => event.write_to(&mut stream)?,
            }
        }
        stream.finish()?;
        Ok(stream)
    }

    pub(crate) fn from_parts(
        entries: Vec<TokenEntry>,
        context: Vec<(String, String)>,
    ) -> Result<TokenStream> {
        let mut stream = TokenStream::with_context(context);
        for entry in entries {
            stream.push_entry(entry)?;
        }
        stream.finish()?;
        Ok(stream)
    }

    // ── Recording ────────────────────────────────────────────────────

    pub fn add(&mut self, kind: ContentKind, value: &str) -> Result<()> {
        self.push_entry(TokenEntry::Content {
            kind,
            value: value.to_string(),
        })
    }

    pub fn add_element(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace_uri: &str,
        is_empty: bool,
    ) -> Result<()> {
        self.push_entry(TokenEntry::StartElement {
            prefix: prefix.to_string(),
            local_name: local_name.to_string(),
            namespace_uri: namespace_uri.to_string(),
            is_empty,
        })
    }

    pub fn add_attribute(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace_uri: &str,
        value: &str,
    ) -> Result<()> {
        self.push_entry(TokenEntry::Attribute {
            prefix: prefix.to_string(),
            local_name: local_name.to_string(),
            namespace_uri: namespace_uri.to_string(),
            value: value.to_string(),
        })
    }

    pub fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.push_entry(TokenEntry::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        })
    }

    pub fn add_end_element(&mut self) -> Result<()> {
        self.push_entry(TokenEntry::EndElement)
    }

    fn push_entry(&mut self, entry: TokenEntry) -> Result<()> {
        if self.done {
            return Err(Error::InvalidState(
                "token stream is finished and can no longer be written".into(),
            ));
        }
        match &entry {
            TokenEntry::StartElement { is_empty, .. } => {
                if !*is_empty {
                    self.open.push(self.entries.len());
                }
            }
            TokenEntry::Attribute { .. } => {
                let follows_start = matches!(
                    self.entries.last(),
                    Some(TokenEntry::StartElement { .. } | TokenEntry::Attribute { .. })
                );
                if !follows_start {
                    return Err(Error::XmlStructure(
                        "attribute recorded outside a start tag".into(),
                    ));
                }
            }
            TokenEntry::EndElement => {
                if self.open.pop().is_none() {
                    return Err(Error::XmlStructure(
                        "end element without matching start element".into(),
                    ));
                }
            }
            TokenEntry::Content { .. } | TokenEntry::ProcessingInstruction { .. } => {}
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Marks the recording complete. Fails if an element is still open.
    pub fn finish(&mut self) -> Result<()> {
        if !self.open.is_empty() {
            return Err(Error::XmlStructure(format!(
                "token stream has {} unclosed element(s)",
                self.open.len()
            )));
        }
        self.done = true;
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn entries(&self) -> &[TokenEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Namespace bindings in scope where the recording started.
    pub fn context(&self) -> &[(String, String)] {
        &self.context
    }

    pub fn set_element_exclusion(&mut self, rule: ExclusionRule) {
        self.exclusion = rule;
    }

    pub fn exclusion(&self) -> &ExclusionRule {
        &self.exclusion
    }

    pub fn cursor(&self) -> TokenCursor<'_> {
        TokenCursor {
            entries: &self.entries,
            position: 0,
        }
    }

    /// A finished copy sized exactly to its contents.
    pub fn trim(&self) -> TokenStream {
        let mut entries = Vec::with_capacity(self.entries.len());
        entries.extend(self.entries.iter().cloned());
        TokenStream {
            entries,
            context: self.context.clone(),
            exclusion: self.exclusion.clone(),
            open: Vec::new(),
            done: true,
        }
    }

    /// Index range of the element whose start tag is at `start`.
    pub fn element_range(&self, start: usize) -> Result<Range<usize>> {
        match self.entries.get(start) {
            Some(TokenEntry::StartElement { is_empty: true, .. }) => {
                let mut end = start + 1;
                while self.entries.get(end).is_some_and(TokenEntry::is_attribute) {
                    end += 1;
                }
                return Ok(start..end);
            }
            Some(TokenEntry::StartElement { .. }) => {}
            _ => {
                return Err(Error::InvalidState(format!(
                    "token {start} is not a start element"
                )))
            }
        }
        let mut depth = 0usize;
        for (index, entry) in self.entries.iter().enumerate().skip(start) {
            match entry {
                TokenEntry::StartElement {
                    is_empty: false, ..
                } => depth += 1,
                TokenEntry::EndElement => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(start..index + 1);
                    }
                }
                _ => {}
            }
        }
        Err(Error::XmlStructure(format!(
            "element at token {start} is not closed"
        )))
    }

    /// Namespace bindings in effect for the element whose start tag is at
    /// `index`, not counting its own declarations.
    pub fn namespaces_in_scope_at(&self, index: usize) -> Vec<(String, String)> {
        let mut scopes = NamespaceScopes::with_bindings(&self.context);
        let mut i = 0;
        while i < index && i < self.entries.len() {
            match &self.entries[i] {
                TokenEntry::StartElement { is_empty, .. } => {
                    let mut declarations = Vec::new();
                    i += 1;
                    while let Some(entry) = self.entries.get(i).filter(|e| e.is_attribute()) {
                        if let Some((p, u)) = entry.as_namespace_declaration() {
                            declarations.push((p.to_string(), u.to_string()));
                        }
                        i += 1;
                    }
                    if !*is_empty {
                        scopes.push(declarations);
                    }
                    continue;
                }
                TokenEntry::EndElement => scopes.pop(),
                _ => {}
            }
            i += 1;
        }
        scopes.in_scope()
    }

    /// Copies the element starting at token `index` into its own finished
    /// stream, capturing the bindings in scope there as its context.
    pub fn subtree(&self, index: usize) -> Result<TokenStream> {
        let range = self.element_range(index)?;
        TokenStream::from_parts(
            self.entries[range].to_vec(),
            self.namespaces_in_scope_at(index),
        )
    }

    /// Indexes of every start element, in document order.
    pub fn element_starts(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, TokenEntry::StartElement { .. }))
            .map(|(i, _)| i)
    }

    // ── Replay ───────────────────────────────────────────────────────

    /// Replays the recording into `sink`, dropping the subtree selected by
    /// the exclusion rule.
    pub fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::InvalidState("cannot replay an empty token stream".into()));
        }

        let mut cursor = self.cursor();
        let mut depth = 0usize;
        let mut skipping: Option<usize> = None;
        let mut more = cursor.move_to_first();
        while more {
            match cursor.entry() {
                Some(TokenEntry::StartElement {
                    prefix,
                    local_name,
                    namespace_uri,
                    is_empty,
                }) => {
                    if skipping.is_none() && self.exclusion.matches(local_name, namespace_uri, depth)
                    {
                        skipping = Some(depth);
                    }
                    let emit = skipping.is_none();
                    if emit {
                        sink.start_element(prefix, local_name, namespace_uri)?;
                    }
                    let mut has_attr = cursor.move_to_first_attribute();
                    while has_attr {
                        if emit {
                            write_attribute_entry(cursor.entry(), sink)?;
                        }
                        has_attr = cursor.move_to_next_attribute();
                    }
                    if *is_empty {
                        if emit {
                            sink.end_element()?;
                        }
                        if skipping == Some(depth) {
                            skipping = None;
                        }
                    } else {
                        depth += 1;
                    }
                }
                Some(TokenEntry::EndElement) => {
                    depth = depth.saturating_sub(1);
                    match skipping {
                        None => sink.end_element()?,
                        Some(d) if d == depth => skipping = None,
                        Some(_) => {}
                    }
                }
                Some(TokenEntry::Content { kind, value }) if skipping.is_none() => match kind {
                    ContentKind::Text => sink.text(value)?,
                    ContentKind::CData => sink.cdata(value)?,
                    ContentKind::Comment => sink.comment(value)?,
                    ContentKind::Whitespace => sink.whitespace(value)?,
                },
                Some(TokenEntry::ProcessingInstruction { target, data }) if skipping.is_none() => {
                    sink.processing_instruction(target, data)?
                }
                Some(TokenEntry::Attribute { .. }) => {
                    return Err(Error::XmlStructure(
                        "attribute token outside a start tag".into(),
                    ))
                }
                _ => {}
            }
            more = cursor.move_to_next();
        }
        Ok(())
    }

    /// A pull reader over this recording, honoring the exclusion rule.
    pub fn reader(&self) -> Result<TokenReader> {
        let mut buffered = BufferedEvents::default();
        self.write_to(&mut buffered)?;
        Ok(TokenReader {
            events: buffered.events,
            scopes: NamespaceScopes::with_bindings(&self.context),
            open: 0,
        })
    }
}

fn write_attribute_entry(entry: Option<&TokenEntry>, sink: &mut dyn XmlSink) -> Result<()> {
    match entry {
        Some(attr) => {
            if let Some((prefix, uri)) = attr.as_namespace_declaration() {
                return sink.namespace_declaration(prefix, uri);
            }
            if let TokenEntry::Attribute {
                prefix,
                local_name,
                namespace_uri,
                value,
            } = attr
            {
                sink.attribute(prefix, local_name, namespace_uri, value)?;
            }
            Ok(())
        }
        None => Ok(()),
    }
}

impl XmlSink for TokenStream {
    fn start_element(&mut self, prefix: &str, local_name: &str, namespace_uri: &str) -> Result<()> {
        self.add_element(prefix, local_name, namespace_uri, false)
    }

    fn namespace_declaration(&mut self, prefix: &str, namespace_uri: &str) -> Result<()> {
        self.push_entry(TokenEntry::namespace_declaration(prefix, namespace_uri))
    }

    fn attribute(
        &mut self,
        prefix: &str,
        local_name: &str,
        namespace_uri: &str,
        value: &str,
    ) -> Result<()> {
        self.add_attribute(prefix, local_name, namespace_uri, value)
    }

    /// An element closed with no content is recorded as empty.
    fn end_element(&mut self) -> Result<()> {
        if let Some(&start) = self.open.last() {
            if self.entries[start + 1..].iter().all(TokenEntry::is_attribute) {
                if let TokenEntry::StartElement { is_empty, .. } = &mut self.entries[start] {
                    *is_empty = true;
                }
                self.open.pop();
                return Ok(());
            }
        }
        self.add_end_element()
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.add(ContentKind::Text, text)
    }

    fn whitespace(&mut self, text: &str) -> Result<()> {
        self.add(ContentKind::Whitespace, text)
    }

    fn cdata(&mut self, text: &str) -> Result<()> {
        self.add(ContentKind::CData, text)
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.add(ContentKind::Comment, text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.add_processing_instruction(target, data)
    }
}

/// Position-index cursor over recorded entries.
pub struct TokenCursor<'a> {
    entries: &'a [TokenEntry],
    position: usize,
}

impl<'a> TokenCursor<'a> {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn entry(&self) -> Option<&'a TokenEntry> {
        self.entries.get(self.position)
    }

    pub fn move_to_first(&mut self) -> bool {
        self.position = 0;
        !self.entries.is_empty()
    }

    pub fn move_to_next(&mut self) -> bool {
        if self.position + 1 < self.entries.len() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    pub fn move_to_first_attribute(&mut self) -> bool {
        self.move_to_next_attribute()
    }

    pub fn move_to_next_attribute(&mut self) -> bool {
        match self.entries.get(self.position + 1) {
            Some(entry) if entry.is_attribute() => {
                self.position += 1;
                true
            }
            _ => false,
        }
    }
}

static END_OF_INPUT: XmlEvent = XmlEvent::Eof;

/// Replays a [`TokenStream`] as pull events.
pub struct TokenReader {
    events: VecDeque<XmlEvent>,
    scopes: NamespaceScopes,
    open: usize,
}

impl XmlRead for TokenReader {
    fn peek(&mut self) -> Result<&XmlEvent> {
        Ok(self.events.front().unwrap_or(&END_OF_INPUT))
    }

    fn next_event(&mut self) -> Result<XmlEvent> {
        let event = self.events.pop_front().unwrap_or(XmlEvent::Eof);
        match &event {
            XmlEvent::Start(start) => {
                self.scopes.push(start.namespace_declarations.clone());
                self.open += 1;
            }
            XmlEvent::End => {
                self.scopes.pop();
                self.open = self.open.saturating_sub(1);
            }
            _ => {}
        }
        Ok(event)
    }

    fn namespaces_in_scope(&self) -> Vec<(String, String)> {
        self.scopes.in_scope()
    }
}

/// Collects sink calls back into pull events.
#[derive(Default)]
struct BufferedEvents {
    events: VecDeque<XmlEvent>,
    pending: Option<StartElement>,
}

impl BufferedEvents {
    fn flush(&mut self) {
        if let Some(start) = self.pending.take() {
            self.events.push_back(XmlEvent::Start(start));
        }
    }

    fn pending_mut(&mut self) -> Result<&mut StartElement> {
        self.pending
            .as_mut()
            .ok_or_else(|| Error::XmlStructure("attribute written outside a start tag".into()))
    }
}

impl XmlSink for BufferedEvents {
    fn start_element(&mut self, prefix: &str, local_name: &str, namespace_uri: &str) -> Result<()> {
        self.flush();
        self.pending = Some(StartElement {
            prefix: prefix.to_string(),
            local_name: local_name.to_string(),
            namespace_uri: namespace_uri.to_string(),
            namespace_declarations: Vec::new(),
            attributes: Vec::new(),
            is_empty: false,
        });
        Ok(())
    }

    fn namespace_declaration(&mut self, prefix: &str, namespace_uri: &str) -> Result<()> {
        self.pending_mut()?
            .namespace_declarations
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
        self.pending_mut()?.attributes.push(Attribute {
            prefix: prefix.to_string(),
            local_name: local_name.to_string(),
            namespace_uri: namespace_uri.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn end_element(&mut self) -> Result<()> {
        if let Some(mut start) = self.pending.take() {
            start.is_empty = true;
            self.events.push_back(XmlEvent::Start(start));
        }
        self.events.push_back(XmlEvent::End);
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.flush();
        self.events.push_back(XmlEvent::Text(text.to_string()));
        Ok(())
    }

    fn whitespace(&mut self, text: &str) -> Result<()> {
        self.flush();
        self.events.push_back(XmlEvent::Whitespace(text.to_string()));
        Ok(())
    }

    fn cdata(&mut self, text: &str) -> Result<()> {
        self.flush();
        self.events.push_back(XmlEvent::CData(text.to_string()));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.flush();
        self.events.push_back(XmlEvent::Comment(text.to_string()));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.flush();
        self.events.push_back(XmlEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }
}

/// Returns `true` if `entry` is the start tag of `local_name` in `namespace_uri`.
pub fn is_start_of(entry: &TokenEntry, local_name: &str, namespace_uri: &str) -> bool {
    matches!(
        entry,
        TokenEntry::StartElement { local_name: l, namespace_uri: n, .. }
            if l == local_name && n == namespace_uri
    )
}

/// Looks up an attribute on the start tag at `index`. `None` when `index`
/// is not a start tag.
pub fn attribute_at<'a>(
    stream: &'a TokenStream,
    index: usize,
    local_name: &str,
    namespace_uri: &str,
) -> Option<&'a str> {
    if !matches!(stream.entries().get(index), Some(TokenEntry::StartElement { .. })) {
        return None;
    }
    stream.entries()[index + 1..]
        .iter()
        .take_while(|e| e.is_attribute())
        .find_map(|e| match e {
            TokenEntry::Attribute {
                local_name: l,
                namespace_uri: n,
                value,
                ..
            } if l == local_name && n == namespace_uri && n != ns::XMLNS => Some(value.as_str()),
            _ => None,
        })
}
