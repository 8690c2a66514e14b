#![forbid(unsafe_code)]

//! Entity escaping for C14N output.
//!
//! Per the C14N rules:
//! - Text nodes: `&` → `&amp;`, `<` → `&lt;`, `>` → `&gt;`, `\r` → `&#xD;`
//! - Attribute values: `&`, `<`, `"` plus `\t` → `&#x9;`, `\n` → `&#xA;`, `\r` → `&#xD;`
//! - PI data: `\r` → `&#xD;`
//!
//! The writers copy unescaped runs straight through, so canonical output
//! can stream into a hash without intermediate strings.

use std::io::{self, Write};

fn write_escaped<W: Write + ?Sized>(
    out: &mut W,
    s: &str,
    replacement: impl Fn(u8) -> Option<&'static [u8]>,
) -> io::Result<()> {
    let bytes = s.as_bytes();
    let mut run_start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(rep) = replacement(b) {
            out.write_all(&bytes[run_start..i])?;
            out.write_all(rep)?;
            run_start = i + 1;
        }
    }
    out.write_all(&bytes[run_start..])
}

/// Write text node content.
pub fn write_text<W: Write + ?Sized>(out: &mut W, s: &str) -> io::Result<()> {
    write_escaped(out, s, |b| match b {
        b'&' => Some(b"&amp;".as_slice()),
        b'<' => Some(b"&lt;".as_slice()),
        b'>' => Some(b"&gt;".as_slice()),
        b'\r' => Some(b"&#xD;".as_slice()),
        _ => None,
    })
}

/// Write an attribute value.
pub fn write_attr<W: Write + ?Sized>(out: &mut W, s: &str) -> io::Result<()> {
    write_escaped(out, s, |b| match b {
        b'&' => Some(b"&amp;".as_slice()),
        b'<' => Some(b"&lt;".as_slice()),
        b'"' => Some(b"&quot;".as_slice()),
        b'\t' => Some(b"&#x9;".as_slice()),
        b'\n' => Some(b"&#xA;".as_slice()),
        b'\r' => Some(b"&#xD;".as_slice()),
        _ => None,
    })
}

/// Write processing instruction data.
pub fn write_pi<W: Write + ?Sized>(out: &mut W, s: &str) -> io::Result<()> {
    write_escaped(out, s, |b| match b {
        b'\r' => Some(b"&#xD;".as_slice()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> String {
        let mut out = Vec::new();
        write_text(&mut out, s).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn attr(s: &str) -> String {
        let mut out = Vec::new();
        write_attr(&mut out, s).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(text("hello"), "hello");
        assert_eq!(text("a&b<c>d"), "a&amp;b&lt;c&gt;d");
        assert_eq!(text("line\rend"), "line&#xD;end");
        assert_eq!(text("quote\"'"), "quote\"'");
    }

    #[test]
    fn test_escape_attr() {
        assert_eq!(attr("hello"), "hello");
        assert_eq!(attr("a&b\"c>"), "a&amp;b&quot;c>");
        assert_eq!(attr("a\tb\nc\rd"), "a&#x9;b&#xA;c&#xD;d");
    }

    #[test]
    fn test_escape_keeps_multibyte_text() {
        assert_eq!(text("grüße <€>"), "grüße &lt;€&gt;");
    }

    #[test]
    fn test_escape_pi() {
        let mut out = Vec::new();
        write_pi(&mut out, "a\rb<").unwrap();
        assert_eq!(out, b"a&#xD;b<");
    }
}
