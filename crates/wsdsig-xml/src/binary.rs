#![forbid(unsafe_code)]

//! Binary encoding of a [`TokenStream`].
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "WSTK" | version u8
//! u32 binding count | (string prefix, string uri)*
//! u32 entry count   | entry*
//! entry  = tag u8 followed by the tag's fields
//! string = u32 byte length | UTF-8 bytes
//! ```
//!
//! Every length is checked against the bytes that remain before anything
//! is allocated, so a hostile length prefix cannot trigger a huge allocation.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use wsdsig_core::{Error, Result};

use crate::stream::TokenStream;
use crate::token::{ContentKind, TokenEntry};

const MAGIC: &[u8; 4] = b"WSTK";
const VERSION: u8 = 1;

const TAG_START: u8 = 1;
const TAG_START_EMPTY: u8 = 2;
const TAG_ATTRIBUTE: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_CDATA: u8 = 5;
const TAG_COMMENT: u8 = 6;
const TAG_WHITESPACE: u8 = 7;
const TAG_PI: u8 = 8;
const TAG_END: u8 = 9;

impl TokenStream {
    /// Encodes the recorded entries and namespace context. The exclusion
    /// rule is not part of the encoding. Fails with `LengthOutOfBounds` if a
    /// string or count does not fit a u32 length prefix.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64 + self.len() * 16);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);

        write_u32(&mut out, self.context().len())?;
        for (prefix, uri) in self.context() {
            write_string(&mut out, prefix)?;
            write_string(&mut out, uri)?;
        }

        write_u32(&mut out, self.len())?;
        for entry in self.entries() {
            match entry {
                TokenEntry::StartElement {
                    prefix,
                    local_name,
                    namespace_uri,
                    is_empty,
                } => {
                    out.push(if *is_empty { TAG_START_EMPTY } else { TAG_START });
                    write_string(&mut out, prefix)?;
                    write_string(&mut out, local_name)?;
                    write_string(&mut out, namespace_uri)?;
                }
                TokenEntry::Attribute {
                    prefix,
                    local_name,
                    namespace_uri,
                    value,
                } => {
                    out.push(TAG_ATTRIBUTE);
                    write_string(&mut out, prefix)?;
                    write_string(&mut out, local_name)?;
                    write_string(&mut out, namespace_uri)?;
                    write_string(&mut out, value)?;
                }
                TokenEntry::Content { kind, value } => {
                    out.push(match kind {
                        ContentKind::Text => TAG_TEXT,
                        ContentKind::CData => TAG_CDATA,
                        ContentKind::Comment => TAG_COMMENT,
                        ContentKind::Whitespace => TAG_WHITESPACE,
                    });
                    write_string(&mut out, value)?;
                }
                TokenEntry::ProcessingInstruction { target, data } => {
                    out.push(TAG_PI);
                    write_string(&mut out, target)?;
                    write_string(&mut out, data)?;
                }
                TokenEntry::EndElement => out.push(TAG_END),
            }
        }
        Ok(out)
    }

    /// Decodes a stream produced by [`to_binary`](Self::to_binary).
    ///
    /// The result is finished; unbalanced element nesting is rejected.
    pub fn from_binary(data: &[u8]) -> Result<TokenStream> {
        let mut reader = Cursor::new(data);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::XmlParse("token buffer is too short".into()))?;
        if &magic != MAGIC {
            return Err(Error::XmlParse("token buffer has a bad magic number".into()));
        }
        let version = read_u8(&mut reader)?;
        if version != VERSION {
            return Err(Error::XmlParse(format!(
                "unsupported token buffer version {version}"
            )));
        }

        // A binding needs at least 8 bytes, an entry at least one.
        let binding_count = read_count(&mut reader, 8)?;
        let mut context = Vec::with_capacity(binding_count);
        for _ in 0..binding_count {
            let prefix = read_string(&mut reader)?;
            let uri = read_string(&mut reader)?;
            context.push((prefix, uri));
        }

        let entry_count = read_count(&mut reader, 1)?;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let tag = read_u8(&mut reader)?;
            let entry = match tag {
                TAG_START | TAG_START_EMPTY => TokenEntry::StartElement {
                    prefix: read_string(&mut reader)?,
                    local_name: read_string(&mut reader)?,
                    namespace_uri: read_string(&mut reader)?,
                    is_empty: tag == TAG_START_EMPTY,
                },
                TAG_ATTRIBUTE => TokenEntry::Attribute {
                    prefix: read_string(&mut reader)?,
                    local_name: read_string(&mut reader)?,
                    namespace_uri: read_string(&mut reader)?,
                    value: read_string(&mut reader)?,
                },
                TAG_TEXT | TAG_CDATA | TAG_COMMENT | TAG_WHITESPACE => TokenEntry::Content {
                    kind: match tag {
                        TAG_TEXT => ContentKind::Text,
                        TAG_CDATA => ContentKind::CData,
                        TAG_COMMENT => ContentKind::Comment,
                        _ => ContentKind::Whitespace,
                    },
                    value: read_string(&mut reader)?,
                },
                TAG_PI => TokenEntry::ProcessingInstruction {
                    target: read_string(&mut reader)?,
                    data: read_string(&mut reader)?,
                },
                TAG_END => TokenEntry::EndElement,
                other => {
                    return Err(Error::XmlParse(format!("unknown token tag {other}")));
                }
            };
            entries.push(entry);
        }

        if remaining(&reader) != 0 {
            return Err(Error::XmlParse(format!(
                "{} trailing bytes after token buffer",
                remaining(&reader)
            )));
        }

        TokenStream::from_parts(entries, context)
    }
}

fn write_u32(out: &mut Vec<u8>, value: usize) -> Result<()> {
    let prefix = u32::try_from(value).map_err(|_| Error::LengthOutOfBounds {
        length: value,
        remaining: u32::MAX as usize,
    })?;
    out.write_u32::<LittleEndian>(prefix)?;
    Ok(())
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    write_u32(out, value.len())?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn remaining(reader: &Cursor<&[u8]>) -> usize {
    let len = reader.get_ref().len() as u64;
    len.saturating_sub(reader.position()) as usize
}

fn read_u8(reader: &mut Cursor<&[u8]>) -> Result<u8> {
    reader.read_u8().map_err(|_| Error::LengthOutOfBounds {
        length: 1,
        remaining: 0,
    })
}

fn read_u32(reader: &mut Cursor<&[u8]>) -> Result<usize> {
    let available = remaining(reader);
    reader
        .read_u32::<LittleEndian>()
        .map(|v| v as usize)
        .map_err(|_| Error::LengthOutOfBounds {
            length: 4,
            remaining: available,
        })
}

/// Reads an item count and checks that `min_item_size * count` bytes remain.
fn read_count(reader: &mut Cursor<&[u8]>, min_item_size: usize) -> Result<usize> {
    let count = read_u32(reader)?;
    let available = remaining(reader);
    match count.checked_mul(min_item_size) {
        Some(needed) if needed <= available => Ok(count),
        _ => Err(Error::LengthOutOfBounds {
            length: count,
            remaining: available,
        }),
    }
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Result<String> {
    let length = read_u32(reader)?;
    let available = remaining(reader);
    if length > available {
        return Err(Error::LengthOutOfBounds {
            length,
            remaining: available,
        });
    }
    let mut bytes = vec![0u8; length];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| Error::XmlParse(format!("invalid UTF-8 in token: {e}")))
}
