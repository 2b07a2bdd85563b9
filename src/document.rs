//! Wraps decoded entries into a single dictionary XML document.

use std::fmt;
use std::io;

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use crate::read::decode;
use crate::result::*;

/// The default namespace of entry markup
pub const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// The namespace of the `d:` prefix used by dictionary elements
pub const DICTIONARY_NAMESPACE: &str = "http://www.apple.com/DTDs/DictionaryService-1.0.rng";

/// The entries of a dictionary, in the order they appear in its Body.data
///
/// Entries are XML fragments using the `d:` prefix,
/// so they aren't well-formed documents on their own.
/// Rendering the document wraps them in a `<d:dictionary>` root element
/// declaring the namespaces they need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictionaryDocument {
    entries: Vec<String>,
}

impl DictionaryDocument {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// Decodes a Body.data file into a document. See [`decode()`].
    pub fn decode(mapping: &[u8], strict: bool) -> BodyResult<Self> {
        decode(mapping, strict).map(Self::new)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<String> {
        self.entries
    }

    /// Writes the document to `out` without building it in memory first.
    pub fn write_xml<W: io::Write>(&self, mut out: W) -> io::Result<()> {
        write!(out, "{}", Envelope::Open)?;
        for entry in &self.entries {
            out.write_all(entry.as_bytes())?;
        }
        write!(out, "{}", Envelope::Close)?;
        out.flush()
    }

    /// Writes the document to `out` with one element per line,
    /// indented two spaces per level.
    ///
    /// Whitespace around text is trimmed.
    /// Unlike [`write_xml()`](Self::write_xml), this parses the entries,
    /// so malformed markup fails with [`io::ErrorKind::InvalidData`].
    pub fn write_pretty_xml<W: io::Write>(&self, out: W) -> io::Result<()> {
        let xml = self.to_string();
        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);

        let mut writer = Writer::new_with_indent(out, b' ', 2);
        loop {
            match reader.read_event().map_err(invalid_xml)? {
                Event::Eof => break,
                event => writer.write_event(event)?,
            }
        }
        writer.into_inner().flush()
    }
}

fn invalid_xml(e: quick_xml::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl fmt::Display for DictionaryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Envelope::Open)?;
        for entry in &self.entries {
            f.write_str(entry)?;
        }
        write!(f, "{}", Envelope::Close)
    }
}

enum Envelope {
    Open,
    Close,
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Open => write!(
                f,
                "<d:dictionary xmlns=\"{}\" xmlns:d=\"{}\">",
                XHTML_NAMESPACE, DICTIONARY_NAMESPACE
            ),
            Envelope::Close => f.write_str("</d:dictionary>"),
        }
    }
}
