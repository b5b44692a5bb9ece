//! ALTO page text
//!
//! Each page of an issue ships as an ALTO file under `ALTO/`. Its text
//! blocks are addressed by the METS `BEGIN` references:
//!
//! ```text
//! TextBlock ID=P12_TB00003
//! └── TextLine
//!     ├── String CONTENT=sharp
//!     ├── HYP                      word continues on the next line
//! └── TextLine
//!     ├── String CONTENT=ly
//!     ├── SP
//!     └── String CONTENT=today
//! ```
//!
//! A block's text is its `String` contents with a space at every `SP` and
//! at every line end, except after a `HYP`.

use super::mets::{attr, xml_error};
use crate::pipeline::ProcessError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// ALTO schema namespaces found in the corpus
pub const ALTO_NAMESPACES: &[&[u8]] = &[
    b"http://www.loc.gov/standards/alto/ns-v2#",
    b"http://www.loc.gov/standards/alto/ns-v3#",
    b"http://www.loc.gov/standards/alto/ns-v4#",
    b"http://schema.ccs-gmbh.com/ALTO",
];

/// Text of every block of an issue, by block id
#[derive(Debug, Clone, Default)]
pub struct PageTexts {
    blocks: HashMap<String, String>,
    pages: usize,
}

impl PageTexts {
    /// Read every `*.xml` file of `dir`; a missing directory has no text
    pub fn read_dir(dir: &Path) -> Result<Self, ProcessError> {
        let mut texts = Self::default();
        for path in alto_files(dir)? {
            let reader = NsReader::from_file(&path).map_err(xml_error)?;
            texts.read_page(reader).map_err(|e| match e {
                ProcessError::Malformed(msg) => {
                    ProcessError::malformed(format!("{}: {msg}", path.display()))
                }
                other => other,
            })?;
        }
        Ok(texts)
    }

    /// Add the text blocks of one page
    pub fn read_page<R: BufRead>(&mut self, mut reader: NsReader<R>) -> Result<usize, ProcessError> {
        let mut block: Option<OpenBlock> = None;
        let mut found = 0;
        let mut buf = Vec::new();

        loop {
            match reader.read_resolved_event_into(&mut buf).map_err(xml_error)? {
                (ns, Event::Start(e)) if is_alto(&ns) => {
                    if e.local_name().as_ref() == b"TextBlock" {
                        block = Some(OpenBlock {
                            id: attr(&e, "ID")?.unwrap_or_default(),
                            text: String::new(),
                            hyphenated: false,
                        });
                    } else if let Some(open) = block.as_mut() {
                        open.token(&e)?;
                    }
                }
                (ns, Event::Empty(e)) if is_alto(&ns) => {
                    if let Some(open) = block.as_mut() {
                        open.token(&e)?;
                    }
                }
                (ns, Event::End(e)) if is_alto(&ns) => match e.local_name().as_ref() {
                    b"TextLine" => {
                        if let Some(open) = block.as_mut() {
                            open.end_line();
                        }
                    }
                    b"TextBlock" => {
                        if let Some(open) = block.take() {
                            if !open.id.is_empty() {
                                self.blocks.insert(open.id, open.text.trim_end().to_string());
                                found += 1;
                            }
                        }
                    }
                    _ => {}
                },
                (_, Event::Eof) => break,
                _ => {}
            }
            buf.clear();
        }

        self.pages += 1;
        Ok(found)
    }

    pub fn block(&self, id: &str) -> Option<&str> {
        self.blocks.get(id).map(String::as_str)
    }

    /// Pages read
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Join the referenced blocks; returns the text and the ids not found
    pub fn join<'a, I>(&self, ids: I) -> (String, Vec<&'a str>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut parts = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.block(id) {
                Some(text) if !text.is_empty() => parts.push(text),
                Some(_) => {}
                None => missing.push(id),
            }
        }
        (parts.join(" "), missing)
    }
}

struct OpenBlock {
    id: String,
    text: String,
    /// The current line ended on a hyphen
    hyphenated: bool,
}

impl OpenBlock {
    fn token(&mut self, e: &BytesStart<'_>) -> Result<(), ProcessError> {
        match e.local_name().as_ref() {
            b"TextLine" => self.hyphenated = false,
            b"String" => {
                if let Some(content) = attr(e, "CONTENT")? {
                    self.text.push_str(&content);
                }
                self.hyphenated = false;
            }
            b"SP" => self.text.push(' '),
            b"HYP" => self.hyphenated = true,
            _ => {}
        }
        Ok(())
    }

    fn end_line(&mut self) {
        if !self.hyphenated && !self.text.ends_with(' ') {
            self.text.push(' ');
        }
        self.hyphenated = false;
    }
}

fn is_alto(ns: &ResolveResult<'_>) -> bool {
    match ns {
        ResolveResult::Bound(Namespace(uri)) => ALTO_NAMESPACES.iter().any(|known| known == uri),
        _ => false,
    }
}

/// ALTO files of a page directory in name order
fn alto_files(dir: &Path) -> Result<Vec<PathBuf>, ProcessError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_xml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if is_xml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
