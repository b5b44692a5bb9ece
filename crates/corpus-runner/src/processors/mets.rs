//! METS article structure extraction
//!
//! Newspaper issues are described by a METS file whose logical structure map
//! lists the issue's articles:
//!
//! ```text
//! structMap TYPE=LOGICAL
//! └── div ID=DIVL3
//!     └── div TYPE=CONTENT
//!         └── div ID=… LABEL=… TYPE=…          one per article
//!             └── div TYPE=BODY_CONTENT
//!                 └── … area BETYPE=IDREF BEGIN=P12_TB00003
//! ```
//!
//! Each article yields its id, title, type, first page, the number of
//! text blocks it references and its text, read from those blocks in the
//! issue's ALTO pages (see [`super::alto`]). Articles without a body are
//! skipped. The page is taken from the first block reference
//! (`P12_TB00003` is page `12`).

use super::alto::PageTexts;
use crate::manifest::WorkItem;
use crate::pipeline::{ProcessError, UnitProcessor};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// One article of an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub id: String,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub page: Option<String>,
    pub blocks: usize,
    pub text: String,
    /// Block ids referenced by the body, in reading order
    #[serde(skip)]
    pub begins: Vec<String>,
}

/// Everything extracted from one descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueStructure {
    pub articles: Vec<Article>,
    /// Articles without a body
    pub skipped: usize,
    /// ALTO page files shipped next to the descriptor
    pub alto_pages: usize,
    /// Body block references with no matching ALTO text block
    pub missing_blocks: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetsProcessor;

impl MetsProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UnitProcessor for MetsProcessor {
    fn name(&self) -> &str {
        "mets"
    }

    async fn process(
        &self,
        item: &WorkItem,
        descriptor: &Path,
    ) -> Result<serde_json::Value, ProcessError> {
        let path = descriptor.to_path_buf();
        let structure = tokio::task::spawn_blocking(move || read_issue(&path))
            .await
            .map_err(|e| ProcessError::Task(e.to_string()))??;

        debug!(
            item = %item,
            articles = structure.articles.len(),
            skipped = structure.skipped,
            "METS parsed"
        );
        Ok(serde_json::json!({
            "article_count": structure.articles.len(),
            "skipped_articles": structure.skipped,
            "alto_pages": structure.alto_pages,
            "missing_blocks": structure.missing_blocks,
            "articles": structure.articles,
        }))
    }
}

fn read_issue(descriptor: &Path) -> Result<IssueStructure, ProcessError> {
    let reader = Reader::from_file(descriptor).map_err(xml_error)?;
    let mut structure = parse_structure(reader)?;

    let alto_dir = descriptor
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("ALTO");
    let pages = PageTexts::read_dir(&alto_dir)?;
    structure.attach_text(&pages);

    if structure.missing_blocks > 0 && pages.pages() > 0 && pages.block_count() == 0 {
        warn!(
            dir = %alto_dir.display(),
            "ALTO pages hold no text blocks in a known namespace"
        );
    }
    Ok(structure)
}

pub(super) fn xml_error(err: impl std::fmt::Display) -> ProcessError {
    ProcessError::malformed(format!("invalid XML: {err}"))
}

impl IssueStructure {
    /// Fill in each article's text from the page blocks it references
    pub fn attach_text(&mut self, pages: &PageTexts) {
        self.alto_pages = pages.pages();
        self.missing_blocks = 0;
        for article in &mut self.articles {
            let (text, missing) = pages.join(article.begins.iter().map(String::as_str));
            if !missing.is_empty() {
                debug!(article = %article.id, missing = ?missing, "Text blocks not found in ALTO pages");
            }
            self.missing_blocks += missing.len();
            article.text = text;
        }
    }
}

/// Article being assembled while its subtree is read
struct OpenArticle {
    depth: usize,
    article: Article,
    body_depth: Option<usize>,
    has_body: bool,
    begins: Vec<String>,
}

/// Depths of the enclosing elements that matter, `None` when not inside
#[derive(Default)]
struct Cursor {
    depth: usize,
    logical: Option<usize>,
    divl3: Option<usize>,
    content: Option<usize>,
    article: Option<OpenArticle>,
    found_divl3: bool,
}

/// Walk the descriptor once and collect its articles
pub fn parse_structure<R: std::io::BufRead>(mut reader: Reader<R>) -> Result<IssueStructure, ProcessError> {
    let mut structure = IssueStructure::default();
    let mut cursor = Cursor::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => {
                cursor.depth += 1;
                let depth = cursor.depth;
                cursor.open(&e, depth)?;
            }
            Event::Empty(e) => {
                let depth = cursor.depth + 1;
                cursor.open(&e, depth)?;
                cursor.close(depth, &mut structure);
            }
            Event::End(_) => {
                let depth = cursor.depth;
                cursor.close(depth, &mut structure);
                cursor.depth = cursor.depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !cursor.found_divl3 {
        return Err(ProcessError::malformed(
            "no DIVL3 division in a LOGICAL structMap",
        ));
    }
    Ok(structure)
}

impl Cursor {
    fn open(&mut self, e: &BytesStart<'_>, depth: usize) -> Result<(), ProcessError> {
        let name = e.local_name();
        let name = name.as_ref();

        if name == b"structMap" {
            // The logical map is a direct child of the root element.
            if self.logical.is_none() && depth == 2 && attr(e, "TYPE")?.as_deref() == Some("LOGICAL") {
                self.logical = Some(depth);
            }
            return Ok(());
        }

        let Some(logical) = self.logical else {
            return Ok(());
        };

        if name == b"div" {
            if self.divl3.is_none() {
                if !self.found_divl3 && depth > logical && attr(e, "ID")?.as_deref() == Some("DIVL3") {
                    self.divl3 = Some(depth);
                    self.found_divl3 = true;
                }
            } else if self.content.is_none() {
                if self.divl3.is_some_and(|d| depth == d + 1)
                    && attr(e, "TYPE")?.as_deref() == Some("CONTENT")
                {
                    self.content = Some(depth);
                }
            } else if self.article.is_none() {
                if self.content.is_some_and(|d| depth == d + 1) {
                    self.article = Some(OpenArticle {
                        depth,
                        article: Article {
                            id: attr(e, "ID")?.unwrap_or_default(),
                            title: attr(e, "LABEL")?,
                            kind: attr(e, "TYPE")?,
                            page: None,
                            blocks: 0,
                            text: String::new(),
                            begins: Vec::new(),
                        },
                        body_depth: None,
                        has_body: false,
                        begins: Vec::new(),
                    });
                }
            } else if let Some(open) = self.article.as_mut() {
                if !open.has_body && attr(e, "TYPE")?.as_deref() == Some("BODY_CONTENT") {
                    open.body_depth = Some(depth);
                    open.has_body = true;
                }
            }
        } else if name == b"area" {
            if let Some(open) = self.article.as_mut() {
                let in_body = open.body_depth.is_some_and(|d| depth > d);
                if in_body && attr(e, "BETYPE")?.as_deref() == Some("IDREF") {
                    if let Some(begin) = attr(e, "BEGIN")? {
                        open.begins.push(begin);
                    }
                }
            }
        }
        Ok(())
    }

    fn close(&mut self, depth: usize, structure: &mut IssueStructure) {
        if let Some(open) = self.article.as_mut() {
            if open.body_depth == Some(depth) {
                open.body_depth = None;
            }
        }

        if self.article.as_ref().is_some_and(|open| open.depth == depth) {
            if let Some(open) = self.article.take() {
                if open.has_body {
                    let mut article = open.article;
                    article.page = open.begins.first().and_then(|b| page_of(b));
                    article.blocks = open.begins.len();
                    article.begins = open.begins;
                    structure.articles.push(article);
                } else {
                    debug!(article = %open.article.id, "Article has no content, skipped");
                    structure.skipped += 1;
                }
            }
        } else if self.content == Some(depth) {
            self.content = None;
        } else if self.divl3 == Some(depth) {
            self.divl3 = None;
        } else if self.logical == Some(depth) {
            self.logical = None;
        }
    }
}

/// Page number of a block reference: `P12_TB00003` -> `12`
fn page_of(begin: &str) -> Option<String> {
    let head = begin.split('_').next()?;
    let page = head.strip_prefix('P').unwrap_or(head);
    (!page.is_empty()).then(|| page.to_string())
}

pub(super) fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, ProcessError> {
    match e.try_get_attribute(name).map_err(xml_error)? {
        Some(a) => Ok(Some(a.unescape_value().map_err(xml_error)?.into_owned())),
        None => Ok(None),
    }
}
