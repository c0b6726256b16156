use crate::error::MetadataError;
use crate::reader::{BookSource, ContentFormat, DocumentClass};

/// Characters of text per estimated page. Fixed so estimates never drift between runs.
pub const CHARS_PER_PAGE: u32 = 2300;

/// Normalized description of one book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRecord {
    pub identifier: String,
    pub isbn: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub pages: u32,
    /// True when the container declares its page count, false when estimated
    pub is_real_count: bool,
    pub content_length: u32,
    pub document_type: Option<String>,
    pub format: ContentFormat,
    pub unique_id: u32,
}

impl BookRecord {
    pub fn document_class(&self) -> Option<DocumentClass> {
        self.document_type.as_deref().and_then(DocumentClass::from_code)
    }
}

pub fn extract(source: &dyn BookSource) -> Result<BookRecord, MetadataError> {
    let fields = source.fields();
    let identifier = fields
        .asin
        .clone()
        .ok_or(MetadataError::MissingIdentifier)?;
    let content_length = fields.content_length.unwrap_or_default();

    let (pages, is_real_count) = match fields.page_count {
        Some(declared) => (declared, true),
        None => (estimate_pages(content_length), false),
    };

    Ok(BookRecord {
        identifier,
        isbn: fields.isbn.clone(),
        author: fields.author.clone(),
        title: fields.title.clone(),
        pages,
        is_real_count,
        content_length,
        document_type: fields.document_type.clone(),
        format: source.content_format(),
        unique_id: source.unique_id(),
    })
}

/// `max(1, round(len / CHARS_PER_PAGE))`, rounding halves up
pub fn estimate_pages(content_length: u32) -> u32 {
    let rounded =
        (u64::from(content_length) + u64::from(CHARS_PER_PAGE / 2)) / u64::from(CHARS_PER_PAGE);
    (rounded as u32).max(1)
}
