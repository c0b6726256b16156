use crate::exth::MetadataFieldSet;
use std::fmt;

/// Kindle content type, from the EXTH document type field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentClass {
    /// Personal document (PDOC)
    Personal,
    /// Purchased book (EBOK)
    Ebook,
    /// Book sample (EBSP)
    Sample,
}

impl DocumentClass {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "PDOC" => Some(Self::Personal),
            "EBOK" => Some(Self::Ebook),
            "EBSP" => Some(Self::Sample),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Personal => "PDOC",
            Self::Ebook => "EBOK",
            Self::Sample => "EBSP",
        }
    }

    pub fn is_personal(self) -> bool {
        self == Self::Personal
    }
}

impl fmt::Display for DocumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Container generation, which decides the page map header flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Mobi7,
    Kf8,
}

impl ContentFormat {
    pub fn label(self) -> &'static str {
        match self {
            Self::Mobi7 => "MOBI_7",
            Self::Kf8 => "MOBI_8",
        }
    }
}

/// What the extractor and generators need from a parsed book
pub trait BookSource {
    /// Metadata fields, resolved once and then cached
    fn fields(&self) -> &MetadataFieldSet;
    /// Raw bytes of the embedded cover image, if any
    fn cover_image(&self) -> Option<&[u8]>;
    /// Unique id from the MOBI header
    fn unique_id(&self) -> u32;
    fn content_format(&self) -> ContentFormat;
}
