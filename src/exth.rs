use crate::container::{read_u16, read_u32};
use log::warn;
use std::fmt;

/// EXTH record types this tool reads
pub mod tag {
    pub const AUTHOR: u32 = 100;
    pub const ISBN: u32 = 104;
    pub const ASIN: u32 = 113;
    pub const COVER_OFFSET: u32 = 201;
    pub const DOCUMENT_TYPE: u32 = 501;
    pub const CONTENT_KEY: u32 = 504;
    pub const UPDATED_TITLE: u32 = 503;
}

const EXTH_MAGIC: &[u8; 4] = b"EXTH";
const EXTH_PREAMBLE_LEN: usize = 12;
const ENTRY_PREFIX_LEN: usize = 8;

/// The closed set of fields the extractor knows how to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    Asin,
    Isbn,
    Author,
    Title,
    DocumentType,
    /// Absolute record index of the embedded cover image
    CoverRecordIndex,
    /// Uncompressed length of the book text in bytes
    ContentLength,
    /// Page count declared by a `PAGE` resource record
    PageCount,
}

impl MetadataField {
    pub const ALL: [MetadataField; 8] = [
        MetadataField::Asin,
        MetadataField::Isbn,
        MetadataField::Author,
        MetadataField::Title,
        MetadataField::DocumentType,
        MetadataField::CoverRecordIndex,
        MetadataField::ContentLength,
        MetadataField::PageCount,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(u32),
}

#[cfg(test)]
impl<'a> FieldValue<'a> {
    pub fn as_text(self) -> Option<&'a str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(_) => None,
        }
    }

    pub fn as_number(self) -> Option<u32> {
        match self {
            FieldValue::Number(n) => Some(n),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Metadata resolved once per container. Absent fields are `None`, never "".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFieldSet {
    pub asin: Option<String>,
    pub isbn: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub document_type: Option<String>,
    pub cover_record_index: Option<usize>,
    pub content_length: Option<u32>,
    pub page_count: Option<u32>,
}

impl MetadataFieldSet {
    pub fn get(&self, field: MetadataField) -> Option<FieldValue<'_>> {
        match field {
            MetadataField::Asin => self.asin.as_deref().map(FieldValue::Text),
            MetadataField::Isbn => self.isbn.as_deref().map(FieldValue::Text),
            MetadataField::Author => self.author.as_deref().map(FieldValue::Text),
            MetadataField::Title => self.title.as_deref().map(FieldValue::Text),
            MetadataField::DocumentType => self.document_type.as_deref().map(FieldValue::Text),
            MetadataField::CoverRecordIndex => self
                .cover_record_index
                .and_then(|i| u32::try_from(i).ok())
                .map(FieldValue::Number),
            MetadataField::ContentLength => self.content_length.map(FieldValue::Number),
            MetadataField::PageCount => self.page_count.map(FieldValue::Number),
        }
    }
}

/// One raw EXTH entry, borrowing its payload from record 0
#[derive(Debug, Clone, Copy)]
pub struct ExthEntry<'a> {
    pub kind: u32,
    pub data: &'a [u8],
}

/// Raw EXTH entries in file order
#[derive(Debug, Default)]
pub struct ExthRecords<'a> {
    entries: Vec<ExthEntry<'a>>,
}

impl<'a> ExthRecords<'a> {
    /// Parse the EXTH block starting at `start` within record 0.
    ///
    /// A missing magic yields an empty list. A truncated entry ends the
    /// scan; whatever was read before it is kept.
    pub fn parse(record0: &'a [u8], start: usize) -> Self {
        let mut entries = Vec::new();

        let magic_ok = record0
            .get(start..start + EXTH_MAGIC.len())
            .is_some_and(|m| m == EXTH_MAGIC);
        if !magic_ok {
            warn!("EXTH flag set but no EXTH block at offset {}", start);
            return Self { entries };
        }

        let Some(count) = read_u32(record0, start + 8) else {
            warn!("EXTH block truncated before record count");
            return Self { entries };
        };

        let mut pos = start + EXTH_PREAMBLE_LEN;
        for i in 0..count {
            let (Some(kind), Some(len)) = (read_u32(record0, pos), read_u32(record0, pos + 4))
            else {
                warn!("EXTH entry {} of {} truncated, stopping", i, count);
                break;
            };
            let len = len as usize;
            let payload_start = pos + ENTRY_PREFIX_LEN;
            let Some(data) = len
                .checked_sub(ENTRY_PREFIX_LEN)
                .and_then(|payload| record0.get(payload_start..payload_start + payload))
            else {
                warn!("EXTH entry {} (type {}) has bad length {}, stopping", i, kind, len);
                break;
            };
            entries.push(ExthEntry { kind, data });
            pos += len;
        }

        Self { entries }
    }

    pub fn values(&self, kind: u32) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| e.data)
    }

    pub fn first(&self, kind: u32) -> Option<&'a [u8]> {
        self.values(kind).next()
    }

    pub fn first_u32(&self, kind: u32) -> Option<u32> {
        self.first(kind).and_then(|data| read_u32(data, 0))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Page count from a KF8 `PAGE` resource record.
///
/// Layout: tag, 12 header bytes, revision string length at 0x10, the
/// revision string, then four u16 values of which the third is the
/// number of page entries.
pub fn page_record_count(record: &[u8]) -> Option<u32> {
    if !record.starts_with(b"PAGE") {
        return None;
    }
    let rev_len = read_u32(record, 0x10)? as usize;
    let ptr = 0x14usize.checked_add(rev_len)?;
    let count = read_u16(record, ptr.checked_add(4)?)?;
    (count > 0).then_some(u32::from(count))
}
