//! Palm database / MOBI container reader.
//!
//! The container is a flat list of offset-addressed records. Every offset is
//! checked against the file before a record can be handed out, so a
//! `Container` that exists is safe to index.

use crate::error::{FormatError, RecordIndexError};
use crate::exth::{self, tag, ExthRecords, FieldValue, MetadataField, MetadataFieldSet};
use crate::reader::{BookSource, ContentFormat};
use encoding_rs::WINDOWS_1252;
use log::{debug, warn};
use std::cell::OnceCell;
use std::ops::Range;

pub const HEADER_LEN: usize = 78;
const RECORD_ENTRY_LEN: usize = 8;
const NAME_LEN: usize = 32;
const SIGNATURE_OFFSET: usize = 60;
const RECORD_COUNT_OFFSET: usize = 76;
pub const SIGNATURE: &[u8; 8] = b"BOOKMOBI";

// Offsets inside record 0: PalmDOC header, then the MOBI header at 16
const TEXT_LENGTH: usize = 4;
const MOBI_MAGIC: usize = 16;
const MOBI_HEADER_LENGTH: usize = 20;
const TEXT_ENCODING: usize = 28;
const UNIQUE_ID: usize = 32;
const FILE_VERSION: usize = 36;
const FULL_NAME_OFFSET: usize = 84;
const FULL_NAME_LENGTH: usize = 88;
const FIRST_RESOURCE: usize = 108;
const EXTH_FLAGS: usize = 128;

const EXTH_PRESENT: u32 = 0x40;
const NO_RECORD: u32 = 0xFFFF_FFFF;
const CP1252: u32 = 1252;
const KF8_VERSION: u32 = 8;

/// Resource records that hold structure rather than images
const PLACEHOLDER_TAGS: [&[u8]; 10] = [
    b"FLIS",
    b"FCIS",
    b"FDST",
    b"DATP",
    b"SRCS",
    b"CMET",
    b"FONT",
    b"RESC",
    b"BOUNDARY",
    b"\xe9\x8e\r\n",
];

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes(bytes.try_into().ok()?))
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordEntry {
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub name: String,
    pub records: Vec<RecordEntry>,
}

impl ContainerHeader {
    fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < HEADER_LEN {
            return Err(FormatError::TruncatedHeader {
                len: data.len(),
                needed: HEADER_LEN,
            });
        }

        let signature = &data[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE.len()];
        if signature != SIGNATURE {
            return Err(FormatError::UnrecognizedSignature(
                String::from_utf8_lossy(signature).into_owned(),
            ));
        }

        let count = usize::from(read_u16(data, RECORD_COUNT_OFFSET).unwrap_or(0));
        if count == 0 {
            return Err(FormatError::NoRecords);
        }

        let directory_end = HEADER_LEN + count * RECORD_ENTRY_LEN;
        if data.len() < directory_end {
            return Err(FormatError::TruncatedHeader {
                len: data.len(),
                needed: directory_end,
            });
        }

        let mut records = Vec::with_capacity(count);
        for index in 0..count {
            let at = HEADER_LEN + index * RECORD_ENTRY_LEN;
            let offset = read_u32(data, at).unwrap_or_default();

            if (offset as usize) < directory_end {
                return Err(FormatError::RecordOverlapsHeader {
                    index,
                    offset,
                    header_end: directory_end,
                });
            }
            if let Some(previous) = records.last().map(|r: &RecordEntry| r.offset) {
                if offset <= previous {
                    return Err(FormatError::OffsetsNotIncreasing {
                        index,
                        previous,
                        offset,
                    });
                }
            }
            if offset as usize > data.len() {
                return Err(FormatError::OffsetOutOfBounds {
                    index,
                    offset,
                    len: data.len(),
                });
            }

            records.push(RecordEntry { offset });
        }

        let name_bytes = &data[..NAME_LEN];
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);

        Ok(Self {
            name: String::from_utf8_lossy(&name_bytes[..name_end]).into_owned(),
            records,
        })
    }
}

/// Fields read from the PalmDOC and MOBI headers in record 0
#[derive(Debug, Clone)]
pub struct MobiHeader {
    pub text_length: u32,
    pub text_encoding: u32,
    pub unique_id: u32,
    pub file_version: u32,
    pub first_resource: Option<usize>,
    full_name: Option<Range<usize>>,
    exth_start: Option<usize>,
}

impl MobiHeader {
    fn parse(record0: &[u8]) -> Result<Self, FormatError> {
        if record0.len() < MOBI_HEADER_LENGTH + 4 {
            return Err(FormatError::TruncatedRecordZero { len: record0.len() });
        }
        if &record0[MOBI_MAGIC..MOBI_MAGIC + 4] != b"MOBI" {
            return Err(FormatError::MissingMobiHeader);
        }

        let header_length = read_u32(record0, MOBI_HEADER_LENGTH).unwrap_or_default() as usize;
        let header_end = MOBI_MAGIC.saturating_add(header_length);
        // Only trust fields inside both the declared header and the record
        let field = |offset: usize| {
            if offset + 4 <= header_end {
                read_u32(record0, offset)
            } else {
                None
            }
        };

        let full_name = match (field(FULL_NAME_OFFSET), field(FULL_NAME_LENGTH)) {
            (Some(offset), Some(len)) if len > 0 => {
                let start = offset as usize;
                let end = start.saturating_add(len as usize);
                (end <= record0.len()).then_some(start..end)
            }
            _ => None,
        };

        let exth_start = field(EXTH_FLAGS)
            .filter(|flags| flags & EXTH_PRESENT != 0)
            .map(|_| header_end);

        Ok(Self {
            text_length: read_u32(record0, TEXT_LENGTH).unwrap_or_default(),
            text_encoding: field(TEXT_ENCODING).unwrap_or(CP1252),
            unique_id: field(UNIQUE_ID).unwrap_or_default(),
            file_version: field(FILE_VERSION).unwrap_or_default(),
            first_resource: field(FIRST_RESOURCE)
                .filter(|&index| index != NO_RECORD)
                .map(|index| index as usize),
            full_name,
            exth_start,
        })
    }
}

/// A parsed container. Records borrow from the owned file bytes.
pub struct Container {
    data: Vec<u8>,
    header: ContainerHeader,
    spans: Vec<Range<usize>>,
    mobi: MobiHeader,
    fields: OnceCell<MetadataFieldSet>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.header.name)
            .field("records", &self.spans.len())
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Container {
    /// Validate the header and record directory, then parse record 0.
    pub fn open(data: Vec<u8>) -> Result<Self, FormatError> {
        let header = ContainerHeader::parse(&data)?;

        let spans: Vec<Range<usize>> = header
            .records
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let end = header
                    .records
                    .get(i + 1)
                    .map_or(data.len(), |next| next.offset as usize);
                entry.offset as usize..end
            })
            .collect();

        let mobi = MobiHeader::parse(&data[spans[0].clone()])?;
        debug!(
            "container {:?}: {} records, text length {}, version {}",
            header.name,
            spans.len(),
            mobi.text_length,
            mobi.file_version
        );

        Ok(Self {
            data,
            header,
            spans,
            mobi,
            fields: OnceCell::new(),
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn mobi_header(&self) -> &MobiHeader {
        &self.mobi
    }

    pub fn record_count(&self) -> usize {
        self.spans.len()
    }

    pub fn read_record(&self, index: usize) -> Result<&[u8], RecordIndexError> {
        self.spans
            .get(index)
            .map(|span| &self.data[span.clone()])
            .ok_or(RecordIndexError {
                index,
                count: self.spans.len(),
            })
    }

    pub fn find_metadata_field(&self, field: MetadataField) -> Option<FieldValue<'_>> {
        self.metadata().get(field)
    }

    pub fn cover_image_record_index(&self) -> Option<usize> {
        self.metadata().cover_record_index
    }

    /// Scans the EXTH list on first use and caches the result.
    pub fn metadata(&self) -> &MetadataFieldSet {
        self.fields.get_or_init(|| self.resolve_fields())
    }

    fn record0(&self) -> &[u8] {
        &self.data[self.spans[0].clone()]
    }

    fn resolve_fields(&self) -> MetadataFieldSet {
        let record0 = self.record0();
        let exth = match self.mobi.exth_start {
            Some(start) => ExthRecords::parse(record0, start),
            None => ExthRecords::default(),
        };
        let text = |bytes: &[u8]| self.decode_text(bytes);

        let authors: Vec<String> = exth.values(tag::AUTHOR).filter_map(text).collect();
        let title = exth.first(tag::UPDATED_TITLE).and_then(text).or_else(|| {
            self.mobi
                .full_name
                .clone()
                .and_then(|range| text(&record0[range]))
        });

        MetadataFieldSet {
            asin: exth
                .first(tag::ASIN)
                .and_then(text)
                .or_else(|| exth.first(tag::CONTENT_KEY).and_then(text)),
            isbn: exth.first(tag::ISBN).and_then(text),
            author: (!authors.is_empty()).then(|| authors.join(" & ")),
            title,
            document_type: exth.first(tag::DOCUMENT_TYPE).and_then(text),
            cover_record_index: exth
                .first_u32(tag::COVER_OFFSET)
                .and_then(|offset| self.resolve_cover(offset)),
            content_length: Some(self.mobi.text_length),
            page_count: self.declared_page_count(),
        }
    }

    fn decode_text(&self, bytes: &[u8]) -> Option<String> {
        let decoded = if self.mobi.text_encoding == CP1252 {
            WINDOWS_1252.decode_without_bom_handling(bytes).0
        } else {
            String::from_utf8_lossy(bytes)
        };
        let trimmed = decoded.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn resolve_cover(&self, offset: u32) -> Option<usize> {
        if offset == NO_RECORD {
            return None;
        }
        let Some(first) = self.mobi.first_resource else {
            warn!("cover offset {} set but no first resource record", offset);
            return None;
        };
        let index = first.checked_add(offset as usize)?;
        let Ok(record) = self.read_record(index) else {
            warn!(
                "cover record {} out of range ({} records)",
                index,
                self.record_count()
            );
            return None;
        };
        if is_placeholder(record) {
            warn!("cover record {} is not an image", index);
            return None;
        }
        Some(index)
    }

    fn declared_page_count(&self) -> Option<u32> {
        let first = self.mobi.first_resource?;
        (first..self.record_count())
            .filter_map(|i| self.read_record(i).ok())
            .find(|record| record.starts_with(b"PAGE"))
            .and_then(exth::page_record_count)
    }
}

fn is_placeholder(record: &[u8]) -> bool {
    record.is_empty() || PLACEHOLDER_TAGS.iter().any(|tag| record.starts_with(tag))
}

impl BookSource for Container {
    fn fields(&self) -> &MetadataFieldSet {
        self.metadata()
    }

    fn cover_image(&self) -> Option<&[u8]> {
        self.cover_image_record_index()
            .and_then(|index| self.read_record(index).ok())
    }

    fn unique_id(&self) -> u32 {
        self.mobi.unique_id
    }

    fn content_format(&self) -> ContentFormat {
        if self.mobi.file_version >= KF8_VERSION {
            ContentFormat::Kf8
        } else {
            ContentFormat::Mobi7
        }
    }
}
