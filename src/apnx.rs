//! APNX page maps: byte offset of every page start in the book text.

use crate::error::PageMapError;
use crate::metadata::BookRecord;
use crate::reader::ContentFormat;
use crate::writer::Artifact;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 0x0001_0001;
const PAGE_SECTION_VERSION: u16 = 1;
const OFFSET_BITS: u16 = 32;
const DEFAULT_CDE_TYPE: &str = "EBOK";

/// Values written into the JSON headers of the page map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMapMeta {
    pub asin: String,
    pub cde_type: String,
    pub guid: String,
    pub format: ContentFormat,
}

impl PageMapMeta {
    pub fn for_book(record: &BookRecord) -> Self {
        Self {
            asin: record.identifier.clone(),
            cde_type: record
                .document_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CDE_TYPE.to_string()),
            guid: format!("{:08x}", record.unique_id),
            format: record.format,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentHeader<'a> {
    content_guid: &'a str,
    asin: &'a str,
    cde_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    file_revision_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    acr: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageHeader<'a> {
    asin: &'a str,
    page_map: &'a str,
}

#[derive(Debug)]
pub struct PageMapArtifact {
    pub path: PathBuf,
    pub page_count: u32,
    pub bytes: Vec<u8>,
}

impl Artifact for PageMapArtifact {
    fn target(&self) -> &Path {
        &self.path
    }

    fn contents(&self) -> &[u8] {
        &self.bytes
    }
}

/// `<dir>/<stem>.sdr/<stem>.apnx` next to the book
pub fn page_map_path(book_path: &Path) -> PathBuf {
    let stem = book_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = book_path.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("{}.sdr", stem)).join(format!("{}.apnx", stem))
}

/// Split `content_length` into `page_count` equal pages, the last one taking
/// the remainder. Returns every page start followed by `content_length`.
pub fn page_offsets(content_length: u32, page_count: u32) -> Result<Vec<u32>, PageMapError> {
    if content_length == 0 {
        return Err(PageMapError::EmptyContent);
    }
    if page_count == 0 || page_count > content_length || page_count > u32::from(u16::MAX) {
        return Err(PageMapError::TooManyPages {
            pages: page_count,
            content_length,
        });
    }

    let page_len = content_length / page_count;
    let mut offsets: Vec<u32> = (0..page_count).map(|page| page * page_len).collect();
    offsets.push(content_length);
    Ok(offsets)
}

pub fn generate(
    content_length: u32,
    page_count: u32,
    meta: &PageMapMeta,
    path: PathBuf,
) -> Result<PageMapArtifact, PageMapError> {
    let offsets = page_offsets(content_length, page_count)?;
    let bytes = serialize(&offsets, page_count, meta)?;
    Ok(PageMapArtifact {
        path,
        page_count,
        bytes,
    })
}

/// Encode the page map. All integers are big-endian.
///
/// ```text
/// u32 version | u32 page section offset | u32 content header len | content header
/// u16 1 | u16 page header len | u16 page count | u16 32 | page header
/// u32 offset * (page count + 1)
/// ```
pub fn serialize(
    offsets: &[u32],
    page_count: u32,
    meta: &PageMapMeta,
) -> Result<Vec<u8>, PageMapError> {
    let kf8 = meta.format == ContentFormat::Kf8;
    let content_header = serde_json::to_vec(&ContentHeader {
        content_guid: &meta.guid,
        asin: &meta.asin,
        cde_type: &meta.cde_type,
        format: kf8.then(|| meta.format.label()),
        file_revision_id: "1",
        acr: kf8.then_some(""),
    })?;
    let page_header = serde_json::to_vec(&PageHeader {
        asin: &meta.asin,
        page_map: "(1,a,1)",
    })?;

    let mut out =
        Vec::with_capacity(28 + content_header.len() + page_header.len() + offsets.len() * 4);
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    out.extend_from_slice(&(12 + content_header.len() as u32).to_be_bytes());
    out.extend_from_slice(&(content_header.len() as u32).to_be_bytes());
    out.extend_from_slice(&content_header);

    out.extend_from_slice(&PAGE_SECTION_VERSION.to_be_bytes());
    out.extend_from_slice(&(page_header.len() as u16).to_be_bytes());
    out.extend_from_slice(&(page_count as u16).to_be_bytes());
    out.extend_from_slice(&OFFSET_BITS.to_be_bytes());
    out.extend_from_slice(&page_header);

    for offset in offsets {
        out.extend_from_slice(&offset.to_be_bytes());
    }
    Ok(out)
}
