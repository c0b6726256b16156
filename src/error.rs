//! Error types for container parsing and artifact generation
use std::io;
use std::path::PathBuf;

/// Structural problems with a container file. Fatal for that file only.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("truncated header: {len} bytes, need at least {needed}")]
    TruncatedHeader { len: usize, needed: usize },

    #[error("unrecognized container signature {0:?}")]
    UnrecognizedSignature(String),

    #[error("container declares no records")]
    NoRecords,

    #[error("record {index} starts at {offset}, inside the {header_end}-byte header")]
    RecordOverlapsHeader {
        index: usize,
        offset: u32,
        header_end: usize,
    },

    #[error("record offsets not increasing at record {index} ({previous} -> {offset})")]
    OffsetsNotIncreasing {
        index: usize,
        previous: u32,
        offset: u32,
    },

    #[error("record {index} starts at {offset}, beyond end of file ({len} bytes)")]
    OffsetOutOfBounds { index: usize, offset: u32, len: usize },

    #[error("record 0 is {len} bytes, too short for a MOBI header")]
    TruncatedRecordZero { len: usize },

    #[error("record 0 has no MOBI header")]
    MissingMobiHeader,
}

#[derive(Debug, thiserror::Error)]
#[error("record index {index} out of range (container has {count} records)")]
pub struct RecordIndexError {
    pub index: usize,
    pub count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("no ASIN found in extended metadata")]
    MissingIdentifier,
}

/// Thumbnail failures never abort the file; the caller records them as skipped.
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("no embedded cover image")]
    MissingCover,

    #[error("unknown document type {0:?}")]
    UnknownDocumentClass(Option<String>),

    #[error("cover image could not be decoded: {0}")]
    Decode(#[source] image::ImageError),

    #[error("thumbnail could not be encoded: {0}")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, thiserror::Error)]
pub enum PageMapError {
    #[error("content length is zero")]
    EmptyContent,

    #[error("{pages} pages cannot be laid out over {content_length} bytes")]
    TooManyPages { pages: u32, content_length: u32 },

    #[error("page map header could not be serialized: {0}")]
    Header(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors that stop processing of a single book
#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid container: {0}")]
    Format(#[from] FormatError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Write(#[from] ArtifactError),
}
