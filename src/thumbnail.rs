use crate::error::ThumbnailError;
use crate::metadata::BookRecord;
use crate::reader::DocumentClass;
use crate::writer::Artifact;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, GrayImage, Luma};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Which overwrite flag and file name family a thumbnail belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailVariant {
    /// PDOC
    PersonalDocument,
    /// EBOK and EBSP
    AmazonContent,
}

impl From<DocumentClass> for ThumbnailVariant {
    fn from(class: DocumentClass) -> Self {
        if class.is_personal() {
            Self::PersonalDocument
        } else {
            Self::AmazonContent
        }
    }
}

/// Output geometry and encoding for one (variant, badge fix) combination
#[derive(Debug, PartialEq, Eq)]
pub struct ThumbnailSpec {
    pub max_width: u32,
    pub max_height: u32,
    /// White rows added under the cover, where the device draws the badge
    pub badge_strip: u32,
    pub jpeg_quality: u8,
}

const STANDARD: ThumbnailSpec = ThumbnailSpec {
    max_width: 305,
    max_height: 470,
    badge_strip: 0,
    jpeg_quality: 75,
};

const BADGE_FIX: ThumbnailSpec = ThumbnailSpec {
    max_width: 217,
    max_height: 330,
    badge_strip: 0,
    jpeg_quality: 75,
};

const BADGE_FIX_PERSONAL: ThumbnailSpec = ThumbnailSpec {
    max_width: 217,
    max_height: 330,
    badge_strip: 45,
    jpeg_quality: 75,
};

pub fn thumbnail_spec(variant: ThumbnailVariant, badge_fix: bool) -> &'static ThumbnailSpec {
    match (variant, badge_fix) {
        (_, false) => &STANDARD,
        (ThumbnailVariant::PersonalDocument, true) => &BADGE_FIX_PERSONAL,
        (ThumbnailVariant::AmazonContent, true) => &BADGE_FIX,
    }
}

#[derive(Debug)]
pub struct ThumbnailArtifact {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub variant: ThumbnailVariant,
}

impl Artifact for ThumbnailArtifact {
    fn target(&self) -> &Path {
        &self.path
    }

    fn contents(&self) -> &[u8] {
        &self.bytes
    }
}

/// First 8 hex digits of the SHA-256 of the cover bytes
pub fn cover_hash(cover: &[u8]) -> String {
    let digest = Sha256::digest(cover);
    hex::encode(&digest[..4])
}

pub fn thumbnail_file_name(identifier: &str, class: DocumentClass, hash: &str) -> String {
    format!("thumbnail_{}_{}_portrait_{}.jpg", identifier, class.code(), hash)
}

pub fn generate(
    cover: Option<&[u8]>,
    record: &BookRecord,
    badge_fix: bool,
    thumbnails_dir: &Path,
) -> Result<ThumbnailArtifact, ThumbnailError> {
    let cover = cover.ok_or(ThumbnailError::MissingCover)?;
    let class = record
        .document_class()
        .ok_or_else(|| ThumbnailError::UnknownDocumentClass(record.document_type.clone()))?;
    let variant = ThumbnailVariant::from(class);

    let bytes = render(cover, thumbnail_spec(variant, badge_fix))?;
    let name = thumbnail_file_name(&record.identifier, class, &cover_hash(cover));

    Ok(ThumbnailArtifact {
        path: thumbnails_dir.join(name),
        bytes,
        variant,
    })
}

/// Fit the cover inside the spec's box (never upscaling), convert to
/// 8-bit grayscale and encode as JPEG.
pub fn render(cover: &[u8], spec: &ThumbnailSpec) -> Result<Vec<u8>, ThumbnailError> {
    let image = image::load_from_memory(cover).map_err(ThumbnailError::Decode)?;

    let fitted = if image.width() > spec.max_width || image.height() > spec.max_height {
        image.thumbnail(spec.max_width, spec.max_height)
    } else {
        image
    };
    let gray = fitted.to_luma8();

    let canvas = if spec.badge_strip > 0 {
        let mut canvas =
            GrayImage::from_pixel(gray.width(), gray.height() + spec.badge_strip, Luma([255]));
        imageops::replace(&mut canvas, &gray, 0, 0);
        canvas
    } else {
        gray
    };

    let mut bytes = Vec::new();
    canvas
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, spec.jpeg_quality))
        .map_err(ThumbnailError::Encode)?;
    Ok(bytes)
}
