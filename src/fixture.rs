//! Synthetic MOBI containers for tests.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub const UNIQUE_ID: u32 = 0x1234_abcd;
pub const FULL_NAME: &str = "Test Book Full Name";

const MOBI_HEADER_LEN: usize = 232;
const TEXT_RECORD_SIZE: usize = 4096;
const EOF_MARKER: &[u8] = b"\xe9\x8e\r\n";

pub struct MobiBuilder {
    exth: Vec<(u32, Vec<u8>)>,
    text_length: u32,
    cover: Option<Vec<u8>>,
    cover_offset: Option<u32>,
    page_record: Option<u16>,
    file_version: u32,
    encoding: u32,
}

impl MobiBuilder {
    pub fn new(asin: &str) -> Self {
        Self::without_asin().exth(113, asin.as_bytes())
    }

    pub fn without_asin() -> Self {
        Self {
            exth: Vec::new(),
            text_length: 8_000,
            cover: None,
            cover_offset: None,
            page_record: None,
            file_version: 6,
            encoding: 65001,
        }
    }

    fn exth(mut self, kind: u32, data: &[u8]) -> Self {
        self.exth.push((kind, data.to_vec()));
        self
    }

    pub fn title(self, title: &str) -> Self {
        self.exth(503, title.as_bytes())
    }

    pub fn raw_title(self, title: &[u8]) -> Self {
        self.exth(503, title)
    }

    pub fn author(self, author: &str) -> Self {
        self.exth(100, author.as_bytes())
    }

    pub fn isbn(self, isbn: &str) -> Self {
        self.exth(104, isbn.as_bytes())
    }

    pub fn document_type(self, code: &str) -> Self {
        self.exth(501, code.as_bytes())
    }

    pub fn content_key(self, key: &str) -> Self {
        self.exth(504, key.as_bytes())
    }

    pub fn text_length(mut self, len: u32) -> Self {
        self.text_length = len;
        self
    }

    pub fn cover(mut self, bytes: Vec<u8>) -> Self {
        self.cover = Some(bytes);
        self
    }

    pub fn cover_offset(mut self, offset: u32) -> Self {
        self.cover_offset = Some(offset);
        self
    }

    pub fn page_record(mut self, pages: u16) -> Self {
        self.page_record = Some(pages);
        self
    }

    pub fn file_version(mut self, version: u32) -> Self {
        self.file_version = version;
        self
    }

    pub fn cp1252(mut self) -> Self {
        self.encoding = 1252;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut records: Vec<Vec<u8>> = vec![Vec::new()];

        let mut remaining = self.text_length as usize;
        loop {
            let len = remaining.min(TEXT_RECORD_SIZE);
            records.push(vec![b'a'; len.max(1)]);
            remaining -= len;
            if remaining == 0 {
                break;
            }
        }
        let text_records = records.len() - 1;
        let first_resource = records.len();

        let mut exth = self.exth.clone();
        if let Some(cover) = &self.cover {
            records.push(cover.clone());
        }
        if self.cover.is_some() || self.cover_offset.is_some() {
            let offset = self.cover_offset.unwrap_or(0);
            exth.push((201, offset.to_be_bytes().to_vec()));
        }
        records.push(b"FLIS\0\0\0\x08".to_vec());
        if let Some(pages) = self.page_record {
            records.push(page_record(pages));
        }
        records.push(EOF_MARKER.to_vec());

        records[0] = self.record0(text_records, first_resource, &exth);
        palm_database(&records)
    }

    fn record0(
        &self,
        text_records: usize,
        first_resource: usize,
        exth: &[(u32, Vec<u8>)],
    ) -> Vec<u8> {
        let mut rec = vec![0u8; 16 + MOBI_HEADER_LEN];
        put_u16(&mut rec, 0, 1);
        put_u32(&mut rec, 4, self.text_length);
        put_u16(&mut rec, 8, text_records as u16);
        put_u16(&mut rec, 10, TEXT_RECORD_SIZE as u16);
        rec[16..20].copy_from_slice(b"MOBI");
        put_u32(&mut rec, 20, MOBI_HEADER_LEN as u32);
        put_u32(&mut rec, 24, 2);
        put_u32(&mut rec, 28, self.encoding);
        put_u32(&mut rec, 32, UNIQUE_ID);
        put_u32(&mut rec, 36, self.file_version);
        put_u32(&mut rec, 108, first_resource as u32);
        put_u32(&mut rec, 128, 0x40);

        rec.extend_from_slice(&exth_block(exth));

        let name_offset = rec.len();
        rec.extend_from_slice(FULL_NAME.as_bytes());
        rec.extend_from_slice(&[0, 0]);
        put_u32(&mut rec, 84, name_offset as u32);
        put_u32(&mut rec, 88, FULL_NAME.len() as u32);

        while rec.len() % 4 != 0 {
            rec.push(0);
        }
        rec
    }
}

fn exth_block(entries: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (kind, data) in entries {
        body.extend_from_slice(&kind.to_be_bytes());
        body.extend_from_slice(&((data.len() + 8) as u32).to_be_bytes());
        body.extend_from_slice(data);
    }
    let mut out = b"EXTH".to_vec();
    out.extend_from_slice(&((body.len() + 12) as u32).to_be_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn page_record(pages: u16) -> Vec<u8> {
    let mut rec = b"PAGE".to_vec();
    rec.extend_from_slice(&[0; 12]);
    rec.extend_from_slice(&0u32.to_be_bytes());
    for value in [1u16, 0, pages, 32] {
        rec.extend_from_slice(&value.to_be_bytes());
    }
    for page in 0..u32::from(pages) {
        rec.extend_from_slice(&(page * 100).to_be_bytes());
    }
    rec
}

fn palm_database(records: &[Vec<u8>]) -> Vec<u8> {
    let count = records.len();
    let mut out = vec![0u8; 78 + 8 * count + 2];
    out[..9].copy_from_slice(b"Test_Book");
    out[60..68].copy_from_slice(b"BOOKMOBI");
    put_u16(&mut out, 76, count as u16);

    let mut offset = out.len();
    for (i, record) in records.iter().enumerate() {
        put_u32(&mut out, 78 + 8 * i, offset as u32);
        put_u32(&mut out, 78 + 8 * i + 4, 2 * i as u32);
        offset += record.len();
    }
    for record in records {
        out.extend_from_slice(record);
    }
    out
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn record_count(data: &[u8]) -> usize {
    usize::from(u16::from_be_bytes([data[76], data[77]]))
}

pub fn record_offset(data: &[u8], index: usize) -> u32 {
    let at = 78 + 8 * index;
    u32::from_be_bytes(data[at..at + 4].try_into().unwrap())
}

pub fn set_record_offset(data: &mut [u8], index: usize, offset: u32) {
    put_u32(data, 78 + 8 * index, offset);
}

/// A small PNG with a colour gradient
pub fn cover_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}
