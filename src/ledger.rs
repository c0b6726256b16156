use crate::metadata::BookRecord;
use anyhow::{Context, Result};
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 6] = ["asin", "isbn", "author", "title", "pages", "is_real"];
const DELIMITER: u8 = b';';

/// Append-only CSV of books already dumped, keyed by identifier
pub struct Ledger {
    path: PathBuf,
    known: HashSet<String>,
}

impl Ledger {
    /// Load identifiers from an existing ledger, or create it with a header row.
    pub fn open(path: &Path) -> Result<Self> {
        let mut known = HashSet::new();

        if path.is_file() {
            let mut reader = ReaderBuilder::new()
                .delimiter(DELIMITER)
                .has_headers(true)
                .flexible(true)
                .from_path(path)
                .with_context(|| format!("Failed to open ledger: {}", path.display()))?;
            for row in reader.records() {
                let row = row.with_context(|| format!("Malformed ledger: {}", path.display()))?;
                if let Some(id) = row.get(0) {
                    known.insert(id.to_string());
                }
            }
        } else {
            let mut writer = WriterBuilder::new()
                .delimiter(DELIMITER)
                .quote_style(QuoteStyle::Always)
                .from_path(path)
                .with_context(|| format!("Failed to create ledger: {}", path.display()))?;
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            known,
        })
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.known.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Append one row. Returns false without writing if the identifier is known.
    pub fn append(&mut self, record: &BookRecord) -> Result<bool> {
        if self.contains(&record.identifier) {
            return Ok(false);
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open ledger: {}", self.path.display()))?;
        let mut writer = WriterBuilder::new()
            .delimiter(DELIMITER)
            .quote_style(QuoteStyle::Always)
            .has_headers(false)
            .from_writer(file);

        let pages = record.pages.to_string();
        writer.write_record([
            record.identifier.as_str(),
            record.isbn.as_deref().unwrap_or_default(),
            record.author.as_deref().unwrap_or_default(),
            record.title.as_deref().unwrap_or_default(),
            pages.as_str(),
            if record.is_real_count { "True" } else { "False" },
        ])?;
        writer.flush()?;

        self.known.insert(record.identifier.clone());
        Ok(true)
    }
}
