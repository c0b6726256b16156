use crate::apnx::{self, PageMapMeta};
use crate::cli::Cli;
use crate::container::Container;
use crate::device::{self, DeviceLayout};
use crate::error::{BookError, PageMapError, ThumbnailError};
use crate::exth::MetadataField;
use crate::ledger::Ledger;
use crate::metadata::{self, BookRecord};
use crate::reader::BookSource;
use crate::thumbnail::{self, ThumbnailVariant};
use crate::writer::{self, WriteOutcome};
use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::{DirEntry, WalkDir};

const PRIMARY_EXTENSIONS: [&str; 2] = ["mobi", "azw3"];
const EXTENDED_EXTENSION: &str = "azw";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Processing switches, independent of how they were collected
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub overwrite_personal_thumbnails: bool,
    pub overwrite_vendor_thumbnails: bool,
    pub overwrite_page_maps: bool,
    pub skip_page_maps: bool,
    pub fix_thumbnail_badge: bool,
    pub include_azw: bool,
    pub max_age_days: Option<u64>,
}

impl Options {
    fn extensions(&self) -> Vec<&'static str> {
        let mut extensions = PRIMARY_EXTENSIONS.to_vec();
        if self.include_azw {
            extensions.push(EXTENDED_EXTENSION);
        }
        extensions
    }

    fn overwrite_thumbnail(&self, variant: ThumbnailVariant) -> bool {
        match variant {
            ThumbnailVariant::PersonalDocument => self.overwrite_personal_thumbnails,
            ThumbnailVariant::AmazonContent => self.overwrite_vendor_thumbnails,
        }
    }
}

/// Accepts books modified after `now - days`
#[derive(Debug, Clone, Copy)]
pub struct AgeFilter {
    cutoff: Option<SystemTime>,
}

impl AgeFilter {
    pub fn new(max_age_days: Option<u64>, now: SystemTime) -> Self {
        let cutoff = max_age_days.and_then(|days| {
            now.checked_sub(Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)))
        });
        Self { cutoff }
    }

    pub fn accepts(&self, _path: &Path, modified: SystemTime) -> bool {
        self.cutoff.map_or(true, |cutoff| modified >= cutoff)
    }
}

/// Outcome for one book that was parsed successfully
#[derive(Debug)]
pub struct BookReport {
    pub path: PathBuf,
    pub record: BookRecord,
    pub thumbnail: Result<WriteOutcome, ThumbnailError>,
    /// `None` when page maps are not requested
    pub page_map: Option<Result<WriteOutcome, PageMapError>>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: Vec<BookReport>,
    pub failed: Vec<(PathBuf, BookError)>,
    /// Books skipped by the age filter
    pub filtered: usize,
}

impl RunSummary {
    fn count(&self, pick: impl Fn(&BookReport) -> bool) -> usize {
        self.processed.iter().filter(|r| pick(r)).count()
    }

    pub fn thumbnails_written(&self) -> usize {
        self.count(|r| matches!(r.thumbnail, Ok(WriteOutcome::Written)))
    }

    pub fn page_maps_written(&self) -> usize {
        self.count(|r| matches!(r.page_map, Some(Ok(WriteOutcome::Written))))
    }

    /// Record a failed book, or abort if the device itself has gone away.
    fn fail(&mut self, layout: &DeviceLayout, path: PathBuf, err: BookError) -> Result<()> {
        if matches!(err, BookError::Read { .. } | BookError::Write(_)) && !layout.is_reachable() {
            return Err(err)
                .with_context(|| format!("{} is no longer reachable", layout.root().display()));
        }
        error!("  {}", err);
        self.failed.push((path, err));
        Ok(())
    }
}

pub fn run(cli: &Cli) -> Result<()> {
    let layout = DeviceLayout::new(&cli.kindle_directory);
    if !layout.documents().is_dir() {
        bail!(
            "No documents directory under {}; is the Kindle mounted?",
            layout.root().display()
        );
    }

    if cli.dump_pages {
        info!("Dumping book pages to {}", cli.ledger.display());
        let added = dump_pages(&layout, &cli.ledger)?;
        info!("Dump completed, {} new books", added);
    } else {
        let options = cli.options();
        let filter = AgeFilter::new(options.max_age_days, SystemTime::now());
        let summary = process_device(&layout, &options, |path, modified| {
            filter.accepts(path, modified)
        })?;

        info!(
            "Done: {} books processed, {} thumbnails and {} page maps written, {} too old",
            summary.processed.len(),
            summary.thumbnails_written(),
            summary.page_maps_written(),
            summary.filtered
        );
        for report in &summary.processed {
            debug!(
                "{}: {}, {} pages",
                display_name(&report.path),
                report.record.identifier,
                report.record.pages
            );
        }
        for (path, err) in &summary.failed {
            error!("Failed: {}: {}", path.display(), err);
        }
    }

    if cli.eject {
        device::eject(&layout)?;
    }

    Ok(())
}

/// Process every book under the documents directory that `should_process` accepts.
///
/// A failing book is recorded and the walk continues, unless the device itself
/// has gone away, which aborts the run.
pub fn process_device(
    layout: &DeviceLayout,
    options: &Options,
    should_process: impl Fn(&Path, SystemTime) -> bool,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for path in find_books(&layout.documents(), &options.extensions())? {
        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(source) => {
                let err = BookError::Read {
                    path: path.clone(),
                    source,
                };
                summary.fail(layout, path, err)?;
                continue;
            }
        };
        if !should_process(&path, modified) {
            debug!("{} is too old, skipping", path.display());
            summary.filtered += 1;
            continue;
        }

        info!("Processing: {}", display_name(&path));
        match process_book(&path, layout, options) {
            Ok(report) => summary.processed.push(report),
            Err(err) => summary.fail(layout, path, err)?,
        }
    }

    Ok(summary)
}

pub fn process_book(
    path: &Path,
    layout: &DeviceLayout,
    options: &Options,
) -> Result<BookReport, BookError> {
    let data = fs::read(path).map_err(|source| BookError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let container = Container::open(data)?;
    let record = metadata::extract(&container)?;
    debug!(
        "  {:?}: {} records, file version {}",
        container.header().name,
        container.record_count(),
        container.mobi_header().file_version
    );
    for field in MetadataField::ALL {
        if let Some(value) = container.find_metadata_field(field) {
            debug!("    {:?}: {}", field, value);
        }
    }
    debug!(
        "  {} pages ({})",
        record.pages,
        if record.is_real_count { "declared" } else { "estimated" }
    );

    let thumbnail = write_thumbnail(&container, &record, layout, options)?;
    let page_map = if options.skip_page_maps {
        None
    } else {
        Some(write_page_map(path, &record, options)?)
    };

    Ok(BookReport {
        path: path.to_path_buf(),
        record,
        thumbnail,
        page_map,
    })
}

fn write_thumbnail(
    source: &dyn BookSource,
    record: &BookRecord,
    layout: &DeviceLayout,
    options: &Options,
) -> Result<Result<WriteOutcome, ThumbnailError>, BookError> {
    let artifact = match thumbnail::generate(
        source.cover_image(),
        record,
        options.fix_thumbnail_badge,
        &layout.thumbnails(),
    ) {
        Ok(artifact) => artifact,
        Err(err) => {
            warn!("  No thumbnail for {}: {}", record.identifier, err);
            return Ok(Err(err));
        }
    };

    let outcome = writer::write(&artifact, options.overwrite_thumbnail(artifact.variant))?;
    match outcome {
        WriteOutcome::Written => info!("  Thumbnail written: {}", display_name(&artifact.path)),
        WriteOutcome::Skipped => info!("  Thumbnail exists, skipping"),
    }
    Ok(Ok(outcome))
}

fn write_page_map(
    book_path: &Path,
    record: &BookRecord,
    options: &Options,
) -> Result<Result<WriteOutcome, PageMapError>, BookError> {
    let artifact = match apnx::generate(
        record.content_length,
        record.pages,
        &PageMapMeta::for_book(record),
        apnx::page_map_path(book_path),
    ) {
        Ok(artifact) => artifact,
        Err(err) => {
            warn!("  No page map for {}: {}", record.identifier, err);
            return Ok(Err(err));
        }
    };

    let outcome = writer::write(&artifact, options.overwrite_page_maps)?;
    match outcome {
        WriteOutcome::Written => info!("  APNX written: {} pages", artifact.page_count),
        WriteOutcome::Skipped => info!("  APNX exists, skipping"),
    }
    Ok(Ok(outcome))
}

/// Append every book not yet in the ledger. Returns the number of rows added.
pub fn dump_pages(layout: &DeviceLayout, ledger_path: &Path) -> Result<usize> {
    let mut ledger = Ledger::open(ledger_path)?;
    debug!("Ledger holds {} books", ledger.len());

    let mut extensions = PRIMARY_EXTENSIONS.to_vec();
    extensions.push(EXTENDED_EXTENSION);

    let mut added = 0;
    for path in find_books(&layout.documents(), &extensions)? {
        info!("Processing: {}", display_name(&path));
        let record = match read_record(&path) {
            Ok(record) => record,
            Err(err) => {
                warn!("  {}", err);
                continue;
            }
        };
        if ledger.append(&record)? {
            info!("  Added {} to the ledger", record.identifier);
            added += 1;
        } else {
            info!("  Already in the ledger, skipping");
        }
    }
    Ok(added)
}

fn read_record(path: &Path) -> Result<BookRecord, BookError> {
    let data = fs::read(path).map_err(|source| BookError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let container = Container::open(data)?;
    Ok(metadata::extract(&container)?)
}

/// Books below `dir` with one of `extensions`, in sorted order.
/// `.sdr` sidecar directories and directory symlinks are not descended into.
pub fn find_books(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut books = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_sidecar(entry));
    for entry in walker {
        let entry =
            entry.with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| extensions.contains(&ext.as_str()));
        if matches {
            books.push(entry.into_path());
        }
    }

    books.sort();
    Ok(books)
}

fn is_sidecar(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.path().extension().is_some_and(|ext| ext == "sdr")
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{self, MobiBuilder};
    use tempfile::TempDir;

    struct Device {
        _dir: TempDir,
        layout: DeviceLayout,
    }

    impl Device {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let layout = DeviceLayout::new(dir.path());
            fs::create_dir_all(layout.documents()).unwrap();
            Self { _dir: dir, layout }
        }

        fn add_book(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.layout.documents().join(name);
            fs::write(&path, bytes).unwrap();
            path
        }

        fn run(&self, options: &Options) -> RunSummary {
            process_device(&self.layout, options, |_, _| true).unwrap()
        }
    }

    fn test_book(cover: Option<Vec<u8>>) -> Vec<u8> {
        let builder = MobiBuilder::new("B00TESTX")
            .document_type("EBOK")
            .author("A. Writer")
            .text_length(50_000);
        match cover {
            Some(bytes) => builder.cover(bytes).build(),
            None => builder.build(),
        }
    }

    fn last_offset(apnx: &[u8]) -> u32 {
        u32::from_be_bytes(apnx[apnx.len() - 4..].try_into().unwrap())
    }

    #[test]
    fn writes_thumbnail_and_page_map() {
        let device = Device::new();
        let cover = fixture::cover_png(600, 800);
        let book = device.add_book("Test Book.mobi", &test_book(Some(cover.clone())));

        let summary = device.run(&Options::default());

        assert!(summary.failed.is_empty());
        let report = &summary.processed[0];
        assert_eq!(report.record.identifier, "B00TESTX");
        assert_eq!(report.record.pages, metadata::estimate_pages(50_000));
        assert!(!report.record.is_real_count);
        assert!(matches!(report.thumbnail, Ok(WriteOutcome::Written)));
        assert!(matches!(report.page_map, Some(Ok(WriteOutcome::Written))));

        let thumb = device.layout.thumbnails().join(format!(
            "thumbnail_B00TESTX_EBOK_portrait_{}.jpg",
            thumbnail::cover_hash(&cover)
        ));
        assert!(thumb.is_file());

        let apnx_bytes = fs::read(apnx::page_map_path(&book)).unwrap();
        assert_eq!(last_offset(&apnx_bytes), 50_000);
    }

    #[test]
    fn second_run_skips_existing_artifacts() {
        let device = Device::new();
        let book = device.add_book("b.mobi", &test_book(Some(fixture::cover_png(300, 400))));

        let first = device.run(&Options::default());
        let thumb_dir = device.layout.thumbnails();
        let thumb_path = fs::read_dir(&thumb_dir).unwrap().next().unwrap().unwrap().path();
        let thumb_before = fs::read(&thumb_path).unwrap();
        let apnx_before = fs::read(apnx::page_map_path(&book)).unwrap();
        assert_eq!(first.thumbnails_written(), 1);

        let second = device.run(&Options::default());
        let report = &second.processed[0];
        assert!(matches!(report.thumbnail, Ok(WriteOutcome::Skipped)));
        assert!(matches!(report.page_map, Some(Ok(WriteOutcome::Skipped))));
        assert_eq!(fs::read(&thumb_path).unwrap(), thumb_before);
        assert_eq!(fs::read(apnx::page_map_path(&book)).unwrap(), apnx_before);
        assert_eq!(fs::read_dir(&thumb_dir).unwrap().count(), 1);
    }

    #[test]
    fn overwrite_flags_are_per_variant() {
        let device = Device::new();
        device.add_book("b.mobi", &test_book(Some(fixture::cover_png(300, 400))));
        device.run(&Options::default());

        let personal_only = Options {
            overwrite_personal_thumbnails: true,
            ..Options::default()
        };
        let report = &device.run(&personal_only).processed[0];
        assert!(matches!(report.thumbnail, Ok(WriteOutcome::Skipped)));

        let vendor = Options {
            overwrite_vendor_thumbnails: true,
            overwrite_page_maps: true,
            ..Options::default()
        };
        let report = &device.run(&vendor).processed[0];
        assert!(matches!(report.thumbnail, Ok(WriteOutcome::Written)));
        assert!(matches!(report.page_map, Some(Ok(WriteOutcome::Written))));
    }

    #[test]
    fn missing_cover_still_writes_page_map() {
        let device = Device::new();
        let book = device.add_book("nocover.azw3", &test_book(None));

        let summary = device.run(&Options::default());
        let report = &summary.processed[0];

        assert!(matches!(report.thumbnail, Err(ThumbnailError::MissingCover)));
        assert!(matches!(report.page_map, Some(Ok(WriteOutcome::Written))));
        assert!(apnx::page_map_path(&book).is_file());
        assert!(!device.layout.thumbnails().exists());
    }

    #[test]
    fn malformed_book_does_not_stop_the_run() {
        let device = Device::new();
        device.add_book("a-broken.mobi", b"definitely not a palm database");
        device.add_book("b-good.mobi", &test_book(None));

        let summary = device.run(&Options::default());

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(matches!(summary.failed[0].1, BookError::Format(_)));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_entry_does_not_stop_the_run() {
        let device = Device::new();
        let docs = device.layout.documents();
        std::os::unix::fs::symlink(docs.join("gone.mobi"), docs.join("a-dangling.mobi")).unwrap();
        device.add_book("b-good.mobi", &test_book(None));

        let summary = device.run(&Options::default());

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.processed[0].path, docs.join("b-good.mobi"));
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, docs.join("a-dangling.mobi"));
        assert!(matches!(summary.failed[0].1, BookError::Read { .. }));
    }

    #[test]
    fn lost_device_aborts_the_run() {
        let device = Device::new();
        device.add_book("b.mobi", &test_book(None));
        let root = device.layout.root().to_path_buf();

        let result = process_device(&device.layout, &Options::default(), |_, _| {
            fs::remove_dir_all(&root).unwrap();
            true
        });

        let err = result.unwrap_err();
        assert!(err.to_string().contains("no longer reachable"), "{err:#}");
    }

    #[test]
    fn thumbnail_write_failure_stops_only_that_book() {
        let device = Device::new();
        let thumbnails = device.layout.thumbnails();
        fs::create_dir_all(thumbnails.parent().unwrap()).unwrap();
        // A regular file where the thumbnail directory should be
        fs::write(&thumbnails, b"").unwrap();
        let covered = device.add_book("a-cover.mobi", &test_book(Some(fixture::cover_png(50, 50))));
        let plain = device.add_book("b-plain.mobi", &test_book(None));

        let summary = device.run(&Options::default());

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, covered);
        assert!(matches!(summary.failed[0].1, BookError::Write(_)));
        assert!(!apnx::page_map_path(&covered).exists());

        assert_eq!(summary.processed.len(), 1);
        assert!(matches!(summary.processed[0].page_map, Some(Ok(WriteOutcome::Written))));
        assert!(apnx::page_map_path(&plain).is_file());
    }

    #[test]
    fn skip_page_maps() {
        let device = Device::new();
        let book = device.add_book("b.mobi", &test_book(None));
        let options = Options {
            skip_page_maps: true,
            ..Options::default()
        };

        let report = &device.run(&options).processed[0];
        assert!(report.page_map.is_none());
        assert!(!apnx::page_map_path(&book).exists());
    }

    #[test]
    fn azw_needs_the_extended_flag() {
        let device = Device::new();
        device.add_book("old.azw", &test_book(None));
        device.add_book("notes.txt", b"ignored");

        assert!(device.run(&Options::default()).processed.is_empty());

        let options = Options {
            include_azw: true,
            ..Options::default()
        };
        assert_eq!(device.run(&options).processed.len(), 1);
    }

    #[test]
    fn rejected_books_are_not_touched() {
        let device = Device::new();
        let book = device.add_book("b.mobi", &test_book(Some(fixture::cover_png(50, 50))));

        let summary = process_device(&device.layout, &Options::default(), |_, _| false).unwrap();

        assert_eq!(summary.filtered, 1);
        assert!(summary.processed.is_empty());
        assert!(!apnx::page_map_path(&book).exists());
    }

    #[test]
    fn age_filter_cutoff() {
        let now = SystemTime::now();
        let week = AgeFilter::new(Some(7), now);
        let path = Path::new("b.mobi");

        assert!(week.accepts(path, now - Duration::from_secs(SECONDS_PER_DAY)));
        assert!(!week.accepts(path, now - Duration::from_secs(8 * SECONDS_PER_DAY)));
        assert!(AgeFilter::new(None, now).accepts(path, SystemTime::UNIX_EPOCH));
    }

    #[test]
    fn find_books_skips_sidecars() {
        let device = Device::new();
        let docs = device.layout.documents();
        fs::create_dir_all(docs.join("b.sdr")).unwrap();
        fs::create_dir_all(docs.join("nested")).unwrap();
        fs::write(docs.join("b.sdr/stray.mobi"), b"").unwrap();
        fs::write(docs.join("nested/A.MOBI"), b"").unwrap();
        fs::write(docs.join("b.azw3"), b"").unwrap();

        let books = find_books(&docs, &PRIMARY_EXTENSIONS).unwrap();
        assert_eq!(books, vec![docs.join("b.azw3"), docs.join("nested/A.MOBI")]);
    }

    #[cfg(unix)]
    #[test]
    fn find_books_does_not_follow_directory_links() {
        let device = Device::new();
        let docs = device.layout.documents();
        std::os::unix::fs::symlink(&docs, docs.join("loop")).unwrap();
        fs::write(docs.join("b.mobi"), b"").unwrap();

        let books = find_books(&docs, &PRIMARY_EXTENSIONS).unwrap();
        assert_eq!(books, vec![docs.join("b.mobi")]);
    }

    #[test]
    fn dump_pages_appends_once() {
        let device = Device::new();
        device.add_book("b.mobi", &test_book(None));
        device.add_book("broken.azw", b"nope");
        let ledger = device.layout.root().join("book-pages.csv");

        assert_eq!(dump_pages(&device.layout, &ledger).unwrap(), 1);
        let before = fs::read(&ledger).unwrap();

        assert_eq!(dump_pages(&device.layout, &ledger).unwrap(), 0);
        assert_eq!(fs::read(&ledger).unwrap(), before);
        let text = String::from_utf8(before).unwrap();
        assert!(text.contains(r#""B00TESTX";"";"A. Writer";"Test Book Full Name";"22";"False""#));
    }
}
