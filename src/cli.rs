use crate::pipeline::Options;
use clap::Parser;
use std::path::PathBuf;

/// Extract missing cover thumbnails and generate page maps for books on a Kindle
#[derive(Parser, Debug)]
#[command(name = "coverthumbs", version, about)]
pub struct Cli {
    /// Directory where the Kindle is mounted
    pub kindle_directory: PathBuf,

    /// Print less information
    #[arg(short, long, default_value_t = false)]
    pub silent: bool,

    /// Overwrite personal document (PDOC) cover thumbnails
    #[arg(long, default_value_t = false)]
    pub overwrite_pdoc_thumbs: bool,

    /// Overwrite Amazon ebook (EBOK) and book sample (EBSP) cover thumbnails
    #[arg(long, default_value_t = false)]
    pub overwrite_amzn_thumbs: bool,

    /// Overwrite existing APNX files
    #[arg(long, default_value_t = false)]
    pub overwrite_apnx: bool,

    /// Do not generate APNX files
    #[arg(long, default_value_t = false)]
    pub skip_apnx: bool,

    /// Fix thumbnails for the PERSONAL badge
    #[arg(short, long, default_value_t = false)]
    pub fix_thumb: bool,

    /// Also process AZW files
    #[arg(short = 'z', long, default_value_t = false)]
    pub azw: bool,

    /// Only process books modified within the last DAYS days (7 if no value is given)
    #[arg(short, long, value_name = "DAYS", num_args = 0..=1, default_missing_value = "7")]
    pub days: Option<u64>,

    /// Append new books with their page counts to the ledger instead of
    /// writing thumbnails and page maps
    #[arg(long, default_value_t = false)]
    pub dump_pages: bool,

    /// Ledger file used by --dump-pages
    #[arg(long, value_name = "PATH", default_value = "book-pages.csv")]
    pub ledger: PathBuf,

    /// Eject the Kindle when done (macOS only)
    #[arg(short, long, default_value_t = false)]
    pub eject: bool,
}

impl Cli {
    pub fn options(&self) -> Options {
        Options {
            overwrite_personal_thumbnails: self.overwrite_pdoc_thumbs,
            overwrite_vendor_thumbnails: self.overwrite_amzn_thumbs,
            overwrite_page_maps: self.overwrite_apnx,
            skip_page_maps: self.skip_apnx,
            fix_thumbnail_badge: self.fix_thumb,
            include_azw: self.azw,
            max_age_days: self.days,
        }
    }
}
