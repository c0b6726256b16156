use crate::error::ArtifactError;
use log::debug;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// A file the tool produces on the device
pub trait Artifact {
    fn target(&self) -> &Path;
    fn contents(&self) -> &[u8];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Skipped,
}

/// Place the artifact at its target path.
///
/// Contents go to a temp file in the target directory first and are renamed
/// into place, so a failed write never leaves a partial file behind.
pub fn write(artifact: &dyn Artifact, overwrite: bool) -> Result<WriteOutcome, ArtifactError> {
    let target = artifact.target();
    if !overwrite && target.exists() {
        debug!("{} exists, skipping", target.display());
        return Ok(WriteOutcome::Skipped);
    }

    let io_err = |source: io::Error| ArtifactError::Io {
        path: target.to_path_buf(),
        source,
    };

    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(artifact.contents()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;

    if overwrite {
        tmp.persist(target).map_err(|e| io_err(e.error))?;
    } else {
        match tmp.persist_noclobber(target) {
            Ok(_) => {}
            // Another writer got there between the check and the rename
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(WriteOutcome::Skipped);
            }
            Err(e) => return Err(io_err(e.error)),
        }
    }

    debug!("wrote {} ({} bytes)", target.display(), artifact.contents().len());
    Ok(WriteOutcome::Written)
}
