use anyhow::Result;
use std::path::{Path, PathBuf};

/// Directory layout of a mounted Kindle
#[derive(Debug, Clone)]
pub struct DeviceLayout {
    root: PathBuf,
}

impl DeviceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn documents(&self) -> PathBuf {
        self.root.join("documents")
    }

    pub fn thumbnails(&self) -> PathBuf {
        self.root.join("system").join("thumbnails")
    }

    /// False once the device has been unplugged or unmounted
    pub fn is_reachable(&self) -> bool {
        self.root.is_dir()
    }
}

#[cfg(target_os = "macos")]
pub fn eject(layout: &DeviceLayout) -> Result<()> {
    use anyhow::{bail, Context};
    use std::process::Command;

    log::info!("Ejecting {}", layout.root().display());
    let status = Command::new("diskutil")
        .arg("eject")
        .arg(layout.root())
        .status()
        .context("Failed to run diskutil")?;
    if !status.success() {
        bail!("diskutil eject exited with {}", status);
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
pub fn eject(layout: &DeviceLayout) -> Result<()> {
    log::warn!(
        "Ejecting is only supported on macOS; unmount {} manually",
        layout.root().display()
    );
    Ok(())
}
