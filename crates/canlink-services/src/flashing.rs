//! Reflash packaging: zip the application directory for upload, back it up
//! before replacing it, and restore the backup if unpacking fails.
//!
//! Archive entries are relative to the packed directory, so a package made
//! from any checkout unpacks straight into the device's app directory.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::layout::StorageLayout;

#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("package {0} not found")]
    MissingPackage(PathBuf),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Zip every file under `src_dir` into `dest_zip`. Returns the number of
/// files packed.
pub fn pack_dir(src_dir: &Path, dest_zip: &Path) -> Result<usize, FlashError> {
    if !src_dir.is_dir() {
        return Err(FlashError::NotADirectory(src_dir.to_path_buf()));
    }
    if let Some(parent) = dest_zip.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut zip = ZipWriter::new(File::create(dest_zip)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        // The package must not contain itself.
        if path == dest_zip {
            continue;
        }
        let Ok(relative) = path.strip_prefix(src_dir) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut buf = Vec::new();
            File::open(path)?.read_to_end(&mut buf)?;
            zip.write_all(&buf)?;
            count += 1;
        }
    }
    zip.finish()?;
    tracing::info!(src = %src_dir.display(), dest = %dest_zip.display(), files = count, "packed directory");
    Ok(count)
}

/// Extract `src_zip` into `dest_dir`, creating it if needed.
pub fn unpack(src_zip: &Path, dest_dir: &Path) -> Result<(), FlashError> {
    if !src_zip.is_file() {
        return Err(FlashError::MissingPackage(src_zip.to_path_buf()));
    }
    std::fs::create_dir_all(dest_dir)?;
    let mut archive = ZipArchive::new(File::open(src_zip)?)?;
    archive.extract(dest_dir)?;
    tracing::info!(src = %src_zip.display(), dest = %dest_dir.display(), entries = archive.len(), "unpacked archive");
    Ok(())
}

/// Stage `src_dir` as the package this node will serve on a `REFLASH`
/// request.
pub fn prepare(src_dir: &Path, layout: &StorageLayout) -> Result<PathBuf, FlashError> {
    let dest = layout.flash_out();
    pack_dir(src_dir, &dest)?;
    Ok(dest)
}

pub fn backup(layout: &StorageLayout) -> Result<PathBuf, FlashError> {
    let dest = layout.backup();
    pack_dir(layout.app_dir(), &dest)?;
    Ok(dest)
}

pub fn restore(layout: &StorageLayout) -> Result<(), FlashError> {
    unpack(&layout.backup(), layout.app_dir())
}

/// Replace the app directory with the received package. The old contents
/// are backed up first and put back if unpacking fails.
pub fn reflash(layout: &StorageLayout) -> Result<(), FlashError> {
    let package = layout.flash_in();
    if !package.is_file() {
        return Err(FlashError::MissingPackage(package));
    }
    if layout.app_dir().is_dir() {
        backup(layout)?;
    }
    if let Err(e) = std::fs::remove_dir_all(layout.app_dir()) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %layout.app_dir().display(), error = %e, "could not clear app directory");
        }
    }
    match unpack(&package, layout.app_dir()) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "reflash failed, restoring backup");
            if layout.backup().is_file() {
                if let Err(re) = restore(layout) {
                    tracing::error!(error = %re, "restore after failed reflash also failed");
                }
            }
            Err(e)
        }
    }
}
