//! Archive packaging and extraction.
//!
//! Writers are deterministic: entries keep the caller's order, every entry
//! carries mode `0644` and a zero timestamp, and no owner or host metadata is
//! recorded. Identical inputs therefore produce byte-identical archives.
//!
//! Extraction maps every entry name below the destination root and rejects
//! names that would climb out of it.

mod tar;
mod zip;

use crate::models::CapturedFile;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Permission bits written for every archived file.
pub const ENTRY_MODE: u32 = 0o644;

/// Container format, chosen from the destination file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
    /// A single gzip-compressed file.
    Gzip,
}

impl ArchiveFormat {
    /// Detect the format from a file name. `.tar.gz`/`.tgz` win over `.gz`.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".gz") {
            Some(ArchiveFormat::Gzip)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Gzip => "gz",
        }
    }
}

/// A regular file scheduled for archiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry name inside the archive, with the base directory stripped.
    pub name: String,
    pub source: PathBuf,
}

/// Archive-relative name for `path`: the base directory prefix is removed and
/// the leading separator of the remainder is kept.
#[must_use]
pub fn entry_name(base_dir: &Path, path: &str) -> String {
    let base = base_dir.to_string_lossy();
    let base = base.trim_end_matches('/');
    match path.strip_prefix(base) {
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

/// Turn captured files into archive entries, dropping directories.
pub fn plan_entries(base_dir: &Path, files: &[CapturedFile]) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let source = PathBuf::from(&file.path);
        let meta = std::fs::metadata(&source)?;
        if meta.is_dir() {
            log::debug!("Skipping directory {}", file.path);
            continue;
        }
        entries.push(ArchiveEntry {
            name: entry_name(base_dir, &file.path),
            source,
        });
    }
    Ok(entries)
}

/// Write `files` into the archive at `dest`, using the format implied by its
/// extension. Returns the number of entries written.
///
/// A partially written archive is removed on failure.
pub fn write_archive(dest: &Path, base_dir: &Path, files: &[CapturedFile]) -> Result<usize> {
    let format = ArchiveFormat::from_path(dest).ok_or_else(|| {
        Error::InvalidInput(format!(
            "unsupported archive extension: {} (use .tar, .tar.gz, .tgz, .zip or .gz)",
            dest.display()
        ))
    })?;
    let entries = plan_entries(base_dir, files)?;
    if format == ArchiveFormat::Gzip && entries.len() != 1 {
        return Err(Error::Archive(format!(
            "gzip archives hold exactly one file, got {}",
            entries.len()
        )));
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let result = write_entries(dest, format, &entries);
    if result.is_err() {
        if let Err(err) = std::fs::remove_file(dest) {
            log::debug!("Could not remove partial archive {}: {err}", dest.display());
        }
    }
    result?;

    log::info!(
        "Wrote {} archive {} with {} entries",
        format.as_str(),
        dest.display(),
        entries.len()
    );
    Ok(entries.len())
}

fn write_entries(dest: &Path, format: ArchiveFormat, entries: &[ArchiveEntry]) -> Result<()> {
    let file = File::create(dest)?;
    match format {
        ArchiveFormat::Tar => {
            let mut out = BufWriter::new(file);
            tar::write_tar(&mut out, entries)?;
            out.flush()?;
        }
        ArchiveFormat::TarGz => {
            let mut encoder = GzBuilder::new()
                .mtime(0)
                .write(BufWriter::new(file), Compression::default());
            tar::write_tar(&mut encoder, entries)?;
            encoder.finish()?.flush()?;
        }
        ArchiveFormat::Zip => {
            let mut out = BufWriter::new(file);
            zip::write_zip(&mut out, entries)?;
            out.flush()?;
        }
        ArchiveFormat::Gzip => {
            let entry = &entries[0];
            let mut encoder = GzBuilder::new()
                .mtime(0)
                .filename(entry.name.trim_start_matches('/'))
                .write(BufWriter::new(file), Compression::default());
            let mut source = File::open(&entry.source)?;
            io::copy(&mut source, &mut encoder)?;
            encoder.finish()?.flush()?;
        }
    }
    Ok(())
}

/// Extract `archive` below `dest`, returning the files written.
pub fn extract(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let format = ArchiveFormat::from_path(archive).ok_or_else(|| {
        Error::InvalidInput(format!("unsupported archive extension: {}", archive.display()))
    })?;
    std::fs::create_dir_all(dest)?;

    let file = File::open(archive)?;
    let written = match format {
        ArchiveFormat::Tar => tar::extract_tar(BufReader::new(file), dest)?,
        ArchiveFormat::TarGz => tar::extract_tar(GzDecoder::new(BufReader::new(file)), dest)?,
        ArchiveFormat::Zip => zip::extract_zip(file, dest)?,
        ArchiveFormat::Gzip => vec![extract_gzip(file, archive, dest)?],
    };
    log::debug!(
        "Extracted {} files from {} into {}",
        written.len(),
        archive.display(),
        dest.display()
    );
    Ok(written)
}

fn extract_gzip(file: File, archive: &Path, dest: &Path) -> Result<PathBuf> {
    let mut decoder = GzDecoder::new(BufReader::new(file));
    // The header (and its file name) is only parsed once data is read.
    let mut head = vec![0u8; 64 * 1024];
    let n = decoder.read(&mut head)?;

    let name = decoder
        .header()
        .and_then(|h| h.filename())
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| gzip_stem(archive));

    let target = safe_join(dest, &name)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(&target)?);
    out.write_all(&head[..n])?;
    io::copy(&mut decoder, &mut out)?;
    out.flush()?;
    Ok(target)
}

fn gzip_stem(archive: &Path) -> String {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".gz") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => "payload".to_string(),
    }
}

/// Resolve an archive entry name to a path inside `dest`.
///
/// Leading separators are ignored. Any `..` component, or a name that
/// resolves to `dest` itself, is rejected with [`Error::PathTraversal`].
pub fn safe_join(dest: &Path, name: &str) -> Result<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut out = dest.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(normalized.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathTraversal(name.to_string()));
            }
        }
    }
    if depth == 0 || name.contains('\0') {
        return Err(Error::PathTraversal(name.to_string()));
    }
    Ok(out)
}

/// Target for a directory entry. Names that denote the destination root
/// itself (`./`, `.`, `/`) map to `None`; anything else goes through
/// [`safe_join`].
pub(super) fn dir_target(dest: &Path, name: &str) -> Result<Option<PathBuf>> {
    let normalized = name.replace('\\', "/");
    let is_root = !name.is_empty()
        && Path::new(normalized.trim_start_matches('/'))
            .components()
            .all(|component| component == Component::CurDir);
    if is_root {
        Ok(None)
    } else {
        safe_join(dest, name).map(Some)
    }
}
