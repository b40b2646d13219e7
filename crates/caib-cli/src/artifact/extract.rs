//! Expansion of downloaded tar / tar.gz artifacts

use caib_core::{ArtifactInfo, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const ARCHIVE_CONTENT_TYPES: &[&str] = &["application/x-tar", "application/gzip", "application/x-gzip"];

/// Longest suffixes first so `.tar.gz` wins over `.gz`
const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar", ".gz"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub symlinks: usize,
    pub skipped: usize,
}

/// Whether the download looks like a tar transport
pub fn is_archive(info: &ArtifactInfo, filename: &str) -> bool {
    let by_type = info
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .map(|ct| ARCHIVE_CONTENT_TYPES.contains(&ct.as_str()))
        .unwrap_or(false);
    let lower = filename.to_ascii_lowercase();
    by_type || [".tar", ".tar.gz", ".tgz"].iter().any(|s| lower.ends_with(s))
}

/// Directory next to `archive` named after it without the archive suffix
pub fn destination_for(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    let stem = ARCHIVE_SUFFIXES
        .iter()
        .find(|s| lower.ends_with(*s) && lower.len() > s.len())
        .map(|s| name[..name.len() - s.len()].to_string())
        .unwrap_or_else(|| format!("{}.d", name));
    archive.with_file_name(stem)
}

/// Unpack `archive` (plain or gzip-compressed tar) into `dest`.
///
/// Directories, regular files and symlinks are restored with their modes;
/// any other entry type is skipped.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<ExtractSummary> {
    let mut reader = BufReader::new(File::open(archive)?);
    let compressed = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    let input: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    std::fs::create_dir_all(dest)?;
    let mut tar = Archive::new(input);
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);

    let mut summary = ExtractSummary::default();
    for entry in tar.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        let path = entry.path()?.into_owned();

        if !(kind.is_dir() || kind.is_file() || kind.is_symlink()) {
            debug!("Skipping {:?} entry {}", kind, path.display());
            summary.skipped += 1;
            continue;
        }

        if !entry.unpack_in(dest)? {
            warn!("Skipping entry outside destination: {}", path.display());
            summary.skipped += 1;
            continue;
        }

        if kind.is_dir() {
            summary.directories += 1;
        } else if kind.is_symlink() {
            summary.symlinks += 1;
        } else {
            summary.files += 1;
        }
    }

    Ok(summary)
}
