//! Archive pack/unpack primitive
//!
//! The save pipeline talks to the container through [`ArchiveCodec`], so the
//! zip implementation can be swapped (tests inject failing codecs).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EditorError, Result};

/// One archive member, in archive order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub compression: CompressionMethod,
    pub is_dir: bool,
}

pub trait ArchiveCodec {
    /// List the members of `archive` in stored order
    fn entries(&self, archive: &Path) -> Result<Vec<ArchiveEntry>>;

    /// Extract `archive` into `dest`, returning its members
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<Vec<ArchiveEntry>>;

    /// Rebuild `archive` from the files under `source`, in `entries` order.
    ///
    /// Members whose file no longer exists under `source` are dropped.
    fn pack(&self, source: &Path, entries: &[ArchiveEntry], archive: &Path) -> Result<()>;
}

/// Zip container codec
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCodec;

impl ZipCodec {
    /// Copy `archive` onto itself, replacing the named members' content.
    ///
    /// The new archive is written next to the old one and renamed into place.
    pub fn rewrite(&self, archive: &Path, replacements: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let mut input = open_zip(archive)?;
        let mut output = temp_sibling(archive)?;

        {
            let mut zip_writer = ZipWriter::new(BufWriter::new(output.as_file_mut()));
            for i in 0..input.len() {
                let mut file = input.by_index(i).map_err(|e| repack_error(archive, e))?;
                let name = file.name().to_string();
                let options = entry_options(file.compression());

                if file.is_dir() {
                    zip_writer
                        .add_directory(name.as_str(), options)
                        .map_err(|e| repack_error(archive, e))?;
                    continue;
                }

                zip_writer
                    .start_file(name.as_str(), options)
                    .map_err(|e| repack_error(archive, e))?;
                match replacements.get(&name) {
                    Some(content) => zip_writer.write_all(content)?,
                    None => {
                        let mut buffer = Vec::new();
                        file.read_to_end(&mut buffer)?;
                        zip_writer.write_all(&buffer)?;
                    }
                }
            }
            let mut inner = zip_writer.finish().map_err(|e| repack_error(archive, e))?;
            inner.flush()?;
        }

        persist(output, archive)
    }
}

impl ArchiveCodec for ZipCodec {
    fn entries(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let mut zip = open_zip(archive)?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let file = zip.by_index(i).map_err(|e| EditorError::PackageOpen {
                path: archive.to_path_buf(),
                message: e.to_string(),
            })?;
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                compression: file.compression(),
                is_dir: file.is_dir(),
            });
        }
        Ok(entries)
    }

    fn unpack(&self, archive: &Path, dest: &Path) -> Result<Vec<ArchiveEntry>> {
        let entries = self.entries(archive)?;
        let mut zip = open_zip(archive)?;
        zip.extract(dest).map_err(|e| EditorError::Extraction {
            path: archive.to_path_buf(),
            message: e.to_string(),
        })?;

        let usable = fs::read_dir(dest)
            .map(|mut dir| dir.next().is_some())
            .unwrap_or(false);
        if !usable {
            return Err(EditorError::Extraction {
                path: archive.to_path_buf(),
                message: format!("nothing was extracted into {}", dest.display()),
            });
        }

        debug!(archive = %archive.display(), members = entries.len(), "unpacked archive");
        Ok(entries)
    }

    fn pack(&self, source: &Path, entries: &[ArchiveEntry], archive: &Path) -> Result<()> {
        let mut output = temp_sibling(archive)?;

        {
            let mut zip_writer = ZipWriter::new(BufWriter::new(output.as_file_mut()));
            for entry in entries {
                let options = entry_options(entry.compression);
                if entry.is_dir {
                    zip_writer
                        .add_directory(entry.name.as_str(), options)
                        .map_err(|e| repack_error(archive, e))?;
                    continue;
                }

                let path = member_path(source, &entry.name);
                if !path.is_file() {
                    debug!(member = %entry.name, "member removed from scratch tree, skipping");
                    continue;
                }

                let content = fs::read(&path).map_err(|e| repack_error(archive, e))?;
                zip_writer
                    .start_file(entry.name.as_str(), options)
                    .map_err(|e| repack_error(archive, e))?;
                zip_writer
                    .write_all(&content)
                    .map_err(|e| repack_error(archive, e))?;
            }
            let mut inner = zip_writer.finish().map_err(|e| repack_error(archive, e))?;
            inner.flush().map_err(|e| repack_error(archive, e))?;
        }

        persist(output, archive)
    }
}

/// Location of archive member `name` inside an extracted tree
pub fn member_path(root: &Path, name: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in name.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

pub(crate) fn open_zip(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path).map_err(|e| EditorError::PackageOpen {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| EditorError::PackageOpen {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn entry_options(method: CompressionMethod) -> SimpleFileOptions {
    // Only stored and deflated members are written back
    let method = match method {
        CompressionMethod::Stored => CompressionMethod::Stored,
        _ => CompressionMethod::Deflated,
    };
    SimpleFileOptions::default().compression_method(method)
}

fn temp_sibling(archive: &Path) -> Result<NamedTempFile> {
    let dir = archive
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    NamedTempFile::new_in(dir).map_err(|e| repack_error(archive, e))
}

fn persist(output: NamedTempFile, archive: &Path) -> Result<()> {
    output
        .persist(archive)
        .map_err(|e| repack_error(archive, e.error))?;
    Ok(())
}

fn repack_error(archive: &Path, err: impl std::fmt::Display) -> EditorError {
    EditorError::Repack {
        path: archive.to_path_buf(),
        message: err.to_string(),
    }
}
