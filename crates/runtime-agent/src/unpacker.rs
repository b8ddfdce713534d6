// Package unpacking: expands the downloaded archive into the workspace.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::error::AgentError;

/// Archive formats the agent can expand, recognised by their magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Identify the format from the first bytes of a file.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        match header {
            // Local file header, empty archive, spanned archive.
            [b'P', b'K', 3, 4, ..] | [b'P', b'K', 5, 6, ..] | [b'P', b'K', 7, 8, ..] => {
                Some(ArchiveFormat::Zip)
            }
            [0x1f, 0x8b, ..] => Some(ArchiveFormat::TarGz),
            _ => None,
        }
    }
}

/// Result of expanding a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedPackage {
    pub root: PathBuf,
    pub format: ArchiveFormat,
    /// Number of regular files written.
    pub files: usize,
}

/// Expand `archive` into `destination`, preserving relative paths.
///
/// Extraction runs on the blocking pool; the returned future resolves once
/// every entry has been written. Dropping the future stops extraction before
/// the next entry.
pub async fn unpack(archive: &Path, destination: &Path) -> Result<UnpackedPackage, AgentError> {
    let archive_path = archive.to_path_buf();
    let root = destination.to_path_buf();
    let cancelled = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(Arc::clone(&cancelled));

    let result = tokio::task::spawn_blocking(move || extract(&archive_path, &root, &cancelled))
        .await
        .context("Extraction task panicked")
        .and_then(|r| r);

    let package = result.map_err(|e| AgentError::Unpack {
        archive: archive.to_path_buf(),
        source: e.into(),
    })?;

    tracing::info!(
        format = ?package.format,
        files = package.files,
        "Extracted action package to '{}'",
        package.root.display()
    );
    Ok(package)
}

struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<()> {
    if cancelled.load(Ordering::Relaxed) {
        anyhow::bail!("Extraction cancelled");
    }
    Ok(())
}

fn extract(archive: &Path, destination: &Path, cancelled: &AtomicBool) -> Result<UnpackedPackage> {
    let mut header = [0u8; 4];
    let read = {
        let mut file = File::open(archive)
            .with_context(|| format!("Failed to open archive '{}'", archive.display()))?;
        read_up_to(&mut file, &mut header)?
    };
    if read == 0 {
        anyhow::bail!("Archive is empty");
    }

    let format = ArchiveFormat::sniff(&header[..read])
        .ok_or_else(|| anyhow::anyhow!("Unsupported archive format"))?;

    fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create '{}'", destination.display()))?;

    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive '{}'", archive.display()))?;
    let files = match format {
        ArchiveFormat::Zip => extract_zip(file, destination, cancelled)?,
        ArchiveFormat::TarGz => extract_tar_gz(file, destination, cancelled)?,
    };

    Ok(UnpackedPackage {
        root: destination.to_path_buf(),
        format,
        files,
    })
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn extract_zip(file: File, destination: &Path, cancelled: &AtomicBool) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(file).context("Corrupt zip archive")?;
    let mut files = 0;

    for index in 0..archive.len() {
        check_cancelled(cancelled)?;
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("Failed to read zip entry #{index}"))?;
        let relative: PathBuf = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| {
                anyhow::anyhow!("Entry '{}' escapes the output directory", entry.name())
            })?;
        let target = destination.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create '{}'", target.display()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create '{}'", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract '{}'", relative.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))
                .with_context(|| format!("Failed to set permissions on '{}'", target.display()))?;
        }

        files += 1;
    }

    Ok(files)
}

fn extract_tar_gz(file: File, destination: &Path, cancelled: &AtomicBool) -> Result<usize> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    let mut files = 0;

    for entry_result in archive.entries().context("Corrupt tar archive")? {
        check_cancelled(cancelled)?;
        let mut entry = entry_result.context("Corrupt tar entry")?;
        let path = entry.path()?.into_owned();

        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            anyhow::bail!("Entry '{}' escapes the output directory", path.display());
        }

        let is_file = entry.header().entry_type().is_file();
        entry
            .unpack_in(destination)
            .with_context(|| format!("Failed to extract '{}'", path.display()))?;
        if is_file {
            files += 1;
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn zip_bytes(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, mode) in entries {
            let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn write_archive(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("action");
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn sniff_formats() {
        assert_eq!(ArchiveFormat::sniff(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(b"PK\x05\x06"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(&[0x1f, 0x8b, 8, 0]), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::sniff(b"#!/b"), None);
        assert_eq!(ArchiveFormat::sniff(b"P"), None);
    }

    #[tokio::test]
    async fn unpack_zip_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            &zip_bytes(&[
                ("index", b"#!/bin/sh\necho 1\n", 0o755),
                ("lib/util.txt", b"helper", 0o644),
            ]),
        );
        let out = dir.path().join("extracted");

        let package = unpack(&archive, &out).await.unwrap();

        assert_eq!(package.format, ArchiveFormat::Zip);
        assert_eq!(package.files, 2);
        assert_eq!(fs::read(out.join("lib").join("util.txt")).unwrap(), b"helper");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(out.join("index")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn unpack_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            &tar_gz_bytes(&[("index.txt", b"entry"), ("nested/deep/data.json", b"{}")]),
        );
        let out = dir.path().join("extracted");

        let package = unpack(&archive, &out).await.unwrap();

        assert_eq!(package.format, ArchiveFormat::TarGz);
        assert_eq!(package.files, 2);
        assert_eq!(fs::read(out.join("nested/deep/data.json")).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn unpack_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), b"this is not an archive");

        let err = unpack(&archive, &dir.path().join("out")).await.unwrap_err();

        assert_eq!(err.kind(), "UnpackError");
        assert!(err.report_message().contains("Unsupported archive format"));
    }

    #[tokio::test]
    async fn unpack_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), b"");

        let err = unpack(&archive, &dir.path().join("out")).await.unwrap_err();
        assert!(err.report_message().contains("Archive is empty"));
    }

    #[tokio::test]
    async fn unpack_rejects_corrupt_zip() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = zip_bytes(&[("index", b"data", 0o644)]);
        bytes.truncate(bytes.len() / 2);
        let archive = write_archive(dir.path(), &bytes);

        let err = unpack(&archive, &dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err, AgentError::Unpack { .. }));
    }

    #[tokio::test]
    async fn unpack_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), &zip_bytes(&[("../evil.txt", b"x", 0o644)]));
        let out = dir.path().join("out");

        let err = unpack(&archive, &out).await.unwrap_err();

        assert!(err.report_message().contains("escapes the output directory"));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn cancelled_extraction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let zip = write_archive(dir.path(), &zip_bytes(&[("index", b"x", 0o644)]));
        let cancelled = AtomicBool::new(true);

        let err = extract(&zip, &out, &cancelled).unwrap_err();
        assert_eq!(err.to_string(), "Extraction cancelled");
        assert!(!out.join("index").exists());

        let tgz = dir.path().join("action.tgz");
        fs::write(&tgz, tar_gz_bytes(&[("index", b"x")])).unwrap();
        assert!(extract(&tgz, &out, &cancelled).is_err());
        assert!(!out.join("index").exists());
    }

    #[test]
    fn dropping_the_guard_cancels() {
        let flag = Arc::new(AtomicBool::new(false));
        drop(CancelOnDrop(Arc::clone(&flag)));
        assert!(flag.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn unpack_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = unpack(&dir.path().join("absent"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(err.report_message().contains("Failed to open archive"));
    }
}
