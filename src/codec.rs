//! Streaming archive extraction.
//!
//! Snapshots are tar streams compressed with LZ4 (some mirrors also publish
//! gzip). Entries are written one by one straight from the decompressor, so
//! multi-gigabyte archives never need to be held in memory or decompressed to
//! an intermediate tar file.

use crate::error::SnapshotError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, warn};

const READ_BUFFER: usize = 4 * 1024 * 1024;

/// Compression wrapped around a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Lz4Tar,
    GzipTar,
}

impl ArchiveFormat {
    /// Guesses the format from a file name, defaulting to LZ4.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".gz") || lower.ends_with(".tgz") {
            ArchiveFormat::GzipTar
        } else {
            ArchiveFormat::Lz4Tar
        }
    }
}

/// Counters reported after an extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: u64,
    pub dirs: u64,
    pub skipped: u64,
    pub bytes: u64,
}

/// Decompresses an LZ4 tar archive into `dest_dir`.
///
/// Directories are created if missing, regular files are created or truncated
/// and receive the permission bits from their header. Other entry types are
/// skipped with a warning. The first I/O error aborts the extraction.
pub fn extract_lz4_tar(archive_path: &Path, dest_dir: &Path) -> Result<ExtractStats, SnapshotError> {
    let file = File::open(archive_path).map_err(|e| SnapshotError::fs(archive_path, e))?;
    let reader = lz4_flex::frame::FrameDecoder::new(BufReader::with_capacity(READ_BUFFER, file));
    unpack(reader, archive_path, dest_dir)
}

/// Same as [`extract_lz4_tar`] for gzip-compressed archives.
pub fn extract_gzip_tar(archive_path: &Path, dest_dir: &Path) -> Result<ExtractStats, SnapshotError> {
    let file = File::open(archive_path).map_err(|e| SnapshotError::fs(archive_path, e))?;
    let reader = GzDecoder::new(BufReader::with_capacity(READ_BUFFER, file));
    unpack(reader, archive_path, dest_dir)
}

/// Extracts an archive, picking the decompressor from its file name.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<ExtractStats, SnapshotError> {
    let name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    match ArchiveFormat::from_name(name) {
        ArchiveFormat::Lz4Tar => extract_lz4_tar(archive_path, dest_dir),
        ArchiveFormat::GzipTar => extract_gzip_tar(archive_path, dest_dir),
    }
}

/// Runs [`extract_archive`] on the blocking pool with a progress spinner.
pub async fn extract_in_background(
    archive_path: PathBuf,
    dest_dir: PathBuf,
) -> Result<ExtractStats, SnapshotError> {
    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_style(
        indicatif::ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} | {elapsed_precise} elapsed")
            .map_err(|e| SnapshotError::Config(e.to_string()))?,
    );
    spinner.set_message(format!("📂 Extracting {}", archive_path.display()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest_dir))
        .await
        .map_err(|e| SnapshotError::Io(io::Error::other(format!("Task join error: {}", e))))?;

    match &result {
        Ok(stats) => spinner.finish_with_message(format!(
            "✅ Extracted {} files ({} dirs, {} skipped)",
            stats.files, stats.dirs, stats.skipped
        )),
        Err(_) => spinner.finish_with_message("❌ Extraction failed"),
    }
    result
}

fn unpack<R: Read>(
    reader: R,
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<ExtractStats, SnapshotError> {
    fs::create_dir_all(dest_dir).map_err(|e| SnapshotError::fs(dest_dir, e))?;

    let mut archive = Archive::new(reader);
    let mut stats = ExtractStats::default();
    // modes of created directories, applied once their children exist
    let mut dir_modes: Vec<(PathBuf, Option<u32>)> = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| SnapshotError::fs(archive_path, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| SnapshotError::fs(archive_path, e))?;
        let rel = entry
            .path()
            .map_err(|e| SnapshotError::fs(archive_path, e))?
            .into_owned();

        let Some(target) = contained_path(dest_dir, &rel) else {
            warn!("Skipping entry outside destination: {}", rel.display());
            stats.skipped += 1;
            continue;
        };
        let mode = entry.header().mode().ok();

        match entry.header().entry_type() {
            EntryType::Directory => {
                let existed = target.is_dir();
                fs::create_dir_all(&target).map_err(|e| SnapshotError::fs(&target, e))?;
                if !existed {
                    dir_modes.push((target, mode));
                }
                stats.dirs += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| SnapshotError::fs(parent, e))?;
                }
                let mut out = File::create(&target).map_err(|e| SnapshotError::fs(&target, e))?;
                let written =
                    io::copy(&mut entry, &mut out).map_err(|e| SnapshotError::fs(&target, e))?;
                drop(out);
                apply_mode(&target, mode)?;
                stats.files += 1;
                stats.bytes += written;
            }
            other => {
                warn!("Unsupported entry type {:?} for {}, skipping", other, rel.display());
                stats.skipped += 1;
            }
        }
    }

    // deepest first, so a read-only parent never blocks its children
    dir_modes.sort_by(|a, b| b.0.cmp(&a.0));
    for (dir, mode) in &dir_modes {
        apply_mode(dir, *mode)?;
    }

    debug!(
        "Extracted {} into {}: {:?}",
        archive_path.display(),
        dest_dir.display(),
        stats
    );
    Ok(stats)
}

/// Joins `rel` onto `root`, refusing anything that would leave `root`.
fn contained_path(root: &Path, rel: &Path) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<(), SnapshotError> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| SnapshotError::fs(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<(), SnapshotError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tar::{Builder, Header};

    fn lz4_archive<F>(path: &Path, build: F)
    where
        F: FnOnce(&mut Builder<lz4_flex::frame::FrameEncoder<File>>),
    {
        let file = File::create(path).unwrap();
        let mut builder = Builder::new(lz4_flex::frame::FrameEncoder::new(file));
        build(&mut builder);
        let encoder = builder.into_inner().unwrap();
        encoder.finish().unwrap().flush().unwrap();
    }

    fn file_header(path: &str, size: u64, mode: u32) -> Header {
        let mut header = Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(size);
        header.set_mode(mode);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        header
    }

    #[test]
    fn format_from_name() {
        assert_eq!(ArchiveFormat::from_name("story.tar.lz4"), ArchiveFormat::Lz4Tar);
        assert_eq!(ArchiveFormat::from_name("Story_snapshot.lz4"), ArchiveFormat::Lz4Tar);
        assert_eq!(ArchiveFormat::from_name("geth.TAR.GZ"), ArchiveFormat::GzipTar);
        assert_eq!(ArchiveFormat::from_name("snapshot"), ArchiveFormat::Lz4Tar);
    }

    #[cfg(unix)]
    #[test]
    fn round_trip_preserves_content_and_modes() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("data/blocks")).unwrap();
        fs::write(src.join("data/blocks/000001.sst"), vec![7u8; 100_000]).unwrap();
        fs::write(src.join("data/priv_validator_state.json"), b"{\"height\":\"9\"}").unwrap();
        fs::write(src.join("run.sh"), b"#!/bin/sh\necho ok\n").unwrap();
        fs::set_permissions(src.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(
            src.join("data/priv_validator_state.json"),
            fs::Permissions::from_mode(0o600),
        )
        .unwrap();
        fs::set_permissions(src.join("data/blocks"), fs::Permissions::from_mode(0o750)).unwrap();

        let archive = tmp.path().join("snap.tar.lz4");
        lz4_archive(&archive, |b| b.append_dir_all(".", &src).unwrap());

        let dest = tmp.path().join("dest");
        let stats = extract_lz4_tar(&archive, &dest).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.skipped, 0);

        for rel in ["data/blocks/000001.sst", "data/priv_validator_state.json", "run.sh"] {
            assert_eq!(fs::read(src.join(rel)).unwrap(), fs::read(dest.join(rel)).unwrap());
            let want = fs::metadata(src.join(rel)).unwrap().permissions().mode() & 0o7777;
            let got = fs::metadata(dest.join(rel)).unwrap().permissions().mode() & 0o7777;
            assert_eq!(want, got, "mode of {}", rel);
        }
        let dir_mode = fs::metadata(dest.join("data/blocks")).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o7777, 0o750);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directory_still_receives_children() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("snap.tar.lz4");
        lz4_archive(&archive, |b| {
            let mut dir = Header::new_gnu();
            dir.set_path("config/").unwrap();
            dir.set_mode(0o555);
            dir.set_size(0);
            dir.set_entry_type(EntryType::Directory);
            dir.set_cksum();
            b.append(&dir, io::empty()).unwrap();
            b.append(&file_header("config/genesis.json", 2, 0o444), &b"{}"[..]).unwrap();
        });

        let dest = tmp.path().join("dest");
        let stats = extract_lz4_tar(&archive, &dest).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(fs::read(dest.join("config/genesis.json")).unwrap(), b"{}");
        let mode = fs::metadata(dest.join("config")).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o555);

        fs::set_permissions(dest.join("config"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn overwrites_into_existing_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("dest");
        fs::create_dir_all(dest.join("data")).unwrap();
        fs::write(dest.join("data/state.db"), b"old contents that are longer").unwrap();
        fs::write(dest.join("data/keep.txt"), b"untouched").unwrap();

        let archive = tmp.path().join("snap.tar.lz4");
        lz4_archive(&archive, |b| {
            let mut dir = Header::new_gnu();
            dir.set_path("data/").unwrap();
            dir.set_mode(0o700);
            dir.set_size(0);
            dir.set_entry_type(EntryType::Directory);
            dir.set_cksum();
            b.append(&dir, io::empty()).unwrap();
            b.append(&file_header("data/state.db", 3, 0o644), &b"new"[..]).unwrap();
        });

        extract_lz4_tar(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("data/state.db")).unwrap(), b"new");
        assert_eq!(fs::read(dest.join("data/keep.txt")).unwrap(), b"untouched");
    }

    #[test]
    fn skips_links_and_escaping_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("snap.tar.lz4");
        lz4_archive(&archive, |b| {
            let mut link = Header::new_gnu();
            link.set_path("current").unwrap();
            link.set_link_name("data").unwrap();
            link.set_size(0);
            link.set_entry_type(EntryType::Symlink);
            link.set_cksum();
            b.append(&link, io::empty()).unwrap();

            let mut evil = file_header("placeholder", 4, 0o644);
            let name = b"../evil.txt";
            let raw = &mut evil.as_old_mut().name;
            raw.iter_mut().for_each(|c| *c = 0);
            raw[..name.len()].copy_from_slice(name);
            evil.set_cksum();
            b.append(&evil, &b"evil"[..]).unwrap();

            b.append(&file_header("ok.txt", 2, 0o644), &b"ok"[..]).unwrap();
        });

        let dest = tmp.path().join("dest");
        let stats = extract_lz4_tar(&archive, &dest).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.skipped, 2);
        assert!(!tmp.path().join("evil.txt").exists());
        assert!(!dest.join("current").exists());
        assert_eq!(fs::read(dest.join("ok.txt")).unwrap(), b"ok");
    }

    #[test]
    fn corrupt_archive_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("broken.tar.lz4");
        fs::write(&archive, b"definitely not lz4").unwrap();
        assert!(extract_lz4_tar(&archive, &tmp.path().join("dest")).is_err());
        assert!(extract_lz4_tar(&tmp.path().join("absent.lz4"), tmp.path()).is_err());
    }

    #[test]
    fn gzip_archives_dispatch_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("snap.tar.gz");
        let file = File::create(&archive).unwrap();
        let mut builder = Builder::new(flate2::write::GzEncoder::new(
            file,
            flate2::Compression::fast(),
        ));
        builder
            .append(&file_header("hello.txt", 5, 0o644), &b"hello"[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = tmp.path().join("dest");
        extract_archive(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("hello.txt")).unwrap(), b"hello");
    }
}
