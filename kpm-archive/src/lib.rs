// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archive extraction for the kernel-header fetching engine.

Covers the two outer container formats the engine ever downloads: tar
streams (optionally compressed with gzip, xz, bzip2 or zstd) and the `ar`
archive that wraps a `.deb`. Both extraction paths share the same
containment rule: an absolute symlink target is rewritten to live under the
extraction root rather than pointing at the real path on the host.
*/

use kpm_core::KpmLogger;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("tar error: {0}")]
    Tar(io::Error),

    #[error("ar error: {0}")]
    Ar(io::Error),

    #[error("unrecognized archive compression suffix: {0}")]
    UnknownCompression(String),

    #[error("archive entry path escapes the extraction root: {0}")]
    PathEscape(String),

    #[error("extraction cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Join `relative` onto `root`, refusing any component that would escape it.
///
/// This is the "path-sanitising join" every extraction path in the engine
/// is required to route through; no archive entry is ever allowed to write
/// outside the caller-provided output directory.
pub fn contained_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                // An absolute entry path is re-rooted under the extraction
                // directory rather than rejected; this mirrors how symlink
                // targets are handled below.
            }
            Component::ParentDir => {
                return Err(Error::PathEscape(relative.to_string()));
            }
        }
    }
    Ok(out)
}

/// Apply the absolute/relative symlink containment rule from the data model:
/// an absolute `linkname` is rewritten under `root`; a relative one is kept
/// verbatim so it still resolves correctly relative to the link's location.
pub fn rewrite_symlink_target(root: &Path, linkname: &str) -> PathBuf {
    if let Some(stripped) = linkname.strip_prefix('/') {
        root.join(stripped)
    } else {
        PathBuf::from(linkname)
    }
}

fn decompressor_for_suffix<'a>(
    suffix: &str,
    reader: Box<dyn Read + 'a>,
) -> Result<Box<dyn Read + 'a>> {
    match suffix {
        "" => Ok(reader),
        ".gz" | ".tgz" => Ok(Box::new(
            libflate::gzip::Decoder::new(reader).map_err(Error::Io)?,
        )),
        ".xz" | ".txz" => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        ".bz2" | ".tbz2" => Ok(Box::new(bzip2::read::BzDecoder::new(reader))),
        ".zst" | ".tzst" => Ok(Box::new(zstd::Decoder::new(reader).map_err(Error::Io)?)),
        other => Err(Error::UnknownCompression(other.to_string())),
    }
}

/// Extract a (possibly compressed) tar stream identified by `filename`'s
/// extension into `destination`, which is created if it does not exist.
///
/// Directories are created mode 0755; regular file contents are streamed
/// through a bounded buffer rather than relying on `io::copy`'s
/// `ReadBuf`-backed fast path, so a single very large member cannot force an
/// outsized allocation. Unsupported entry types are logged and skipped.
/// Any single entry failing aborts the whole extraction.
pub fn extract_tarball<R: Read>(
    reader: R,
    filename: &str,
    destination: &Path,
    logger: &dyn KpmLogger,
    cancel: &CancellationToken,
) -> Result<()> {
    let suffix = archive_suffix(filename);
    let decompressed = decompressor_for_suffix(suffix, Box::new(reader))?;
    extract_tar_stream(decompressed, destination, logger, cancel)
}

/// Extract an already-decompressed tar stream into `destination`. `cancel`
/// is checked once before any entry is written, matching the rest of the
/// engine's per-operation (not per-chunk) cancellation granularity.
pub fn extract_tar_stream<R: Read>(
    reader: R,
    destination: &Path,
    logger: &dyn KpmLogger,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    fs::create_dir_all(destination)?;
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries().map_err(Error::Tar)? {
        let mut entry = entry.map_err(Error::Tar)?;
        let header = entry.header().clone();
        let name = entry.path().map_err(Error::Tar)?.to_string_lossy().into_owned();
        let path = contained_join(destination, &name)?;

        match header.entry_type() {
            tar::EntryType::Directory => {
                fs::create_dir_all(&path)?;
            }
            tar::EntryType::Symlink => {
                let linkname = entry
                    .link_name()
                    .map_err(Error::Tar)?
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let target = rewrite_symlink_target(destination, &linkname);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let _ = fs::remove_file(&path);
                symlink(&target, &path)?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut output = fs::File::create(&path)?;
                copy_bounded(&mut entry, &mut output)?;
            }
            other => {
                logger.warn(&format!(
                    "unsupported tar entry type {:?} for '{}', skipping",
                    other, name
                ));
            }
        }
    }

    Ok(())
}

/// Extract a `.deb`'s outer `ar` archive, invoking `on_member` for every
/// member in order with its filename and an already-decompressed reader
/// sniffed from the filename's trailing extension (`""`, `.gz`, `.xz`,
/// `.zst`). Iteration stops as soon as `on_member` returns `Ok(true)`
/// ("handled, stop looking further") so callers like the DEB client can bail
/// out after the first `data.tar*` member per the spec's enumeration order.
pub fn extract_ar_members<R, F>(reader: R, mut on_member: F, cancel: &CancellationToken) -> Result<()>
where
    R: Read,
    F: FnMut(&str, Box<dyn Read + '_>) -> Result<bool>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let mut archive = ar::Archive::new(reader);
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(Error::Ar)?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(Error::Ar)?;
        drop(entry);

        let cursor = io::Cursor::new(data);
        let stop = on_member(&name, Box::new(cursor))?;
        if stop {
            break;
        }
    }
    Ok(())
}

/// Resolve a member's compression suffix and hand back a decompressing
/// reader, mirroring the `control.tar*` / `data.tar*` dispatch inside a
/// `.deb`.
pub fn decompress_member<'a>(
    member_name: &str,
    prefix: &str,
    data: Box<dyn Read + 'a>,
) -> Result<Box<dyn Read + 'a>> {
    let suffix = member_name.strip_prefix(prefix).unwrap_or("");
    decompressor_for_suffix(suffix, data)
}

fn archive_suffix(filename: &str) -> &str {
    for suffix in [".tar.gz", ".tar.xz", ".tar.bz2", ".tar.zst"] {
        if filename.ends_with(suffix) {
            return &suffix[4..];
        }
    }
    for suffix in [".gz", ".xz", ".bz2", ".zst", ".tgz", ".txz", ".tbz2", ".tzst"] {
        if filename.ends_with(suffix) {
            return suffix;
        }
    }
    ""
}

fn copy_bounded<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<()> {
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    let _ = (target, link);
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink extraction requires a unix target",
    ))
}
