// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reader for the "New ASCII" (`070701`) cpio format.

RPM payloads are always written in this variant, so unlike a general-purpose
cpio library this crate does not implement the older "Old ASCII" (`070707`)
format at all: there is nothing upstream of it that would ever hand this
crate anything else.
*/

use chrono::{DateTime, NaiveDateTime, Utc};
use std::ffi::CStr;
use std::fs;
use std::io::{Read, Take};
use std::path::Path;

pub const MAGIC: &[u8] = b"070701";

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad cpio magic value")]
    BadMagic,

    #[error("header field is not an ASCII string")]
    BadHeaderString,

    #[error("header field '{0}' is not valid hex")]
    BadHeaderHex(String),

    #[error("entry filename could not be decoded")]
    FilenameDecode,

    #[error(transparent)]
    Extraction(#[from] kpm_archive::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn read_hex(reader: &mut impl Read, count: usize) -> Result<u32> {
    let mut buffer = vec![0u8; count];
    reader.read_exact(&mut buffer)?;
    let s = std::str::from_utf8(&buffer).map_err(|_| Error::BadHeaderString)?;
    u32::from_str_radix(s, 16).map_err(|_| Error::BadHeaderHex(s.to_string()))
}

/// A single cpio "New ASCII" header.
#[derive(Clone, Debug)]
pub struct NewcHeader {
    pub inode: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub file_size: u32,
    pub name: String,
}

impl NewcHeader {
    fn from_reader(reader: &mut impl Read) -> Result<Self> {
        let inode = read_hex(reader, 8)?;
        let mode = read_hex(reader, 8)?;
        let uid = read_hex(reader, 8)?;
        let gid = read_hex(reader, 8)?;
        let nlink = read_hex(reader, 8)?;
        let mtime = read_hex(reader, 8)?;
        let file_size = read_hex(reader, 8)?;
        let _dev_major = read_hex(reader, 8)?;
        let _dev_minor = read_hex(reader, 8)?;
        let _rdev_major = read_hex(reader, 8)?;
        let _rdev_minor = read_hex(reader, 8)?;
        let name_length = read_hex(reader, 8)?;
        let _checksum = read_hex(reader, 8)?;

        let mut name_data = vec![0u8; name_length as usize];
        reader.read_exact(&mut name_data)?;
        let name = CStr::from_bytes_with_nul(&name_data)
            .map_err(|_| Error::FilenameDecode)?
            .to_string_lossy()
            .to_string();

        // Header + name is padded to a 4 byte boundary.
        let header_and_name_len = 6 + 13 * 8 + name_data.len();
        let pad = (4 - header_and_name_len % 4) % 4;
        let mut pad_buf = vec![0u8; pad];
        reader.read_exact(&mut pad_buf)?;

        Ok(Self {
            inode,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            file_size,
            name,
        })
    }

    pub fn modified_time(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_utc(NaiveDateTime::from_timestamp(self.mtime as i64, 0), Utc)
    }

    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }
}

/// Cursor over the members of a New ASCII cpio archive.
///
/// Behaves like tar's `Entries`: advancing to the next header via
/// [Self::read_next] invalidates the [Read] implementation for the previous
/// member.
pub struct NewcReader<T: Read> {
    archive_reader: Option<T>,
    entry_reader: Option<Take<T>>,
    entry_data_pad: usize,
    seen_trailer: bool,
}

impl<T: Read> NewcReader<T> {
    pub fn new(reader: T) -> Self {
        Self {
            archive_reader: Some(reader),
            entry_reader: None,
            entry_data_pad: 0,
            seen_trailer: false,
        }
    }

    pub fn read_next(&mut self) -> Result<Option<NewcHeader>> {
        self.finish_current()?;

        let Some(mut reader) = self.archive_reader.take() else {
            return Ok(None);
        };

        let mut magic = [0u8; 6];
        match reader.read_exact(&mut magic) {
            Ok(_) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        if magic != MAGIC {
            return Err(Error::BadMagic);
        }

        let header = NewcHeader::from_reader(&mut reader)?;

        if header.name == "TRAILER!!!" {
            self.seen_trailer = true;
            Ok(None)
        } else {
            let size = header.file_size as usize;
            self.entry_data_pad = (4 - size % 4) % 4;
            self.entry_reader = Some(reader.take(header.file_size as u64));
            Ok(Some(header))
        }
    }

    fn finish_current(&mut self) -> Result<()> {
        if let Some(mut reader) = self.entry_reader.take() {
            let mut buffer = vec![0u8; 32 * 1024];
            while reader.read(&mut buffer)? != 0 {}

            let mut reader = reader.into_inner();
            let mut pad = vec![0u8; self.entry_data_pad];
            reader.read_exact(&mut pad)?;
            self.entry_data_pad = 0;

            if !self.seen_trailer {
                self.archive_reader = Some(reader);
            }
        }
        Ok(())
    }
}

impl<T: Read> Read for NewcReader<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.entry_reader {
            Some(reader) => reader.read(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no current cpio entry to read from",
            )),
        }
    }
}

/// Expand every member of a New ASCII cpio stream under `destination`.
///
/// Unlike tar, cpio has no dedicated symlink-target header field: a symlink
/// member's "file content" *is* its target path. The same absolute-target
/// rewrite rule used for tar extraction (component B) applies here so the
/// expanded RPM payload never contains a symlink that escapes the
/// extraction root.
pub fn expand<T: Read>(reader: T, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination)?;
    let mut archive = NewcReader::new(reader);

    while let Some(header) = archive.read_next()? {
        let path = kpm_archive::contained_join(destination, &header.name)?;

        if header.is_directory() {
            fs::create_dir_all(&path)?;
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if header.is_symlink() {
            let mut target = String::with_capacity(header.file_size as usize);
            archive.read_to_string(&mut target)?;
            let target = kpm_archive::rewrite_symlink_target(destination, &target);
            let _ = fs::remove_file(&path);
            symlink(&target, &path)?;
        } else {
            let mut output = fs::File::create(&path)?;
            std::io::copy(&mut archive, &mut output)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    let _ = (target, link);
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlink extraction requires a unix target",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn newc_header_bytes(name: &str, mode: u32, file_size: u32) -> Vec<u8> {
        let name_with_nul = format!("{}\0", name);
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(format!("{:08x}", 1).as_bytes()); // inode
        out.extend_from_slice(format!("{:08x}", mode).as_bytes());
        out.extend_from_slice(format!("{:08x}", 0).as_bytes()); // uid
        out.extend_from_slice(format!("{:08x}", 0).as_bytes()); // gid
        out.extend_from_slice(format!("{:08x}", 1).as_bytes()); // nlink
        out.extend_from_slice(format!("{:08x}", 0).as_bytes()); // mtime
        out.extend_from_slice(format!("{:08x}", file_size).as_bytes());
        for _ in 0..4 {
            out.extend_from_slice(format!("{:08x}", 0).as_bytes()); // dev/rdev major/minor
        }
        out.extend_from_slice(format!("{:08x}", name_with_nul.len()).as_bytes());
        out.extend_from_slice(format!("{:08x}", 0).as_bytes()); // checksum
        out.extend_from_slice(name_with_nul.as_bytes());

        let header_and_name_len = 6 + 13 * 8 + name_with_nul.len();
        let pad = (4 - header_and_name_len % 4) % 4;
        out.extend(std::iter::repeat(0u8).take(pad));
        out
    }

    fn trailer_bytes() -> Vec<u8> {
        newc_header_bytes("TRAILER!!!", 0, 0)
    }

    #[test]
    fn reads_a_regular_file_entry() {
        let mut data = newc_header_bytes("./hello.txt", 0o100644, 5);
        data.extend_from_slice(b"world");
        data.extend(std::iter::repeat(0u8).take((4 - 5 % 4) % 4));
        data.extend(trailer_bytes());

        let mut archive = NewcReader::new(std::io::Cursor::new(data));
        let header = archive.read_next().unwrap().unwrap();
        assert_eq!(header.name, "./hello.txt");
        assert!(!header.is_directory());
        assert!(!header.is_symlink());

        let mut content = String::new();
        archive.read_to_string(&mut content).unwrap();
        assert_eq!(content, "world");

        assert!(archive.read_next().unwrap().is_none());
    }

    #[test]
    fn expand_rewrites_absolute_symlink_targets() {
        let dir = tempfile::tempdir().unwrap();

        let mut data = newc_header_bytes("./lib/modules/5.4.0/build", 0o120777, 8);
        data.extend_from_slice(b"/usr/src");
        data.extend(std::iter::repeat(0u8).take((4 - 8 % 4) % 4));
        data.extend(trailer_bytes());

        expand(std::io::Cursor::new(data), dir.path()).unwrap();

        let link = dir.path().join("lib/modules/5.4.0/build");
        let resolved = fs::read_link(link).unwrap();
        assert_eq!(resolved, dir.path().join("usr/src"));
    }
}
