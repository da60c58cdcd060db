// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Parses enough of the RPM file format to get at the cpio payload.

An RPM file is a lead (vestigial, fixed 96 bytes), a signature header, an
immutable metadata header, and finally the payload. Only the handful of
header tags needed to locate and decompress the payload are decoded here;
this is not a general-purpose RPM metadata reader.
*/

use kpm_core::KpmLogger;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use tokio_util::sync::CancellationToken;

const LEAD_SIZE: usize = 96;
const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
const HEADER_MAGIC: [u8; 3] = [0x8e, 0xad, 0xe8];

const TAG_PAYLOAD_FORMAT: i32 = 1124;
const TAG_PAYLOAD_COMPRESSOR: i32 = 1125;

const RPM_STRING_TYPE: i32 = 6;
const RPM_BIN_TYPE: i32 = 7;

const TAG_SIG_PGP: i32 = 1002;
const TAG_SIG_GPG: i32 = 1005;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not an RPM file: bad lead magic")]
    BadLeadMagic,

    #[error("malformed RPM header: bad magic")]
    BadHeaderMagic,

    #[error("unsupported RPM payload compressor: {0}")]
    UnsupportedCompressor(String),

    #[error(transparent)]
    Cpio(#[from] kpm_cpio::Error),

    #[error("extraction cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

struct IndexEntry {
    tag: i32,
    typ: i32,
    offset: i32,
    count: i32,
}

/// A decoded RPM header record (signature header or immutable header).
struct HeaderRecord {
    entries: Vec<IndexEntry>,
    data: Vec<u8>,
}

impl HeaderRecord {
    fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 3];
        reader.read_exact(&mut magic)?;
        if magic != HEADER_MAGIC {
            return Err(Error::BadHeaderMagic);
        }

        let mut rest = [0u8; 5];
        reader.read_exact(&mut rest)?; // version(1) + reserved(4)

        let nindex = read_be_i32(reader)?;
        let hsize = read_be_i32(reader)?;

        let mut entries = Vec::with_capacity(nindex.max(0) as usize);
        for _ in 0..nindex {
            let tag = read_be_i32(reader)?;
            let typ = read_be_i32(reader)?;
            let offset = read_be_i32(reader)?;
            let count = read_be_i32(reader)?;
            entries.push(IndexEntry {
                tag,
                typ,
                offset,
                count,
            });
        }

        let mut data = vec![0u8; hsize.max(0) as usize];
        reader.read_exact(&mut data)?;

        Ok(Self { entries, data })
    }

    /// Byte length of this record as laid out in the file: 16 byte prefix,
    /// 16 bytes per index entry, plus the data blob.
    fn encoded_len(&self) -> usize {
        16 + self.entries.len() * 16 + self.data.len()
    }

    fn string_tag(&self, tag: i32) -> Option<String> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.tag == tag && e.typ == RPM_STRING_TYPE)?;
        let start = entry.offset.max(0) as usize;
        let end = self.data[start..].iter().position(|&b| b == 0)? + start;
        std::str::from_utf8(&self.data[start..end]).ok().map(String::from)
    }

    fn bin_tag(&self, tag: i32) -> Option<Vec<u8>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.tag == tag && e.typ == RPM_BIN_TYPE)?;
        let start = entry.offset.max(0) as usize;
        let end = start + entry.count.max(0) as usize;
        self.data.get(start..end).map(|slice| slice.to_vec())
    }
}

/// The embedded OpenPGP signature packet and the bytes it covers.
///
/// RPM's `RPMSIGTAG_PGP`/`RPMSIGTAG_GPG` signature, when present, is
/// computed over everything following the signature header (the padding
/// bytes included up to the immutable header's start): the immutable
/// header plus the compressed payload.
pub struct SignedRpm {
    pub pgp_signature: Option<Vec<u8>>,
    pub signed_content: Vec<u8>,
}

/// Read just enough of an RPM to recover its embedded binary signature
/// packet (if any) and the bytes it was computed over, without expanding
/// the payload.
pub fn parse_for_verification(data: &[u8]) -> Result<SignedRpm> {
    let mut cursor = data;
    read_lead(&mut cursor)?;

    let signature = HeaderRecord::read_from(&mut cursor)?;
    let padding = (8 - signature.encoded_len() % 8) % 8;
    let mut pad_buf = vec![0u8; padding];
    cursor.read_exact(&mut pad_buf)?;

    let pgp_signature = signature
        .bin_tag(TAG_SIG_PGP)
        .or_else(|| signature.bin_tag(TAG_SIG_GPG));

    Ok(SignedRpm {
        pgp_signature,
        signed_content: cursor.to_vec(),
    })
}

fn read_be_i32(reader: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_lead(reader: &mut impl Read) -> Result<()> {
    let mut lead = [0u8; LEAD_SIZE];
    reader.read_exact(&mut lead)?;
    if lead[0..4] != LEAD_MAGIC {
        return Err(Error::BadLeadMagic);
    }
    Ok(())
}

fn decompressor_for<'a>(name: &str, reader: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
    match name {
        "gzip" | "" => Ok(Box::new(libflate::gzip::Decoder::new(reader)?)),
        "xz" => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        "zstd" => Ok(Box::new(zstd::Decoder::new(reader)?)),
        "none" => Ok(reader),
        other => Err(Error::UnsupportedCompressor(other.to_string())),
    }
}

/// Extract `package`'s cpio payload into `directory`, then fix up the
/// kernel-module `build`/`source` symlinks under
/// `<directory>/lib/modules/<kernel_uname>/` so they point back into
/// `directory` rather than the host's real installation path.
pub fn extract_rpm_package<R: Read>(
    mut package: R,
    directory: &Path,
    kernel_uname: &str,
    logger: &dyn KpmLogger,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    read_lead(&mut package)?;

    let signature = HeaderRecord::read_from(&mut package)?;
    let padding = (8 - signature.encoded_len() % 8) % 8;
    let mut pad_buf = vec![0u8; padding];
    package.read_exact(&mut pad_buf)?;

    let header = HeaderRecord::read_from(&mut package)?;

    let compressor = header
        .string_tag(TAG_PAYLOAD_COMPRESSOR)
        .unwrap_or_else(|| "gzip".to_string());
    let _format = header
        .string_tag(TAG_PAYLOAD_FORMAT)
        .unwrap_or_else(|| "cpio".to_string());

    let payload = decompressor_for(&compressor, Box::new(package))?;
    kpm_cpio::expand(payload, directory)?;

    fix_kernel_module_symlinks(directory, kernel_uname, logger);

    Ok(())
}

/// Rewrites `<directory>/lib/modules/<kernel_uname>/{build,source}` so that,
/// if either is an absolute symlink not already rooted under `directory`, it
/// is replaced with one that is.
fn fix_kernel_module_symlinks(directory: &Path, kernel_uname: &str, logger: &dyn KpmLogger) {
    let modules_dir = directory
        .join("lib/modules")
        .join(kernel_uname);

    for name in ["build", "source"] {
        let symlink_path = modules_dir.join(name);

        let metadata = match fs::symlink_metadata(&symlink_path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !metadata.file_type().is_symlink() {
            continue;
        }

        let destination = match fs::read_link(&symlink_path) {
            Ok(d) => d,
            Err(_) => continue,
        };

        if destination.starts_with(directory) {
            continue; // already correct
        }

        if fs::remove_file(&symlink_path).is_err() {
            logger.warn(&format!("failed to unlink symlink at {}", symlink_path.display()));
            continue;
        }

        let new_destination = kpm_archive::rewrite_symlink_target(
            directory,
            &destination.to_string_lossy(),
        );

        if let Err(e) = make_symlink(&new_destination, &symlink_path) {
            logger.warn(&format!(
                "failed to create symlink from {} to {}: {}",
                symlink_path.display(),
                new_destination.display(),
                e
            ));
            continue;
        }

        logger.debug(&format!(
            "created symlink from {} to {}",
            symlink_path.display(),
            new_destination.display()
        ));
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let _ = (target, link);
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink extraction requires a unix target",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpm_core::NullLogger;

    fn write_index_entry(out: &mut Vec<u8>, tag: i32, typ: i32, offset: i32, count: i32) {
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&typ.to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
    }

    fn build_header_record(tags: &[(i32, &str)]) -> Vec<u8> {
        let mut data = Vec::new();
        let mut entries = Vec::new();
        for (tag, value) in tags {
            let offset = data.len() as i32;
            data.extend_from_slice(value.as_bytes());
            data.push(0);
            entries.push((*tag, offset));
        }

        let mut out = Vec::new();
        out.extend_from_slice(&HEADER_MAGIC);
        out.extend_from_slice(&[0, 0, 0, 0, 0]); // version + reserved
        out.extend_from_slice(&(entries.len() as i32).to_be_bytes());
        out.extend_from_slice(&(data.len() as i32).to_be_bytes());
        for (tag, offset) in entries {
            write_index_entry(&mut out, tag, RPM_STRING_TYPE, offset, 1);
        }
        out.extend_from_slice(&data);
        out
    }

    #[test]
    fn parses_payload_compressor_tag() {
        let record_bytes = build_header_record(&[
            (TAG_PAYLOAD_FORMAT, "cpio"),
            (TAG_PAYLOAD_COMPRESSOR, "xz"),
        ]);
        let mut reader = io::Cursor::new(record_bytes);
        let record = HeaderRecord::read_from(&mut reader).unwrap();
        assert_eq!(record.string_tag(TAG_PAYLOAD_COMPRESSOR).unwrap(), "xz");
        assert_eq!(record.string_tag(TAG_PAYLOAD_FORMAT).unwrap(), "cpio");
    }

    #[test]
    fn missing_compressor_tag_defaults_handled_by_caller() {
        let record_bytes = build_header_record(&[(TAG_PAYLOAD_FORMAT, "cpio")]);
        let mut reader = io::Cursor::new(record_bytes);
        let record = HeaderRecord::read_from(&mut reader).unwrap();
        assert!(record.string_tag(TAG_PAYLOAD_COMPRESSOR).is_none());
    }

    #[test]
    fn rejects_bad_lead_magic() {
        let mut reader = io::Cursor::new(vec![0u8; LEAD_SIZE]);
        assert!(matches!(read_lead(&mut reader), Err(Error::BadLeadMagic)));
    }

    #[test]
    fn fix_symlinks_noop_when_no_module_dir() {
        let dir = tempfile::tempdir().unwrap();
        // Should not panic even though lib/modules/<kernel>/build doesn't exist.
        fix_kernel_module_symlinks(dir.path(), "5.15.0-73-generic", &NullLogger);
    }

    fn build_lead() -> Vec<u8> {
        let mut lead = vec![0u8; LEAD_SIZE];
        lead[0..4].copy_from_slice(&LEAD_MAGIC);
        lead
    }

    #[test]
    fn parse_for_verification_without_a_signature_tag() {
        let mut rpm = build_lead();
        let signature = build_header_record(&[]);
        rpm.extend_from_slice(&signature);
        let padding = (8 - signature.len() % 8) % 8;
        rpm.extend(std::iter::repeat(0u8).take(padding));
        rpm.extend_from_slice(b"header-and-payload-bytes");

        let signed = parse_for_verification(&rpm).unwrap();
        assert!(signed.pgp_signature.is_none());
        assert_eq!(signed.signed_content, b"header-and-payload-bytes");
    }

    #[test]
    fn parse_for_verification_recovers_a_binary_signature_tag() {
        let mut data = Vec::new();
        let offset = data.len() as i32;
        data.extend_from_slice(b"\x89fake-sig-packet");
        let count = data.len() as i32 - offset;

        let mut sig_record = Vec::new();
        sig_record.extend_from_slice(&HEADER_MAGIC);
        sig_record.extend_from_slice(&[0, 0, 0, 0, 0]);
        sig_record.extend_from_slice(&1i32.to_be_bytes());
        sig_record.extend_from_slice(&(data.len() as i32).to_be_bytes());
        write_index_entry(&mut sig_record, TAG_SIG_PGP, RPM_BIN_TYPE, offset, count);
        sig_record.extend_from_slice(&data);

        let mut rpm = build_lead();
        rpm.extend_from_slice(&sig_record);
        let padding = (8 - sig_record.len() % 8) % 8;
        rpm.extend(std::iter::repeat(0u8).take(padding));
        rpm.extend_from_slice(b"rest-of-the-file");

        let signed = parse_for_verification(&rpm).unwrap();
        assert_eq!(signed.pgp_signature.unwrap(), b"\x89fake-sig-packet");
        assert_eq!(signed.signed_content, b"rest-of-the-file");
    }
}
