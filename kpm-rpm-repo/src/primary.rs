// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Scans `primary.xml` for a package matching caller-supplied criteria.

Two strategies are offered. The fast path assumes the document orders
`<arch>` before any `<rpm:entry>` within the same `<package>` (true of every
yum/dnf metadata generator observed in the wild) and stops as soon as a
match is found, without buffering a whole package's entries. If that
ordering assumption is violated, it reports a structural error instead of
guessing, and the slow path — which buffers every entry for a package and
evaluates them once the package closes, regardless of order — takes over.
*/

use kpm_http::{ContentDigest, DigestKind};
use kpm_xml::{Decoder, XmlHandler};
use std::io::Read;

/// The parts of a package/provides entry a matcher inspects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PkgInfoHeader {
    pub name: String,
    pub epoch: Option<String>,
    pub version: String,
    pub release: String,
    pub arch: String,
}

/// A matched candidate, with the bits needed to download it.
#[derive(Clone, Debug)]
pub struct PrimaryMatch {
    pub header: PkgInfoHeader,
    pub location_href: String,
    pub checksum: Option<ContentDigest>,
}

#[derive(Clone, Debug, Default)]
struct PackageScratch {
    arch: Option<String>,
    location_href: Option<String>,
    checksum_type: Option<DigestKind>,
    checksum_hex: Option<String>,
}

impl PackageScratch {
    fn checksum(&self) -> Option<ContentDigest> {
        match (self.checksum_type, &self.checksum_hex) {
            (Some(kind), Some(hex)) => ContentDigest::from_hex(kind, hex).ok(),
            _ => None,
        }
    }
}

fn digest_kind(name: &str) -> Option<DigestKind> {
    match name {
        "sha256" => Some(DigestKind::Sha256),
        "sha1" => Some(DigestKind::Sha1),
        "md5" => Some(DigestKind::Md5),
        _ => None,
    }
}

/// Is this a plain capability name (no `(...)` suffix like `name(x86-64)`)?
fn is_plain_name(name: &str) -> bool {
    !name.contains('(')
}

enum AwaitingText {
    None,
    Arch,
    ChecksumHex,
}

struct Scanner<'a> {
    matcher: &'a (dyn Fn(&PkgInfoHeader) -> bool + Sync),
    strict: bool,
    pending_attrs: Vec<(String, String)>,
    awaiting: AwaitingText,
    in_package: bool,
    in_format: bool,
    in_provides: bool,
    scratch: PackageScratch,
    // Slow path only: entries buffered until the package closes.
    buffered_entries: Vec<PkgInfoHeader>,
    winner: Option<PrimaryMatch>,
    structural_violation: bool,
}

impl<'a> Scanner<'a> {
    fn new(matcher: &'a (dyn Fn(&PkgInfoHeader) -> bool + Sync), strict: bool) -> Self {
        Self {
            matcher,
            strict,
            pending_attrs: Vec::new(),
            awaiting: AwaitingText::None,
            in_package: false,
            in_format: false,
            in_provides: false,
            scratch: PackageScratch::default(),
            buffered_entries: Vec::new(),
            winner: None,
            structural_violation: false,
        }
    }

    fn take_attr(attrs: &[(String, String)], key: &str) -> Option<String> {
        attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    fn consider(&mut self, header: PkgInfoHeader) {
        if self.winner.is_some() {
            return;
        }
        if (self.matcher)(&header) {
            self.winner = Some(PrimaryMatch {
                header,
                location_href: self.scratch.location_href.clone().unwrap_or_default(),
                checksum: self.scratch.checksum(),
            });
        }
    }
}

impl<'a> XmlHandler for Scanner<'a> {
    fn attr(&mut self, name: &str, value: &str) {
        self.pending_attrs.push((name.to_string(), value.to_string()));
    }

    fn start_tag(&mut self, name: &str) {
        let attrs = std::mem::take(&mut self.pending_attrs);
        self.awaiting = AwaitingText::None;

        match name {
            "package" => {
                self.in_package = true;
                self.in_format = false;
                self.in_provides = false;
                self.scratch = PackageScratch::default();
                self.buffered_entries.clear();
            }
            "arch" if self.in_package => {
                self.awaiting = AwaitingText::Arch;
            }
            "location" if self.in_package => {
                self.scratch.location_href = Self::take_attr(&attrs, "href");
            }
            "checksum" if self.in_package => {
                self.scratch.checksum_type =
                    Self::take_attr(&attrs, "type").as_deref().and_then(digest_kind);
                self.awaiting = AwaitingText::ChecksumHex;
            }
            "format" if self.in_package => {
                self.in_format = true;
            }
            "rpm:provides" if self.in_format => {
                self.in_provides = true;
            }
            "rpm:entry" if self.in_provides => {
                let entry_name = Self::take_attr(&attrs, "name").unwrap_or_default();
                if !is_plain_name(&entry_name) {
                    return;
                }

                let header = PkgInfoHeader {
                    name: entry_name,
                    epoch: Self::take_attr(&attrs, "epoch"),
                    version: Self::take_attr(&attrs, "ver").unwrap_or_default(),
                    release: Self::take_attr(&attrs, "rel").unwrap_or_default(),
                    arch: self.scratch.arch.clone().unwrap_or_default(),
                };

                if self.strict && self.scratch.arch.is_none() {
                    self.structural_violation = true;
                    return;
                }

                if self.strict {
                    self.consider(header);
                } else {
                    self.buffered_entries.push(header);
                }
            }
            _ => {}
        }
    }

    fn char_data(&mut self, text: &str) {
        match self.awaiting {
            AwaitingText::Arch => self.scratch.arch = Some(text.trim().to_string()),
            AwaitingText::ChecksumHex => self.scratch.checksum_hex = Some(text.trim().to_string()),
            AwaitingText::None => {}
        }
    }

    fn end_tag(&mut self, name: &str) {
        match name {
            "rpm:provides" => self.in_provides = false,
            "format" => self.in_format = false,
            "package" => {
                if !self.strict {
                    let entries = std::mem::take(&mut self.buffered_entries);
                    for header in entries {
                        self.consider(header);
                    }
                }
                self.in_package = false;
            }
            _ => {}
        }
    }

    fn is_done(&self) -> bool {
        self.winner.is_some() || self.structural_violation
    }
}

/// Fast-path scan: assumes `<arch>` precedes `<rpm:entry>` within a package
/// and evaluates each entry as soon as it is seen. Returns `Ok(None)` if the
/// document was fully scanned with no match, and a structural-violation
/// error if an entry was seen before its package's arch.
pub fn scan_fast(reader: impl Read, matcher: &(dyn Fn(&PkgInfoHeader) -> bool + Sync)) -> kpm_xml::Result<Result<Option<PrimaryMatch>, ()>> {
    let mut decoder = Decoder::new(reader);
    let mut scanner = Scanner::new(matcher, true);
    decoder.parse(&mut scanner)?;

    if scanner.structural_violation {
        return Ok(Err(()));
    }
    Ok(Ok(scanner.winner))
}

/// Slow-path scan: buffers every entry of a package and evaluates all of
/// them once the package closes, so entry/arch ordering does not matter.
pub fn scan_slow(reader: impl Read, matcher: &(dyn Fn(&PkgInfoHeader) -> bool + Sync)) -> kpm_xml::Result<Option<PrimaryMatch>> {
    let mut decoder = Decoder::new(reader);
    let mut scanner = Scanner::new(matcher, false);
    decoder.parse(&mut scanner)?;
    Ok(scanner.winner)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<metadata>
        <package type="rpm">
            <name>kernel-devel</name>
            <arch>x86_64</arch>
            <version epoch="0" ver="5.15.0" rel="73.el8"/>
            <checksum type="sha256" pkgid="YES">deadbeef</checksum>
            <location href="Packages/k/kernel-devel-5.15.0-73.el8.x86_64.rpm"/>
            <format>
                <rpm:provides>
                    <rpm:entry name="kernel-devel(x86-64)" flags="EQ" epoch="0" ver="5.15.0" rel="73.el8"/>
                    <rpm:entry name="kernel-devel" flags="EQ" epoch="0" ver="5.15.0" rel="73.el8"/>
                </rpm:provides>
            </format>
        </package>
        <package type="rpm">
            <name>kernel-headers</name>
            <arch>x86_64</arch>
            <version epoch="0" ver="5.15.0" rel="73.el8"/>
            <location href="Packages/k/kernel-headers-5.15.0-73.el8.x86_64.rpm"/>
            <format>
                <rpm:provides>
                    <rpm:entry name="kernel-headers" flags="EQ" epoch="0" ver="5.15.0" rel="73.el8"/>
                </rpm:provides>
            </format>
        </package>
    </metadata>"#;

    fn wants_kernel_devel(header: &PkgInfoHeader) -> bool {
        header.name == "kernel-devel" && header.release == "73.el8"
    }

    #[test]
    fn fast_path_finds_self_provide_entry() {
        let result = scan_fast(SAMPLE.as_bytes(), &wants_kernel_devel).unwrap().unwrap();
        let found = result.unwrap();
        assert_eq!(found.header.arch, "x86_64");
        assert_eq!(found.location_href, "Packages/k/kernel-devel-5.15.0-73.el8.x86_64.rpm");
        assert_eq!(found.checksum.unwrap().hex(), "deadbeef");
    }

    #[test]
    fn fast_path_skips_parenthesised_capability_tokens() {
        // The first rpm:entry is "kernel-devel(x86-64)" and must not match
        // before the plain "kernel-devel" entry is reached.
        let matches_exact_name = |h: &PkgInfoHeader| h.name == "kernel-devel";
        let found = scan_fast(SAMPLE.as_bytes(), &matches_exact_name).unwrap().unwrap().unwrap();
        assert_eq!(found.header.name, "kernel-devel");
    }

    #[test]
    fn no_match_returns_none_not_error() {
        let wants_missing = |h: &PkgInfoHeader| h.name == "does-not-exist";
        let result = scan_fast(SAMPLE.as_bytes(), &wants_missing).unwrap();
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn slow_path_agrees_with_fast_path_when_ordering_holds() {
        let fast = scan_fast(SAMPLE.as_bytes(), &wants_kernel_devel).unwrap().unwrap().unwrap();
        let slow = scan_slow(SAMPLE.as_bytes(), &wants_kernel_devel).unwrap().unwrap();
        assert_eq!(fast.header, slow.header);
        assert_eq!(fast.location_href, slow.location_href);
    }

    #[test]
    fn fast_path_reports_structural_violation_when_entry_precedes_arch() {
        let xml = r#"<metadata>
            <package type="rpm">
                <name>oddball</name>
                <format>
                    <rpm:provides>
                        <rpm:entry name="oddball" epoch="0" ver="1" rel="1"/>
                    </rpm:provides>
                </format>
                <arch>x86_64</arch>
            </package>
        </metadata>"#;

        let matcher = |h: &PkgInfoHeader| h.name == "oddball";
        let result = scan_fast(xml.as_bytes(), &matcher).unwrap();
        assert!(result.is_err());

        // The slow path tolerates the same document fine.
        let found = scan_slow(xml.as_bytes(), &matcher).unwrap().unwrap();
        assert_eq!(found.header.arch, "x86_64");
    }
}
