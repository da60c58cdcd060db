// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The resolved (family, kernel, arch) the caller wants headers for, plus the
small pure-function policies each family needs: architecture name
translation, Amazon Linux release-version extraction, and openSUSE kernel
flavour splitting.
*/

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// What the caller asked for, resolved from `--family`/`--kernel`/`--arch`
/// and (for Amazon Linux) `/etc/image-id`.
#[derive(Clone, Debug)]
pub struct Target {
    pub family: String,
    pub kernel: String,
    pub arch: String,
    pub release_version: Option<String>,
}

/// Translate a `uname -m`-style architecture name into Debian's package-arch
/// vocabulary. Only the names this engine has ever needed to support.
pub fn translate_debian_arch(arch: &str) -> Result<String> {
    let translated = match arch {
        "x86_64" => "amd64",
        "i386" | "i686" => "i386",
        "aarch64" => "arm64",
        "ppc64le" => "ppc64el",
        "s390x" => "s390x",
        "mips64el" => "mips64el",
        other => return Err(Error::UnknownArch(other.to_string(), "debian".to_string())),
    };
    Ok(translated.to_string())
}

static AMAZON_IMAGE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"image_file="al2022-\w+-(2022\.0\.\d{8}).*""#).unwrap());

/// Pull the release version out of an Amazon Linux `/etc/image-id` body.
pub fn parse_amazon_release_version(content: &str) -> Result<String> {
    AMAZON_IMAGE_ID_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::AmazonReleaseNotFound(content.to_string()))
}

/// Split an openSUSE/SLES kernel release on its last `-` into `(release,
/// flavour)`; a kernel with no `-` has no flavour (the default one).
pub fn split_suse_flavour(kernel: &str) -> (String, Option<String>) {
    match kernel.rsplit_once('-') {
        Some((release, flavour)) => (release.to_string(), Some(flavour.to_string())),
        None => (kernel.to_string(), None),
    }
}
