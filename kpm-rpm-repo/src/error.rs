// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] kpm_http::Error),

    #[error(transparent)]
    Gpg(#[from] kpm_gpg::Error),

    #[error(transparent)]
    Xml(#[from] kpm_xml::Error),

    #[error(transparent)]
    RpmFormat(#[from] kpm_rpm_format::Error),

    #[error("invalid repository URL {0}: {1}")]
    BadUrl(String, url::ParseError),

    #[error("repository has no baseurl, mirrorlist, or metalink configured")]
    NoUrlSource,

    #[error("mirrorlist at {0} contained no usable mirror")]
    EmptyMirrorlist(String),

    #[error("metalink at {0} contained no usable http(s) resource for repomd.xml")]
    EmptyMetalink(String),

    #[error("repomd.xml at {0} has no 'primary' data entry")]
    NoPrimaryMetadata(String),

    #[error("primary.xml at {0} did not yield a matching package")]
    NoMatchingPackage(String),

    #[error("primary.xml structural invariant violated (rpm:entry before arch): {0}")]
    StructuralViolation(String),

    #[error("GPG signature verification failed for {0}")]
    SignatureInvalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
