// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use kpm_core::MultiError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] kpm_http::Error),

    #[error(transparent)]
    RpmRepo(#[from] kpm_rpm_repo::Error),

    #[error(transparent)]
    DebRepo(#[from] kpm_deb_repo::Error),

    #[error(transparent)]
    RpmFormat(#[from] kpm_rpm_format::Error),

    #[error("architecture '{0}' has no known translation for the {1} family")]
    UnknownArch(String, String),

    #[error("unrecognised distribution family '{0}'")]
    UnknownFamily(String),

    #[error("could not determine Amazon Linux release version from {0}")]
    AmazonReleaseNotFound(String),

    #[error("no configured repository yielded a kernel headers package: {0}")]
    NoBackendSucceeded(MultiError),
}

pub type Result<T> = std::result::Result<T, Error>;
