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
    Archive(#[from] kpm_archive::Error),

    #[error("InRelease/Release at {0} had no usable PGP signature")]
    SignatureInvalid(String),

    #[error("no Packages index at {0} yielded a matching package")]
    NoMatchingPackage(String),

    #[error("matched stanza has no '{0}' field")]
    MissingField(String),

    #[error("'.deb' archive at {0} has no data.tar* member")]
    NoDataMember(String),
}

pub type Result<T> = std::result::Result<T, Error>;
