// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! An APT repository client: locates a `linux-headers-<kernel>*` package in
a configured `sources.list` entry, verifies it, and extracts its contents.
*/

mod client;
mod error;
mod stanza;

pub use client::{fetch_headers, DebPackageMatch};
pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use kpm_config::parse_sources_list;
    use kpm_core::{NullLogger, RepoId};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn unreachable_repo_surfaces_the_http_error() {
        let entries = parse_sources_list("deb http://127.0.0.1:1 unstable main\n");
        let repo = &entries[0];
        let http = kpm_http::HttpClient::new(&kpm_http::TlsOptions::verified()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let result = fetch_headers(
            repo,
            "amd64",
            "5.15.0-73-generic",
            &http,
            RepoId::next(),
            None,
            dir.path(),
            &NullLogger,
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
    }
}
