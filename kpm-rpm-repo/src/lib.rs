// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! A yum/dnf repository client: resolves a repo's base URL, locates and
scans its package metadata for a match, and downloads the result under a
checksum and (optionally) a GPG signature gate.
*/

mod client;
mod error;
mod metalink;
mod primary;
mod repomd;

pub use client::{fetch_package, FetchedPackage};
pub use error::{Error, Result};
pub use primary::{PkgInfoHeader, PrimaryMatch};
pub use repomd::RepomdEntry;

#[cfg(test)]
mod tests {
    use super::*;
    use kpm_config::parse_repo_file;
    use kpm_core::{NullLogger, RepoId};
    use kpm_vars::Vars;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn no_url_source_is_rejected_before_any_network_access() {
        let repos = parse_repo_file("[empty]\n");
        let repo = &repos[0];
        let vars = Vars::with_builtins("x86_64", "x86_64", "9");
        let http = kpm_http::HttpClient::new(&kpm_http::TlsOptions::verified()).unwrap();
        let matcher = |_: &PkgInfoHeader| true;
        let cancel = CancellationToken::new();

        let result = fetch_package(repo, &vars, &http, RepoId::next(), &NullLogger, &matcher, &cancel).await;
        assert!(matches!(result, Err(Error::NoUrlSource)));
    }
}
