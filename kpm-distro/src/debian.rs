// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The debian/ubuntu family: iterates `sources.list` entries, verifying
`InRelease` with a per-repo keyring loaded from its `signed-by` path when
one is configured, stopping at the first repo that yields the headers
package.
*/

use crate::backend::Backend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kpm_config::DebSourceEntry;
use kpm_core::{KpmLogger, MultiError, RepoId};
use kpm_gpg::Keyring;
use kpm_http::{HttpClient, TlsOptions};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A `sources.list` entry is usable if it's enabled, is a binary (not
/// source) entry, and its `signed-by` path (if any) lives under `/etc` —
/// the path relocator's prefix, so it resolves under the host root rather
/// than somewhere arbitrary on the filesystem.
fn usable(entry: &DebSourceEntry) -> bool {
    entry.enabled
        && !entry.source
        && entry
            .signed_by()
            .map_or(true, |path| path.starts_with("/etc"))
}

pub struct DebianBackend {
    pub entries: Vec<DebSourceEntry>,
    pub arch: String,
    pub kernel: String,
    pub logger: Arc<dyn KpmLogger>,
}

#[async_trait]
impl Backend for DebianBackend {
    async fn get_kernel_headers(&self, directory: &Path, cancel: &CancellationToken) -> Result<()> {
        let http = HttpClient::new(&TlsOptions::verified())?;
        let mut failures = MultiError::default();

        for entry in self.entries.iter().filter(|e| usable(e)) {
            let repo_id = RepoId::next();
            let keyring = match entry.signed_by() {
                Some(path) => {
                    let resolved = kpm_path::host_etc_join(&[path.as_str()]);
                    let url = format!("file://{}", resolved.display());
                    match Keyring::load(&[url], &http, repo_id, self.logger.as_ref(), cancel).await {
                        Ok(keyring) => Some(keyring),
                        Err(e) => {
                            failures.push(entry.uri.clone(), e.to_string());
                            continue;
                        }
                    }
                }
                None => None,
            };

            match kpm_deb_repo::fetch_headers(
                entry,
                &self.arch,
                &self.kernel,
                &http,
                repo_id,
                keyring.as_ref(),
                directory,
                self.logger.as_ref(),
                cancel,
            )
            .await
            {
                Ok(_) => return Ok(()),
                Err(e) => failures.push(entry.uri.clone(), e.to_string()),
            }
        }

        Err(Error::NoBackendSucceeded(failures))
    }
}
