// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fetches a matching `.deb` out of an APT repository: `InRelease`
verification, per-component/architecture `Packages` index scanning, name
matching, download, and extraction of its `data.tar*` member.
*/

use crate::error::{Error, Result};
use crate::stanza::{self, Stanza};
use kpm_config::DebSourceEntry;
use kpm_core::{KpmLogger, RepoId};
use kpm_gpg::Keyring;
use kpm_http::HttpClient;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// A `Packages` stanza that matched the requested name pattern.
#[derive(Clone, Debug)]
pub struct DebPackageMatch {
    pub name: String,
    pub version: String,
    filename: String,
    pub depends: Option<String>,
}

impl DebPackageMatch {
    /// The resolved download URL, without triggering any fetch.
    pub fn package_url(&self, repo_uri: &str) -> String {
        join_url(repo_uri, &self.filename)
    }

    fn from_stanza(stanza: &Stanza) -> Result<Self> {
        Ok(Self {
            name: stanza.field("Package").ok_or_else(|| Error::MissingField("Package".to_string()))?.to_string(),
            version: stanza.field("Version").unwrap_or_default().to_string(),
            filename: stanza.field("Filename").ok_or_else(|| Error::MissingField("Filename".to_string()))?.to_string(),
            depends: stanza.field("Depends").map(|s| s.to_string()),
        })
    }
}

fn join_url(base: &str, suffix: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), suffix.trim_start_matches('/'))
}

/// Glob match supporting a single trailing `*`, enough for the
/// `linux-headers-<kernel>*` patterns this client is ever asked to match.
fn matches_glob(candidate: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => candidate == pattern,
    }
}

/// Find the first `Packages` stanza across `components` whose `Package`
/// field matches `name_pattern`, verifying the `InRelease` signature first
/// if `keyring` is supplied.
async fn scan_for_package(
    repo: &DebSourceEntry,
    arch: &str,
    name_pattern: &str,
    http: &HttpClient,
    repo_id: RepoId,
    keyring: Option<&Keyring>,
    logger: &dyn KpmLogger,
    cancel: &CancellationToken,
) -> Result<DebPackageMatch> {
    let release_url = join_url(&repo.uri, &format!("dists/{}/InRelease", repo.distribution));
    let release_data = http.get(repo_id, &release_url, cancel).await?.data()?;

    if let Some(keyring) = keyring {
        if !keyring.verify_cleartext(&release_data)? {
            return Err(Error::SignatureInvalid(release_url));
        }
    }

    for component in &repo.components {
        let packages_url = join_url(
            &repo.uri,
            &format!("dists/{}/{}/binary-{}/Packages", repo.distribution, component, arch),
        );

        let data = match http.get(repo_id, &packages_url, cancel).await {
            Ok(fetched) => fetched.data()?,
            Err(e) => {
                logger.warn(&format!("skipping unreachable index {}: {}", packages_url, e));
                continue;
            }
        };

        let text = String::from_utf8_lossy(&data);
        for stanza in stanza::parse(&text) {
            let Some(name) = stanza.field("Package") else { continue };
            if matches_glob(name, name_pattern) {
                return DebPackageMatch::from_stanza(&stanza);
            }
        }
    }

    Err(Error::NoMatchingPackage(repo.uri.clone()))
}

/// Download `package` and extract its `data.tar*` member into `destination`.
async fn download_and_extract(
    package: &DebPackageMatch,
    repo: &DebSourceEntry,
    http: &HttpClient,
    repo_id: RepoId,
    destination: &Path,
    logger: &dyn KpmLogger,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = package.package_url(&repo.uri);
    let data = http.get(repo_id, &url, cancel).await?.data()?;

    let mut extracted = false;
    kpm_archive::extract_ar_members(
        std::io::Cursor::new(data),
        |name, reader| {
            if !name.starts_with("data.tar") {
                return Ok(false);
            }
            let decompressed = kpm_archive::decompress_member(name, "data.tar", reader)?;
            kpm_archive::extract_tar_stream(decompressed, destination, logger, cancel)?;
            extracted = true;
            Ok(true)
        },
        cancel,
    )?;

    if !extracted {
        return Err(Error::NoDataMember(url));
    }
    Ok(())
}

/// Tokens in a `Depends` field this engine treats as "also a kernel headers
/// package", e.g. `linux-headers-5.15.0-73-generic`.
fn is_headers_dependency(token: &str) -> bool {
    token.contains("linux") && token.contains("headers")
}

/// Fetch `linux-headers-<kernel>*` from the first repo component/arch
/// combination that has it, extract it into `destination`, then best-effort
/// fetch (single level, no further recursion) any `Depends` token that also
/// looks like a kernel-headers package.
pub async fn fetch_headers(
    repo: &DebSourceEntry,
    arch: &str,
    kernel: &str,
    http: &HttpClient,
    repo_id: RepoId,
    keyring: Option<&Keyring>,
    destination: &Path,
    logger: &dyn KpmLogger,
    cancel: &CancellationToken,
) -> Result<DebPackageMatch> {
    let pattern = format!("linux-headers-{}*", kernel);
    let matched = scan_for_package(repo, arch, &pattern, http, repo_id, keyring, logger, cancel).await?;
    download_and_extract(&matched, repo, http, repo_id, destination, logger, cancel).await?;

    if let Some(depends) = &matched.depends {
        for token in depends.split(',') {
            let name_token = token.trim().split_whitespace().next().unwrap_or("");
            if !is_headers_dependency(name_token) {
                continue;
            }
            match scan_for_package(repo, arch, name_token, http, repo_id, keyring, logger, cancel).await {
                Ok(dependency) => {
                    if let Err(e) =
                        download_and_extract(&dependency, repo, http, repo_id, destination, logger, cancel).await
                    {
                        logger.warn(&format!("failed to fetch dependency {}: {}", name_token, e));
                    }
                }
                Err(e) => logger.warn(&format!("could not resolve dependency {}: {}", name_token, e)),
            }
        }
    }

    Ok(matched)
}
