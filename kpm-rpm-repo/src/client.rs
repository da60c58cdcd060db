// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Ties `repomd.xml`/`primary.xml` parsing, mirror resolution and GPG
verification together into the one operation a distribution backend needs:
fetch a package matching some caller-supplied criteria out of a yum/dnf
repository.
*/

use crate::error::{Error, Result};
use crate::primary::{self, PkgInfoHeader};
use crate::{metalink, repomd};
use kpm_config::RpmRepo;
use kpm_core::{KpmLogger, RepoId};
use kpm_gpg::Keyring;
use kpm_http::HttpClient;
use kpm_vars::Vars;
use tokio_util::sync::CancellationToken;

/// A downloaded, (optionally) signature-verified package.
pub struct FetchedPackage {
    pub header: PkgInfoHeader,
    pub data: Vec<u8>,
}

fn join_url(base: &str, suffix: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), suffix.trim_start_matches('/'))
}

fn repomd_url(base: &str) -> String {
    if base.ends_with("repodata/repomd.xml") {
        base.to_string()
    } else {
        join_url(base, "repodata/repomd.xml")
    }
}

async fn resolve_base_url(
    repo: &RpmRepo,
    vars: &Vars,
    http: &HttpClient,
    repo_id: RepoId,
    cancel: &CancellationToken,
) -> Result<String> {
    if let Some(baseurl) = &repo.baseurl {
        let resolved = vars.expand(baseurl);
        repo.set_resolved_base_url(resolved.clone());
        return Ok(resolved);
    }

    if let Some(mirrorlist) = &repo.mirrorlist {
        let url = vars.expand(mirrorlist);
        let data = http.get(repo_id, &url, cancel).await?.data()?;
        let text = String::from_utf8_lossy(&data);
        let winner = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .ok_or_else(|| Error::EmptyMirrorlist(url.clone()))?
            .to_string();
        repo.set_resolved_base_url(winner.clone());
        return Ok(winner);
    }

    if let Some(metalink_url) = &repo.metalink {
        let url = vars.expand(metalink_url);
        let data = http.get(repo_id, &url, cancel).await?.data()?;
        let mut candidates: Vec<_> = metalink::parse_resources(&data[..])?
            .into_iter()
            .filter(|r| r.protocol == "http" || r.protocol == "https")
            .collect();
        candidates.sort_by(|a, b| b.preference.cmp(&a.preference));
        let winner = candidates.into_iter().next().ok_or_else(|| Error::EmptyMetalink(url.clone()))?;
        let base = winner
            .url
            .strip_suffix("repodata/repomd.xml")
            .unwrap_or(&winner.url)
            .trim_end_matches('/')
            .to_string();
        repo.set_resolved_base_url(base.clone());
        return Ok(base);
    }

    Err(Error::NoUrlSource)
}

/// Resolve `repo`'s base URL, fetch and scan its `primary.xml` for a package
/// accepted by `matcher`, then download it (checksum- and, if `gpgcheck` is
/// set, GPG-verified).
pub async fn fetch_package(
    repo: &RpmRepo,
    vars: &Vars,
    http: &HttpClient,
    repo_id: RepoId,
    logger: &dyn KpmLogger,
    matcher: &(dyn Fn(&PkgInfoHeader) -> bool + Sync),
    cancel: &CancellationToken,
) -> Result<FetchedPackage> {
    let base_url = resolve_base_url(repo, vars, http, repo_id, cancel).await?;
    logger.debug(&format!("resolved {} base URL to {}", repo.section, base_url));

    let repomd_bytes = http.get(repo_id, &repomd_url(&base_url), cancel).await?.data()?;
    let entries = repomd::parse(&repomd_bytes[..])?;
    let primary_entry = entries
        .iter()
        .find(|e| e.data_type == "primary")
        .ok_or_else(|| Error::NoPrimaryMetadata(base_url.clone()))?;

    let primary_url = join_url(&base_url, &primary_entry.location_href);
    let primary_bytes = match &primary_entry.open_checksum {
        Some(checksum) => http
            .get_with_checksum(repo_id, &primary_url, checksum, cancel)
            .await?
            .data()?,
        None => http.get(repo_id, &primary_url, cancel).await?.data()?,
    };

    let found = match primary::scan_fast(&primary_bytes[..], matcher)? {
        Ok(Some(found)) => Some(found),
        Ok(None) => None,
        Err(()) => {
            logger.debug("primary.xml violated the arch-before-entry invariant, falling back to the slow scanner");
            primary::scan_slow(&primary_bytes[..], matcher)?
        }
    };
    let found = found.ok_or_else(|| Error::NoMatchingPackage(base_url.clone()))?;

    let keyring = if repo.gpgcheck {
        let keys: Vec<String> = repo.gpgkeys.iter().map(|k| vars.expand(k)).collect();
        Some(Keyring::load(&keys, http, repo_id, logger, cancel).await?)
    } else {
        None
    };

    let package_url = join_url(&base_url, &found.location_href);
    let package_bytes = match &found.checksum {
        Some(checksum) => http
            .get_with_checksum(repo_id, &package_url, checksum, cancel)
            .await?
            .data()?,
        None => http.get(repo_id, &package_url, cancel).await?.data()?,
    };

    if let Some(keyring) = &keyring {
        let signed = kpm_rpm_format::parse_for_verification(&package_bytes)?;
        let signature = signed
            .pgp_signature
            .ok_or_else(|| Error::SignatureInvalid(package_url.clone()))?;
        if !keyring.verify_detached(&signed.signed_content, &signature)? {
            return Err(Error::SignatureInvalid(package_url));
        }
        logger.debug(&format!("verified signature for {}", package_url));
    }

    Ok(FetchedPackage {
        header: found.header,
        data: package_bytes,
    })
}
