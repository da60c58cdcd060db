// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! CentOS: the live mirrors (`base`, `updates`) go end-of-life shortly after
a release is superseded, at which point `vault.centos.org` is the only
surviving source. Rather than fail outright, a second attempt against a
synthesised Vault repository (and, for CentOS 7, a Vault-updates repository
too) runs whenever the live mirrors come up empty.
*/

use crate::backend::{Backend, RpmFamilyBackend};
use crate::error::Result;
use async_trait::async_trait;
use kpm_config::RpmRepo;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub struct CentosBackend {
    pub live: RpmFamilyBackend,
    pub release_version: String,
    pub arch: String,
}

fn vault_major(release_version: &str) -> i32 {
    release_version
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn vault_gpg_key(release_version: &str) -> String {
    if vault_major(release_version) >= 8 {
        "file:///etc/pki/rpm-gpg/RPM-GPG-KEY-CentOS-centosofficial".to_string()
    } else {
        format!("file:///etc/pki/rpm-gpg/RPM-GPG-KEY-CentOS-{}", vault_major(release_version))
    }
}

/// CentOS 8+ was rearranged into BaseOS/AppStream streams before Vault
/// became its only source, so the Vault layout differs by major version:
/// `BaseOS/$basearch/os/` for 8+, the flat `os/$basearch/` (plus a separate
/// `updates` tree) for 7 and earlier.
fn vault_repos(release_version: &str, arch: &str) -> Vec<RpmRepo> {
    let key = vault_gpg_key(release_version);

    if vault_major(release_version) >= 8 {
        let mut base = RpmRepo::synthesized(
            "vault",
            format!("http://vault.centos.org/{}/BaseOS/{}/os/", release_version, arch),
        );
        base.gpgkeys = vec![key];
        return vec![base];
    }

    let mut base = RpmRepo::synthesized(
        "vault",
        format!("http://vault.centos.org/{}/os/{}/", release_version, arch),
    );
    base.gpgkeys = vec![key.clone()];

    let mut updates = RpmRepo::synthesized(
        "vault-updates",
        format!("http://vault.centos.org/{}/updates/{}/", release_version, arch),
    );
    updates.gpgkeys = vec![key];

    vec![base, updates]
}

#[async_trait]
impl Backend for CentosBackend {
    async fn get_kernel_headers(&self, directory: &Path, cancel: &CancellationToken) -> Result<()> {
        if self.live.get_kernel_headers(directory, cancel).await.is_ok() {
            return Ok(());
        }

        let vault = RpmFamilyBackend {
            repos: vault_repos(&self.release_version, &self.arch),
            vars: self.live.vars.clone(),
            candidates: self.live.candidates.clone(),
            kernel: self.live.kernel.clone(),
            logger: self.live.logger.clone(),
        };
        vault.get_kernel_headers(directory, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centos_7_gets_a_vault_updates_repo_too() {
        let repos = vault_repos("7.9.2009", "x86_64");
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].section, "vault");
        assert_eq!(repos[1].section, "vault-updates");
        assert_eq!(repos[0].baseurl.as_deref(), Some("http://vault.centos.org/7.9.2009/os/x86_64/"));
        assert_eq!(
            repos[0].gpgkeys,
            vec!["file:///etc/pki/rpm-gpg/RPM-GPG-KEY-CentOS-7".to_string()]
        );
    }

    #[test]
    fn centos_8_has_no_vault_updates_repo() {
        let repos = vault_repos("8.5.2111", "x86_64");
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].baseurl.as_deref(), Some("http://vault.centos.org/8.5.2111/BaseOS/x86_64/os/"));
        assert_eq!(
            repos[0].gpgkeys,
            vec!["file:///etc/pki/rpm-gpg/RPM-GPG-KEY-CentOS-centosofficial".to_string()]
        );
    }
}
