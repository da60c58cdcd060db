// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! openSUSE/SLES: the kernel release splits into a release and a flavour
(`5.14.21-150400.24.55-default` → release `5.14.21-150400.24.55`, flavour
`default`). Two RPM-family fetches run — `kernel<-flavour>-devel` and the
noarch `kernel-devel` — after which the two extracted `/usr/src` trees are
linked together the way the devel package layout expects: the flavour's
`-obj` tree for this architecture is symlinked into the plain release tree,
and a `linux-headers-<kernel>` symlink points at the whole thing.
*/

use crate::backend::{Backend, RpmFamilyBackend};
use crate::error::Result;
use async_trait::async_trait;
use kpm_config::RpmRepo;
use kpm_core::KpmLogger;
use kpm_vars::Vars;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct SuseBackend {
    pub repos: Vec<RpmRepo>,
    pub vars: Vars,
    pub kernel: String,
    pub release: String,
    pub flavour: String,
    pub arch: String,
    /// The distro's `VERSION`/`VERSION_ID` (e.g. `"15-SP4"`), when known.
    /// Drives the non-registered Kernel:/SLE fallback; `None` on a host with
    /// no readable os-release version (the fallback is then skipped).
    pub version: Option<String>,
    pub logger: Arc<dyn KpmLogger>,
}

/// A `Kernel:/SLE<version>` repository from `download.opensuse.org`, used
/// when the registered repos don't carry a matching kernel-devel package
/// (unregistered SLES, or an openSUSE release old enough to have rolled
/// off its own mirrors).
fn synthesized_kernel_repo(version: &str) -> RpmRepo {
    let base = format!("https://download.opensuse.org/repositories/Kernel:/SLE{}/standard/", version);
    let mut repo = RpmRepo::synthesized(format!("Kernel_SLE{}", version), base.clone());
    repo.gpgkeys = vec![format!("{}repodata/repomd.xml.key", base)];
    repo
}

/// The last-resort fallback for unregistered SLES without even a Kernel:
/// tree: the matching openSUSE Jump distribution, unsigned.
fn jump_fallback_repo(version_id: &str) -> RpmRepo {
    let base = format!("https://download.opensuse.org/distribution/jump/{}/repo/oss/", version_id);
    let mut repo = RpmRepo::synthesized(format!("Jump-{}", version_id), base);
    repo.gpgcheck = false;
    repo
}

fn link_devel_tree(directory: &Path, release: &str, flavour: &str, arch: &str, kernel: &str, logger: &dyn KpmLogger) -> Result<()> {
    let src_root = directory.join("usr/src");
    let obj_dir = src_root.join(format!("linux-{}-obj", release)).join(arch).join(flavour);
    let plain_tree = src_root.join(format!("linux-{}", release));

    if obj_dir.is_dir() {
        std::fs::create_dir_all(&plain_tree)?;
        for entry in std::fs::read_dir(&obj_dir)? {
            let entry = entry?;
            let target = plain_tree.join(entry.file_name());
            if target.exists() || target.is_symlink() {
                continue;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(entry.path(), &target)?;
            #[cfg(not(unix))]
            std::fs::copy(entry.path(), &target)?;
        }
    } else {
        logger.warn(&format!("no devel-obj tree found at {}", obj_dir.display()));
    }

    let headers_link = src_root.join(format!("linux-headers-{}", kernel));
    if !headers_link.exists() && !headers_link.is_symlink() {
        #[cfg(unix)]
        std::os::unix::fs::symlink(&plain_tree, &headers_link)?;
        #[cfg(not(unix))]
        std::fs::copy(&plain_tree, &headers_link)?;
    }

    Ok(())
}

impl SuseBackend {
    /// The registered repos plus every synthesised non-registered fallback,
    /// or an empty list when no `version` is known to build them from.
    fn synthesized_repos(&self) -> Vec<RpmRepo> {
        let Some(version) = &self.version else {
            return Vec::new();
        };

        let mut repos = self.repos.clone();
        repos.push(synthesized_kernel_repo(version));
        repos.push(synthesized_kernel_repo(&format!("{}-UPDATES", version)));
        if self.flavour != "default" {
            repos.push(synthesized_kernel_repo(&format!("{}-{}", version, self.flavour.to_ascii_uppercase())));
        }
        repos.push(jump_fallback_repo(version));
        repos
    }
}

#[async_trait]
impl Backend for SuseBackend {
    async fn get_kernel_headers(&self, directory: &Path, cancel: &CancellationToken) -> Result<()> {
        let candidates = vec![format!("kernel-{}-devel", self.flavour), "kernel-devel".to_string()];

        let primary = RpmFamilyBackend {
            repos: self.repos.clone(),
            vars: self.vars.clone(),
            candidates: candidates.clone(),
            kernel: self.kernel.clone(),
            logger: self.logger.clone(),
        };

        if let Err(primary_err) = primary.get_kernel_headers(directory, cancel).await {
            let retry_repos = self.synthesized_repos();
            if retry_repos.is_empty() {
                return Err(primary_err);
            }

            let retry = RpmFamilyBackend {
                repos: retry_repos,
                vars: self.vars.clone(),
                candidates,
                kernel: self.kernel.clone(),
                logger: self.logger.clone(),
            };
            retry.get_kernel_headers(directory, cancel).await?;
        }

        link_devel_tree(directory, &self.release, &self.flavour, &self.arch, &self.kernel, self.logger.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_kernel_repo_points_at_download_opensuse_org() {
        let repo = synthesized_kernel_repo("15-SP4");
        assert_eq!(repo.section, "Kernel_SLE15-SP4");
        assert_eq!(
            repo.baseurl.as_deref(),
            Some("https://download.opensuse.org/repositories/Kernel:/SLE15-SP4/standard/")
        );
        assert_eq!(
            repo.gpgkeys,
            vec!["https://download.opensuse.org/repositories/Kernel:/SLE15-SP4/standard/repodata/repomd.xml.key".to_string()]
        );
    }

    #[test]
    fn jump_fallback_repo_is_unsigned() {
        let repo = jump_fallback_repo("15.4");
        assert_eq!(repo.section, "Jump-15.4");
        assert!(!repo.gpgcheck);
    }

    fn backend_with_version(version: Option<&str>, flavour: &str) -> SuseBackend {
        SuseBackend {
            repos: Vec::new(),
            vars: Vars::with_builtins("x86_64", "x86_64", ""),
            kernel: "5.14.21-150400.24.55-default".to_string(),
            release: "5.14.21-150400.24.55".to_string(),
            flavour: flavour.to_string(),
            arch: "x86_64".to_string(),
            version: version.map(str::to_string),
            logger: Arc::new(kpm_core::NullLogger),
        }
    }

    #[test]
    fn no_version_means_no_synthesized_fallback() {
        let backend = backend_with_version(None, "default");
        assert!(backend.synthesized_repos().is_empty());
    }

    #[test]
    fn default_flavour_skips_the_flavoured_kernel_repo() {
        let backend = backend_with_version(Some("15-SP4"), "default");
        let repos = backend.synthesized_repos();
        // Kernel_SLE15-SP4, Kernel_SLE15-SP4-UPDATES, Jump-15-SP4 — no flavoured variant.
        assert_eq!(repos.len(), 3);
        assert!(repos.iter().any(|r| r.section == "Jump-15-SP4"));
    }

    #[test]
    fn non_default_flavour_adds_a_flavoured_kernel_repo() {
        let backend = backend_with_version(Some("15-SP4"), "obj");
        let repos = backend.synthesized_repos();
        assert_eq!(repos.len(), 4);
        assert!(repos.iter().any(|r| r.section == "Kernel_SLE15-SP4-OBJ"));
    }
}
