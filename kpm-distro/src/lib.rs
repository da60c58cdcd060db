// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-family policy for locating and extracting a running kernel's headers
package: each distribution family is a small state machine over repo
configurations and candidate package names, built once by [`build_backend`]
into a boxed [`Backend`] trait object.
*/

mod backend;
mod centos;
mod debian;
mod error;
mod suse;
mod target;

pub use backend::{Backend, RpmFamilyBackend};
pub use centos::CentosBackend;
pub use debian::DebianBackend;
pub use error::{Error, Result};
pub use suse::SuseBackend;
pub use target::{parse_amazon_release_version, split_suse_flavour, translate_debian_arch, Target};

use kpm_config::{DebSourceEntry, RpmRepo};
use kpm_core::KpmLogger;
use kpm_vars::Vars;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static UEK_REPO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ol\d_UEK.*").unwrap());

/// Fedora's `updates-archive` mirror, tried ahead of the configured repos
/// once a release goes out of active support.
fn fedora_archive_repo(vars: &Vars) -> RpmRepo {
    RpmRepo::synthesized(
        "updates-archive",
        vars.expand("https://dl.fedoraproject.org/pub/archive/fedora/linux/updates/$releasever/Everything/$basearch/"),
    )
}

/// Oracle Linux repos named `ol*_UEK*` carry the Unbreakable Enterprise
/// Kernel packages; the config on disk often ships them disabled.
fn force_enable_uek_repos(repos: &mut [RpmRepo]) {
    for repo in repos.iter_mut() {
        if UEK_REPO_RE.is_match(&repo.section) {
            repo.enabled = true;
        }
    }
}

/// Build the backend for `target.family`, wiring it to `apt_sources` or
/// `rpm_repos` as appropriate. Unused inputs for the resolved family are
/// ignored (e.g. `apt_sources` for an RPM-family target).
pub async fn build_backend(
    target: &Target,
    apt_sources: Vec<DebSourceEntry>,
    rpm_repos: Vec<RpmRepo>,
    logger: Arc<dyn KpmLogger>,
) -> Result<Box<dyn Backend>> {
    let mut vars = Vars::with_builtins(&target.arch, &target.arch, target.release_version.as_deref().unwrap_or(""));
    vars.load_standard_vars_dirs();

    match target.family.to_ascii_lowercase().as_str() {
        "debian" | "ubuntu" => {
            let arch = translate_debian_arch(&target.arch)?;
            Ok(Box::new(DebianBackend {
                entries: apt_sources,
                arch,
                kernel: target.kernel.clone(),
                logger,
            }))
        }

        "rhel" | "redhat" => Ok(Box::new(RpmFamilyBackend {
            repos: rpm_repos,
            vars,
            candidates: vec!["kernel-devel".to_string()],
            kernel: target.kernel.clone(),
            logger,
        })),

        "centos" => {
            let release_version = target
                .release_version
                .clone()
                .unwrap_or_else(|| vars.get("releasever").unwrap_or_default().to_string());
            let base_and_updates: Vec<RpmRepo> = rpm_repos
                .into_iter()
                .filter(|r| r.section == "base" || r.section == "updates")
                .collect();
            let live = RpmFamilyBackend {
                repos: base_and_updates,
                vars,
                candidates: vec!["kernel-devel".to_string()],
                kernel: target.kernel.clone(),
                logger,
            };
            Ok(Box::new(CentosBackend {
                live,
                release_version,
                arch: target.arch.clone(),
            }))
        }

        "fedora" => {
            let archive = fedora_archive_repo(&vars);
            let mut repos = rpm_repos;
            repos.push(archive);
            Ok(Box::new(RpmFamilyBackend {
                repos,
                vars,
                candidates: vec!["kernel-devel".to_string(), "kernel-headers".to_string()],
                kernel: target.kernel.clone(),
                logger,
            }))
        }

        "amazonlinux" | "amazonlinux2" | "amazonlinux2022" => {
            let image_id_path = kpm_path::host_etc_join(&["/etc/image-id"]);
            if let Ok(content) = std::fs::read_to_string(&image_id_path) {
                if let Ok(release_version) = parse_amazon_release_version(&content) {
                    vars.set("releasever", release_version);
                }
            }
            Ok(Box::new(RpmFamilyBackend {
                repos: rpm_repos,
                vars,
                candidates: vec!["kernel-devel".to_string()],
                kernel: target.kernel.clone(),
                logger,
            }))
        }

        "opensuse" | "sles" => {
            let (release, flavour) = split_suse_flavour(&target.kernel);
            Ok(Box::new(SuseBackend {
                repos: rpm_repos,
                vars,
                kernel: target.kernel.clone(),
                release,
                flavour: flavour.unwrap_or_else(|| "default".to_string()),
                arch: target.arch.clone(),
                version: target.release_version.clone(),
                logger,
            }))
        }

        "oracle" => {
            let mut repos = rpm_repos;
            force_enable_uek_repos(&mut repos);
            Ok(Box::new(RpmFamilyBackend {
                repos,
                vars,
                candidates: vec!["kernel-devel".to_string(), "kernel-uek-devel".to_string()],
                kernel: target.kernel.clone(),
                logger,
            }))
        }

        other => Err(Error::UnknownFamily(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpm_core::NullLogger;

    #[tokio::test]
    async fn unknown_family_is_rejected_before_any_repo_work() {
        let target = Target {
            family: "haiku".to_string(),
            kernel: "5.15.0".to_string(),
            arch: "x86_64".to_string(),
            release_version: None,
        };
        let result = build_backend(&target, Vec::new(), Vec::new(), Arc::new(NullLogger)).await;
        assert!(matches!(result, Err(Error::UnknownFamily(_))));
    }

    #[test]
    fn oracle_uek_repos_are_force_enabled() {
        let mut repo = RpmRepo::synthesized("ol8_UEKR6", "http://example.invalid/");
        repo.enabled = false;
        let mut repos = vec![repo];
        force_enable_uek_repos(&mut repos);
        assert!(repos[0].enabled);
    }
}
