// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The `Backend` trait every distribution family implements, plus the
shared RPM-family backend used by rhel/redhat, centos, fedora, amazonlinux
and oracle: those families differ only in their candidate package-name
order and the repo list they're handed, not in the fetch/verify/extract
sequence.
*/

use crate::error::Result;
use async_trait::async_trait;
use kpm_config::RpmRepo;
use kpm_core::{KpmLogger, MultiError, RepoId};
use kpm_http::{HttpClient, TlsOptions};
use kpm_rpm_repo::PkgInfoHeader;
use kpm_vars::Vars;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The engine's only externally meaningful operation: locate and extract a
/// kernel-matching headers package into `directory`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_kernel_headers(&self, directory: &Path, cancel: &CancellationToken) -> Result<()>;
}

fn tls_options_for(repo: &RpmRepo) -> TlsOptions {
    TlsOptions {
        ssl_verify: repo.sslverify,
        client_cert: repo.sslclientcert.as_ref().map(Into::into),
        client_key: repo.sslclientkey.as_ref().map(Into::into),
        ca_cert: repo.sslcacert.as_ref().map(Into::into),
    }
}

/// Accept only the package whose `version-release.arch` exactly matches the
/// running kernel's uname string, the match rule every RPM family except
/// openSUSE uses.
fn exact_kernel_matcher(kernel: &str) -> impl Fn(&PkgInfoHeader) -> bool + Sync + '_ {
    move |header: &PkgInfoHeader| {
        format!("{}-{}.{}", header.version, header.release, header.arch) == kernel
    }
}

/// Shared across every family whose policy reduces to "try these candidate
/// package names against these repos, in order, stop at the first success".
pub struct RpmFamilyBackend {
    pub repos: Vec<RpmRepo>,
    pub vars: Vars,
    pub candidates: Vec<String>,
    pub kernel: String,
    pub logger: Arc<dyn KpmLogger>,
}

#[async_trait]
impl Backend for RpmFamilyBackend {
    async fn get_kernel_headers(&self, directory: &Path, cancel: &CancellationToken) -> Result<()> {
        let mut failures = MultiError::default();

        for repo in &self.repos {
            if !repo.enabled {
                continue;
            }
            let http = HttpClient::new(&tls_options_for(repo))?;
            let repo_id = RepoId::next();
            let matcher = exact_kernel_matcher(&self.kernel);

            for candidate in &self.candidates {
                let label = format!("{}/{}", repo.section, candidate);
                let found = kpm_rpm_repo::fetch_package(
                    repo,
                    &self.vars,
                    &http,
                    repo_id,
                    self.logger.as_ref(),
                    &|header| header.name == *candidate && matcher(header),
                    cancel,
                )
                .await;

                match found {
                    Ok(package) => {
                        kpm_rpm_format::extract_rpm_package(
                            &package.data[..],
                            directory,
                            &self.kernel,
                            self.logger.as_ref(),
                            cancel,
                        )?;
                        return Ok(());
                    }
                    Err(e) => {
                        failures.push(label, e.to_string());
                    }
                }
            }
        }

        Err(crate::error::Error::NoBackendSucceeded(failures))
    }
}
