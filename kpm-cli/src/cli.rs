// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use kpm_core::StdLogLogger;
use kpm_distro::Target;
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ABOUT: &str = "\
# About

`kpm` fetches the kernel headers package matching a running kernel from its
distribution's DEB or RPM package repositories, verifies it, and extracts
it into a local directory.
";

const DOWNLOAD_ABOUT: &str = "\
Downloads and extracts a kernel headers package.

The distribution family, kernel release, and architecture are supplied
directly; this command does not itself parse `/etc/os-release` or call
`uname` — pass `--os-release` to make an already-mounted copy of that file
available for your own bookkeeping, and `--kernel`/`--arch` for the values
this command actually acts on.
";

pub async fn run() -> Result<()> {
    let app = Command::new("kpm")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Fetch a running kernel's headers from its distribution's repositories")
        .long_about(ABOUT)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity; may be specified multiple times"),
        );

    let app = app.subcommand(
        Command::new("download")
            .about("Download and extract a kernel headers package")
            .long_about(DOWNLOAD_ABOUT)
            .arg(
                Arg::new("family")
                    .long("family")
                    .takes_value(true)
                    .required(true)
                    .help("Distribution family, e.g. ubuntu, rhel, centos, fedora, amazonlinux, opensuse, oracle"),
            )
            .arg(
                Arg::new("platform")
                    .long("platform")
                    .takes_value(true)
                    .help("Distribution codename or platform identifier, informational only"),
            )
            .arg(
                Arg::new("release")
                    .long("release")
                    .takes_value(true)
                    .help("Distribution release version, e.g. 22.04, 9, 38"),
            )
            .arg(
                Arg::new("kernel")
                    .long("kernel")
                    .takes_value(true)
                    .required(true)
                    .help("Running kernel's uname -r string"),
            )
            .arg(
                Arg::new("arch")
                    .long("arch")
                    .takes_value(true)
                    .required(true)
                    .help("Running kernel's uname -m string"),
            )
            .arg(
                Arg::new("os_release")
                    .long("os-release")
                    .takes_value(true)
                    .help("Path to an already-mounted /etc/os-release, read verbatim"),
            )
            .arg(
                Arg::new("output")
                    .long("output")
                    .takes_value(true)
                    .default_value("/tmp")
                    .help("Directory to extract kernel headers into"),
            )
            .arg(
                Arg::new("apt_config_dir")
                    .long("apt-config-dir")
                    .takes_value(true)
                    .help("Directory containing sources.list and sources.list.d, default <host>/etc/apt"),
            )
            .arg(
                Arg::new("yum_repos_dir")
                    .long("yum-repos-dir")
                    .takes_value(true)
                    .help("Directory containing .repo files, default <host>/etc/yum.repos.d or <host>/etc/zypp/repos.d for the opensuse/sles family"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str())).init();

    let (command, args) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("invalid sub-command"))?;

    match command {
        "download" => command_download(args).await,
        _ => panic!("unhandled sub-command"),
    }
}

fn is_suse_family(family: &str) -> bool {
    matches!(family.to_ascii_lowercase().as_str(), "opensuse" | "sles")
}

async fn command_download(args: &ArgMatches) -> Result<()> {
    let family = args.value_of("family").expect("family is required").to_string();
    let kernel = args.value_of("kernel").expect("kernel is required").to_string();
    let arch = args.value_of("arch").expect("arch is required").to_string();
    let release_version = args.value_of("release").map(|s| s.to_string());
    let output = PathBuf::from(args.value_of("output").expect("output has a default"));

    if let Some(os_release_path) = args.value_of("os_release") {
        match std::fs::read_to_string(os_release_path) {
            Ok(content) => log::debug!("read {} bytes from {}", content.len(), os_release_path),
            Err(e) => log::warn!("could not read {}: {}", os_release_path, e),
        }
    }

    let apt_config_dir = args
        .value_of("apt_config_dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| kpm_path::host_etc_join(&["/etc/apt"]));

    let yum_repos_dir = args.value_of("yum_repos_dir").map(PathBuf::from).unwrap_or_else(|| {
        if is_suse_family(&family) {
            kpm_path::host_etc_join(&["/etc/zypp/repos.d"])
        } else {
            kpm_path::host_etc_join(&["/etc/yum.repos.d"])
        }
    });

    let apt_sources = kpm_config::read_apt_sources_dir(&apt_config_dir)?;
    let rpm_repos = kpm_config::read_rpm_repos_dir(&yum_repos_dir)?;

    std::fs::create_dir_all(&output)?;

    let target = Target {
        family,
        kernel,
        arch,
        release_version,
    };

    let logger: Arc<dyn kpm_core::KpmLogger> = Arc::new(StdLogLogger);
    let backend = kpm_distro::build_backend(&target, apt_sources, rpm_repos, logger).await?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    backend.get_kernel_headers(&output, &cancel).await?;

    println!("extracted kernel headers for {} into {}", target.kernel, output.display());
    Ok(())
}
