// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reads the on-disk repository configuration formats the two package
managers use: `.repo` INI files for yum/dnf and `sources.list`-style lines
for apt.
*/

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// `type=` value in a `.repo` section; only `yast2` changes behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RepoType {
    RpmMd,
    Yast2,
}

/// One `[section]` of a yum/dnf `.repo` file.
#[derive(Debug)]
pub struct RpmRepo {
    pub section: String,
    pub name: Option<String>,
    pub baseurl: Option<String>,
    pub mirrorlist: Option<String>,
    pub metalink: Option<String>,
    pub repo_type: RepoType,
    pub enabled: bool,
    pub gpgcheck: bool,
    pub gpgkeys: Vec<String>,
    pub sslverify: bool,
    pub sslclientcert: Option<String>,
    pub sslclientkey: Option<String>,
    pub sslcacert: Option<String>,
    resolved_base_url: RwLock<Option<String>>,
}

impl Clone for RpmRepo {
    fn clone(&self) -> Self {
        RpmRepo {
            section: self.section.clone(),
            name: self.name.clone(),
            baseurl: self.baseurl.clone(),
            mirrorlist: self.mirrorlist.clone(),
            metalink: self.metalink.clone(),
            repo_type: self.repo_type,
            enabled: self.enabled,
            gpgcheck: self.gpgcheck,
            gpgkeys: self.gpgkeys.clone(),
            sslverify: self.sslverify,
            sslclientcert: self.sslclientcert.clone(),
            sslclientkey: self.sslclientkey.clone(),
            sslcacert: self.sslcacert.clone(),
            resolved_base_url: RwLock::new(self.resolved_base_url()),
        }
    }
}

impl RpmRepo {
    fn from_section(section: String, fields: Vec<(String, String)>) -> Self {
        let mut repo = RpmRepo {
            section,
            name: None,
            baseurl: None,
            mirrorlist: None,
            metalink: None,
            repo_type: RepoType::RpmMd,
            enabled: true,
            gpgcheck: true,
            gpgkeys: Vec::new(),
            sslverify: true,
            sslclientcert: None,
            sslclientkey: None,
            sslcacert: None,
            resolved_base_url: RwLock::new(None),
        };

        for (key, value) in fields {
            match key.as_str() {
                "name" => repo.name = Some(value),
                "baseurl" => repo.baseurl = Some(value),
                "mirrorlist" => repo.mirrorlist = Some(value),
                "metalink" => repo.metalink = Some(value),
                "type" => {
                    repo.repo_type = if value.eq_ignore_ascii_case("yast2") {
                        RepoType::Yast2
                    } else {
                        RepoType::RpmMd
                    }
                }
                "enabled" => repo.enabled = parse_bool(&value, true),
                "gpgcheck" => repo.gpgcheck = parse_bool(&value, true),
                "gpgkey" => {
                    repo.gpgkeys = value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                }
                "sslverify" => repo.sslverify = parse_bool(&value, true),
                "sslclientcert" => repo.sslclientcert = Some(value),
                "sslclientkey" => repo.sslclientkey = Some(value),
                "sslcacert" => repo.sslcacert = Some(value),
                _ => {}
            }
        }

        // yast2 repos serve their rpm-md tree under a `suse/` subdirectory
        // of the configured base URL.
        if repo.repo_type == RepoType::Yast2 {
            if let Some(baseurl) = &repo.baseurl {
                let mut joined = baseurl.clone();
                if !joined.ends_with('/') {
                    joined.push('/');
                }
                joined.push_str("suse/");
                repo.baseurl = Some(joined);
            }
        }

        repo
    }

    /// Build a repo that was never read from a `.repo` file, e.g. a CentOS
    /// Vault mirror or a SUSE upstream repository synthesised by the
    /// orchestrator. Other fields default the same way a bare `.repo`
    /// section would and are freely overridden by the caller.
    pub fn synthesized(section: impl Into<String>, baseurl: impl Into<String>) -> Self {
        RpmRepo {
            section: section.into(),
            name: None,
            baseurl: Some(baseurl.into()),
            mirrorlist: None,
            metalink: None,
            repo_type: RepoType::RpmMd,
            enabled: true,
            gpgcheck: true,
            gpgkeys: Vec::new(),
            sslverify: true,
            sslclientcert: None,
            sslclientkey: None,
            sslcacert: None,
            resolved_base_url: RwLock::new(None),
        }
    }

    /// The base URL resolved for this run, if URL resolution has already
    /// happened once (see the RPM repo client). Kept separate from the
    /// configured `baseurl`/`mirrorlist`/`metalink` fields so resolution
    /// never mutates what looks like immutable configuration.
    pub fn resolved_base_url(&self) -> Option<String> {
        self.resolved_base_url.read().unwrap().clone()
    }

    pub fn set_resolved_base_url(&self, url: String) {
        *self.resolved_base_url.write().unwrap() = Some(url);
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        _ => default,
    }
}

/// Parse the contents of a single `.repo` file into its sections.
pub fn parse_repo_file(content: &str) -> Vec<RpmRepo> {
    let mut repos = Vec::new();
    let mut current_section: Option<String> = None;
    let mut current_fields: Vec<(String, String)> = Vec::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            if let Some(section) = current_section.take() {
                if !section.eq_ignore_ascii_case("DEFAULT") {
                    repos.push(RpmRepo::from_section(section, std::mem::take(&mut current_fields)));
                } else {
                    current_fields.clear();
                }
            }
            current_section = Some(line[1..line.len() - 1].to_string());
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            if current_section.is_some() {
                current_fields.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
    }

    if let Some(section) = current_section {
        if !section.eq_ignore_ascii_case("DEFAULT") {
            repos.push(RpmRepo::from_section(section, current_fields));
        }
    }

    repos
}

/// Read every `*.repo` file directly under `dir` (non-recursive), relocated
/// under `HOST_ETC`/`HOST_VAR` by the caller before this is invoked.
pub fn read_rpm_repos_dir(dir: &Path) -> Result<Vec<RpmRepo>> {
    let mut repos = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return Ok(repos);
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("repo") {
            continue;
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::Io { path: path.clone(), source: e })?;
        repos.extend(parse_repo_file(&content));
    }

    Ok(repos)
}

/// One line of a `sources.list`-style file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebSourceEntry {
    pub enabled: bool,
    pub source: bool,
    pub options: String,
    pub uri: String,
    pub distribution: String,
    pub components: Vec<String>,
    pub comment: Option<String>,
}

impl DebSourceEntry {
    /// The `signed-by=<path>` option, if the `[...]` options block carries one.
    pub fn signed_by(&self) -> Option<String> {
        self.options.split_whitespace().find_map(|token| {
            token
                .strip_prefix("signed-by=")
                .map(|path| path.to_string())
        })
    }
}

static SOURCES_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(# )?(deb|deb-src)(?: \[(.*)\])? (\S+) (\S+)(?: ([^#\n]+))?(?: +# *(.*))?$",
    )
    .unwrap()
});

/// Parse every matching line of a `sources.list`-style document. Lines that
/// don't match the expected shape are silently ignored.
pub fn parse_sources_list(content: &str) -> Vec<DebSourceEntry> {
    let mut entries = Vec::new();

    for line in content.lines() {
        let Some(captures) = SOURCES_LIST_RE.captures(line.trim()) else {
            continue;
        };

        let enabled = captures.get(1).is_none();
        let source = captures.get(2).map(|m| m.as_str()) == Some("deb-src");
        let options = captures
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let uri = captures.get(4).map(|m| m.as_str().to_string()).unwrap_or_default();
        let distribution = captures.get(5).map(|m| m.as_str().to_string()).unwrap_or_default();
        let components = captures
            .get(6)
            .map(|m| {
                m.as_str()
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let comment = captures.get(7).map(|m| m.as_str().to_string());

        entries.push(DebSourceEntry {
            enabled,
            source,
            options,
            uri,
            distribution,
            components,
            comment,
        });
    }

    entries
}

/// Read `<dir>/sources.list` plus every `<dir>/sources.list.d/*.list`.
pub fn read_apt_sources_dir(dir: &Path) -> Result<Vec<DebSourceEntry>> {
    let mut entries = Vec::new();

    let main_list = dir.join("sources.list");
    if let Ok(content) = fs::read_to_string(&main_list) {
        entries.extend(parse_sources_list(&content));
    }

    let drop_in_dir = dir.join("sources.list.d");
    if let Ok(readdir) = fs::read_dir(&drop_in_dir) {
        for entry in readdir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("list") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| Error::Io { path: path.clone(), source: e })?;
            entries.extend(parse_sources_list(&content));
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_basic_repo_section() {
        let content = "[base]\nname=CentOS-$releasever - Base\nbaseurl=http://mirror/centos/7/os/$basearch/\nenabled=1\ngpgcheck=1\ngpgkey=file:///etc/pki/rpm-gpg/RPM-GPG-KEY-centos7\n";
        let repos = parse_repo_file(content);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].section, "base");
        assert!(repos[0].enabled);
        assert!(repos[0].gpgcheck);
        assert_eq!(repos[0].gpgkeys, vec!["file:///etc/pki/rpm-gpg/RPM-GPG-KEY-centos7"]);
    }

    #[test]
    fn default_section_is_dropped() {
        let content = "[DEFAULT]\ngpgcheck=0\n\n[updates]\nbaseurl=http://mirror/updates/\n";
        let repos = parse_repo_file(content);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].section, "updates");
        // DEFAULT's gpgcheck=0 must not leak into the updates section.
        assert!(repos[0].gpgcheck);
    }

    #[test]
    fn yast2_type_appends_suse_suffix() {
        let content = "[repo-oss]\nbaseurl=http://download.opensuse.org/distribution/leap/15.4/repo/oss\ntype=yast2\n";
        let repos = parse_repo_file(content);
        assert_eq!(
            repos[0].baseurl.as_deref(),
            Some("http://download.opensuse.org/distribution/leap/15.4/repo/oss/suse/")
        );
    }

    #[test]
    fn resolved_base_url_is_a_separate_slot() {
        let content = "[fedora]\nmetalink=https://example/metalink\n";
        let repo = &parse_repo_file(content)[0];
        assert!(repo.resolved_base_url().is_none());
        assert_eq!(repo.metalink.as_deref(), Some("https://example/metalink"));
        repo.set_resolved_base_url("https://mirror.example/fedora/".to_string());
        assert_eq!(repo.resolved_base_url().as_deref(), Some("https://mirror.example/fedora/"));
        // The configured field is untouched by resolution.
        assert_eq!(repo.metalink.as_deref(), Some("https://example/metalink"));
    }

    #[test]
    fn sources_list_fidelity_enabled_deb() {
        let entries = parse_sources_list("deb http://u dist\n");
        assert_eq!(
            entries[0],
            DebSourceEntry {
                enabled: true,
                source: false,
                options: String::new(),
                uri: "http://u".to_string(),
                distribution: "dist".to_string(),
                components: vec![],
                comment: None,
            }
        );
    }

    #[test]
    fn sources_list_fidelity_commented_deb_src_with_options_and_comment() {
        let entries =
            parse_sources_list("# deb-src [opt=val] http://u dist comp1 comp2 # comment\n");
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert!(!e.enabled);
        assert!(e.source);
        assert_eq!(e.options, "opt=val");
        assert_eq!(e.uri, "http://u");
        assert_eq!(e.distribution, "dist");
        assert_eq!(e.components, vec!["comp1", "comp2"]);
        assert_eq!(e.comment.as_deref(), Some("comment"));
    }

    #[test]
    fn signed_by_is_extracted_from_options() {
        let entries = parse_sources_list(
            "deb [signed-by=/etc/apt/keyrings/example.gpg arch=amd64] http://u dist main\n",
        );
        assert_eq!(
            entries[0].signed_by().as_deref(),
            Some("/etc/apt/keyrings/example.gpg")
        );
    }

    #[test]
    fn non_matching_lines_are_ignored() {
        let entries = parse_sources_list("not a sources line at all\n# just a comment\n");
        assert!(entries.is_empty());
    }

    #[test]
    fn reads_drop_in_list_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sources.list"), "deb http://main dist main\n").unwrap();
        let drop_in = dir.path().join("sources.list.d");
        fs::create_dir(&drop_in).unwrap();
        fs::write(drop_in.join("extra.list"), "deb http://extra dist main\n").unwrap();
        fs::write(drop_in.join("ignored.txt"), "deb http://ignored dist main\n").unwrap();

        let entries = read_apt_sources_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.uri == "http://main"));
        assert!(entries.iter().any(|e| e.uri == "http://extra"));
    }
}
