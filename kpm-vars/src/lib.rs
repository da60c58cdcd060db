// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `$arch`/`$basearch`/`$releasever`-style variable substitution.

Mirrors what `dnf`/`yum` do: a handful of built-in variables plus one
variable per file under `/etc/dnf/vars` and `/etc/yum/vars`, all expanded in
a single left-to-right pass over the target string.
*/

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A resolved set of substitution variables.
#[derive(Clone, Debug, Default)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    /// Start from the three built-ins every repo config can reference.
    pub fn with_builtins(arch: &str, basearch: &str, releasever: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert("arch".to_string(), arch.to_string());
        values.insert("basearch".to_string(), basearch.to_string());
        values.insert("releasever".to_string(), releasever.to_string());
        Self { values }
    }

    /// Merge in one variable per regular file found directly under `dir`
    /// (non-recursive), using the filename as the variable name and the
    /// trimmed file content as its value. Missing directories are not an
    /// error; this is how an engine running against a fresh host with no
    /// `/etc/dnf/vars` behaves.
    pub fn load_vars_dir(&mut self, dir: &Path) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Ok(content) = fs::read_to_string(&path) {
                self.values.insert(name.to_string(), content.trim().to_string());
            }
        }
    }

    /// Load the standard `<host>/etc/dnf/vars` and `<host>/etc/yum/vars`
    /// directories, relocated under `HOST_ETC` if set.
    pub fn load_standard_vars_dirs(&mut self) {
        self.load_vars_dir(&kpm_path::host_etc_join(&["/etc", "dnf", "vars"]));
        self.load_vars_dir(&kpm_path::host_etc_join(&["/etc", "yum", "vars"]));
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Expand every `$name` occurrence in `input`, leaving unknown names
    /// verbatim. Single left-to-right pass: a value that itself contains a
    /// `$token` is not re-expanded.
    pub fn expand(&self, input: &str) -> String {
        let bytes = input.as_bytes();
        let mut out = String::with_capacity(input.len());
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] == b'$' {
                let mut j = i + 1;
                while j < bytes.len() && is_var_char(bytes[j]) {
                    j += 1;
                }
                if j > i + 1 {
                    let name = &input[i + 1..j];
                    match self.get(name) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&input[i..j]),
                    }
                    i = j;
                    continue;
                }
            }

            let ch = input[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }

        out
    }
}

fn is_var_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_builtins() {
        let vars = Vars::with_builtins("x86_64", "x86_64", "38");
        assert_eq!(
            vars.expand("https://example.org/$basearch/os?release=$releasever"),
            "https://example.org/x86_64/os?release=38"
        );
    }

    #[test]
    fn unknown_variable_left_verbatim() {
        let vars = Vars::with_builtins("x86_64", "x86_64", "38");
        assert_eq!(vars.expand("$awsregion/repo"), "$awsregion/repo");
    }

    #[test]
    fn loads_variables_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("awsregion"), "us-east-1\n").unwrap();

        let mut vars = Vars::with_builtins("x86_64", "x86_64", "38");
        vars.load_vars_dir(dir.path());

        assert_eq!(vars.expand("$awsregion"), "us-east-1");
    }

    #[test]
    fn substitution_is_single_pass() {
        let mut vars = Vars::with_builtins("x86_64", "x86_64", "38");
        vars.set("outer", "$inner");
        vars.set("inner", "leaf");
        assert_eq!(vars.expand("$outer"), "$inner");
    }
}
