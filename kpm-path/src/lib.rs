// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Relocates host configuration paths under a foreign root.

When this engine runs against a mounted copy of another system's filesystem
rather than its own, every reference to `/etc` or `/var` needs to resolve
against the mount point instead. [host_etc_join] and [host_var_join] are the
only sanctioned way to build such paths; everywhere else in the engine that
reads host configuration goes through them.
*/

use std::env;
use std::path::PathBuf;

fn raw_host_join(env_name: &str, default_prefix: &str, parts: &[&str]) -> PathBuf {
    let Some(first) = parts.first() else {
        return PathBuf::new();
    };

    let host_path = env::var(env_name).unwrap_or_default();

    if host_path.is_empty() || !first.starts_with(default_prefix) {
        return parts.iter().collect();
    }

    let remainder = first.strip_prefix(default_prefix).unwrap_or(first);

    let mut joined = PathBuf::from(host_path);
    if !remainder.is_empty() {
        joined.push(remainder.trim_start_matches('/'));
    }
    for part in &parts[1..] {
        joined.push(part);
    }
    joined
}

/// Join path components, relocating a leading `/etc` under `$HOST_ETC` if set.
pub fn host_etc_join(parts: &[&str]) -> PathBuf {
    raw_host_join("HOST_ETC", "/etc", parts)
}

/// Join path components, relocating a leading `/var` under `$HOST_VAR` if set.
pub fn host_var_join(parts: &[&str]) -> PathBuf {
    raw_host_join("HOST_VAR", "/var", parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The process environment is global state; serialize tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn without_host_etc_joins_verbatim() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("HOST_ETC");
        assert_eq!(
            host_etc_join(&["/etc", "yum.repos.d"]),
            PathBuf::from("/etc/yum.repos.d")
        );
    }

    #[test]
    fn with_host_etc_relocates_prefix() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("HOST_ETC", "/host/etc");
        assert_eq!(
            host_etc_join(&["/etc", "yum.repos.d"]),
            PathBuf::from("/host/etc/yum.repos.d")
        );
        env::remove_var("HOST_ETC");
    }

    #[test]
    fn non_etc_prefix_is_not_relocated() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("HOST_ETC", "/host/etc");
        assert_eq!(
            host_etc_join(&["/opt/etc", "foo"]),
            PathBuf::from("/opt/etc/foo")
        );
        env::remove_var("HOST_ETC");
    }

    #[test]
    fn host_var_join_uses_its_own_variable() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("HOST_ETC");
        env::set_var("HOST_VAR", "/host/var");
        assert_eq!(
            host_var_join(&["/var", "cache", "dnf"]),
            PathBuf::from("/host/var/cache/dnf")
        );
        env::remove_var("HOST_VAR");
    }

    #[test]
    fn empty_parts_yield_empty_path() {
        let _guard = ENV_LOCK.lock().unwrap();
        assert_eq!(host_etc_join(&[]), PathBuf::new());
    }
}
