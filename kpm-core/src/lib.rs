// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Small primitives shared by every crate in the kernel-header fetching engine.

Nothing here talks to the network or the filesystem. It exists so that the
leaf crates (path relocation, archive extraction, HTTP, ...) and the
orchestrator can agree on a logging capability and an error-aggregation shape
without depending on each other.
*/

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Severity of a single log record, mirroring the standard six levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Logging capability threaded explicitly through the engine.
///
/// Call sites use one of the convenience methods below rather than a
/// process-wide logger, so the engine can be embedded by callers with their
/// own logging story.
pub trait KpmLogger: Send + Sync {
    fn log(&self, severity: Severity, message: &str);

    fn trace(&self, message: &str) {
        self.log(Severity::Trace, message)
    }

    fn debug(&self, message: &str) {
        self.log(Severity::Debug, message)
    }

    fn info(&self, message: &str) {
        self.log(Severity::Info, message)
    }

    fn warn(&self, message: &str) {
        self.log(Severity::Warn, message)
    }

    fn error(&self, message: &str) {
        self.log(Severity::Error, message)
    }
}

/// A [KpmLogger] that forwards to the `log` crate's process-wide facade.
///
/// This is the default used by the CLI binary; library code should accept
/// `&dyn KpmLogger` rather than reach for this directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdLogLogger;

impl KpmLogger for StdLogLogger {
    fn log(&self, severity: Severity, message: &str) {
        let level = match severity {
            Severity::Trace => log::Level::Trace,
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warn => log::Level::Warn,
            Severity::Error => log::Level::Error,
        };
        log::log!(level, "{}", message);
    }
}

/// A [KpmLogger] that discards everything. Handy for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLogger;

impl KpmLogger for NullLogger {
    fn log(&self, _severity: Severity, _message: &str) {}
}

/// Monotonically assigned identity for a configured repository.
///
/// The source this engine is modeled on keyed its HTTP response cache off
/// the repository struct's pointer address. That address is an accident of
/// allocation, not a stable identity, so every `Repo` constructor instead
/// pulls the next value from a process-wide counter and stores it alongside
/// its configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RepoId(u64);

static NEXT_REPO_ID: AtomicU64 = AtomicU64::new(1);

impl RepoId {
    /// Allocate a new, never-before-seen id.
    pub fn next() -> Self {
        Self(NEXT_REPO_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repo#{}", self.0)
    }
}

/// An append-only collection of per-attempt failures.
///
/// Repo iteration in both the RPM and DEB clients tries each configured
/// repository in turn; when every attempt fails the caller wants to see
/// *all* of the reasons, not just the last one. `MultiError` is that list,
/// with a `Display` impl that renders one line per attempt.
#[derive(Debug, Default)]
pub struct MultiError {
    attempts: Vec<(String, String)>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt against `label` (typically a repo id or URL).
    pub fn push(&mut self, label: impl Into<String>, error: impl fmt::Display) {
        self.attempts.push((label.into(), error.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn attempts(&self) -> &[(String, String)] {
        &self.attempts
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "no attempts were made");
        }
        writeln!(f, "all {} attempt(s) failed:", self.attempts.len())?;
        for (label, error) in &self.attempts {
            writeln!(f, "  - {}: {}", label, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_ids_are_unique_and_monotonic() {
        let a = RepoId::next();
        let b = RepoId::next();
        assert!(b.value() > a.value());
    }

    #[test]
    fn multi_error_renders_every_attempt() {
        let mut errors = MultiError::new();
        errors.push("repo-a", "404 not found");
        errors.push("repo-b", "checksum mismatch");

        let rendered = errors.to_string();
        assert!(rendered.contains("repo-a"));
        assert!(rendered.contains("repo-b"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn null_logger_accepts_all_severities() {
        let logger = NullLogger;
        logger.trace("t");
        logger.debug("d");
        logger.info("i");
        logger.warn("w");
        logger.error("e");
    }
}
