//! Spool file names and priority buckets.
//!
//! A name embeds everything needed to keep concurrent producers apart without
//! a shared counter:
//!
//! ```text
//! spoolfile_on_<host>_<pid>_<seq>_<slot>_<sec>_<usec>
//! ```
//!
//! The host may itself contain underscores, so parsing splits from the right.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ports::Clock;

pub const SPOOL_FILE_PREFIX: &str = "spoolfile_on_";

/// Priority bucket: a subdirectory of the spool root named by a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u32);

impl Priority {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// A directory entry names a priority bucket when it is a bare integer
    /// that fits a priority.
    pub fn parse_bucket(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        name.parse().ok().map(Self)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Parsed form of a spool file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpoolName {
    pub host: String,
    pub pid: u32,
    pub sequence: u64,
    pub slot: u32,
    pub secs: i64,
    pub micros: u32,
}

impl SpoolName {
    pub fn is_spool_file(name: &str) -> bool {
        name.starts_with(SPOOL_FILE_PREFIX)
    }

    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(SPOOL_FILE_PREFIX)?;
        let mut fields = rest.rsplitn(6, '_');
        let micros = fields.next()?.parse().ok()?;
        let secs = fields.next()?.parse().ok()?;
        let slot = fields.next()?.parse().ok()?;
        let sequence = fields.next()?.parse().ok()?;
        let pid = fields.next()?.parse().ok()?;
        let host = fields.next().filter(|h| !h.is_empty())?.to_string();
        Some(Self {
            host,
            pid,
            sequence,
            slot,
            secs,
            micros,
        })
    }
}

impl fmt::Display for SpoolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SPOOL_FILE_PREFIX}{}_{}_{}_{}_{}_{}",
            self.host, self.pid, self.sequence, self.slot, self.secs, self.micros
        )
    }
}

/// Derives spool file names for one process.
///
/// The lock is held only while the name is computed. It also keeps the
/// embedded timestamp strictly increasing within the process, so two calls
/// in the same microsecond still get distinct names.
#[derive(Debug)]
pub struct NameGenerator {
    host: String,
    pid: u32,
    last: Mutex<(i64, u32)>,
}

impl NameGenerator {
    pub fn new(host: impl Into<String>, pid: u32) -> Self {
        Self {
            host: sanitize_host(&host.into()),
            pid,
            last: Mutex::new((i64::MIN, 0)),
        }
    }

    /// The generator shared by every spool context in this process.
    ///
    /// Contexts share the pid and restart their sequences at one, so the last
    /// stamp has to be process-wide for their names to stay apart.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<NameGenerator>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::for_current_process())))
    }

    fn for_current_process() -> Self {
        let host = match hostname::get() {
            Ok(host) => host.to_string_lossy().into_owned(),
            Err(e) => {
                warn!(error = %e, "unable to read hostname, using localhost");
                "localhost".to_string()
            }
        };
        Self::new(host, std::process::id())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn next(&self, clock: &dyn Clock, sequence: u64, slot: u32) -> SpoolName {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = clock.now();
        let mut stamp = (now.timestamp(), now.timestamp_subsec_micros().min(999_999));
        if stamp <= *last {
            stamp = match last.1 {
                999_999 => (last.0 + 1, 0),
                micros => (last.0, micros + 1),
            };
        }
        *last = stamp;
        drop(last);

        SpoolName {
            host: self.host.clone(),
            pid: self.pid,
            sequence,
            slot,
            secs: stamp.0,
            micros: stamp.1,
        }
    }
}

fn sanitize_host(host: &str) -> String {
    let cleaned: String = host
        .chars()
        .map(|c| if c == '/' || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "localhost".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::collections::HashSet;

    #[rstest]
    #[case("0", Some(0))]
    #[case("5", Some(5))]
    #[case("10", Some(10))]
    #[case("007", Some(7))]
    #[case("", None)]
    #[case("-1", None)]
    #[case("+1", None)]
    #[case("5a", None)]
    #[case("99999999999", None)]
    #[case("spoolfile_on_x", None)]
    fn bucket_names_are_bare_integers(#[case] name: &str, #[case] expected: Option<u32>) {
        assert_eq!(Priority::parse_bucket(name), expected.map(Priority::new));
    }

    #[test]
    fn every_context_shares_one_generator() {
        let a = NameGenerator::shared();
        let b = NameGenerator::shared();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.pid(), std::process::id());
    }

    #[test]
    fn name_renders_all_fields() {
        let clock = FixedClock::new(Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap());
        let names = NameGenerator::new("web01", 4242);
        let name = names.next(&clock, 7, 3);
        assert_eq!(
            name.to_string(),
            "spoolfile_on_web01_4242_7_3_1700000000_123456"
        );
    }

    #[test]
    fn parse_splits_from_the_right() {
        let name = SpoolName::parse("spoolfile_on_my_host_12_3_0_1700000000_42").unwrap();
        assert_eq!(name.host, "my_host");
        assert_eq!(name.pid, 12);
        assert_eq!(name.sequence, 3);
        assert_eq!(name.slot, 0);
        assert_eq!(name.secs, 1_700_000_000);
        assert_eq!(name.micros, 42);
        assert!(SpoolName::parse("spoolfile_on_12_3").is_none());
        assert!(SpoolName::parse("other_file").is_none());
    }

    #[test]
    fn frozen_clock_still_yields_unique_names() {
        let clock = FixedClock::new(Utc.timestamp_opt(1_700_000_000, 999_998_000).unwrap());
        let names = NameGenerator::new("h", 1);
        let seen: HashSet<String> = (0..5)
            .map(|_| names.next(&clock, 1, 0).to_string())
            .collect();
        assert_eq!(seen.len(), 5);
        // rolled over into the next second
        assert!(seen.contains("spoolfile_on_h_1_1_0_1700000001_0"));
    }

    #[test]
    fn host_cannot_escape_the_directory() {
        let names = NameGenerator::new("a/b", 1);
        assert_eq!(names.host(), "a_b");
    }
}
