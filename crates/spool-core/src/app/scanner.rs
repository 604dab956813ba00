//! Directory scanner: finds spool files that are due.
//!
//! Unordered mode reads one directory level in whatever order the OS returns.
//! Ordered mode sorts each level with [`natural_cmp`] and descends into
//! priority buckets depth-first, so bucket `1` is drained before bucket `2`
//! and `9` comes before `10`.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Priority, SpoolName};
use crate::error::SpoolError;
use crate::ports::Clock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Unordered,
    Ordered,
}

/// A spool file that is due for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub dir: PathBuf,
    pub name: String,
}

impl Candidate {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

/// Outcome of one scan, in visit order.
#[derive(Debug, Default)]
pub struct Scan {
    pub candidates: Vec<Candidate>,
    /// Spool files (or buckets) dated in the future.
    pub deferred: usize,
}

pub struct Scanner {
    mode: ScanMode,
    clock: Arc<dyn Clock>,
}

impl Scanner {
    pub fn new(mode: ScanMode, clock: Arc<dyn Clock>) -> Self {
        Self { mode, clock }
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Scan the spool root. An unreadable root is fatal for the consumer;
    /// an unreadable bucket only loses that bucket for this pass.
    pub fn scan(&self, root: &Path) -> Result<Scan, SpoolError> {
        let now = self.clock.now();
        let mut scan = Scan::default();
        let names = read_names(root).map_err(|source| SpoolError::SpoolRootUnavailable {
            path: root.to_path_buf(),
            source,
        })?;
        self.visit(root, names, now, &mut scan);
        Ok(scan)
    }

    fn visit(&self, dir: &Path, mut names: Vec<String>, now: DateTime<Utc>, scan: &mut Scan) {
        if self.mode == ScanMode::Ordered {
            names.sort_by(|a, b| natural_cmp(a, b));
        }
        for name in names {
            self.consider(dir, name, now, scan);
        }
    }

    fn consider(&self, dir: &Path, name: String, now: DateTime<Utc>, scan: &mut Scan) {
        let bucket = self.mode == ScanMode::Ordered && Priority::parse_bucket(&name).is_some();
        if !bucket && !SpoolName::is_spool_file(&name) {
            return;
        }

        let path = dir.join(&name);
        // lstat: symlinks are never followed
        let Ok(meta) = fs::symlink_metadata(&path) else {
            // consumed or removed since the directory was read
            return;
        };

        if let Ok(modified) = meta.modified() {
            if DateTime::<Utc>::from(modified) > now {
                scan.deferred += 1;
                return;
            }
        }

        if bucket {
            if meta.is_dir() {
                match read_names(&path) {
                    Ok(names) => self.visit(&path, names, now, scan),
                    Err(e) => warn!(dir = %path.display(), error = %e, "unable to read priority bucket"),
                }
            }
            return;
        }

        if meta.file_type().is_file() {
            scan.candidates.push(Candidate {
                dir: dir.to_path_buf(),
                name,
            });
        }
    }
}

fn read_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "readdir() failed");
                continue;
            }
        };
        // spool names are ASCII; anything else is not ours
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Version-style comparison in the manner of `versionsort`: runs of digits
/// compare by numeric value, the rest byte by byte. A run with a leading zero
/// is fractional and sorts before any integral run, so
/// `000 < 00 < 01 < 010 < 09 < 0 < 1 < 9 < 10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let (ra, next_i) = digit_run(a, i);
            let (rb, next_j) = digit_run(b, j);
            let ordering = compare_digit_runs(ra, rb);
            if ordering != Ordering::Equal {
                return ordering;
            }
            i = next_i;
            j = next_j;
        } else {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                ordering => return ordering,
            }
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn digit_run(s: &[u8], start: usize) -> (&[u8], usize) {
    let end = s[start..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map_or(s.len(), |offset| start + offset);
    (&s[start..end], end)
}

fn compare_digit_runs(a: &[u8], b: &[u8]) -> Ordering {
    let fractional = |run: &[u8]| run.first() == Some(&b'0');
    match (fractional(a), fractional(b)) {
        (false, false) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => {
            let common = a.len().min(b.len());
            match a[..common].cmp(&b[..common]) {
                Ordering::Equal if a[..common].iter().all(|c| *c == b'0') => {
                    // more leading zeros first: "00" < "0"
                    b.len().cmp(&a.len())
                }
                Ordering::Equal => a.len().cmp(&b.len()),
                ordering => ordering,
            }
        }
    }
}
