//! Spooler configuration.
//!
//! Loaded from TOML; every field has a default so a file only needs
//! `spool_dir`:
//!
//! ```toml
//! spool_dir = "/var/spool/app"
//! frequency_secs = 30
//! ordered = true
//! harakiri_secs = 120
//! chdir = "/srv/app"
//!
//! [restart]
//! base_delay_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::restart::RestartPolicy;
use crate::app::scanner::ScanMode;
use crate::error::SpoolError;

const DEFAULT_FREQUENCY_SECS: u64 = 30;
const DEFAULT_NICE: i32 = 19;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Spool root. The queue is inactive while unset.
    pub spool_dir: Option<PathBuf>,
    /// Upper bound on the wait between passes.
    pub frequency_secs: u64,
    /// Sorted scans with priority-bucket recursion.
    pub ordered: bool,
    /// Per-handler time budget; 0 disables the watchdog.
    pub harakiri_secs: u64,
    /// Working directory to switch into before each dispatch. The consumer is a
    /// thread, so this changes the working directory of the whole host process.
    pub chdir: Option<PathBuf>,
    /// Nice value the consumer thread lowers itself to.
    pub nice: i32,
    /// Write a pid file and accept SIGUSR1 wake-ups from other processes.
    pub process_signals: bool,
    pub restart: RestartPolicy,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            spool_dir: None,
            frequency_secs: DEFAULT_FREQUENCY_SECS,
            ordered: false,
            harakiri_secs: 0,
            chdir: None,
            nice: DEFAULT_NICE,
            process_signals: false,
            restart: RestartPolicy::default(),
        }
    }
}

impl SpoolConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, SpoolError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SpoolError::io("read", path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SpoolError> {
        toml::from_str(content).map_err(|e| SpoolError::Config(e.to_string()))
    }

    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn with_frequency_secs(mut self, secs: u64) -> Self {
        self.frequency_secs = secs;
        self
    }

    pub fn with_harakiri_secs(mut self, secs: u64) -> Self {
        self.harakiri_secs = secs;
        self
    }

    pub fn with_chdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chdir = Some(dir.into());
        self
    }

    pub fn with_process_signals(mut self, enabled: bool) -> Self {
        self.process_signals = enabled;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn validate(&self) -> Result<(), SpoolError> {
        if self.spool_dir.is_none() {
            return Err(SpoolError::Inactive);
        }
        if self.frequency_secs == 0 {
            return Err(SpoolError::Config(
                "frequency_secs must be at least 1".into(),
            ));
        }
        if !(-20..=19).contains(&self.nice) {
            return Err(SpoolError::Config(format!(
                "nice must be within -20..=19, got {}",
                self.nice
            )));
        }
        Ok(())
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_secs)
    }

    pub fn harakiri_budget(&self) -> Option<Duration> {
        (self.harakiri_secs > 0).then(|| Duration::from_secs(self.harakiri_secs))
    }

    pub fn scan_mode(&self) -> ScanMode {
        if self.ordered {
            ScanMode::Ordered
        } else {
            ScanMode::Unordered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config = SpoolConfig::from_toml_str(r#"spool_dir = "/var/spool/app""#).unwrap();
        assert_eq!(config.spool_dir, Some(PathBuf::from("/var/spool/app")));
        assert_eq!(config.frequency(), Duration::from_secs(30));
        assert_eq!(config.scan_mode(), ScanMode::Unordered);
        assert_eq!(config.harakiri_budget(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_file_is_parsed() {
        let config = SpoolConfig::from_toml_str(
            r#"
            spool_dir = "/s"
            frequency_secs = 5
            ordered = true
            harakiri_secs = 60
            chdir = "/srv"
            nice = 10

            [restart]
            base_delay_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.scan_mode(), ScanMode::Ordered);
        assert_eq!(config.harakiri_budget(), Some(Duration::from_secs(60)));
        assert_eq!(config.chdir, Some(PathBuf::from("/srv")));
        assert_eq!(config.restart.base_delay_ms, 250);
        assert_eq!(config.restart.multiplier, 2.0);
    }

    #[test]
    fn missing_spool_dir_means_inactive() {
        let err = SpoolConfig::default().validate().unwrap_err();
        assert!(matches!(err, SpoolError::Inactive));
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let err = SpoolConfig::default()
            .with_spool_dir("/s")
            .with_frequency_secs(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SpoolError::Config(_)));
    }

    #[test]
    fn unknown_toml_is_a_config_error() {
        let err = SpoolConfig::from_toml_str("ordered = \"maybe\"").unwrap_err();
        assert!(matches!(err, SpoolError::Config(_)));
    }
}
