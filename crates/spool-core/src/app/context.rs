//! SpoolContext - the immutable state every component is built from.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::wake::{ConsumerRegistry, PID_FILE_NAME};
use crate::config::SpoolConfig;
use crate::domain::NameGenerator;
use crate::error::SpoolError;
use crate::ports::{Clock, SystemClock};

/// Validated configuration plus the process-wide pieces producers and the
/// consumer share: the name generator and the consumer registry.
pub struct SpoolContext {
    config: SpoolConfig,
    spool_dir: PathBuf,
    clock: Arc<dyn Clock>,
    names: Arc<NameGenerator>,
    consumers: ConsumerRegistry,
}

impl SpoolContext {
    pub fn new(config: SpoolConfig) -> Result<Arc<Self>, SpoolError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// The spool directory is created if missing and made absolute, so later
    /// working-directory changes cannot move it.
    pub fn with_clock(config: SpoolConfig, clock: Arc<dyn Clock>) -> Result<Arc<Self>, SpoolError> {
        config.validate()?;
        let dir = config.spool_dir.as_deref().ok_or(SpoolError::Inactive)?;
        fs::create_dir_all(dir).map_err(|e| SpoolError::io("mkdir", dir, e))?;
        let spool_dir = std::path::absolute(dir).map_err(|e| SpoolError::io("realpath", dir, e))?;

        Ok(Arc::new(Self {
            config,
            spool_dir,
            clock,
            names: NameGenerator::shared(),
            consumers: ConsumerRegistry::new(),
        }))
    }

    /// Swap in a private name generator, for tests that need exact names.
    #[cfg(test)]
    pub(crate) fn with_names(mut self: Arc<Self>, names: NameGenerator) -> Arc<Self> {
        match Arc::get_mut(&mut self) {
            Some(ctx) => ctx.names = Arc::new(names),
            None => panic!("context already shared"),
        }
        self
    }

    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn names(&self) -> &NameGenerator {
        &self.names
    }

    pub fn consumers(&self) -> &ConsumerRegistry {
        &self.consumers
    }

    pub fn pid_file(&self) -> PathBuf {
        self.spool_dir.join(PID_FILE_NAME)
    }
}

impl std::fmt::Debug for SpoolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoolContext")
            .field("spool_dir", &self.spool_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
