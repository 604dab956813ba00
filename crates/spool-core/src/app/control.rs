//! Control signals delivered to the consumer as single bytes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SpoolError;

pub type ControlAction = Arc<dyn Fn(u8) -> Result<(), SpoolError> + Send + Sync>;

/// Table of actions keyed by signal number.
#[derive(Clone, Default)]
pub struct ControlSignals {
    actions: HashMap<u8, ControlAction>,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, signum: u8, action: F)
    where
        F: Fn(u8) -> Result<(), SpoolError> + Send + Sync + 'static,
    {
        self.actions.insert(signum, Arc::new(action));
    }

    pub fn handle(&self, signum: u8) -> Result<(), SpoolError> {
        match self.actions.get(&signum) {
            Some(action) => action(signum),
            None => Err(SpoolError::UnknownSignal(signum)),
        }
    }
}

impl fmt::Debug for ControlSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut signals: Vec<_> = self.actions.keys().collect();
        signals.sort();
        f.debug_struct("ControlSignals")
            .field("signals", &signals)
            .finish()
    }
}
