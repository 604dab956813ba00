//! Consumer - the scan/dispatch/wait loop.
//!
//! One pass scans the spool and hands every due file to the dispatcher. Between
//! passes the loop waits for whichever comes first: the poll interval, a wake
//! notification from a producer, or a control signal from the supervisor.
//! Closing the control channel stops the consumer after the current pass.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use super::context::SpoolContext;
use super::control::ControlSignals;
use super::dispatcher::Dispatcher;
use super::harakiri::Harakiri;
use super::registry::HandlerRegistry;
use super::scanner::Scanner;
use crate::domain::PassReport;
use crate::error::SpoolError;

/// Why [`Consumer::run`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The control channel was closed; nobody is left to talk to.
    SupervisorGone,
}

enum Wake {
    Timer,
    Notified,
    Control(Option<u8>),
}

pub struct Consumer {
    ctx: Arc<SpoolContext>,
    scanner: Scanner,
    dispatcher: Dispatcher,
    waker: Arc<Notify>,
    control: Option<mpsc::Receiver<u8>>,
    signals: ControlSignals,
}

impl Consumer {
    pub fn new(ctx: Arc<SpoolContext>, registry: Arc<HandlerRegistry>) -> Self {
        Self::with_harakiri(ctx, registry, Harakiri::new())
    }

    /// Build with a watchdog shared with whoever supervises this consumer.
    pub fn with_harakiri(ctx: Arc<SpoolContext>, registry: Arc<HandlerRegistry>, harakiri: Harakiri) -> Self {
        let scanner = Scanner::new(ctx.config().scan_mode(), ctx.shared_clock());
        let dispatcher = Dispatcher::new(ctx.clone(), registry, harakiri);
        Self {
            ctx,
            scanner,
            dispatcher,
            waker: Arc::new(Notify::new()),
            control: None,
            signals: ControlSignals::new(),
        }
    }

    pub fn with_control(mut self, control: mpsc::Receiver<u8>, signals: ControlSignals) -> Self {
        self.control = Some(control);
        self.signals = signals;
        self
    }

    pub fn with_waker(mut self, waker: Arc<Notify>) -> Self {
        self.waker = waker;
        self
    }

    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.waker)
    }

    /// Scan once and dispatch everything that is due.
    pub async fn run_pass(&self) -> Result<PassReport, SpoolError> {
        let scan = self.scanner.scan(self.ctx.spool_dir())?;
        let mut report = PassReport {
            deferred: scan.deferred,
            ..PassReport::default()
        };
        for candidate in &scan.candidates {
            let outcome = self.dispatcher.process(candidate).await?;
            report.record(&outcome);
        }
        if report.dispatched() > 0 || report.corrupted > 0 {
            debug!(?report, "spooler pass finished");
        }
        Ok(report)
    }

    /// Loop until the control channel closes or a fatal error occurs.
    pub async fn run(mut self) -> Result<ConsumerExit, SpoolError> {
        info!(
            spool_dir = %self.ctx.spool_dir().display(),
            mode = ?self.scanner.mode(),
            frequency_secs = self.ctx.config().frequency_secs,
            "spooler consumer started"
        );
        let frequency = self.ctx.config().frequency();

        loop {
            self.run_pass().await?;

            let wake = match self.control.as_mut() {
                Some(control) => tokio::select! {
                    _ = tokio::time::sleep(frequency) => Wake::Timer,
                    _ = self.waker.notified() => Wake::Notified,
                    signum = control.recv() => Wake::Control(signum),
                },
                None => tokio::select! {
                    _ = tokio::time::sleep(frequency) => Wake::Timer,
                    _ = self.waker.notified() => Wake::Notified,
                },
            };

            match wake {
                Wake::Timer => {}
                Wake::Notified => debug!("spooler woken up"),
                Wake::Control(Some(signum)) => {
                    info!(signum, "spooler received a control signal");
                    if let Err(e) = self.signals.handle(signum) {
                        warn!(signum, error = %e, "control signal not handled");
                    }
                }
                Wake::Control(None) => {
                    info!("supervisor died, spooler consumer exiting");
                    return Ok(ConsumerExit::SupervisorGone);
                }
            }
        }
    }
}
