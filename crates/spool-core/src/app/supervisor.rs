//! Supervisor - keeps exactly one consumer alive.
//!
//! The consumer runs on its own OS thread ("spooler") with a single-threaded
//! runtime, so a handler that blocks or burns CPU cannot stall the host
//! application. The supervisor itself is a task on the caller's runtime:
//!
//! - forwards control signals to the current consumer
//! - respawns the consumer when it fails or panics, with backoff
//! - terminates the process when a handler blows through its harakiri budget
//!   without ever yielding
//!
//! Shutdown closes the control channel; the consumer finishes its current
//! pass and exits.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::consumer::{Consumer, ConsumerExit};
use super::context::SpoolContext;
use super::control::ControlSignals;
use super::harakiri::{HARAKIRI_EXIT_CODE, Harakiri};
use super::registry::HandlerRegistry;
use super::wake::{self, ConsumerHandle, WakeDelivery};
use crate::error::SpoolError;

const COMMAND_CAPACITY: usize = 16;
const CONTROL_CAPACITY: usize = 16;
const WATCHDOG_TICK: Duration = Duration::from_millis(250);
const HARAKIRI_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Command {
    Signal(u8),
    Shutdown,
}

/// How one consumer incarnation ended.
enum Ended {
    Finished(Result<ConsumerExit, SpoolError>),
    Panicked,
}

pub struct Supervisor {
    ctx: Arc<SpoolContext>,
    registry: Arc<HandlerRegistry>,
    signals: ControlSignals,
    isolate_stdin: bool,
}

impl Supervisor {
    pub fn new(ctx: Arc<SpoolContext>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            ctx,
            registry,
            signals: ControlSignals::new(),
            isolate_stdin: false,
        }
    }

    pub fn with_signals(mut self, signals: ControlSignals) -> Self {
        self.signals = signals;
        self
    }

    /// Point the process's stdin at /dev/null when the consumer starts.
    pub fn with_isolated_stdin(mut self, isolate: bool) -> Self {
        self.isolate_stdin = isolate;
        self
    }

    /// Spawn the supervisor task. Must be called from within a tokio runtime.
    pub fn start(self) -> SupervisorHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let ctx = self.ctx.clone();
        let join = tokio::spawn(self.supervise(commands_rx));
        SupervisorHandle {
            ctx,
            commands: commands_tx,
            join,
        }
    }

    async fn supervise(self, mut commands: mpsc::Receiver<Command>) {
        let policy = self.ctx.config().restart.clone();
        let mut failures: u32 = 0;
        let mut incarnation: u64 = 0;
        let pid_file = self.ctx.config().process_signals.then(|| self.ctx.pid_file());

        loop {
            incarnation += 1;
            let started = Instant::now();
            let harakiri = Harakiri::new();
            let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
            let (done_tx, done_rx) = oneshot::channel();

            let ended = match self.spawn_consumer(incarnation, harakiri.clone(), control_rx, done_tx) {
                Ok(()) => {
                    info!(incarnation, "spooler consumer spawned");
                    let (ended, stopping) = watch(
                        done_rx,
                        control_tx,
                        &mut commands,
                        &harakiri,
                        pid_file.as_deref(),
                    )
                    .await;
                    self.ctx.consumers().unpublish(incarnation);
                    if stopping {
                        report(incarnation, &ended);
                        return;
                    }
                    ended
                }
                Err(e) => Ended::Finished(Err(e)),
            };

            report(incarnation, &ended);
            if let Ended::Finished(Ok(ConsumerExit::SupervisorGone)) = ended {
                return;
            }

            if started.elapsed() >= policy.healthy_after() {
                failures = 0;
            }
            failures = failures.saturating_add(1);
            let delay = policy.next_delay(failures);
            warn!(failures, delay_ms = delay.as_millis() as u64, "respawning spooler consumer");

            if !backoff(delay, &mut commands).await {
                return;
            }
        }
    }

    fn spawn_consumer(
        &self,
        incarnation: u64,
        harakiri: Harakiri,
        control: mpsc::Receiver<u8>,
        done: oneshot::Sender<Result<ConsumerExit, SpoolError>>,
    ) -> Result<(), SpoolError> {
        let ctx = self.ctx.clone();
        let registry = self.registry.clone();
        let signals = self.signals.clone();
        let isolate = self.isolate_stdin;

        thread::Builder::new()
            .name("spooler".to_string())
            .spawn(move || {
                lower_priority(ctx.config().nice);
                if isolate {
                    isolate_stdin();
                }
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = done.send(Err(SpoolError::Other(format!(
                            "unable to build the consumer runtime: {e}"
                        ))));
                        return;
                    }
                };
                // a panic unwinds past this send; the dropped sender tells the supervisor
                let result = runtime.block_on(consumer_main(
                    ctx,
                    registry,
                    signals,
                    harakiri,
                    control,
                    incarnation,
                ));
                let _ = done.send(result);
            })
            .map(|_| ())
            .map_err(|e| SpoolError::Other(format!("unable to spawn the spooler thread: {e}")))
    }
}

/// Body of one consumer incarnation, on the spooler thread.
async fn consumer_main(
    ctx: Arc<SpoolContext>,
    registry: Arc<HandlerRegistry>,
    signals: ControlSignals,
    harakiri: Harakiri,
    control: mpsc::Receiver<u8>,
    incarnation: u64,
) -> Result<ConsumerExit, SpoolError> {
    registry.init_all().await?;

    let pid = std::process::id();
    let waker = Arc::new(Notify::new());
    let consumer = Consumer::with_harakiri(ctx.clone(), registry, harakiri)
        .with_control(control, signals)
        .with_waker(waker.clone());
    ctx.consumers()
        .publish(ConsumerHandle::new(pid, incarnation, waker.clone()));

    if !ctx.config().process_signals {
        return consumer.run().await;
    }

    // Listen before advertising the pid: SIGUSR1 terminates a process without a handler.
    let forwarder = forward_wake_signals(waker)?;
    let _pid_file = wake::PidFileGuard::write(ctx.pid_file(), pid)?;
    let result = consumer.run().await;
    forwarder.abort();
    result
}

/// Wait for the consumer to end, relaying commands and watching the clock.
/// The flag is true once shutdown has been requested.
async fn watch(
    mut done: oneshot::Receiver<Result<ConsumerExit, SpoolError>>,
    control: mpsc::Sender<u8>,
    commands: &mut mpsc::Receiver<Command>,
    harakiri: &Harakiri,
    pid_file: Option<&Path>,
) -> (Ended, bool) {
    let mut control = Some(control);
    let mut tick = tokio::time::interval(WATCHDOG_TICK);

    loop {
        tokio::select! {
            result = &mut done => {
                let ended = match result {
                    Ok(result) => Ended::Finished(result),
                    Err(_) => Ended::Panicked,
                };
                return (ended, control.is_none());
            }
            command = commands.recv(), if control.is_some() => match command {
                Some(Command::Signal(signum)) => {
                    if let Some(tx) = &control {
                        if tx.try_send(signum).is_err() {
                            warn!(signum, "spooler control channel full, dropping signal");
                        }
                    }
                }
                Some(Command::Shutdown) | None => {
                    info!("stopping spooler consumer");
                    control = None;
                }
            },
            _ = tick.tick() => {
                if harakiri.overdue(HARAKIRI_GRACE) {
                    error!("HARAKIRI: spooler consumer is stuck in a handler, terminating");
                    // exit skips destructors, so the consumer's guard never runs
                    if let Some(path) = pid_file {
                        wake::remove_pid_file(path, std::process::id());
                    }
                    std::process::exit(HARAKIRI_EXIT_CODE);
                }
            }
        }
    }
}

/// Sleep before a respawn. Returns false when shutdown arrived meanwhile.
async fn backoff(delay: Duration, commands: &mut mpsc::Receiver<Command>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            command = commands.recv() => match command {
                Some(Command::Signal(signum)) => {
                    warn!(signum, "no spooler consumer running, dropping signal");
                }
                Some(Command::Shutdown) | None => return false,
            },
        }
    }
}

fn report(incarnation: u64, ended: &Ended) {
    match ended {
        Ended::Finished(Ok(exit)) => info!(incarnation, ?exit, "spooler consumer stopped"),
        Ended::Finished(Err(e)) => error!(incarnation, error = %e, fatal = e.is_fatal(), "spooler consumer failed"),
        Ended::Panicked => error!(incarnation, "spooler consumer panicked"),
    }
}

/// Handle for the running supervisor.
pub struct SupervisorHandle {
    ctx: Arc<SpoolContext>,
    commands: mpsc::Sender<Command>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn context(&self) -> &Arc<SpoolContext> {
        &self.ctx
    }

    /// Deliver a control signal to the consumer.
    pub async fn signal(&self, signum: u8) -> Result<(), SpoolError> {
        self.commands
            .send(Command::Signal(signum))
            .await
            .map_err(|_| SpoolError::Other("spooler supervisor is gone".into()))
    }

    pub fn wake(&self) -> WakeDelivery {
        wake::notify_consumer(&self.ctx)
    }

    /// Stop the consumer and wait for the supervisor to finish.
    pub async fn shutdown(self) {
        // an exited supervisor has nothing left to stop
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "spooler supervisor task failed");
        }
    }
}

#[cfg(unix)]
fn forward_wake_signals(waker: Arc<Notify>) -> Result<JoinHandle<()>, SpoolError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())
        .map_err(|e| SpoolError::Other(format!("unable to listen for SIGUSR1: {e}")))?;
    Ok(tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            debug!("SIGUSR1 received, waking spooler");
            waker.notify_one();
        }
    }))
}

#[cfg(not(unix))]
fn forward_wake_signals(_waker: Arc<Notify>) -> Result<JoinHandle<()>, SpoolError> {
    Ok(tokio::spawn(async {}))
}

#[cfg(unix)]
fn lower_priority(nice: i32) {
    // SAFETY: setpriority(2) only reads its scalar arguments. On Linux `who = 0`
    // targets the calling thread.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if rc != 0 {
        warn!(nice, error = %std::io::Error::last_os_error(), "unable to lower the spooler priority");
    }
}

#[cfg(not(unix))]
fn lower_priority(_nice: i32) {}

#[cfg(unix)]
fn isolate_stdin() {
    use std::os::fd::AsRawFd;

    match std::fs::File::open("/dev/null") {
        Ok(devnull) => {
            // SAFETY: both descriptors are open for the duration of the call.
            if unsafe { libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO) } < 0 {
                warn!(error = %std::io::Error::last_os_error(), "dup2() failed");
            }
        }
        Err(e) => warn!(error = %e, "unable to open /dev/null"),
    }
}

#[cfg(not(unix))]
fn isolate_stdin() {}
