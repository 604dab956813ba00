//! Dispatcher - claim, decode, and hand a single spool file to the handler chain.
//!
//! # Flow
//! 1. open + exclusive lock (blocks while a producer is still writing)
//! 2. decode; corrupt files are destroyed and never retried, unreadable ones
//!    are skipped until the next pass
//! 3. optional chdir into the configured working directory
//! 4. offer the task to each handler in order, under the harakiri watchdog
//! 5. apply the verdict: Done deletes, Retry leaves it, nobody claiming it
//!    leaves it and warns
//!
//! The lock is held until the verdict has been applied.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use tracing::{debug, error, info, warn};

use super::context::SpoolContext;
use super::harakiri::Harakiri;
use super::registry::HandlerRegistry;
use super::scanner::Candidate;
use crate::domain::{DispatchOutcome, ReadError, SpoolRecord, SpoolTask, Verdict};
use crate::error::SpoolError;
use crate::ports::SpoolHandler;

pub struct Dispatcher {
    ctx: Arc<SpoolContext>,
    registry: Arc<HandlerRegistry>,
    harakiri: Harakiri,
}

impl Dispatcher {
    pub fn new(ctx: Arc<SpoolContext>, registry: Arc<HandlerRegistry>, harakiri: Harakiri) -> Self {
        Self {
            ctx,
            registry,
            harakiri,
        }
    }

    pub fn harakiri(&self) -> &Harakiri {
        &self.harakiri
    }

    /// Process one candidate. `Err` is reserved for conditions the consumer
    /// cannot survive; everything task-level is reported as an outcome.
    pub async fn process(&self, candidate: &Candidate) -> Result<DispatchOutcome, SpoolError> {
        let path = candidate.path();
        info!(task = %candidate.name, "managing spool request");

        let Some(file) = open_locked(&path) else {
            return Ok(DispatchOutcome::Skipped);
        };

        let record = match read_record(&file, &path) {
            Ok(record) => record,
            Err(err @ SpoolError::Corrupt { .. }) => {
                error!(error = %err, "destroying corrupt spool file");
                destroy(&path)?;
                return Ok(DispatchOutcome::Corrupted);
            }
            Err(err) => {
                error!(error = %err, "unable to read spool file, leaving it for the next pass");
                return Ok(DispatchOutcome::Skipped);
            }
        };
        let task = SpoolTask::new(candidate.name.clone(), path, record);

        if let Some(dir) = &self.ctx.config().chdir {
            if let Err(e) = std::env::set_current_dir(dir) {
                warn!(dir = %dir.display(), error = %e, "chdir() failed");
            }
        }

        let started = Instant::now();
        let mut verdict = Verdict::NotMine;
        for handler in self.registry.iter() {
            verdict = self.invoke(handler.as_ref(), &task).await?;
            if verdict != Verdict::NotMine {
                debug!(handler = handler.name(), ?verdict, task = task.name(), "spool task claimed");
                break;
            }
        }

        let outcome = match verdict {
            Verdict::NotMine => {
                warn!(
                    task = task.name(),
                    "unable to find the spooler function, have you loaded it into the spooler?"
                );
                DispatchOutcome::Abandoned
            }
            Verdict::Done => {
                let elapsed = started.elapsed();
                info!(
                    task = task.name(),
                    elapsed_secs = elapsed.as_secs(),
                    "done with task/spool {} after {} seconds",
                    task.name(),
                    elapsed.as_secs()
                );
                destroy(task.path())?;
                DispatchOutcome::Completed { elapsed }
            }
            Verdict::Retry => DispatchOutcome::Retried,
        };

        drop(file);
        Ok(outcome)
    }

    async fn invoke(&self, handler: &dyn SpoolHandler, task: &SpoolTask) -> Result<Verdict, SpoolError> {
        let Some(budget) = self.ctx.config().harakiri_budget() else {
            return Ok(handler.handle(task).await);
        };

        let _armed = self.harakiri.arm(budget);
        tokio::select! {
            verdict = handler.handle(task) => Ok(verdict),
            _ = self.harakiri.fired() => {
                error!(
                    handler = handler.name(),
                    task = task.name(),
                    budget_secs = budget.as_secs(),
                    "HARAKIRI: spooler handler exceeded its time budget"
                );
                Err(SpoolError::Harakiri {
                    handler: handler.name().to_string(),
                    task: task.name().to_string(),
                    budget,
                })
            }
        }
    }
}

/// Open and lock a candidate. Failures only skip this file.
fn open_locked(path: &Path) -> Option<File> {
    // flock() works on read-only descriptors; lockf()-style platforms need write access
    #[cfg(any(target_os = "solaris", target_os = "illumos"))]
    let opened = File::options().read(true).write(true).open(path);
    #[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
    let opened = File::open(path);

    let file = match opened {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "spool file vanished before it could be claimed");
            return None;
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "open() failed");
            return None;
        }
    };

    if let Err(e) = file.lock_exclusive() {
        error!(path = %path.display(), error = %e, "flock() failed");
        return None;
    }
    Some(file)
}

fn read_record(file: &File, path: &Path) -> Result<SpoolRecord, SpoolError> {
    let size = file
        .metadata()
        .map_err(|e| SpoolError::io("fstat", path, e))?
        .len();
    SpoolRecord::read_from(&mut BufReader::new(file), size).map_err(|e| match e {
        ReadError::Corrupt(reason) => SpoolError::Corrupt {
            path: path.to_path_buf(),
            reason,
        },
        ReadError::Io(source) => SpoolError::io("read", path, source),
    })
}

/// Remove a spool file. A file that is already gone is tolerated; any other
/// failure means the spool is in a state the consumer cannot trust.
pub fn destroy(path: &Path) -> Result<(), SpoolError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "spool file already removed");
            Ok(())
        }
        Err(source) => {
            error!(
                path = %path.display(),
                error = %source,
                "unlink() failed, something horrible happened to the spooler"
            );
            Err(SpoolError::Destroy {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::enqueue::{EnqueueRequest, Spool};
    use crate::config::SpoolConfig;
    use crate::domain::{Metadata, SPOOL_RECORD_TAG};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Answers with a fixed verdict and records what it saw.
    struct Fixed {
        name: &'static str,
        verdict: Verdict,
        seen: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>>,
    }

    impl Fixed {
        fn new(name: &'static str, verdict: Verdict) -> Self {
            Self {
                name,
                verdict,
                seen: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl SpoolHandler for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, task: &SpoolTask) -> Verdict {
            self.seen
                .lock()
                .unwrap()
                .push((task.metadata().as_bytes().to_vec(), task.payload().to_vec()));
            self.verdict
        }
    }

    struct Sleepy;

    #[async_trait]
    impl SpoolHandler for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn handle(&self, _task: &SpoolTask) -> Verdict {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Verdict::Done
        }
    }

    struct Harness {
        _tmp: TempDir,
        ctx: Arc<SpoolContext>,
        spool: Spool,
    }

    impl Harness {
        fn new(config: SpoolConfig) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let ctx = SpoolContext::new(config.with_spool_dir(tmp.path())).unwrap();
            let spool = Spool::new(ctx.clone());
            Self {
                _tmp: tmp,
                ctx,
                spool,
            }
        }

        fn enqueue(&self, metadata: &str, payload: &[u8]) -> Candidate {
            let request = EnqueueRequest::new(Metadata::try_from(metadata).unwrap())
                .payload(payload.to_vec());
            candidate(&self.spool.enqueue(request).unwrap())
        }

        fn dispatcher(&self, handlers: Vec<Arc<dyn SpoolHandler>>) -> Dispatcher {
            let mut registry = HandlerRegistry::new();
            for handler in handlers {
                registry.register(handler).unwrap();
            }
            Dispatcher::new(self.ctx.clone(), Arc::new(registry), Harakiri::new())
        }
    }

    fn candidate(path: &Path) -> Candidate {
        Candidate {
            dir: path.parent().unwrap().to_path_buf(),
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
        }
    }

    #[tokio::test]
    async fn done_removes_the_file() {
        let h = Harness::new(SpoolConfig::default());
        let task = h.enqueue("PING", b"");
        let handler = Arc::new(Fixed::new("ping", Verdict::Done));

        let outcome = h.dispatcher(vec![handler.clone()]).process(&task).await.unwrap();

        assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
        assert!(!task.path().exists());
        assert_eq!(*handler.seen.lock().unwrap(), vec![(b"PING".to_vec(), Vec::new())]);
    }

    #[tokio::test]
    async fn retry_leaves_the_file_untouched_and_unlocked() {
        let h = Harness::new(SpoolConfig::default());
        let task = h.enqueue("later", b"state");
        let before = fs::read(task.path()).unwrap();

        let outcome = h
            .dispatcher(vec![Arc::new(Fixed::new("r", Verdict::Retry))])
            .process(&task)
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Retried);
        assert_eq!(fs::read(task.path()).unwrap(), before);
        let file = File::open(task.path()).unwrap();
        file.try_lock_exclusive().expect("lock released");
    }

    #[tokio::test]
    async fn unclaimed_task_is_abandoned_in_place() {
        let h = Harness::new(SpoolConfig::default());
        let task = h.enqueue("orphan", b"");
        let first = Arc::new(Fixed::new("a", Verdict::NotMine));
        let second = Arc::new(Fixed::new("b", Verdict::NotMine));

        let outcome = h
            .dispatcher(vec![first.clone(), second.clone()])
            .process(&task)
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Abandoned);
        assert!(task.path().exists());
        assert_eq!(first.seen.lock().unwrap().len(), 1);
        assert_eq!(second.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_chain_abandons() {
        let h = Harness::new(SpoolConfig::default());
        let task = h.enqueue("x", b"");
        let outcome = h.dispatcher(Vec::new()).process(&task).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Abandoned);
    }

    #[tokio::test]
    async fn first_claiming_handler_wins() {
        let h = Harness::new(SpoolConfig::default());
        let task = h.enqueue("x", b"");
        let skip = Arc::new(Fixed::new("skip", Verdict::NotMine));
        let claim = Arc::new(Fixed::new("claim", Verdict::Retry));
        let never = Arc::new(Fixed::new("never", Verdict::Done));

        let outcome = h
            .dispatcher(vec![skip.clone(), claim.clone(), never.clone()])
            .process(&task)
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Retried);
        assert_eq!(skip.seen.lock().unwrap().len(), 1);
        assert_eq!(claim.seen.lock().unwrap().len(), 1);
        assert!(never.seen.lock().unwrap().is_empty());
        assert!(task.path().exists());
    }

    #[tokio::test]
    async fn overstated_metadata_length_is_destroyed_unseen() {
        let h = Harness::new(SpoolConfig::default());
        let path = h.ctx.spool_dir().join("spoolfile_on_h_1_1_0_1_0");
        fs::write(&path, [SPOOL_RECORD_TAG, 0, 200, 0, b'a', b'b', b'c']).unwrap();
        let handler = Arc::new(Fixed::new("x", Verdict::Done));

        let outcome = h
            .dispatcher(vec![handler.clone()])
            .process(&candidate(&path))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Corrupted);
        assert!(!path.exists());
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn vanished_candidate_is_skipped() {
        let h = Harness::new(SpoolConfig::default());
        let task = h.enqueue("x", b"");
        fs::remove_file(task.path()).unwrap();

        let outcome = h.dispatcher(Vec::new()).process(&task).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_candidate_is_skipped_not_destroyed() {
        let h = Harness::new(SpoolConfig::default());
        // opens and locks fine, every read fails with EISDIR
        let path = h.ctx.spool_dir().join("spoolfile_on_h_1_1_0_1700000000_0");
        fs::create_dir(&path).unwrap();
        let handler = Arc::new(Fixed::new("ping", Verdict::Done));

        let outcome = h
            .dispatcher(vec![handler.clone()])
            .process(&candidate(&path))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert!(path.is_dir());
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn destroying_twice_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, b"x").unwrap();

        destroy(&path).unwrap();
        destroy(&path).unwrap();
    }

    #[test]
    fn destroy_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        // a non-empty directory cannot be unlinked as a file
        let dir = tmp.path().join("d");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("inner"), b"x").unwrap();

        let err = destroy(&dir).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn harakiri_fails_the_consumer_and_releases_the_file() {
        let h = Harness::new(SpoolConfig::default().with_harakiri_secs(1));
        let task = h.enqueue("slow", b"");
        let dispatcher = h.dispatcher(vec![Arc::new(Sleepy)]);

        let err = dispatcher.process(&task).await.unwrap_err();

        assert!(matches!(err, SpoolError::Harakiri { .. }));
        assert!(err.is_fatal());
        assert!(!dispatcher.harakiri().is_armed());
        assert!(task.path().exists());
        File::open(task.path())
            .unwrap()
            .try_lock_exclusive()
            .expect("lock released");
    }

    #[tokio::test]
    async fn watchdog_is_disarmed_after_a_quick_handler() {
        let h = Harness::new(SpoolConfig::default().with_harakiri_secs(5));
        let task = h.enqueue("fast", b"");
        let dispatcher = h.dispatcher(vec![Arc::new(Fixed::new("f", Verdict::Done))]);

        dispatcher.process(&task).await.unwrap();
        assert!(!dispatcher.harakiri().is_armed());
    }

    #[tokio::test]
    async fn claim_waits_for_the_producer_lock() {
        let h = Harness::new(SpoolConfig::default());
        let path = h.ctx.spool_dir().join("spoolfile_on_h_1_1_0_1_1");
        let meta = Metadata::try_from("slowly written").unwrap();
        let record = SpoolRecord::new(meta, b"payload".to_vec()).encode();

        // play a producer that holds the lock across a slow write
        let writer = {
            let file = File::create(&path).unwrap();
            file.lock_exclusive().unwrap();
            let path: PathBuf = path.clone();
            std::thread::spawn(move || {
                let mut out = &file;
                std::io::Write::write_all(&mut out, &record[..3]).unwrap();
                std::thread::sleep(Duration::from_millis(200));
                std::io::Write::write_all(&mut out, &record[3..]).unwrap();
                drop(file);
                path
            })
        };

        let handler = Arc::new(Fixed::new("x", Verdict::Done));
        let dispatcher = h.dispatcher(vec![handler.clone()]);
        let outcome = dispatcher.process(&candidate(&path)).await.unwrap();
        writer.join().unwrap();

        assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec![(b"slowly written".to_vec(), b"payload".to_vec())]
        );
    }

    #[tokio::test]
    async fn handlers_run_in_the_configured_directory() {
        struct Cwd(Mutex<Option<PathBuf>>);

        #[async_trait]
        impl SpoolHandler for Cwd {
            fn name(&self) -> &str {
                "cwd"
            }

            async fn handle(&self, _task: &SpoolTask) -> Verdict {
                *self.0.lock().unwrap() = std::env::current_dir().ok();
                Verdict::Retry
            }
        }

        let work = tempfile::tempdir().unwrap();
        let work_dir = fs::canonicalize(work.path()).unwrap();
        let h = Harness::new(SpoolConfig::default().with_chdir(&work_dir));
        let task = h.enqueue("x", b"");
        let original = std::env::current_dir().unwrap();
        let cwd = Arc::new(Cwd(Mutex::new(None)));

        h.dispatcher(vec![cwd.clone()]).process(&task).await.unwrap();
        std::env::set_current_dir(original).unwrap();

        assert_eq!(cwd.0.lock().unwrap().as_deref(), Some(work_dir.as_path()));
    }
}
