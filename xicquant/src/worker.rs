//! A background thread for crosslink recalculation.
//!
//! Jobs run against a shared `Arc<Mutex<Document>>`, so a second job submitted while
//! one is running waits for the first to finish. Progress and outcomes come back as
//! [`WorkerEvent`]s, and failures on the worker thread, panics included, are reported
//! as [`WorkerEvent::Failed`] rather than crossing the thread boundary.
use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hierarchy::{Document, NodeId, NodeKind};
use crate::quantify::{recalculate_crosslinks, RecalculationSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    RecalculateAll,
    RecalculateCrosslinks(Vec<NodeId>),
    /// Stop the worker once the jobs queued ahead of this one are done
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress { done: usize, total: usize },
    Finished(RecalculationSummary),
    Cancelled(RecalculationSummary),
    Failed(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to start the worker thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("The worker thread is no longer running")]
    Disconnected,
    #[error("The worker thread panicked")]
    Panicked,
}

/// A cloneable handle that asks the running job to stop before its next crosslink
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_job(document: &Mutex<Document>, job: Job, cancel: &AtomicBool, events: &Sender<WorkerEvent>) -> WorkerEvent {
    let mut doc = match document.lock() {
        Ok(doc) => doc,
        Err(poisoned) => {
            warn!("The document lock was poisoned by an earlier failure");
            poisoned.into_inner()
        }
    };
    let crosslinks = match job {
        Job::RecalculateAll => doc.iter_kind(NodeKind::Crosslink),
        Job::RecalculateCrosslinks(ids) => ids,
        Job::Shutdown => return WorkerEvent::Finished(RecalculationSummary::default()),
    };
    let interval = doc.settings().progress_interval.max(1);
    let result = catch_unwind(AssertUnwindSafe(|| {
        recalculate_crosslinks(&mut doc, &crosslinks, cancel, |done, total| {
            if done % interval == 0 || done == total {
                // The caller may have stopped listening, which is not the job's concern
                let _ = events.send(WorkerEvent::Progress { done, total });
            }
        })
    }));
    match result {
        Ok(summary) if summary.cancelled => WorkerEvent::Cancelled(summary),
        Ok(summary) => WorkerEvent::Finished(summary),
        Err(payload) => WorkerEvent::Failed(panic_message(payload)),
    }
}

fn worker_loop(document: Arc<Mutex<Document>>, jobs: Receiver<Job>, events: Sender<WorkerEvent>, cancel: Arc<AtomicBool>) {
    debug!("Recalculation worker started");
    while let Ok(job) = jobs.recv() {
        if job == Job::Shutdown {
            break;
        }
        debug!("Starting {job:?}");
        let outcome = run_job(&document, job, &cancel, &events);
        cancel.store(false, Ordering::SeqCst);
        if events.send(outcome).is_err() {
            debug!("Event receiver dropped, stopping worker");
            break;
        }
    }
    debug!("Recalculation worker stopped");
}

/// Owns the background recalculation thread
#[derive(Debug)]
pub struct RecalculationWorker {
    jobs: Sender<Job>,
    events: Receiver<WorkerEvent>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RecalculationWorker {
    pub fn spawn(document: Arc<Mutex<Document>>) -> Result<Self, WorkerError> {
        let (job_sender, job_receiver) = unbounded();
        let (event_sender, event_receiver) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let handle = thread::Builder::new()
            .name("xicquant-worker".into())
            .spawn(move || worker_loop(document, job_receiver, event_sender, flag))?;
        Ok(Self {
            jobs: job_sender,
            events: event_receiver,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, job: Job) -> Result<(), WorkerError> {
        self.jobs.send(job).map_err(|_| WorkerError::Disconnected)
    }

    /// Ask the running job to stop before its next crosslink
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    /// Block until the next event arrives
    pub fn recv(&self) -> Result<WorkerEvent, WorkerError> {
        self.events.recv().map_err(|_| WorkerError::Disconnected)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerEvent>, WorkerError> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Wait for the outcome of the current job, skipping progress events
    pub fn wait(&self) -> Result<WorkerEvent, WorkerError> {
        loop {
            match self.recv()? {
                WorkerEvent::Progress { .. } => continue,
                event => return Ok(event),
            }
        }
    }

    /// Let queued jobs finish, then stop the thread and wait for it
    pub fn shutdown(mut self) -> Result<(), WorkerError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // The thread may already have exited if the event receiver was dropped
        let _ = self.jobs.send(Job::Shutdown);
        handle.join().map_err(|_| WorkerError::Panicked)
    }
}

impl Drop for RecalculationWorker {
    fn drop(&mut self) {
        self.cancel();
        if let Err(e) = self.stop() {
            warn!("Failed to stop the recalculation worker: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hierarchy::test::make_document;
    use crate::settings::QuantSettings;

    fn shared_document() -> Arc<Mutex<Document>> {
        Arc::new(Mutex::new(make_document(QuantSettings::default())))
    }

    #[test_log::test]
    fn test_recalculate_all() -> Result<(), WorkerError> {
        let document = shared_document();
        let worker = RecalculationWorker::spawn(document.clone())?;
        worker.submit(Job::RecalculateAll)?;
        let progress = worker.recv()?;
        assert_eq!(progress, WorkerEvent::Progress { done: 2, total: 2 });
        match worker.recv()? {
            WorkerEvent::Finished(summary) => {
                assert_eq!(summary.recalculated, 2);
                assert!(!summary.cancelled);
            }
            other => panic!("Unexpected event {other:?}"),
        }
        worker.shutdown()?;

        let doc = document.lock().unwrap();
        for xl in doc.iter_kind(NodeKind::Crosslink) {
            assert!(!doc[xl].score("gaussian").is_nan());
        }
        Ok(())
    }

    #[test]
    fn test_failures_are_reported() -> Result<(), WorkerError> {
        let document = shared_document();
        let worker = RecalculationWorker::spawn(document)?;
        worker.submit(Job::RecalculateCrosslinks(vec![NodeId(10_000)]))?;
        match worker.wait()? {
            WorkerEvent::Finished(summary) => assert_eq!(summary.failed, 1),
            other => panic!("Unexpected event {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_cancel_before_start() -> Result<(), WorkerError> {
        let document = shared_document();
        // Hold the lock so the job cannot start until the flag is set
        let guard = document.lock().unwrap();
        let worker = RecalculationWorker::spawn(document.clone())?;
        worker.submit(Job::RecalculateAll)?;
        worker.cancel_handle().cancel();
        drop(guard);
        match worker.wait()? {
            WorkerEvent::Cancelled(summary) => assert_eq!(summary.recalculated, 0),
            other => panic!("Unexpected event {other:?}"),
        }
        assert!(!worker.cancel_handle().is_cancelled());

        worker.submit(Job::RecalculateAll)?;
        assert!(matches!(worker.wait()?, WorkerEvent::Finished(_)));
        Ok(())
    }
}
