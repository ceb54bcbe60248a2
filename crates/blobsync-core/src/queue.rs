//! Concurrent batch worker for existence checks and uploads.
//!
//! Each queue owns a pool of worker threads fed by one channel. A worker
//! blocks for the first queued transfer, then takes whatever else is already
//! queued, up to `batch_size`, and dispatches immediately. Nothing is ever
//! held back waiting for a batch to fill, so a caller blocked on results
//! never waits on an underfilled batch.

use crossbeam_channel::{unbounded, Receiver, Sender};
use eyre::{eyre, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::TransferConfig;
use crate::errors::{ErrorCategory, TransferError};
use crate::progress::ProgressMeter;
use crate::remote::RemoteStore;
use crate::Transfer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Ask the remote whether it already has each object.
    Check,
    Upload,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Check => "check",
            Direction::Upload => "upload",
        }
    }
}

/// Per-item completion callback: `(oid, ok)`. For checks `ok` means the
/// remote has the object; for uploads it means the upload succeeded.
pub type Callback = Arc<dyn Fn(&str, bool) + Send + Sync>;

#[derive(Clone)]
pub struct QueueOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub progress: Option<ProgressMeter>,
    pub dry_run: bool,
}

impl QueueOptions {
    pub fn check(config: &TransferConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            workers: config.concurrent_transfers.max(1),
            progress: None,
            dry_run: false,
        }
    }

    pub fn upload(config: &TransferConfig, meter: ProgressMeter, dry_run: bool) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            workers: config.concurrent_transfers.max(1),
            progress: Some(meter),
            dry_run,
        }
    }
}

struct Shared {
    direction: Direction,
    remote: Arc<dyn RemoteStore>,
    batch_size: usize,
    progress: Option<ProgressMeter>,
    dry_run: bool,
    callbacks: RwLock<Vec<Callback>>,
    errors: Mutex<Vec<TransferError>>,
    processed: AtomicUsize,
    cancelled: AtomicBool,
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn notify(&self, oid: &str, ok: bool) {
        for callback in self.callbacks.read().iter() {
            callback(oid, ok);
        }
    }

    fn process(&self, idx: usize, batch: Vec<Transfer>) {
        log::debug!(
            "[{}-w{idx}] dispatching batch of {}",
            self.direction.label(),
            batch.len()
        );
        match self.direction {
            Direction::Check => self.process_checks(&batch),
            Direction::Upload => {
                for transfer in &batch {
                    if self.is_cancelled() {
                        break;
                    }
                    self.process_upload(transfer);
                }
            }
        }
        self.processed.fetch_add(batch.len(), Ordering::Relaxed);
    }

    fn process_checks(&self, batch: &[Transfer]) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.remote.batch_exists(batch)))
            .unwrap_or_else(|_| Err(eyre!("remote panicked during existence check")));
        let found = match outcome {
            Ok(found) => found,
            Err(err) => {
                log::warn!(
                    "existence check against {} failed for {} object(s): {err:#}",
                    self.remote.describe(),
                    batch.len()
                );
                HashSet::new()
            }
        };
        for transfer in batch {
            self.notify(&transfer.oid, found.contains(&transfer.oid));
        }
    }

    fn process_upload(&self, transfer: &Transfer) {
        let outcome = if self.dry_run {
            Ok(())
        } else {
            catch_unwind(AssertUnwindSafe(|| self.remote.upload(transfer)))
                .unwrap_or_else(|_| Err(eyre!("remote panicked during upload")))
        };
        match outcome {
            Ok(()) => {
                if let Some(meter) = &self.progress {
                    meter.transferred(transfer.size);
                }
                self.notify(&transfer.oid, true);
            }
            Err(err) => {
                log::debug!("upload of {} failed: {err:#}", transfer.oid);
                let name = (!transfer.name.is_empty()).then(|| transfer.name.clone());
                self.errors
                    .lock()
                    .push(TransferError::from_report(&transfer.oid, name, &err));
                self.notify(&transfer.oid, false);
            }
        }
    }
}

pub struct TransferQueue {
    shared: Arc<Shared>,
    tx: Mutex<Option<Sender<Transfer>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TransferQueue {
    pub fn new(direction: Direction, remote: Arc<dyn RemoteStore>, options: QueueOptions) -> Self {
        let shared = Arc::new(Shared {
            direction,
            remote,
            batch_size: options.batch_size.max(1),
            progress: options.progress,
            dry_run: options.dry_run,
            callbacks: RwLock::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            processed: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        });

        let (tx, rx) = unbounded::<Transfer>();
        let workers = (0..options.workers.max(1))
            .map(|idx| {
                let shared = Arc::clone(&shared);
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("{}-{idx}", direction.label()))
                    .spawn(move || worker_loop(idx, shared, rx))
            })
            .collect::<std::io::Result<Vec<_>>>();
        let workers = match workers {
            Ok(handles) => handles,
            Err(err) => {
                log::warn!("failed to spawn {} workers: {err}", direction.label());
                let shared = Arc::clone(&shared);
                vec![thread::spawn(move || worker_loop(0, shared, rx))]
            }
        };

        Self {
            shared,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// Register a per-item completion callback. Register before adding work;
    /// callbacks run on worker threads in completion order.
    pub fn notify<F>(&self, callback: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().push(Arc::new(callback));
    }

    pub fn add(&self, transfer: Transfer) -> Result<()> {
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| eyre!("{} queue is closed", self.shared.direction.label()))?;
        tx.send(transfer)
            .map_err(|_| eyre!("{} queue workers have exited", self.shared.direction.label()))
    }

    /// Close the queue and block until every queued transfer is processed.
    pub fn wait(&self) {
        self.tx.lock().take();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                self.shared.errors.lock().push(TransferError::new(
                    "",
                    None,
                    format!("{} worker panicked", self.shared.direction.label()),
                    ErrorCategory::Fatal,
                ));
            }
        }
        log::info!(
            "{} queue drained: {} processed, {} error(s)",
            self.shared.direction.label(),
            self.shared.processed.load(Ordering::Relaxed),
            self.shared.errors.lock().len()
        );
    }

    /// Failures accumulated so far, in the order they occurred.
    pub fn errors(&self) -> Vec<TransferError> {
        self.shared.errors.lock().clone()
    }
}

/// Dropping a queue that was never waited on abandons it: queued transfers
/// are discarded and workers are detached, finishing at most the item each is
/// already running.
impl Drop for TransferQueue {
    fn drop(&mut self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.tx.lock().take();
        let abandoned = self.workers.lock().drain(..).count();
        if abandoned > 0 {
            log::debug!(
                "{} queue dropped with {abandoned} worker(s) still running",
                self.shared.direction.label()
            );
        }
    }
}

fn worker_loop(idx: usize, shared: Arc<Shared>, rx: Receiver<Transfer>) {
    while let Ok(first) = rx.recv() {
        if shared.is_cancelled() {
            break;
        }
        let mut batch = vec![first];
        while batch.len() < shared.batch_size {
            match rx.try_recv() {
                Ok(next) => batch.push(next),
                Err(_) => break,
            }
        }
        shared.process(idx, batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeRemote {
        present: HashSet<String>,
        failing: HashSet<String>,
        uploads: Mutex<Vec<String>>,
        batches: Mutex<Vec<usize>>,
    }

    impl RemoteStore for FakeRemote {
        fn batch_exists(&self, batch: &[Transfer]) -> Result<HashSet<String>> {
            self.batches.lock().push(batch.len());
            Ok(batch
                .iter()
                .filter(|t| self.present.contains(&t.oid))
                .map(|t| t.oid.clone())
                .collect())
        }

        fn upload(&self, transfer: &Transfer) -> Result<()> {
            if self.failing.contains(&transfer.oid) {
                return Err(eyre!("server rejected {}", transfer.oid));
            }
            self.uploads.lock().push(transfer.oid.clone());
            Ok(())
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    fn transfer(oid: &str, size: u64) -> Transfer {
        Transfer {
            name: format!("{oid}.bin"),
            path: Default::default(),
            oid: oid.into(),
            size,
        }
    }

    fn options(batch_size: usize, workers: usize) -> QueueOptions {
        QueueOptions {
            batch_size,
            workers,
            progress: None,
            dry_run: false,
        }
    }

    #[test]
    fn check_results_reach_callbacks_without_waiting_for_a_full_batch() {
        let remote = Arc::new(FakeRemote {
            present: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        });
        // Batch size far above what is submitted: results must still arrive.
        let queue = TransferQueue::new(Direction::Check, remote, options(100, 2));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        queue.notify(move |oid, ok| {
            let _ = tx.lock().send((oid.to_string(), ok));
        });

        queue.add(transfer("a", 1)).expect("add");
        queue.add(transfer("b", 1)).expect("add");

        let mut results = vec![
            rx.recv_timeout(Duration::from_secs(5)).expect("first result"),
            rx.recv_timeout(Duration::from_secs(5)).expect("second result"),
        ];
        results.sort();
        assert_eq!(
            results,
            vec![("a".to_string(), true), ("b".to_string(), false)]
        );
    }

    #[test]
    fn batches_never_exceed_batch_size() {
        let remote = Arc::new(FakeRemote::default());
        let queue = TransferQueue::new(Direction::Check, remote.clone(), options(3, 1));
        for i in 0..10 {
            queue.add(transfer(&format!("o{i}"), 1)).expect("add");
        }
        queue.wait();
        let batches = remote.batches.lock().clone();
        assert_eq!(batches.iter().sum::<usize>(), 10);
        assert!(batches.iter().all(|n| (1..=3).contains(n)));
    }

    #[test]
    fn upload_errors_accumulate_and_progress_counts_successes() {
        let remote = Arc::new(FakeRemote {
            failing: ["bad".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let meter = ProgressMeter::hidden();
        let queue = TransferQueue::new(
            Direction::Upload,
            remote.clone(),
            QueueOptions {
                progress: Some(meter.clone()),
                ..options(10, 4)
            },
        );
        queue.add(transfer("good", 10)).expect("add");
        queue.add(transfer("bad", 5)).expect("add");
        queue.wait();

        let errors = queue.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].oid, "bad");
        assert!(errors[0].to_string().contains("server rejected bad"));
        assert_eq!(remote.uploads.lock().as_slice(), ["good".to_string()]);
        assert_eq!(meter.snapshot().transferred_bytes, 10);
    }

    #[test]
    fn dry_run_upload_never_touches_remote() {
        let remote = Arc::new(FakeRemote::default());
        let queue = TransferQueue::new(
            Direction::Upload,
            remote.clone(),
            QueueOptions {
                dry_run: true,
                ..options(10, 1)
            },
        );
        queue.add(transfer("a", 1)).expect("add");
        queue.wait();
        assert!(remote.uploads.lock().is_empty());
        assert!(queue.errors().is_empty());
    }

    struct SlowUploads {
        started: Mutex<Vec<String>>,
    }

    impl RemoteStore for SlowUploads {
        fn batch_exists(&self, _batch: &[Transfer]) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }

        fn upload(&self, transfer: &Transfer) -> Result<()> {
            self.started.lock().push(transfer.oid.clone());
            thread::sleep(Duration::from_millis(300));
            Ok(())
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    #[test]
    fn dropping_an_unwaited_queue_abandons_pending_uploads() {
        let remote = Arc::new(SlowUploads {
            started: Mutex::new(Vec::new()),
        });
        let queue = TransferQueue::new(Direction::Upload, remote.clone(), options(1, 1));
        for oid in ["a", "b", "c"] {
            queue.add(transfer(oid, 1)).expect("add");
        }
        // Let the single worker pick up the first transfer.
        thread::sleep(Duration::from_millis(50));

        let start = std::time::Instant::now();
        drop(queue);
        assert!(start.elapsed() < Duration::from_millis(200));

        thread::sleep(Duration::from_millis(800));
        assert_eq!(remote.started.lock().as_slice(), ["a".to_string()]);
    }

    #[test]
    fn add_after_wait_is_an_error() {
        let queue = TransferQueue::new(
            Direction::Upload,
            Arc::new(FakeRemote::default()),
            options(1, 1),
        );
        queue.wait();
        assert!(queue.add(transfer("late", 1)).is_err());
    }
}
