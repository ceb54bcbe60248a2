//! Blocking remote-existence checks over a concurrent check queue.

use eyre::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::pointer::Pointer;
use crate::queue::TransferQueue;
use crate::uploaded::UploadedSet;
use crate::Transfer;

/// Countdown latch: `add(n)` raises the count, `done()` lowers it, `wait()`
/// blocks until it reaches zero.
#[derive(Default)]
pub struct Barrier {
    outstanding: Mutex<usize>,
    zero: Condvar,
}

impl Barrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        *self.outstanding.lock() += n;
    }

    pub fn done(&self) {
        self.release(1);
    }

    pub fn release(&self, n: usize) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(n);
        if *outstanding == 0 {
            self.zero.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            self.zero.wait(&mut outstanding);
        }
    }
}

/// Asks the remote about locally-missing objects and records the ones it
/// already has in the [`UploadedSet`].
///
/// Callers must deduplicate pointers first: each oid is submitted as given.
pub struct ExistenceCheckCoordinator {
    queue: TransferQueue,
    barrier: Arc<Barrier>,
}

impl ExistenceCheckCoordinator {
    pub fn new(queue: TransferQueue, uploaded: UploadedSet) -> Self {
        let barrier = Arc::new(Barrier::new());
        let latch = Arc::clone(&barrier);
        queue.notify(move |oid, found| {
            if found {
                uploaded.add(oid);
            }
            latch.done();
        });
        Self { queue, barrier }
    }

    /// Submit one check per pointer and block until every result is in.
    pub fn check_missing(&self, missing: &[Pointer]) -> Result<()> {
        if missing.is_empty() {
            return Ok(());
        }

        self.barrier.add(missing.len());
        for (submitted, pointer) in missing.iter().enumerate() {
            if let Err(err) = self.queue.add(Transfer::for_check(pointer)) {
                self.barrier.release(missing.len() - submitted);
                return Err(err);
            }
        }

        log::debug!("waiting on {} existence check(s)", missing.len());
        self.barrier.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Direction, QueueOptions};
    use crate::remote::RemoteStore;
    use eyre::eyre;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    struct SlowRemote {
        present: HashSet<String>,
        fail: bool,
        checks: Mutex<Vec<String>>,
    }

    impl RemoteStore for SlowRemote {
        fn batch_exists(&self, batch: &[Transfer]) -> Result<HashSet<String>> {
            thread::sleep(Duration::from_millis(20));
            self.checks
                .lock()
                .extend(batch.iter().map(|t| t.oid.clone()));
            if self.fail {
                return Err(eyre!("remote unavailable"));
            }
            Ok(batch
                .iter()
                .filter(|t| self.present.contains(&t.oid))
                .map(|t| t.oid.clone())
                .collect())
        }

        fn upload(&self, _transfer: &Transfer) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    fn coordinator(remote: Arc<SlowRemote>, uploaded: UploadedSet) -> ExistenceCheckCoordinator {
        let options = QueueOptions {
            batch_size: 2,
            workers: 3,
            progress: None,
            dry_run: false,
        };
        ExistenceCheckCoordinator::new(
            TransferQueue::new(Direction::Check, remote, options),
            uploaded,
        )
    }

    #[test]
    fn barrier_wait_returns_when_released_from_other_threads() {
        let barrier = Arc::new(Barrier::new());
        barrier.add(4);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || barrier.done())
            })
            .collect();
        barrier.wait();
        // Already at zero, so a second wait must not block.
        barrier.wait();
        for handle in handles {
            handle.join().expect("join");
        }
    }

    #[test]
    fn empty_check_returns_immediately() {
        let remote = Arc::new(SlowRemote {
            present: HashSet::new(),
            fail: false,
            checks: Mutex::new(Vec::new()),
        });
        let coordinator = coordinator(remote.clone(), UploadedSet::new());
        coordinator.check_missing(&[]).expect("check");
        assert!(remote.checks.lock().is_empty());
    }

    #[test]
    fn found_objects_are_marked_before_return() {
        let remote = Arc::new(SlowRemote {
            present: ["b".to_string(), "d".to_string()].into_iter().collect(),
            fail: false,
            checks: Mutex::new(Vec::new()),
        });
        let uploaded = UploadedSet::new();
        let coordinator = coordinator(remote.clone(), uploaded.clone());

        let missing: Vec<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|oid| Pointer::new(*oid, 1, ""))
            .collect();
        coordinator.check_missing(&missing).expect("check");

        assert!(uploaded.contains("b"));
        assert!(uploaded.contains("d"));
        assert!(!uploaded.contains("a"));
        assert_eq!(uploaded.len(), 2);
        assert_eq!(remote.checks.lock().len(), 5);
    }

    #[test]
    fn failed_checks_still_release_the_barrier() {
        let remote = Arc::new(SlowRemote {
            present: ["a".to_string()].into_iter().collect(),
            fail: true,
            checks: Mutex::new(Vec::new()),
        });
        let uploaded = UploadedSet::new();
        let coordinator = coordinator(remote, uploaded.clone());
        coordinator
            .check_missing(&[Pointer::new("a", 1, ""), Pointer::new("b", 1, "")])
            .expect("check");
        assert!(uploaded.is_empty());
    }
}
