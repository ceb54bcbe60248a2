//! Push orchestration.
//!
//! An [`UploadContext`] lives for one push invocation. Each call to
//! [`UploadContext::upload_pointers`] filters its pointers down to the ones
//! that genuinely need to cross the network and hands them to the upload
//! queue; [`UploadContext::await_completion`] drains the queue once at the
//! end and reports every failure together.

use std::collections::HashSet;
use std::sync::Arc;

use crate::check::ExistenceCheckCoordinator;
use crate::config::TransferConfig;
use crate::errors::{PushError, TransferError, PARTIAL_PUSH_EXIT_CODE};
use crate::pointer::Pointer;
use crate::progress::{ProgressMeter, ProgressStats};
use crate::queue::{Direction, QueueOptions, TransferQueue};
use crate::remote::RemoteStore;
use crate::store::LocalStore;
use crate::uploaded::UploadedSet;

type NoticeSink = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    pub dry_run: bool,
    /// Render a progress bar when stderr is a terminal.
    pub show_progress: bool,
    pub transfer: TransferConfig,
}

/// Pointers that still need to be transferred after filtering.
#[derive(Clone, Debug, Default)]
pub struct PreparedUpload {
    /// Locally present pointers in input order, then still-missing pointers
    /// in input order.
    pub ready: Vec<Pointer>,
    /// Total size of pointers that were not found locally.
    pub missing_bytes: u64,
    /// Pointers dropped because the remote already has them.
    pub skipped: usize,
}

/// Outcome of a drained push.
#[derive(Debug)]
pub struct PushReport {
    pub errors: Vec<TransferError>,
    pub stats: ProgressStats,
    pub dry_run: bool,
}

impl PushReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            PARTIAL_PUSH_EXIT_CODE
        }
    }
}

pub struct UploadContext {
    dry_run: bool,
    uploaded: UploadedSet,
    meter: ProgressMeter,
    upload_queue: TransferQueue,
    checker: ExistenceCheckCoordinator,
    store: Arc<dyn LocalStore>,
    notice: NoticeSink,
}

impl UploadContext {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn LocalStore>,
        options: UploadOptions,
    ) -> Self {
        let uploaded = UploadedSet::new();
        let check_queue = TransferQueue::new(
            Direction::Check,
            Arc::clone(&remote),
            QueueOptions::check(&options.transfer),
        );
        let checker = ExistenceCheckCoordinator::new(check_queue, uploaded.clone());

        let meter = if options.show_progress {
            ProgressMeter::new(options.dry_run)
        } else {
            ProgressMeter::hidden()
        };
        let upload_queue = TransferQueue::new(
            Direction::Upload,
            remote,
            QueueOptions::upload(&options.transfer, meter.clone(), options.dry_run),
        );

        Self {
            dry_run: options.dry_run,
            uploaded,
            meter,
            upload_queue,
            checker,
            store,
            notice: Box::new(|line| println!("{line}")),
        }
    }

    /// Route dry-run notices somewhere other than stdout.
    pub fn with_notice_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.notice = Box::new(sink);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn uploaded(&self) -> &UploadedSet {
        &self.uploaded
    }

    pub fn meter(&self) -> &ProgressMeter {
        &self.meter
    }

    pub fn upload_queue(&self) -> &TransferQueue {
        &self.upload_queue
    }

    pub fn set_uploaded(&self, oid: &str) {
        self.uploaded.add(oid);
    }

    pub fn has_uploaded(&self, oid: &str) -> bool {
        self.uploaded.contains(oid)
    }

    /// Reduce `unfiltered` to the pointers that must be transferred.
    ///
    /// Every distinct pointer is added to the progress total up front; the
    /// ones the remote turns out to have are then skipped on the meter.
    pub fn prepare_upload(&self, unfiltered: &[Pointer]) -> Result<PreparedUpload, PushError> {
        let mut prepared = PreparedUpload {
            ready: Vec::with_capacity(unfiltered.len()),
            ..PreparedUpload::default()
        };
        let mut missing_local = Vec::new();
        let mut seen: HashSet<&str> = HashSet::with_capacity(unfiltered.len());

        for pointer in unfiltered {
            if seen.contains(pointer.oid.as_str()) || self.has_uploaded(&pointer.oid) {
                continue;
            }
            seen.insert(pointer.oid.as_str());

            self.meter.add(pointer.size);

            if self.store.exists(&pointer.oid, pointer.size) {
                prepared.ready.push(pointer.clone());
            } else {
                prepared.missing_bytes += pointer.size;
                missing_local.push(pointer.clone());
            }
        }

        log::debug!(
            "{} pointer(s) present locally, {} missing ({} bytes), checking remote",
            prepared.ready.len(),
            missing_local.len(),
            prepared.missing_bytes
        );
        self.checker.check_missing(&missing_local)?;

        for pointer in missing_local {
            if self.has_uploaded(&pointer.oid) {
                self.meter.skip(pointer.size);
                prepared.skipped += 1;
            } else {
                prepared.ready.push(pointer);
            }
        }

        Ok(prepared)
    }

    /// Queue every pointer that still needs uploading.
    ///
    /// A pointer is marked uploaded as soon as it is handed to the queue, so
    /// later references to the same content in this run are not queued again.
    pub fn upload_pointers(&self, unfiltered: &[Pointer]) -> Result<(), PushError> {
        if self.dry_run {
            for pointer in unfiltered {
                if self.has_uploaded(&pointer.oid) {
                    continue;
                }
                (self.notice)(&format!("push {} => {}", pointer.oid, pointer.name));
                self.set_uploaded(&pointer.oid);
            }
            return Ok(());
        }

        let prepared = self.prepare_upload(unfiltered)?;
        for pointer in &prepared.ready {
            let transfer = self.store.resolve(pointer)?;
            self.upload_queue.add(transfer)?;
            self.set_uploaded(&pointer.oid);
        }
        Ok(())
    }

    /// Block until the upload queue drains and collect its failures.
    pub fn await_completion(&self) -> PushReport {
        self.upload_queue.wait();
        self.meter.finish();
        PushReport {
            errors: self.upload_queue.errors(),
            stats: self.meter.snapshot(),
            dry_run: self.dry_run,
        }
    }
}
