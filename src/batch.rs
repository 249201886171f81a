//! Batch Jobs - pollable, cancellable background work
//!
//! Rows run one after another on a worker thread. Cancelling stops further
//! rows from being scheduled; rows already completed stay completed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::certificates::{BulkReport, Certificate, CertificateEngine, Recipient};
use crate::context::RequestContext;
use crate::entity::EntityId;
use crate::error::{Error, Result};
use crate::variables::Values;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub id: Uuid,
    pub total: usize,
    /// Rows attempted, successful or not.
    pub processed: usize,
    pub failed: usize,
    pub progress_percent: u8,
    pub finished: bool,
    pub cancelled: bool,
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    finished: AtomicBool,
    cancelled: AtomicBool,
}

impl Counters {
    fn snapshot(&self, id: Uuid, total: usize) -> BatchStatus {
        let processed = self.processed.load(Ordering::SeqCst);
        let progress_percent = if total == 0 {
            100
        } else {
            (processed * 100 / total) as u8
        };
        BatchStatus {
            id,
            total,
            processed,
            failed: self.failed.load(Ordering::SeqCst),
            progress_percent,
            finished: self.finished.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }
}

/// 1-based row number and its outcome.
pub type RowOutcome<O> = (usize, Result<O>);

pub struct BatchJob<O> {
    id: Uuid,
    total: usize,
    counters: Arc<Counters>,
    worker: JoinHandle<Vec<RowOutcome<O>>>,
}

impl<O: Send + 'static> BatchJob<O> {
    pub fn spawn<T, F>(items: Vec<T>, mut step: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(usize, T) -> Result<O> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let total = items.len();
        let counters = Arc::new(Counters::default());
        let shared = Arc::clone(&counters);

        let worker = thread::spawn(move || {
            let mut outcomes = Vec::with_capacity(total);
            for (idx, item) in items.into_iter().enumerate() {
                if shared.cancelled.load(Ordering::SeqCst) {
                    tracing::info!(batch = %id, remaining = total - idx, "batch cancelled");
                    break;
                }
                let outcome = step(idx + 1, item);
                if outcome.is_err() {
                    shared.failed.fetch_add(1, Ordering::SeqCst);
                }
                shared.processed.fetch_add(1, Ordering::SeqCst);
                outcomes.push((idx + 1, outcome));
            }
            shared.finished.store(true, Ordering::SeqCst);
            outcomes
        });
        tracing::info!(batch = %id, total, "batch started");

        Self { id, total, counters, worker }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> BatchStatus {
        self.counters.snapshot(self.id, self.total)
    }

    pub fn cancel(&self) {
        self.counters.cancelled.store(true, Ordering::SeqCst);
    }

    /// Block until the worker finishes and return every row outcome.
    pub fn wait(self) -> (BatchStatus, Vec<RowOutcome<O>>) {
        let outcomes = self
            .worker
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
        (self.counters.snapshot(self.id, self.total), outcomes)
    }
}

/// Run bulk certificate issuance in the background.
pub fn spawn_bulk_issuance(
    engine: Arc<CertificateEngine>,
    ctx: RequestContext,
    template_id: EntityId,
    rows: Vec<Values>,
) -> Result<BatchJob<Certificate>> {
    engine.template(&template_id)?;
    Ok(BatchJob::spawn(rows, move |row_number, row| {
        engine.issue_row(&ctx, &template_id, row_number, &row)
    }))
}

impl BulkReport {
    pub fn from_outcomes(outcomes: Vec<RowOutcome<Certificate>>) -> Self {
        let mut report = BulkReport::default();
        for (row, outcome) in outcomes {
            report.record(row, outcome);
        }
        report
    }
}

/// Delivers certificate notifications. Transport is external.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: &Recipient, certificate: &Certificate) -> Result<()>;
}

/// Notify the recipient of each certificate in the background.
pub fn spawn_notifications(
    engine: Arc<CertificateEngine>,
    notifier: Arc<dyn Notifier>,
    certificates: Vec<Certificate>,
) -> BatchJob<Uuid> {
    BatchJob::spawn(certificates, move |_, certificate| {
        let recipient = engine
            .resolve_recipient(&certificate.recipient_id.to_string())
            .ok_or_else(|| {
                Error::validation(format!("unknown recipient {}", certificate.recipient_id))
            })?;
        notifier.notify(&recipient, &certificate)?;
        Ok(certificate.id)
    })
}
