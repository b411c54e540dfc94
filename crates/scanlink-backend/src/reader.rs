//! Reader task: the concurrent bulk-read pump
//!
//! The task owns the [`CommandService`] for the whole scan, pulls image
//! data in stripe-sized READs, runs it through the color reorder engine
//! when the device delivers line-interleaved rows, and streams the result
//! over a bounded channel. It never issues device teardown commands; it
//! hands the service back through its join result instead.

use std::time::Duration;

use bytes::Bytes;
use scanlink_core::{ScanError, ScanResult};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::command::{CommandService, RetryPolicy};
use crate::config::ScanConfig;
use crate::geometry::ScanPlan;
use crate::reorder::{ColorReorder, ReorderConfig};

/// What the reader task needs to know about one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderPlan {
    pub raw_bytes_per_line: usize,
    pub raw_lines: usize,
    pub stripe_lines: usize,
    pub reorder: Option<ReorderConfig>,
    pub retry: RetryPolicy,
}

impl ReaderPlan {
    pub fn new(plan: &ScanPlan, config: &ScanConfig) -> Self {
        Self {
            raw_bytes_per_line: plan.raw_bytes_per_line,
            raw_lines: plan.raw_lines,
            stripe_lines: config.stripe_lines.max(1),
            reorder: plan.reorder,
            retry: RetryPolicy::from(&config.ready_poll),
        }
    }

    pub fn raw_total_bytes(&self) -> usize {
        self.raw_bytes_per_line * self.raw_lines
    }

    /// Bytes per READ: whole lines bounded by one stripe and the transfer
    /// limit, or the transfer limit alone when a single line exceeds it
    pub fn chunk_bytes(&self, max_transfer: usize) -> usize {
        let line = self.raw_bytes_per_line.max(1);
        let max_transfer = max_transfer.max(1);
        if line > max_transfer {
            return max_transfer;
        }
        let lines = self.stripe_lines.min(max_transfer / line).max(1);
        lines * line
    }
}

/// Counters reported when the task ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub reads: usize,
    pub raw_bytes: usize,
    pub emitted_bytes: usize,
}

/// Join result of the reader task
pub struct ReaderOutcome {
    /// The service, handed back to the session
    pub service: CommandService,
    pub result: ScanResult<ReaderStats>,
}

/// Result of a non-blocking receive
#[derive(Debug)]
pub enum Polled {
    Chunk(ScanResult<Bytes>),
    /// Nothing queued yet
    Empty,
    /// The task has finished sending
    Closed,
}

/// Session-side handle of a running reader task
pub struct ReaderHandle {
    rx: Option<mpsc::Receiver<ScanResult<Bytes>>>,
    token: CancellationToken,
    join: Option<JoinHandle<ReaderOutcome>>,
}

/// Launch the reader task with ownership of `service`
pub fn spawn(
    service: CommandService,
    plan: ReaderPlan,
    channel_depth: usize,
    scan_id: Uuid,
) -> ReaderHandle {
    let (tx, rx) = mpsc::channel(channel_depth.max(1));
    let token = CancellationToken::new();
    let span = info_span!("reader", scan_id = %scan_id);
    let join = tokio::spawn(run(service, plan, token.clone(), tx).instrument(span));
    ReaderHandle {
        rx: Some(rx),
        token,
        join: Some(join),
    }
}

impl ReaderHandle {
    /// Next chunk; `None` once the task has finished sending
    pub async fn recv(&mut self) -> Option<ScanResult<Bytes>> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Next chunk without waiting
    pub fn try_recv(&mut self) -> Polled {
        let Some(rx) = self.rx.as_mut() else {
            return Polled::Closed;
        };
        match rx.try_recv() {
            Ok(item) => Polled::Chunk(item),
            Err(TryRecvError::Empty) => Polled::Empty,
            Err(TryRecvError::Disconnected) => Polled::Closed,
        }
    }

    /// Signal the task to stop before its next READ
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the task to end and take back the service
    ///
    /// The receiver is dropped first so a task blocked on a full channel
    /// wakes up. On timeout the task is aborted and awaited, so its service
    /// has been dropped and the transport closed by the time `None` is
    /// returned.
    pub async fn finish(mut self, timeout: Duration) -> Option<ReaderOutcome> {
        self.rx = None;
        let mut join = self.join.take()?;
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                warn!(error = %e, "Reader task failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Reader task did not stop, aborting"
                );
                join.abort();
                // The aborted task still owns the service until it is polled to completion
                let _ = join.await;
                None
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.token.cancel();
            join.abort();
        }
    }
}

async fn run(
    mut service: CommandService,
    plan: ReaderPlan,
    token: CancellationToken,
    tx: mpsc::Sender<ScanResult<Bytes>>,
) -> ReaderOutcome {
    let result = pump(&mut service, &plan, &token, &tx).await;
    match &result {
        Ok(stats) => info!(
            reads = stats.reads,
            raw_bytes = stats.raw_bytes,
            emitted_bytes = stats.emitted_bytes,
            "Reader finished"
        ),
        Err(ScanError::Cancelled) => debug!("Reader cancelled"),
        Err(e) => {
            warn!(error = %e, "Reader failed");
            // Surfaces on the session's next read
            let _ = tx.send(Err(e.clone())).await;
        }
    }
    ReaderOutcome { service, result }
}

async fn pump(
    service: &mut CommandService,
    plan: &ReaderPlan,
    token: &CancellationToken,
    tx: &mpsc::Sender<ScanResult<Bytes>>,
) -> ScanResult<ReaderStats> {
    let total = plan.raw_total_bytes();
    let chunk = plan.chunk_bytes(service.max_transfer());
    let mut reorder = plan.reorder.as_ref().map(ColorReorder::new);
    let mut stats = ReaderStats::default();

    debug!(total, chunk, reorder = reorder.is_some(), "Reader started");

    while stats.raw_bytes < total {
        if token.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let request = chunk.min(total - stats.raw_bytes);
        let data = read_with_retry(service, request, &plan.retry, token).await?;
        if data.is_empty() {
            return Err(ScanError::Io(format!(
                "device ended the scan after {} of {} bytes",
                stats.raw_bytes, total
            )));
        }
        stats.reads += 1;
        stats.raw_bytes += data.len().min(total - stats.raw_bytes);

        let out = match reorder.as_mut() {
            Some(engine) => engine.push(&data),
            None => Bytes::from(data),
        };
        if !out.is_empty() {
            stats.emitted_bytes += out.len();
            if tx.send(Ok(out)).await.is_err() {
                // Receiver gone: the session is cancelling
                return Err(ScanError::Cancelled);
            }
        }

        if reorder.as_ref().is_some_and(|engine| engine.is_complete()) {
            break;
        }
    }

    if let Some(engine) = reorder.as_ref() {
        if !engine.is_complete() {
            return Err(ScanError::Io(format!(
                "reorder produced {} lines from {} raw bytes",
                engine.emitted(),
                stats.raw_bytes
            )));
        }
    }
    Ok(stats)
}

/// READ with the busy-retry budget; cancellation interrupts the wait
async fn read_with_retry(
    service: &mut CommandService,
    length: usize,
    retry: &RetryPolicy,
    token: &CancellationToken,
) -> ScanResult<Vec<u8>> {
    let mut attempt = 1;
    loop {
        match service.read_image(length).await {
            Ok(data) => return Ok(data),
            Err(e) if e.is_busy() => {
                if attempt >= retry.attempts {
                    warn!(attempts = attempt, "Data never became available");
                    return Err(ScanError::Timeout);
                }
                attempt += 1;
                tokio::select! {
                    _ = token.cancelled() => return Err(ScanError::Cancelled),
                    _ = tokio::time::sleep(retry.interval) => {}
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
