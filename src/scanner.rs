// =============================================================================
// scanner.rs - THE STREAM SCAN DRIVER
// =============================================================================
//
// Reads records until the stream runs dry, fingerprints each one, and asks a
// `Membership` whether it has seen that fingerprint before. Every "yes" is a
// duplicate. That's the whole job.
//
// Rules of the road:
//
// - Clean end-of-stream ends the scan. So does a raised `StopSignal` (Ctrl+C,
//   a deadline, whatever the caller wires up); the summary is then marked
//   `interrupted` and covers only what was read.
// - Any other read error aborts the scan. No skipping, no retrying: a scan
//   that quietly dropped a record can't be compared with one that didn't.
// - A failing `test_and_add` is just as fatal. In a parallel scan the failing
//   worker raises an abort flag, and the reader and the other workers stop at
//   their next batch instead of finishing the stream.
//
// With `workers > 1` the calling thread keeps reading and hands batches to
// scoped worker threads over a bounded crossbeam channel. The membership
// structure is shared by reference; both implementations are Sync.
// =============================================================================

use crossbeam_channel::{bounded, Receiver, Sender};
use portable_atomic::{AtomicBool, Ordering};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::dedup::Membership;
use crate::error::Result;
use crate::fingerprint::FingerprintDeriver;
use crate::memory::{self, MemorySnapshot};
use crate::metrics::{crossed_interval, ScanMetrics};
use crate::models::Record;

/// Anything that yields records one at a time. `Ok(None)` means the stream
/// ended cleanly.
pub trait RecordSource {
    fn next_record(&mut self) -> Result<Option<Record>>;
}

/// Cooperative "stop reading now" flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Knobs for a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub deriver: FingerprintDeriver,
    /// 1 = sequential on the calling thread.
    pub workers: usize,
    /// Records per batch handed to a worker.
    pub batch_size: usize,
    /// Log progress every this many records. 0 disables.
    pub progress_interval: u64,
    pub stop: StopSignal,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            deriver: FingerprintDeriver::default(),
            workers: 1,
            batch_size: 4096,
            progress_interval: 1_000_000,
            stop: StopSignal::new(),
        }
    }
}

/// The result of one dedup pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub structure: &'static str,
    pub records_scanned: u64,
    pub duplicates: u64,
    pub elapsed_ms: u128,
    pub records_per_sec: f64,
    pub interrupted: bool,
    pub structure_bytes: usize,
    pub memory: MemorySnapshot,
}

fn summarize<M: Membership + ?Sized>(
    metrics: &ScanMetrics,
    membership: &M,
    interrupted: bool,
) -> ScanSummary {
    let snap = metrics.snapshot();
    let summary = ScanSummary {
        structure: membership.name(),
        records_scanned: snap.records_scanned,
        duplicates: snap.duplicates,
        elapsed_ms: snap.elapsed_ms,
        records_per_sec: snap.records_per_sec,
        interrupted,
        structure_bytes: membership.memory_bytes(),
        memory: memory::snapshot(),
    };
    info!(
        structure = summary.structure,
        records = summary.records_scanned,
        duplicates = summary.duplicates,
        elapsed_ms = summary.elapsed_ms as u64,
        interrupted = summary.interrupted,
        memory = %summary.memory,
        "Scan complete"
    );
    summary
}

fn log_progress(metrics: &ScanMetrics) {
    info!(
        records = metrics.records(),
        duplicates = metrics.duplicates(),
        "Scan progress"
    );
}

/// Scan `source` to exhaustion, dispatching on `options.workers`.
pub fn scan<S, M>(source: &mut S, membership: &M, options: &ScanOptions) -> Result<ScanSummary>
where
    S: RecordSource + ?Sized,
    M: Membership + ?Sized,
{
    if options.workers > 1 {
        scan_parallel(source, membership, options)
    } else {
        scan_sequential(source, membership, options)
    }
}

/// One record at a time on the calling thread.
pub fn scan_sequential<S, M>(
    source: &mut S,
    membership: &M,
    options: &ScanOptions,
) -> Result<ScanSummary>
where
    S: RecordSource + ?Sized,
    M: Membership + ?Sized,
{
    info!(structure = membership.name(), "Sequential scan starting");
    let metrics = ScanMetrics::new();
    let mut interrupted = false;

    loop {
        if options.stop.is_raised() {
            warn!(records = metrics.records(), "Scan stopped early");
            interrupted = true;
            break;
        }
        let Some(record) = source.next_record()? else {
            break;
        };

        let key = options.deriver.derive(&record);
        if membership.test_and_add(key.as_ref())? {
            debug!(fingerprint = %key, record = %record, "Duplicate");
            metrics.add_duplicates(1);
        }
        let total = metrics.add_records(1);
        if crossed_interval(total - 1, total, options.progress_interval) {
            log_progress(&metrics);
        }
    }

    Ok(summarize(&metrics, membership, interrupted))
}

/// Read batches on the calling thread, dedup them on `options.workers`
/// scoped threads.
pub fn scan_parallel<S, M>(
    source: &mut S,
    membership: &M,
    options: &ScanOptions,
) -> Result<ScanSummary>
where
    S: RecordSource + ?Sized,
    M: Membership + ?Sized,
{
    let workers = options.workers.max(1);
    let batch_size = options.batch_size.max(1);
    info!(
        structure = membership.name(),
        workers = workers,
        batch_size = batch_size,
        "Parallel scan starting"
    );

    let metrics = ScanMetrics::new();
    // Raised by the first worker that fails; everyone else stops at the next batch.
    let abort = StopSignal::new();
    let (tx, rx) = bounded::<Vec<Record>>(workers * 2);

    let (interrupted, outcome) = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let rx = rx.clone();
                let metrics = &metrics;
                let abort = &abort;
                scope.spawn(move || {
                    let result = run_worker(id, rx, membership, metrics, options, abort);
                    if result.is_err() {
                        abort.raise();
                    }
                    result
                })
            })
            .collect();
        drop(rx);

        let fed = feed_batches(source, &tx, batch_size, options, &abort);
        if fed.is_err() {
            abort.raise();
        }
        drop(tx);

        let mut first_err = None;
        let mut interrupted = false;
        match fed {
            Ok(stopped) => interrupted = stopped,
            Err(e) => first_err = Some(e),
        }
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        (interrupted, first_err)
    });

    if let Some(e) = outcome {
        return Err(e);
    }
    if interrupted {
        warn!(records = metrics.records(), "Scan stopped early");
    }
    Ok(summarize(&metrics, membership, interrupted))
}

/// Returns `Ok(true)` if the stop signal cut the feed short. A raised
/// `abort` also ends the feed, with `Ok(false)`: the failing worker owns the
/// error.
fn feed_batches<S>(
    source: &mut S,
    tx: &Sender<Vec<Record>>,
    batch_size: usize,
    options: &ScanOptions,
    abort: &StopSignal,
) -> Result<bool>
where
    S: RecordSource + ?Sized,
{
    loop {
        if abort.is_raised() {
            return Ok(false);
        }
        if options.stop.is_raised() {
            return Ok(true);
        }
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            match source.next_record()? {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        let exhausted = batch.len() < batch_size;
        if !batch.is_empty() && tx.send(batch).is_err() {
            // Every worker has bailed out; their error is the one to report.
            return Ok(false);
        }
        if exhausted {
            return Ok(false);
        }
    }
}

fn run_worker<M>(
    id: usize,
    rx: Receiver<Vec<Record>>,
    membership: &M,
    metrics: &ScanMetrics,
    options: &ScanOptions,
    abort: &StopSignal,
) -> Result<()>
where
    M: Membership + ?Sized,
{
    let mut batches = 0u64;
    for batch in rx.iter() {
        if abort.is_raised() {
            debug!(worker = id, batches = batches, "Scan worker aborting");
            return Ok(());
        }
        let mut duplicates = 0;
        for record in &batch {
            let key = options.deriver.derive(record);
            if membership.test_and_add(key.as_ref())? {
                duplicates += 1;
            }
        }
        metrics.add_duplicates(duplicates);
        let n = batch.len() as u64;
        let total = metrics.add_records(n);
        if crossed_interval(total - n, total, options.progress_interval) {
            log_progress(metrics);
        }
        batches += 1;
    }
    debug!(worker = id, batches = batches, "Scan worker finished");
    Ok(())
}
