//! Multi-producer, single-consumer pipe from workers to the operation log.
//!
//! Workers push completed operations into a bounded channel; a full channel
//! blocks them (back-pressure) rather than dropping records. The single
//! consumer appends to the in-memory log, streams rows to disk, flushes at
//! bounded intervals, and watches for the all-workers-failing condition.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::constants::{COLLECTOR_CHANNEL_CAPACITY, LOG_FLUSH_INTERVAL};
use crate::error::BenchError;
use crate::metrics::LatencyRecorder;
use crate::oplog::OpLogWriter;
use crate::ops::{Operation, OperationLog};

/// Running totals for the live progress display.
#[derive(Debug, Default)]
pub struct LiveCounts {
    ops: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl LiveCounts {
    pub fn record(&self, op: &Operation) {
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(op.size_bytes, Ordering::Relaxed);
        if op.is_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// (operations, bytes, errors)
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.ops.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

/// Sealed output of a collector run.
#[derive(Debug)]
pub struct CollectorResult {
    pub log: OperationLog,
    pub latencies: LatencyRecorder,
}

/// Spawn the collector task. Returns the producer handle workers clone and
/// the join handle yielding the sealed log.
///
/// `abort` is raised when the run must stop early (all workers failing or a
/// write failure); workers observe it at the top of their loop.
/// `startup_grace` defers the stall watchdog past a known quiet period
/// before the first request can complete (a synchronized-start wait).
pub fn spawn_collector(
    mut writer: Option<OpLogWriter>,
    counts: Arc<LiveCounts>,
    abort: Arc<AtomicBool>,
    failure_window: Duration,
    startup_grace: Duration,
) -> (mpsc::Sender<Operation>, JoinHandle<Result<CollectorResult>>) {
    let (tx, mut rx) = mpsc::channel::<Operation>(COLLECTOR_CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut log = OperationLog::new();
        let mut latencies = LatencyRecorder::new();
        let mut flush = tokio::time::interval(LOG_FLUSH_INTERVAL.min(failure_window));
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // A baseline in the future keeps elapsed() at zero (saturating)
        // until the grace period is over.
        let mut last_success = Instant::now() + startup_grace;
        let mut errors_since_success = 0u64;
        let mut total_received = 0u64;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(op) => {
                        if let Some(w) = writer.as_mut() {
                            if let Err(e) = w.append(&op) {
                                error!("Benchmark data write failed: {}", e);
                                abort.store(true, Ordering::SeqCst);
                                return Err(e);
                            }
                        }
                        counts.record(&op);
                        latencies.record(op.op_type, op.duration());
                        total_received += 1;
                        if op.is_error() {
                            errors_since_success += 1;
                        } else {
                            errors_since_success = 0;
                            last_success = Instant::now();
                        }
                        log.push(op);
                    }
                    // All worker handles dropped: the run is over.
                    None => break,
                },
                _ = flush.tick() => {
                    if let Some(w) = writer.as_mut() {
                        if let Err(e) = w.flush() {
                            error!("Benchmark data flush failed: {}", e);
                            abort.store(true, Ordering::SeqCst);
                            return Err(e);
                        }
                    }
                    // Fatal once the window passes without a success:
                    // either everything that completed was an error, or
                    // nothing has completed at all (a stall that would
                    // otherwise hide behind the longer request timeout).
                    let starving = last_success.elapsed() >= failure_window;
                    if starving && (total_received == 0 || errors_since_success > 0) {
                        abort.store(true, Ordering::SeqCst);
                        return Err(BenchError::AllWorkersFailing {
                            window_secs: failure_window.as_secs(),
                            errors: errors_since_success,
                        }
                        .into());
                    }
                }
            }
        }

        if let Some(w) = writer.as_mut() {
            w.flush()?;
            debug!(
                "Sealed benchmark data: {} records to {}",
                w.records_written(),
                w.path().display()
            );
        }

        Ok(CollectorResult { log, latencies })
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OpType;

    fn op(thread: u16, start: u64, end: u64, err: Option<&str>) -> Operation {
        Operation {
            op_type: OpType::Put,
            client_id: "c1".into(),
            endpoint: "e1".into(),
            thread_id: thread,
            obj_count: 1,
            size_bytes: 64,
            start_ns: start,
            first_byte_ns: None,
            end_ns: end,
            error: err.map(|s| s.to_string()),
        }
    }

    #[tokio::test]
    async fn test_collects_in_send_order_and_counts() {
        let counts = Arc::new(LiveCounts::default());
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, handle) = spawn_collector(
            None,
            counts.clone(),
            abort.clone(),
            Duration::from_secs(30),
            Duration::ZERO,
        );

        for i in 0..10u64 {
            tx.send(op(0, i * 10, i * 10 + 5, None)).await.unwrap();
        }
        tx.send(op(0, 200, 210, Some("boom"))).await.unwrap();
        drop(tx);

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.log.len(), 11);
        assert_eq!(result.log.ops[3].start_ns, 30);

        let (ops, bytes, errors) = counts.snapshot();
        assert_eq!(ops, 11);
        assert_eq!(bytes, 11 * 64);
        assert_eq!(errors, 1);
        assert!(!abort.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_all_workers_failing_aborts() {
        let counts = Arc::new(LiveCounts::default());
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, handle) = spawn_collector(
            None,
            counts,
            abort.clone(),
            Duration::from_millis(50),
            Duration::ZERO,
        );

        tx.send(op(0, 0, 10, Some("connection refused"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = handle.await.unwrap().expect_err("must abort");
        assert!(err.downcast_ref::<BenchError>().is_some());
        assert!(abort.load(Ordering::SeqCst));
        drop(tx);
    }

    #[tokio::test]
    async fn test_stall_with_no_completions_aborts() {
        // Nothing completes at all, not even errors: the window alone must
        // trip the watchdog instead of waiting out the request timeout.
        let counts = Arc::new(LiveCounts::default());
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, handle) = spawn_collector(
            None,
            counts,
            abort.clone(),
            Duration::from_millis(50),
            Duration::ZERO,
        );

        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = handle.await.unwrap().expect_err("stall must abort");
        match err.downcast_ref::<BenchError>() {
            Some(BenchError::AllWorkersFailing { errors, .. }) => assert_eq!(*errors, 0),
            other => panic!("expected AllWorkersFailing, got {:?}", other),
        }
        assert!(abort.load(Ordering::SeqCst));
        drop(tx);
    }

    #[tokio::test]
    async fn test_startup_grace_defers_stall_watchdog() {
        // A known quiet period (synchronized start) must not count against
        // the stall window.
        let counts = Arc::new(LiveCounts::default());
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, handle) = spawn_collector(
            None,
            counts,
            abort.clone(),
            Duration::from_millis(50),
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(tx);

        let result = handle.await.unwrap().expect("grace must hold the watchdog");
        assert!(result.log.is_empty());
        assert!(!abort.load(Ordering::SeqCst));
    }
}
