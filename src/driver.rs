//! Benchmark orchestration.
//!
//! A benchmark runs in two phases. Preparation uploads the object
//! population that GET/DELETE/LIST/STAT runs operate on, round-robin over
//! threads and endpoints; those PUTs are recorded as ordinary operations.
//! Measurement spawns exactly `concurrent` workers, each owning its RNG,
//! payload buffer, key counter and endpoint cursor; the only shared mutable
//! state is the collector channel, the batch cursor for DELETE and the
//! atomic key counter used with `--noprefix`. Workers stop issuing new
//! requests at the shared deadline but always finish and record the
//! in-flight one.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime, TimeZone};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use object_store::ObjectStore;
use rand::Rng;
use tokio::sync::{mpsc, Barrier};
use tracing::{debug, info, warn};

use crate::actions::{self, ActionContext};
use crate::client::StorePool;
use crate::collector::{spawn_collector, CollectorResult, LiveCounts};
use crate::constants::{FAILURE_WINDOW, PROGRESS_UPDATE_INTERVAL};
use crate::datagen::{worker_rng, PayloadSource};
use crate::endpoints::EndpointPool;
use crate::error::BenchError;
use crate::ops::{OpType, Operation, RunClock};
use crate::oplog::OpLogWriter;
use crate::sizes::format_bytes;

/// Everything a benchmark run needs to know.
#[derive(Debug, Clone)]
pub struct BenchOpts {
    pub op: OpType,
    pub client_id: String,
    pub concurrent: usize,
    pub duration: Duration,
    /// Pre-populated object count for GET/DELETE/LIST/STAT.
    pub objects: usize,
    pub obj_size: u64,
    /// DELETE batch size.
    pub batch: usize,
    pub noprefix: bool,
    pub noclear: bool,
    /// Local wall-clock barrier time.
    pub sync_start: Option<NaiveTime>,
    pub request_timeout: Duration,
    pub run_seed: u64,
    /// Zero-success window before the run aborts.
    pub failure_window: Duration,
}

impl BenchOpts {
    pub fn new(op: OpType, client_id: String) -> Self {
        BenchOpts {
            op,
            client_id,
            concurrent: crate::constants::DEFAULT_CONCURRENCY,
            duration: crate::constants::DEFAULT_DURATION,
            objects: crate::constants::DEFAULT_OBJECTS,
            obj_size: crate::constants::DEFAULT_OBJ_SIZE,
            batch: crate::constants::DEFAULT_BATCH,
            noprefix: false,
            noclear: false,
            sync_start: None,
            request_timeout: crate::constants::DEFAULT_REQUEST_TIMEOUT,
            run_seed: crate::datagen::random_run_seed(),
            failure_window: FAILURE_WINDOW,
        }
    }
}

/// Shared stop signals: the measurement deadline and the abort flag raised
/// by the collector watchdog.
#[derive(Debug, Default)]
struct RunControl {
    deadline: OnceLock<Instant>,
    abort: Arc<AtomicBool>,
}

impl RunControl {
    fn should_stop(&self) -> bool {
        if self.abort.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline.get() {
            Some(deadline) => Instant::now() >= *deadline,
            None => false,
        }
    }
}

fn object_key(noprefix: bool, thread_id: u16, n: u64) -> String {
    if noprefix {
        format!("obj{:012}", n)
    } else {
        format!("T{}/obj{:012}", thread_id, n)
    }
}

/// Run one benchmark: setup, optional preparation, timed measurement,
/// teardown. Returns the sealed log and live latency histograms.
pub async fn run_benchmark(
    pool: StorePool,
    endpoints: EndpointPool,
    opts: BenchOpts,
    writer: Option<OpLogWriter>,
) -> Result<CollectorResult> {
    info!(
        "Starting {} benchmark: {} workers, {:?}, {} endpoints",
        opts.op,
        opts.concurrent,
        opts.duration,
        endpoints.len()
    );
    let clock = Arc::new(RunClock::new());

    setup_bucket(&pool, opts.noclear).await?;

    let counts = Arc::new(LiveCounts::default());
    let abort = Arc::new(AtomicBool::new(false));
    // A pending synchronized start is dead air before anything can
    // complete; keep it out of the stall window.
    let sync_grace = opts
        .sync_start
        .and_then(wait_until_local)
        .unwrap_or(Duration::ZERO);
    let (tx, collector) = spawn_collector(
        writer,
        counts.clone(),
        abort.clone(),
        opts.failure_window,
        sync_grace,
    );

    let prepared_keys = if opts.op.needs_prepared_objects() {
        prepare_objects(&pool, &endpoints, &opts, &clock, &tx, &abort).await?
    } else {
        Arc::new(Vec::new())
    };

    let run_result = measurement_phase(
        &pool,
        &endpoints,
        &opts,
        &clock,
        &tx,
        abort.clone(),
        counts.clone(),
        prepared_keys,
    )
    .await;

    // All producer handles are gone; the collector drains and seals.
    drop(tx);
    let collected = collector.await.context("collector task panicked")?;

    if !opts.noclear {
        cleanup_bucket(&pool).await;
    } else {
        info!("Skipping cleanup (--noclear)");
    }

    run_result?;
    let result = collected?;
    let (ops, bytes, errors) = counts.snapshot();
    info!(
        "Benchmark complete: {} operations, {}, {} errors",
        ops,
        format_bytes(bytes),
        errors
    );
    Ok(result)
}

/// Verify the bucket is reachable; clean leftover objects unless asked not
/// to. Failures here are fatal before any measurement starts.
async fn setup_bucket(pool: &StorePool, noclear: bool) -> Result<()> {
    let store = pool.first()?;
    let existing = list_all_keys(store.as_ref())
        .await
        .map_err(|e| BenchError::BucketSetup(format!("cannot list bucket: {}", e)))?;

    if existing.is_empty() {
        return Ok(());
    }
    if noclear {
        info!(
            "Bucket holds {} existing objects; proceeding (--noclear)",
            existing.len()
        );
        return Ok(());
    }

    info!("Clearing {} leftover objects before the run", existing.len());
    for key in &existing {
        store
            .delete(key)
            .await
            .map_err(|e| BenchError::BucketSetup(format!("cannot clear {}: {}", key, e)))?;
    }
    Ok(())
}

async fn list_all_keys(store: &dyn ObjectStore) -> Result<Vec<object_store::path::Path>> {
    let mut stream = store.list(None);
    let mut keys = Vec::new();
    while let Some(meta) = stream.next().await {
        keys.push(meta?.location);
    }
    Ok(keys)
}

/// Delete whatever the benchmark left behind. Errors are logged, not fatal.
async fn cleanup_bucket(pool: &StorePool) {
    let Ok(store) = pool.first() else { return };
    let keys = match list_all_keys(store.as_ref()).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!("Cleanup listing failed: {}", e);
            return;
        }
    };
    if keys.is_empty() {
        return;
    }
    let pb = ProgressBar::new(keys.len() as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} objects {msg}",
    ) {
        pb.set_style(style);
    }
    pb.set_message("cleaning up");
    let mut failed = 0usize;
    for key in &keys {
        if let Err(e) = store.delete(key).await {
            warn!("Failed to delete {}: {}", key, e);
            failed += 1;
        }
        pb.inc(1);
    }
    pb.finish_with_message(format!("deleted {} objects", keys.len() - failed));
}

/// Upload the prepared object population, round-robin over threads and
/// endpoints. The PUTs go through the collector like any other operation.
async fn prepare_objects(
    pool: &StorePool,
    endpoints: &EndpointPool,
    opts: &BenchOpts,
    clock: &Arc<RunClock>,
    tx: &mpsc::Sender<Operation>,
    abort: &Arc<AtomicBool>,
) -> Result<Arc<Vec<String>>> {
    let concurrency = opts.concurrent.max(1);
    info!(
        "Preparing {} objects of {} with {} workers",
        opts.objects,
        format_bytes(opts.obj_size),
        concurrency
    );

    // Assign keys to threads up front; key order is the upload order.
    let mut per_thread: Vec<Vec<String>> = vec![Vec::new(); concurrency];
    let mut all_keys = Vec::with_capacity(opts.objects);
    for n in 0..opts.objects as u64 {
        let thread = (n % concurrency as u64) as u16;
        let key = object_key(opts.noprefix, thread, n);
        per_thread[thread as usize].push(key.clone());
        all_keys.push(key);
    }

    let pb = ProgressBar::new(opts.objects as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} objects ({per_sec}) {msg}",
    ) {
        pb.set_style(style);
    }
    pb.set_message(format!("preparing with {} workers", concurrency));

    let mut handles = Vec::with_capacity(concurrency);
    for (thread, keys) in per_thread.into_iter().enumerate() {
        let thread = thread as u16;
        let pool = pool.clone();
        let mut cursor = endpoints.cursor(thread);
        let tx = tx.clone();
        let abort = abort.clone();
        let pb = pb.clone();
        let payload = PayloadSource::new(opts.run_seed, thread, opts.obj_size);
        let ctx = ActionContext {
            client_id: opts.client_id.clone(),
            thread_id: thread,
            timeout: opts.request_timeout,
            clock: clock.clone(),
        };

        handles.push(tokio::spawn(async move {
            for key in keys {
                if abort.load(Ordering::Relaxed) {
                    break;
                }
                let endpoint = cursor.next();
                let store = pool.store(&endpoint)?;
                let op =
                    actions::put_object(store.as_ref(), &endpoint, &ctx, &key, payload.payload())
                        .await;
                pb.inc(1);
                if tx.send(op).await.is_err() {
                    break;
                }
            }
            Ok::<(), anyhow::Error>(())
        }));
    }

    for handle in handles {
        handle.await.context("prepare worker panicked")??;
    }
    pb.finish_with_message(format!("prepared {} objects", opts.objects));
    Ok(Arc::new(all_keys))
}

#[allow(clippy::too_many_arguments)]
async fn measurement_phase(
    pool: &StorePool,
    endpoints: &EndpointPool,
    opts: &BenchOpts,
    clock: &Arc<RunClock>,
    tx: &mpsc::Sender<Operation>,
    abort: Arc<AtomicBool>,
    counts: Arc<LiveCounts>,
    prepared_keys: Arc<Vec<String>>,
) -> Result<()> {
    let control = Arc::new(RunControl {
        deadline: OnceLock::new(),
        abort,
    });
    let barrier = Arc::new(Barrier::new(opts.concurrent + 1));
    // Consumed front-to-back by DELETE batches; the run ends early on
    // exhaustion.
    let delete_cursor = Arc::new(AtomicUsize::new(0));
    // Global key counter keeps PUT keys unique without the thread prefix.
    let shared_counter = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::with_capacity(opts.concurrent);
    for thread in 0..opts.concurrent as u16 {
        let pool = pool.clone();
        let mut cursor = endpoints.cursor(thread);
        let tx = tx.clone();
        let control = control.clone();
        let barrier = barrier.clone();
        let prepared = prepared_keys.clone();
        let delete_cursor = delete_cursor.clone();
        let shared_counter = shared_counter.clone();
        let opts = opts.clone();
        let ctx = ActionContext {
            client_id: opts.client_id.clone(),
            thread_id: thread,
            timeout: opts.request_timeout,
            clock: clock.clone(),
        };
        let payload = match opts.op {
            OpType::Put => Some(PayloadSource::new(opts.run_seed, thread, opts.obj_size)),
            _ => None,
        };

        handles.push(tokio::spawn(async move {
            let mut rng = worker_rng(opts.run_seed, thread);
            let mut local_counter = 0u64;
            let list_prefix = (!opts.noprefix).then(|| format!("T{}", thread));

            barrier.wait().await;

            loop {
                if control.should_stop() {
                    break;
                }

                let op = match opts.op {
                    OpType::Put => {
                        let n = if opts.noprefix {
                            shared_counter.fetch_add(1, Ordering::Relaxed)
                        } else {
                            let n = local_counter;
                            local_counter += 1;
                            n
                        };
                        let key = object_key(opts.noprefix, thread, n);
                        let endpoint = cursor.next();
                        let store = pool.store(&endpoint)?;
                        let body = payload
                            .as_ref()
                            .map(|p| p.payload())
                            .unwrap_or_default();
                        actions::put_object(store.as_ref(), &endpoint, &ctx, &key, body).await
                    }
                    OpType::Get => {
                        if prepared.is_empty() {
                            break;
                        }
                        let key = &prepared[rng.random_range(0..prepared.len())];
                        let endpoint = cursor.next();
                        let store = pool.store(&endpoint)?;
                        actions::get_object(store.as_ref(), &endpoint, &ctx, key).await
                    }
                    OpType::Stat => {
                        if prepared.is_empty() {
                            break;
                        }
                        let key = &prepared[rng.random_range(0..prepared.len())];
                        let endpoint = cursor.next();
                        let store = pool.store(&endpoint)?;
                        actions::stat_object(store.as_ref(), &endpoint, &ctx, key).await
                    }
                    OpType::Delete => {
                        let from = delete_cursor.fetch_add(opts.batch, Ordering::Relaxed);
                        if from >= prepared.len() {
                            debug!("Thread {} out of objects to delete", thread);
                            break;
                        }
                        let to = (from + opts.batch).min(prepared.len());
                        let endpoint = cursor.next();
                        let store = pool.store(&endpoint)?;
                        actions::delete_objects(store.as_ref(), &endpoint, &ctx, &prepared[from..to])
                            .await
                    }
                    OpType::List => {
                        let endpoint = cursor.next();
                        let store = pool.store(&endpoint)?;
                        actions::list_objects(store.as_ref(), &endpoint, &ctx, list_prefix.as_deref())
                            .await
                    }
                };

                if tx.send(op).await.is_err() {
                    break;
                }
            }
            Ok::<(), anyhow::Error>(())
        }));
    }

    // Optional synchronized start: block every worker on the barrier until
    // the configured wall-clock time.
    if let Some(at) = opts.sync_start {
        if let Some(wait) = wait_until_local(at) {
            info!("Waiting {:?} for synchronized start at {}", wait, at);
            tokio::time::sleep(wait).await;
        } else {
            warn!("Synchronized start time {} already passed; starting now", at);
        }
    }

    let deadline = Instant::now() + opts.duration;
    let _ = control.deadline.set(deadline);
    barrier.wait().await;

    let progress = spawn_progress(opts.duration, control.clone(), counts);

    for handle in handles {
        handle.await.context("worker panicked")??;
    }
    // Workers may finish before the deadline (object exhaustion).
    progress.abort();
    let _ = progress.await;
    Ok(())
}

/// Delay until the given local wall-clock time today; `None` if it already
/// passed.
fn wait_until_local(at: NaiveTime) -> Option<Duration> {
    let now = Local::now();
    let target = Local
        .from_local_datetime(&now.date_naive().and_time(at))
        .earliest()?;
    (target - now).to_std().ok().filter(|d| !d.is_zero())
}

fn spawn_progress(
    duration: Duration,
    control: Arc<RunControl>,
    counts: Arc<LiveCounts>,
) -> tokio::task::JoinHandle<()> {
    let pb = ProgressBar::new(duration.as_secs().max(1));
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}s {msg}",
    ) {
        pb.set_style(style);
    }
    tokio::spawn(async move {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= duration || control.should_stop() {
                break;
            }
            pb.set_position(elapsed.as_secs());
            let (ops, bytes, errors) = counts.snapshot();
            let secs = elapsed.as_secs_f64().max(0.001);
            pb.set_message(format!(
                "{:.0} ops/s, {}/s, {} errors",
                ops as f64 / secs,
                format_bytes((bytes as f64 / secs) as u64),
                errors
            ));
            tokio::time::sleep(PROGRESS_UPDATE_INTERVAL).await;
        }
        pb.finish_and_clear();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_prefixing() {
        assert_eq!(object_key(false, 3, 7), "T3/obj000000000007");
        assert_eq!(object_key(true, 3, 7), "obj000000000007");
    }

    #[test]
    fn test_wait_until_passed_time_is_none() {
        let now = Local::now().time();
        let past = now - chrono::TimeDelta::minutes(5);
        // NaiveTime subtraction wraps at midnight; only a genuinely past
        // time must yield None.
        if past < now {
            assert!(wait_until_local(past).is_none());
        }
    }
}
