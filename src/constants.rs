// src/constants.rs
//
// Central location for constants used throughout storbench.

use std::time::Duration;

// =============================================================================
// Benchmark defaults
// =============================================================================

/// Default target bucket if none is given on the command line.
pub const DEFAULT_BUCKET: &str = "storbench-benchmark-bucket";

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Default measurement duration.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(60);

/// Default number of pre-populated objects for GET/DELETE/LIST/STAT runs.
pub const DEFAULT_OBJECTS: usize = 1000;

/// Default object size (1 MiB).
pub const DEFAULT_OBJ_SIZE: u64 = 1024 * 1024;

/// Default batch size for DELETE and LIST operations.
pub const DEFAULT_BATCH: usize = 100;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Collector
// =============================================================================

/// Capacity of the worker -> collector channel. A full channel blocks
/// workers (back-pressure) instead of dropping records.
pub const COLLECTOR_CHANNEL_CAPACITY: usize = 16 * 1024;

/// How often the collector flushes buffered log rows to disk. A crash loses
/// at most this much of the tail.
pub const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// If this much time passes without a single successful operation, whether
/// everything completing is an error or nothing completes at all, the run
/// is aborted as AllWorkersFailing.
pub const FAILURE_WINDOW: Duration = Duration::from_secs(30);

/// Upper bound on persisted error strings.
pub const ERROR_STRING_CAP: usize = 256;

// =============================================================================
// Operation log file format
// =============================================================================

/// Magic bytes at the start of every benchmark data file.
pub const LOG_MAGIC: &[u8; 8] = b"STORBNCH";

/// Current log file format version.
pub const LOG_VERSION: u8 = 1;

/// CSV header of the operation log body. Column order is fixed.
pub const OPLOG_HEADER: &str =
    "idx,thread,op_type,client_id,endpoint,obj_count,bytes,start_ns,first_byte_ns,end_ns,error";

/// zstd compression level for log files (speed/ratio balance).
pub const LOG_ZSTD_LEVEL: i32 = 3;

// =============================================================================
// Analysis
// =============================================================================

/// Default segment duration for throughput analysis.
pub const DEFAULT_SEGMENT_DURATION: Duration = Duration::from_secs(1);

/// Multi-sized bucketing: a size bucket spans at most this fraction of the
/// run's average object size.
pub const SPLIT_SIZE_FRACTION: f64 = 0.05;

/// Multi-sized bucketing: a bucket is not closed before it holds this many
/// requests, even if the span threshold is exceeded.
pub const MIN_BUCKET_REQUESTS: usize = 10;

/// How many error strings an analysis retains verbatim.
pub const MAX_FIRST_ERRORS: usize = 10;

// =============================================================================
// Progress display
// =============================================================================

/// Progress bar update interval.
pub const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
