//! Operation records and the in-memory operation log.
//!
//! One `Operation` is one recorded S3 request. The log retains warm-up and
//! cool-down; analysis trims to the active range, the interval during which
//! every thread had completed at least one request and none had stopped
//! accepting work.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    Put,
    Get,
    Delete,
    List,
    Stat,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Put => "PUT",
            OpType::Get => "GET",
            OpType::Delete => "DELETE",
            OpType::List => "LIST",
            OpType::Stat => "STAT",
        }
    }

    /// Whether a benchmark of this type needs pre-populated objects.
    pub fn needs_prepared_objects(&self) -> bool {
        !matches!(self, OpType::Put)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUT" => Ok(OpType::Put),
            "GET" => Ok(OpType::Get),
            "DELETE" => Ok(OpType::Delete),
            "LIST" => Ok(OpType::List),
            "STAT" => Ok(OpType::Stat),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

/// Monotonic clock anchored to wall time once per run. Persisted timestamps
/// are wall-clock nanoseconds since the Unix epoch; intervals between them
/// are monotonic.
#[derive(Debug, Clone)]
pub struct RunClock {
    wall_base_ns: u64,
    mono_base: Instant,
}

impl RunClock {
    pub fn new() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        RunClock {
            wall_base_ns: wall.as_nanos() as u64,
            mono_base: Instant::now(),
        }
    }

    /// Current wall-clock nanoseconds, advanced monotonically.
    pub fn now_ns(&self) -> u64 {
        self.wall_base_ns + self.mono_base.elapsed().as_nanos() as u64
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new()
    }
}

/// One recorded S3 request.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op_type: OpType,
    pub client_id: String,
    pub endpoint: String,
    /// Worker index in `[0, concurrency)`, stable across the run.
    pub thread_id: u16,
    /// Objects touched: 1 for PUT/GET/STAT, >= 1 for DELETE/LIST batches.
    pub obj_count: u32,
    /// Payload bytes actually transferred (0 allowed on errors).
    pub size_bytes: u64,
    pub start_ns: u64,
    /// First response byte, GET only.
    pub first_byte_ns: Option<u64>,
    pub end_ns: u64,
    /// Empty on success; bounded length.
    pub error: Option<String>,
}

impl Operation {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_ns())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Time to first byte, when recorded.
    pub fn ttfb_ns(&self) -> Option<u64> {
        self.first_byte_ns.map(|fb| fb.saturating_sub(self.start_ns))
    }

    pub fn bytes_per_sec(&self) -> f64 {
        let dur = self.duration_ns();
        if dur == 0 {
            return 0.0;
        }
        self.size_bytes as f64 / (dur as f64 / 1e9)
    }

    /// Nanoseconds of this operation overlapping the half-open interval
    /// `[from, to)`.
    pub fn overlap_ns(&self, from: u64, to: u64) -> u64 {
        let lo = self.start_ns.max(from);
        let hi = self.end_ns.min(to);
        hi.saturating_sub(lo)
    }

    pub fn contained_in(&self, from: u64, to: u64) -> bool {
        self.start_ns >= from && self.end_ns <= to
    }
}

/// Ordered collection of operations, usually filtered to one op type before
/// analysis. Sealed (read-only) once the measurement phase hands it over.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    pub ops: Vec<Operation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ops(ops: Vec<Operation>) -> Self {
        OperationLog { ops }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn push(&mut self, op: Operation) {
        self.ops.push(op);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.ops.iter()
    }

    pub fn sort_by_start(&mut self) {
        self.ops.sort_by_key(|o| o.start_ns);
    }

    pub fn sort_by_duration(&mut self) {
        self.ops.sort_by_key(|o| o.duration_ns());
    }

    pub fn sort_by_throughput(&mut self) {
        self.ops.sort_by(|a, b| {
            a.bytes_per_sec()
                .partial_cmp(&b.bytes_per_sec())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Distinct operation types, ascending.
    pub fn op_types(&self) -> Vec<OpType> {
        self.ops
            .iter()
            .map(|o| o.op_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn filter_op(&self, op_type: OpType) -> OperationLog {
        OperationLog {
            ops: self
                .ops
                .iter()
                .filter(|o| o.op_type == op_type)
                .cloned()
                .collect(),
        }
    }

    pub fn filter_endpoint(&self, endpoint: &str) -> OperationLog {
        OperationLog {
            ops: self
                .ops
                .iter()
                .filter(|o| o.endpoint == endpoint)
                .cloned()
                .collect(),
        }
    }

    /// Operations fully inside the half-open interval `[from, to)`.
    pub fn filter_inside(&self, from: u64, to: u64) -> OperationLog {
        OperationLog {
            ops: self
                .ops
                .iter()
                .filter(|o| o.contained_in(from, to))
                .cloned()
                .collect(),
        }
    }

    /// Earliest start and latest end over all operations.
    pub fn time_range(&self) -> Option<(u64, u64)> {
        if self.ops.is_empty() {
            return None;
        }
        let start = self.ops.iter().map(|o| o.start_ns).min().unwrap_or(0);
        let end = self.ops.iter().map(|o| o.end_ns).max().unwrap_or(0);
        Some((start, end))
    }

    /// The interval during which all threads were producing work.
    ///
    /// With `all_threads`, the range runs from the moment the last thread
    /// completed its first operation to the moment the first thread issued
    /// its final one; a non-positive interval yields `None`. Without it
    /// (per-host analysis), this is simply `time_range`.
    pub fn active_range(&self, all_threads: bool) -> Option<(u64, u64)> {
        if !all_threads {
            return self.time_range();
        }
        let mut per_thread: BTreeMap<(&str, u16), (u64, u64)> = BTreeMap::new();
        for op in &self.ops {
            let entry = per_thread
                .entry((op.client_id.as_str(), op.thread_id))
                .or_insert((u64::MAX, 0));
            entry.0 = entry.0.min(op.end_ns);
            entry.1 = entry.1.max(op.start_ns);
        }
        if per_thread.is_empty() {
            return None;
        }
        let start = per_thread.values().map(|v| v.0).max()?;
        let end = per_thread.values().map(|v| v.1).min()?;
        if end <= start {
            return None;
        }
        Some((start, end))
    }

    /// Number of distinct `(client, thread)` pairs.
    pub fn threads(&self) -> usize {
        self.ops
            .iter()
            .map(|o| (o.client_id.as_str(), o.thread_id))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Distinct endpoints, first-occurrence order.
    pub fn endpoints(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for op in &self.ops {
            if seen.insert(op.endpoint.as_str()) {
                out.push(op.endpoint.clone());
            }
        }
        out
    }

    /// Distinct client ids, ascending.
    pub fn clients(&self) -> Vec<String> {
        self.ops
            .iter()
            .map(|o| o.client_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|o| o.error.clone())
            .collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.ops.iter().map(|o| o.size_bytes).sum()
    }

    pub fn total_objects(&self) -> u64 {
        self.ops.iter().map(|o| o.obj_count as u64).sum()
    }

    pub fn avg_duration_ns(&self) -> f64 {
        if self.ops.is_empty() {
            return 0.0;
        }
        self.ops.iter().map(|o| o.duration_ns() as f64).sum::<f64>() / self.ops.len() as f64
    }

    pub fn avg_size(&self) -> f64 {
        if self.ops.is_empty() {
            return 0.0;
        }
        self.total_bytes() as f64 / self.ops.len() as f64
    }

    /// Order statistic at `ceil(q * n) - 1`, clamped to `[0, n-1]`.
    /// Callers sort by the metric of interest first; `median(0.0)` is the
    /// fastest element and `median(1.0)` the slowest.
    pub fn median(&self, q: f64) -> Option<&Operation> {
        percentile_index(self.ops.len(), q).map(|i| &self.ops[i])
    }

    pub fn multiple_sizes(&self) -> bool {
        let mut sizes = self.ops.iter().map(|o| o.size_bytes);
        match sizes.next() {
            None => false,
            Some(first) => sizes.any(|s| s != first),
        }
    }

    pub fn first_obj_size(&self) -> u64 {
        self.ops.first().map(|o| o.size_bytes).unwrap_or(0)
    }

    pub fn first_obj_per_op(&self) -> u32 {
        self.ops.first().map(|o| o.obj_count).unwrap_or(0)
    }
}

/// Index of the order statistic at quantile `q` in a collection of `n`
/// sorted elements: `ceil(q * n) - 1`, clamped to `[0, n-1]`.
pub fn percentile_index(n: usize, q: f64) -> Option<usize> {
    if n == 0 {
        return None;
    }
    let raw = (q * n as f64).ceil() as isize - 1;
    Some(raw.clamp(0, n as isize - 1) as usize)
}
