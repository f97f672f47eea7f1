//! Post-run analysis of an operation log.
//!
//! Produces one analysis record per operation type: average and segmented
//! throughput, request-duration statistics (single-sized path) or size
//! buckets (multi-sized path), TTFB where recorded, and per-host
//! breakdowns. Durations are reported in whole milliseconds (rounded),
//! throughput in bytes per second rounded to one decimal, operations per
//! second to two decimals.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_FIRST_ERRORS, MIN_BUCKET_REQUESTS, SPLIT_SIZE_FRACTION};
use crate::ops::{percentile_index, OpType, Operation, OperationLog};
use crate::segment::{
    median_segment, segment_log, sort_by_bps, sort_by_objs_per_sec, sort_by_time, total_segment,
    Segment, SegmentOptions,
};
use crate::sizes::format_bytes;

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn ns_to_millis(ns: u64) -> u64 {
    (ns + 500_000) / 1_000_000
}

fn ns_f64_to_millis(ns: f64) -> u64 {
    (ns / 1e6).round() as u64
}

/// Time-to-first-byte statistics, milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ttfb {
    pub average_ms: u64,
    pub median_ms: u64,
    pub fastest_ms: u64,
    pub slowest_ms: u64,
}

/// TTFB over all operations that recorded a first byte; `None` when none did.
fn ttfb_stats(log: &OperationLog) -> Option<Ttfb> {
    let mut samples: Vec<u64> = log.iter().filter_map(|o| o.ttfb_ns()).collect();
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();
    let avg = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
    let median = samples[percentile_index(samples.len(), 0.5)?];
    Some(Ttfb {
        average_ms: ns_f64_to_millis(avg),
        median_ms: ns_to_millis(median),
        fastest_ms: ns_to_millis(samples[0]),
        slowest_ms: ns_to_millis(*samples.last()?),
    })
}

/// Statistics when every request carries the same object size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleSizedRequests {
    pub skipped: bool,
    pub obj_size: u64,
    pub requests: usize,
    pub dur_avg_ms: u64,
    pub dur_median_ms: u64,
    pub dur_90_ms: u64,
    pub dur_99_ms: u64,
    pub fastest_ms: u64,
    pub slowest_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_byte: Option<Ttfb>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_host: BTreeMap<String, SingleSizedRequests>,
}

impl SingleSizedRequests {
    fn fill(mut ops: OperationLog) -> Self {
        ops.sort_by_duration();
        let n = ops.len();
        let dur_at = |q: f64| -> u64 {
            ops.median(q)
                .map(|o| ns_to_millis(o.duration_ns()))
                .unwrap_or(0)
        };
        SingleSizedRequests {
            skipped: n == 0,
            obj_size: ops.first_obj_size(),
            requests: n,
            dur_avg_ms: ns_f64_to_millis(ops.avg_duration_ns()),
            dur_median_ms: dur_at(0.5),
            dur_90_ms: dur_at(0.9),
            dur_99_ms: dur_at(0.99),
            fastest_ms: dur_at(0.0),
            slowest_ms: dur_at(1.0),
            first_byte: ttfb_stats(&ops),
            by_host: BTreeMap::new(),
        }
    }
}

/// One contiguous `[min, max)` size range of a multi-sized run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSizeRange {
    pub requests: usize,
    pub min_size: u64,
    pub min_size_string: String,
    /// Exclusive upper bound.
    pub max_size: u64,
    pub max_size_string: String,
    pub avg_obj_size: u64,
    pub avg_duration_ms: u64,
    pub bps_average: f64,
    pub bps_median: f64,
    pub bps_90: f64,
    pub bps_99: f64,
    pub bps_fastest: f64,
    pub bps_slowest: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_byte: Option<Ttfb>,
}

impl RequestSizeRange {
    fn fill(mut ops: OperationLog, min_size: u64, max_size: u64) -> Self {
        // Fastest first: median(0) is the fastest request, median(1) the
        // slowest, and bps_90 the rate 90% of requests meet or beat.
        ops.sort_by_throughput();
        ops.ops.reverse();
        let n = ops.len();
        let bps_at = |q: f64| -> f64 {
            percentile_index(n, q)
                .map(|i| round1(ops.ops[i].bytes_per_sec()))
                .unwrap_or(0.0)
        };
        // Aggregate request throughput: bytes moved per second of request time.
        let total_secs: f64 = ops.iter().map(|o| o.duration_ns() as f64 / 1e9).sum();
        let avg_bps = if total_secs > 0.0 {
            round1(ops.total_bytes() as f64 / total_secs)
        } else {
            0.0
        };
        RequestSizeRange {
            requests: n,
            min_size,
            min_size_string: format_bytes(min_size),
            max_size,
            max_size_string: format_bytes(max_size),
            avg_obj_size: ops.avg_size().round() as u64,
            avg_duration_ms: ns_f64_to_millis(ops.avg_duration_ns()),
            bps_average: avg_bps,
            bps_median: bps_at(0.5),
            bps_90: bps_at(0.9),
            bps_99: bps_at(0.99),
            bps_fastest: bps_at(0.0),
            bps_slowest: bps_at(1.0),
            first_byte: ttfb_stats(&ops),
        }
    }
}

/// Statistics when requests carry differing object sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiSizedRequests {
    pub skipped: bool,
    pub requests: usize,
    pub avg_obj_size: u64,
    pub by_size: Vec<RequestSizeRange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_host: BTreeMap<String, RequestSizeRange>,
}

/// Average and segmented throughput over one measured interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Throughput {
    pub errors: usize,
    pub measure_duration_ms: u64,
    pub start_ns: u64,
    /// Average bytes per second, one decimal.
    pub average_bps: f64,
    /// Average operations per second, two decimals.
    pub average_ops: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmented: Option<ThroughputSegmented>,
}

impl Throughput {
    fn fill(total: &Segment) -> Self {
        Throughput {
            errors: total.errors,
            measure_duration_ms: ns_to_millis(total.duration_ns),
            start_ns: total.start_ns,
            average_bps: round1(total.bytes_per_sec()),
            average_ops: round2(total.objs_per_sec()),
            segmented: None,
        }
    }
}

/// Segment list with the fastest / 50% median / slowest surfaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputSegmented {
    pub segment_duration_ms: u64,
    /// `bps` when any segment carried bytes, else `ops`.
    pub sorted_by: String,
    /// Chronological segment list.
    pub segments: Vec<Segment>,
    pub fastest_start_ns: u64,
    pub fastest_bps: f64,
    pub fastest_ops: f64,
    pub median_start_ns: u64,
    pub median_bps: f64,
    pub median_ops: f64,
    pub slowest_start_ns: u64,
    pub slowest_bps: f64,
    pub slowest_ops: f64,
}

impl ThroughputSegmented {
    fn fill(mut segments: Vec<Segment>, segment_duration: Duration, total: &Segment) -> Self {
        let mut chronological = segments.clone();
        sort_by_time(&mut chronological);

        let sorted_by = if total.bytes > 0.0 {
            sort_by_bps(&mut segments);
            "bps"
        } else {
            sort_by_objs_per_sec(&mut segments);
            "ops"
        };

        let pick = |q: f64| -> (u64, f64, f64) {
            median_segment(&segments, q)
                .map(|s| (s.start_ns, round1(s.bytes_per_sec()), round2(s.objs_per_sec())))
                .unwrap_or((0, 0.0, 0.0))
        };
        let (fastest_start_ns, fastest_bps, fastest_ops) = pick(1.0);
        let (median_start_ns, median_bps, median_ops) = pick(0.5);
        let (slowest_start_ns, slowest_bps, slowest_ops) = pick(0.0);

        ThroughputSegmented {
            segment_duration_ms: segment_duration.as_millis() as u64,
            sorted_by: sorted_by.to_string(),
            segments: chronological,
            fastest_start_ns,
            fastest_bps,
            fastest_ops,
            median_start_ns,
            median_bps,
            median_ops,
            slowest_start_ns,
            slowest_bps,
            slowest_ops,
        }
    }
}

/// Full analysis for one operation type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpAnalysis {
    pub op: OpType,
    /// Fewer than two segments could be formed.
    pub skipped: bool,
    pub start_ns: u64,
    pub end_ns: u64,
    pub objects_per_operation: u32,
    pub concurrency: usize,
    pub hosts: usize,
    pub errors: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub first_errors: Vec<String>,
    pub throughput: Throughput,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_host: BTreeMap<String, Throughput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_sized: Option<SingleSizedRequests>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_sized: Option<MultiSizedRequests>,
}

fn skipped_analysis(op: OpType, ops: &OperationLog) -> OpAnalysis {
    let (start_ns, end_ns) = ops.time_range().unwrap_or((0, 0));
    OpAnalysis {
        op,
        skipped: true,
        start_ns,
        end_ns,
        objects_per_operation: ops.first_obj_per_op(),
        concurrency: ops.threads(),
        hosts: ops.endpoints().len(),
        errors: ops.errors().len(),
        first_errors: Vec::new(),
        throughput: Throughput {
            errors: 0,
            measure_duration_ms: 0,
            start_ns: 0,
            average_bps: 0.0,
            average_ops: 0.0,
            segmented: None,
        },
        by_host: BTreeMap::new(),
        single_sized: None,
        multi_sized: None,
    }
}

/// Analyze a log: one record per operation type present.
pub fn analyze_log(log: &OperationLog, segment_duration: Duration) -> Vec<OpAnalysis> {
    let mut sorted = log.clone();
    sorted.sort_by_start();

    let mut out = Vec::new();
    for op_type in sorted.op_types() {
        let ops = sorted.filter_op(op_type);

        let opts = SegmentOptions {
            duration: segment_duration,
            all_threads: true,
        };
        let segments = segment_log(&ops, &opts).unwrap_or_default();
        if segments.len() <= 1 {
            out.push(skipped_analysis(op_type, &ops));
            continue;
        }
        let total = match total_segment(&ops, true) {
            Some(t) => t,
            None => {
                out.push(skipped_analysis(op_type, &ops));
                continue;
            }
        };

        let (start_ns, end_ns) = ops.time_range().unwrap_or((0, 0));
        let mut analysis = OpAnalysis {
            op: op_type,
            skipped: false,
            start_ns,
            end_ns,
            objects_per_operation: ops.first_obj_per_op(),
            concurrency: ops.threads(),
            hosts: ops.endpoints().len(),
            errors: 0,
            first_errors: Vec::new(),
            throughput: Throughput::fill(&total),
            by_host: BTreeMap::new(),
            single_sized: None,
            multi_sized: None,
        };
        analysis.throughput.segmented =
            Some(ThroughputSegmented::fill(segments, segment_duration, &total));

        let errors = ops.errors();
        analysis.errors = errors.len();
        analysis.first_errors = errors.into_iter().take(MAX_FIRST_ERRORS).collect();

        if ops.multiple_sizes() {
            analysis.multi_sized = Some(request_analysis_multi_sized(&ops));
        } else {
            analysis.single_sized = Some(request_analysis_single_sized(&ops));
        }

        for endpoint in ops.endpoints() {
            let host_ops = ops.filter_endpoint(&endpoint);
            let Some(host_total) = total_segment(&host_ops, false) else {
                continue;
            };
            let mut host = Throughput::fill(&host_total);
            let host_opts = SegmentOptions {
                duration: segment_duration,
                all_threads: false,
            };
            if let Some(host_segs) = segment_log(&host_ops, &host_opts) {
                if host_segs.len() > 1 {
                    host.segmented = Some(ThroughputSegmented::fill(
                        host_segs,
                        segment_duration,
                        &host_total,
                    ));
                }
            }
            analysis.by_host.insert(endpoint, host);
        }

        out.push(analysis);
    }
    out
}

/// Request statistics for a same-size run, trimmed to the active range.
pub fn request_analysis_single_sized(ops: &OperationLog) -> SingleSizedRequests {
    let active = match ops.active_range(true) {
        Some((start, end)) => ops.filter_inside(start, end),
        None => OperationLog::new(),
    };
    if active.is_empty() {
        let mut skipped = SingleSizedRequests::fill(active);
        skipped.skipped = true;
        return skipped;
    }
    let mut res = SingleSizedRequests::fill(active);
    res.by_host = hosts_single_sized(ops);
    res
}

fn hosts_single_sized(ops: &OperationLog) -> BTreeMap<String, SingleSizedRequests> {
    let mut out = BTreeMap::new();
    for endpoint in ops.endpoints() {
        let filtered = ops.filter_endpoint(&endpoint);
        if filtered.len() <= 1 {
            continue;
        }
        out.insert(endpoint, SingleSizedRequests::fill(filtered));
    }
    out
}

/// Request statistics for a mixed-size run, trimmed to the active range.
pub fn request_analysis_multi_sized(ops: &OperationLog) -> MultiSizedRequests {
    let active = match ops.active_range(true) {
        Some((start, end)) => ops.filter_inside(start, end),
        None => OperationLog::new(),
    };
    if active.is_empty() {
        return MultiSizedRequests {
            skipped: true,
            requests: 0,
            avg_obj_size: 0,
            by_size: Vec::new(),
            by_host: BTreeMap::new(),
        };
    }

    let avg_obj_size = active.avg_size().round() as u64;
    let by_size = split_sizes(&active, SPLIT_SIZE_FRACTION)
        .into_iter()
        .map(|(min, max, bucket)| RequestSizeRange::fill(bucket, min, max))
        .collect();

    let mut by_host = BTreeMap::new();
    for endpoint in active.endpoints() {
        let filtered = active.filter_endpoint(&endpoint);
        if filtered.len() <= 1 {
            continue;
        }
        let min = filtered.iter().map(|o| o.size_bytes).min().unwrap_or(0);
        let max = filtered.iter().map(|o| o.size_bytes).max().unwrap_or(0) + 1;
        by_host.insert(endpoint, RequestSizeRange::fill(filtered, min, max));
    }

    MultiSizedRequests {
        skipped: false,
        requests: active.len(),
        avg_obj_size,
        by_size,
        by_host,
    }
}

/// Cluster size-sorted operations into contiguous buckets.
///
/// Greedy left-to-right: a bucket closes once admitting the next operation
/// would stretch its span beyond `frac` of the average object size, but
/// never before it holds `MIN_BUCKET_REQUESTS` operations. Returns
/// `(min, max_exclusive, ops)` per bucket.
pub fn split_sizes(ops: &OperationLog, frac: f64) -> Vec<(u64, u64, OperationLog)> {
    if ops.is_empty() {
        return Vec::new();
    }
    let threshold = (ops.avg_size() * frac).max(1.0) as u64;

    let mut sorted: Vec<&Operation> = ops.iter().collect();
    sorted.sort_by_key(|o| o.size_bytes);

    let mut out = Vec::new();
    let mut bucket: Vec<Operation> = Vec::new();
    let mut bucket_min = sorted[0].size_bytes;

    for op in sorted {
        let span = op.size_bytes - bucket_min;
        if !bucket.is_empty() && span > threshold && bucket.len() >= MIN_BUCKET_REQUESTS {
            let max = bucket.last().map(|o| o.size_bytes + 1).unwrap_or(0);
            out.push((bucket_min, max, OperationLog::with_ops(std::mem::take(&mut bucket))));
            bucket_min = op.size_bytes;
        }
        if bucket.is_empty() {
            bucket_min = op.size_bytes;
        }
        bucket.push(op.clone());
    }
    if !bucket.is_empty() {
        let max = bucket.last().map(|o| o.size_bytes + 1).unwrap_or(0);
        out.push((bucket_min, max, OperationLog::with_ops(bucket)));
    }
    out
}

fn rfc3339(ns: u64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(ns as i64).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write the per-segment CSV rows (one row per time segment, chronological).
pub fn write_segments_csv<W: Write>(w: &mut W, analyses: &[OpAnalysis]) -> Result<()> {
    writeln!(
        w,
        "index,op,duration_s,objects_per_op,bytes,full_ops,partial_ops,ops_started,ops_ended,errors,mb_per_sec,ops_ended_per_sec,objs_per_sec,start_time,end_time"
    )
    .context("Failed to write CSV header")?;

    for analysis in analyses {
        let Some(segmented) = analysis.throughput.segmented.as_ref() else {
            continue;
        };
        for (idx, seg) in segmented.segments.iter().enumerate() {
            writeln!(
                w,
                "{},{},{:.2},{},{:.0},{},{},{},{},{},{:.4},{:.2},{:.2},{},{}",
                idx,
                analysis.op,
                seg.secs(),
                analysis.objects_per_operation,
                seg.bytes,
                seg.full_ops,
                seg.partial_ops,
                seg.ops_started,
                seg.ops_ended,
                seg.errors,
                seg.mib_per_sec(),
                seg.ops_ended_per_sec(),
                seg.objs_per_sec(),
                rfc3339(seg.start_ns),
                rfc3339(seg.end_ns()),
            )
            .context("Failed to write CSV row")?;
        }
    }
    Ok(())
}

/// Console rendering of an analysis.
pub fn print_analysis(analyses: &[OpAnalysis], show_requests: bool) {
    for a in analyses {
        println!("\n{} operation summary:", a.op);
        if a.skipped {
            println!("  Skipped: fewer than two segments could be formed.");
            continue;
        }
        println!(
            "  Concurrency: {}, hosts: {}, objects per operation: {}",
            a.concurrency, a.hosts, a.objects_per_operation
        );
        if a.errors > 0 {
            println!("  Errors: {}", a.errors);
            for e in &a.first_errors {
                println!("    - {}", e);
            }
        }
        let t = &a.throughput;
        println!(
            "  Average: {:.2} MiB/s, {:.2} obj/s over {:.1}s",
            t.average_bps / (1024.0 * 1024.0),
            t.average_ops,
            t.measure_duration_ms as f64 / 1e3
        );
        if let Some(seg) = &t.segmented {
            println!(
                "  Segments ({}ms, by {}): fastest {:.2} MiB/s ({:.2} obj/s), median {:.2} MiB/s ({:.2} obj/s), slowest {:.2} MiB/s ({:.2} obj/s)",
                seg.segment_duration_ms,
                seg.sorted_by,
                seg.fastest_bps / (1024.0 * 1024.0),
                seg.fastest_ops,
                seg.median_bps / (1024.0 * 1024.0),
                seg.median_ops,
                seg.slowest_bps / (1024.0 * 1024.0),
                seg.slowest_ops,
            );
        }

        if !show_requests {
            continue;
        }
        if let Some(s) = &a.single_sized {
            println!(
                "  Requests: {} x {} object: avg {}ms, median {}ms, 90% {}ms, 99% {}ms, fastest {}ms, slowest {}ms",
                s.requests,
                format_bytes(s.obj_size),
                s.dur_avg_ms,
                s.dur_median_ms,
                s.dur_90_ms,
                s.dur_99_ms,
                s.fastest_ms,
                s.slowest_ms
            );
            if let Some(fb) = &s.first_byte {
                println!(
                    "  TTFB: avg {}ms, median {}ms, fastest {}ms, slowest {}ms",
                    fb.average_ms, fb.median_ms, fb.fastest_ms, fb.slowest_ms
                );
            }
            for (host, hs) in &s.by_host {
                println!(
                    "    host {}: {} requests, avg {}ms, median {}ms",
                    host, hs.requests, hs.dur_avg_ms, hs.dur_median_ms
                );
            }
        }
        if let Some(m) = &a.multi_sized {
            println!(
                "  Requests: {} of varying size, avg {} bytes:",
                m.requests, m.avg_obj_size
            );
            for r in &m.by_size {
                println!(
                    "    {} -> {} ({} requests): avg {:.1} B/s, median {:.1} B/s, 99% {:.1} B/s",
                    r.min_size_string, r.max_size_string, r.requests, r.bps_average, r.bps_median, r.bps_99
                );
            }
        }
    }
}
