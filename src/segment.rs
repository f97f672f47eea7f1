//! Time-segmented throughput.
//!
//! The active range is cut into consecutive half-open segments of equal
//! width; a final partial segment shorter than the width is dropped to
//! avoid end-of-run cooldown skew. Bytes and objects are distributed:
//! an operation contributes to each segment in proportion to the fraction
//! of its duration overlapping it. Without distribution, operations longer
//! than the segment width (large PUTs into 1-second segments) would leave
//! most segments at zero.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ops::OperationLog;

#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    pub duration: Duration,
    /// Trim to the range where every thread was active (single-client
    /// analysis); per-host analysis uses the plain recorded range.
    pub all_threads: bool,
}

/// Aggregate metrics over one half-open time slice `[start, start + dur)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Segment {
    pub start_ns: u64,
    pub duration_ns: u64,
    /// Distributed payload bytes.
    pub bytes: f64,
    /// Distributed (fractional) object count.
    pub objects: f64,
    /// Operations fully contained in this segment.
    pub full_ops: usize,
    /// Operations overlapping but not contained.
    pub partial_ops: usize,
    pub ops_started: usize,
    pub ops_ended: usize,
    pub errors: usize,
}

impl Segment {
    pub fn end_ns(&self) -> u64 {
        self.start_ns + self.duration_ns
    }

    pub fn secs(&self) -> f64 {
        self.duration_ns as f64 / 1e9
    }

    pub fn bytes_per_sec(&self) -> f64 {
        if self.duration_ns == 0 {
            return 0.0;
        }
        self.bytes / self.secs()
    }

    pub fn mib_per_sec(&self) -> f64 {
        self.bytes_per_sec() / (1024.0 * 1024.0)
    }

    pub fn objs_per_sec(&self) -> f64 {
        if self.duration_ns == 0 {
            return 0.0;
        }
        self.objects / self.secs()
    }

    pub fn ops_ended_per_sec(&self) -> f64 {
        if self.duration_ns == 0 {
            return 0.0;
        }
        self.ops_ended as f64 / self.secs()
    }
}

/// Cut the log's active range into segments of `opts.duration`.
///
/// Returns `None` when no active range exists; fewer than two segments
/// means the analysis should be marked skipped by the caller.
pub fn segment_log(log: &OperationLog, opts: &SegmentOptions) -> Option<Vec<Segment>> {
    let (active_start, active_end) = log.active_range(opts.all_threads)?;
    let d = opts.duration.as_nanos() as u64;
    if d == 0 {
        return None;
    }
    let count = ((active_end - active_start) / d) as usize;
    if count == 0 {
        return Some(Vec::new());
    }

    let mut segments: Vec<Segment> = (0..count)
        .map(|i| Segment {
            start_ns: active_start + i as u64 * d,
            duration_ns: d,
            ..Segment::default()
        })
        .collect();
    let window_end = active_start + count as u64 * d;

    for op in log.iter() {
        if op.end_ns <= active_start || op.start_ns >= window_end {
            continue;
        }
        let first = op.start_ns.saturating_sub(active_start) / d;
        let last = (op.end_ns.saturating_sub(active_start + 1)) / d;
        let last = (last as usize).min(count - 1);

        for seg in &mut segments[first as usize..=last] {
            let seg_start = seg.start_ns;
            let seg_end = seg.end_ns();
            let overlap = op.overlap_ns(seg_start, seg_end);
            let dur = op.duration_ns();
            if overlap == 0 && dur != 0 {
                continue;
            }

            let frac = if dur == 0 {
                // Degenerate instantaneous record: attribute wholly to the
                // segment containing its start.
                if op.start_ns >= seg_start && op.start_ns < seg_end {
                    1.0
                } else {
                    continue;
                }
            } else {
                overlap as f64 / dur as f64
            };

            seg.bytes += op.size_bytes as f64 * frac;
            seg.objects += op.obj_count as f64 * frac;

            if op.contained_in(seg_start, seg_end) {
                seg.full_ops += 1;
            } else {
                seg.partial_ops += 1;
            }
            if op.start_ns >= seg_start && op.start_ns < seg_end {
                seg.ops_started += 1;
            }
            if op.end_ns >= seg_start && op.end_ns < seg_end {
                seg.ops_ended += 1;
                if op.is_error() {
                    seg.errors += 1;
                }
            }
        }
    }

    Some(segments)
}

/// One segment spanning the whole active range; the basis of average
/// throughput figures.
pub fn total_segment(log: &OperationLog, all_threads: bool) -> Option<Segment> {
    let (start, end) = log.active_range(all_threads)?;
    let mut total = Segment {
        start_ns: start,
        duration_ns: end - start,
        ..Segment::default()
    };
    for op in log.iter() {
        let overlap = op.overlap_ns(start, end);
        let dur = op.duration_ns();
        if overlap == 0 || dur == 0 {
            continue;
        }
        let frac = overlap as f64 / dur as f64;
        total.bytes += op.size_bytes as f64 * frac;
        total.objects += op.obj_count as f64 * frac;
        if op.contained_in(start, end) {
            total.full_ops += 1;
        } else {
            total.partial_ops += 1;
        }
        if op.start_ns >= start && op.start_ns < end {
            total.ops_started += 1;
        }
        if op.end_ns >= start && op.end_ns < end {
            total.ops_ended += 1;
            if op.is_error() {
                total.errors += 1;
            }
        }
    }
    Some(total)
}

pub fn sort_by_bps(segments: &mut [Segment]) {
    segments.sort_by(|a, b| {
        a.bytes_per_sec()
            .partial_cmp(&b.bytes_per_sec())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

pub fn sort_by_objs_per_sec(segments: &mut [Segment]) {
    segments.sort_by(|a, b| {
        a.objs_per_sec()
            .partial_cmp(&b.objs_per_sec())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

pub fn sort_by_time(segments: &mut [Segment]) {
    segments.sort_by_key(|s| s.start_ns);
}

/// Pick from sorted segments at quantile `q`: index `floor(q * n)` clamped
/// to the last element. After an ascending throughput sort, `median(0)` is
/// the slowest segment, `median(0.5)` the 50% median (index `n/2`) and
/// `median(1)` the fastest.
pub fn median_segment(segments: &[Segment], q: f64) -> Option<&Segment> {
    if segments.is_empty() {
        return None;
    }
    let idx = ((segments.len() as f64 * q) as usize).min(segments.len() - 1);
    Some(&segments[idx])
}
