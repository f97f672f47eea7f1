//! Before/after comparison of two analyses.
//!
//! For each metric the comparison reports the absolute delta
//! (`after - before`) and the signed relative delta
//! (`(after - before) / before`), plus any parameter differences verbatim.
//! Chronological order of the two runs is not assumed.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::analyze::OpAnalysis;
use crate::ops::OpType;

/// One metric before/after, with computed deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub before: f64,
    pub after: f64,
    pub absolute: f64,
    /// Signed fraction of `before`; 0 when `before` is 0.
    pub relative: f64,
}

impl Delta {
    pub fn new(before: f64, after: f64) -> Self {
        let absolute = after - before;
        let relative = if before != 0.0 { absolute / before } else { 0.0 };
        Delta {
            before,
            after,
            absolute,
            relative,
        }
    }
}

/// Comparison of one operation type across two runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpComparison {
    pub op: OpType,
    pub average_bps: Delta,
    pub average_ops: Delta,
    pub fastest_bps: Delta,
    pub median_bps: Delta,
    pub slowest_bps: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb_average_ms: Option<Delta>,
    /// Parameter differences, verbatim, e.g. `concurrency: 4 -> 8`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_changes: Vec<String>,
}

/// Compare all op types present and unskipped in both analyses.
pub fn compare_analyses(
    before: &[OpAnalysis],
    after: &[OpAnalysis],
) -> Result<Vec<OpComparison>> {
    let mut out = Vec::new();
    for b in before.iter().filter(|a| !a.skipped) {
        let Some(a) = after.iter().find(|x| x.op == b.op && !x.skipped) else {
            continue;
        };
        out.push(compare_op(b, a));
    }
    if out.is_empty() {
        bail!("no comparable operation types between the two analyses");
    }
    Ok(out)
}

fn compare_op(before: &OpAnalysis, after: &OpAnalysis) -> OpComparison {
    let seg_metric = |a: &OpAnalysis, pick: fn(&crate::analyze::ThroughputSegmented) -> f64| {
        a.throughput.segmented.as_ref().map(pick).unwrap_or(0.0)
    };

    let ttfb = |a: &OpAnalysis| {
        a.single_sized
            .as_ref()
            .and_then(|s| s.first_byte.as_ref())
            .map(|t| t.average_ms as f64)
    };
    let ttfb_average_ms = match (ttfb(before), ttfb(after)) {
        (Some(b), Some(a)) => Some(Delta::new(b, a)),
        _ => None,
    };

    let mut parameter_changes = Vec::new();
    if before.concurrency != after.concurrency {
        parameter_changes.push(format!(
            "concurrency: {} -> {}",
            before.concurrency, after.concurrency
        ));
    }
    if before.objects_per_operation != after.objects_per_operation {
        parameter_changes.push(format!(
            "objects per operation: {} -> {}",
            before.objects_per_operation, after.objects_per_operation
        ));
    }
    let obj_size = |a: &OpAnalysis| a.single_sized.as_ref().map(|s| s.obj_size);
    if let (Some(b), Some(a)) = (obj_size(before), obj_size(after)) {
        if b != a {
            parameter_changes.push(format!("object size: {} -> {}", b, a));
        }
    }
    if before.throughput.measure_duration_ms != after.throughput.measure_duration_ms {
        parameter_changes.push(format!(
            "measured duration: {}ms -> {}ms",
            before.throughput.measure_duration_ms, after.throughput.measure_duration_ms
        ));
    }
    if before.hosts != after.hosts {
        parameter_changes.push(format!("hosts: {} -> {}", before.hosts, after.hosts));
    }

    OpComparison {
        op: before.op,
        average_bps: Delta::new(before.throughput.average_bps, after.throughput.average_bps),
        average_ops: Delta::new(before.throughput.average_ops, after.throughput.average_ops),
        fastest_bps: Delta::new(
            seg_metric(before, |s| s.fastest_bps),
            seg_metric(after, |s| s.fastest_bps),
        ),
        median_bps: Delta::new(
            seg_metric(before, |s| s.median_bps),
            seg_metric(after, |s| s.median_bps),
        ),
        slowest_bps: Delta::new(
            seg_metric(before, |s| s.slowest_bps),
            seg_metric(after, |s| s.slowest_bps),
        ),
        ttfb_average_ms,
        parameter_changes,
    }
}

/// Console rendering of a comparison.
pub fn print_comparison(comparisons: &[OpComparison]) {
    for c in comparisons {
        println!("\n{} comparison:", c.op);
        for change in &c.parameter_changes {
            println!("  parameter {}", change);
        }
        let line = |name: &str, d: &Delta, unit: &str| {
            println!(
                "  {:<12} {:.2}{} -> {:.2}{} ({:+.2}{}, {:+.1}%)",
                name,
                d.before,
                unit,
                d.after,
                unit,
                d.absolute,
                unit,
                d.relative * 100.0
            );
        };
        line("average", &c.average_bps, " B/s");
        line("obj/s", &c.average_ops, "");
        line("fastest", &c.fastest_bps, " B/s");
        line("median", &c.median_bps, " B/s");
        line("slowest", &c.slowest_bps, " B/s");
        if let Some(t) = &c.ttfb_average_ms {
            line("ttfb avg", t, "ms");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze_log;
    use crate::ops::{OpType, Operation, OperationLog};
    use std::time::Duration;

    const SEC: u64 = 1_000_000_000;

    /// A steady PUT run: `threads` workers, one 100ms op per slot for 10s.
    fn steady_log(threads: u16, size: u64) -> OperationLog {
        let mut ops = Vec::new();
        for thread in 0..threads {
            for i in 0..100u64 {
                let start = i * SEC / 10 + thread as u64;
                ops.push(Operation {
                    op_type: OpType::Put,
                    client_id: "c1".into(),
                    endpoint: "e1".into(),
                    thread_id: thread,
                    obj_count: 1,
                    size_bytes: size,
                    start_ns: start,
                    first_byte_ns: None,
                    end_ns: start + SEC / 10,
                    error: None,
                });
            }
        }
        OperationLog::with_ops(ops)
    }

    #[test]
    fn test_doubled_concurrency_gives_positive_delta() {
        let before = analyze_log(&steady_log(4, 1 << 20), Duration::from_secs(1));
        let after = analyze_log(&steady_log(8, 1 << 20), Duration::from_secs(1));

        let cmps = compare_analyses(&before, &after).unwrap();
        assert_eq!(cmps.len(), 1);
        let c = &cmps[0];
        assert!(c.average_bps.relative > 0.0);
        assert!(c.average_bps.absolute > 0.0);
        assert!(c
            .parameter_changes
            .iter()
            .any(|p| p.contains("concurrency: 4 -> 8")));
        // Same object size: no size change reported.
        assert!(!c.parameter_changes.iter().any(|p| p.contains("object size")));
    }

    #[test]
    fn test_delta_sign_and_relative() {
        let d = Delta::new(100.0, 50.0);
        assert_eq!(d.absolute, -50.0);
        assert_eq!(d.relative, -0.5);
        let z = Delta::new(0.0, 10.0);
        assert_eq!(z.relative, 0.0);
    }

    #[test]
    fn test_no_common_ops_fails() {
        let before = analyze_log(&steady_log(2, 1024), Duration::from_secs(1));
        assert!(compare_analyses(&before, &[]).is_err());
    }
}
