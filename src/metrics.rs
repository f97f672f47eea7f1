//! Live latency metrics.
//!
//! HDR histograms per operation type, recorded by the collector as results
//! stream in and printed as an end-of-run console summary. Analysis-grade
//! percentiles are computed separately from the operation log with exact
//! order statistics; these histograms only feed the live display.

use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::ops::OpType;

/// One histogram per operation type, microsecond resolution.
#[derive(Debug)]
pub struct LatencyRecorder {
    hists: BTreeMap<OpType, Histogram<u64>>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        LatencyRecorder {
            hists: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, op_type: OpType, duration: Duration) {
        let hist = self.hists.entry(op_type).or_insert_with(new_histogram);
        let _ = hist.record(duration.as_micros() as u64);
    }

    pub fn count(&self, op_type: OpType) -> u64 {
        self.hists.get(&op_type).map(|h| h.len()).unwrap_or(0)
    }

    /// Console summary of all op types seen so far.
    pub fn print_summary(&self) {
        for (op, hist) in &self.hists {
            if hist.is_empty() {
                continue;
            }
            println!(
                "{:>6} latency (µs): count={:<8} mean={:<8.0} p50={:<8} p90={:<8} p99={:<8} max={:<8}",
                op.as_str(),
                hist.len(),
                hist.mean(),
                hist.value_at_quantile(0.50),
                hist.value_at_quantile(0.90),
                hist.value_at_quantile(0.99),
                hist.max(),
            );
        }
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn new_histogram() -> Histogram<u64> {
    // 1µs to 1h, 3 significant digits.
    Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)
        .expect("failed to allocate histogram")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut rec = LatencyRecorder::new();
        rec.record(OpType::Get, Duration::from_micros(100));
        rec.record(OpType::Get, Duration::from_micros(200));
        rec.record(OpType::Put, Duration::from_micros(50));

        assert_eq!(rec.count(OpType::Get), 2);
        assert_eq!(rec.count(OpType::Put), 1);
        assert_eq!(rec.count(OpType::Delete), 0);
    }
}
