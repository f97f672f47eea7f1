//! Cross-client log merging.
//!
//! Logs from several clients are combined by keeping only the interval in
//! which every client was actively running: the intersection of per-client
//! active ranges. Operations outside it are discarded, and each
//! `(client_id, thread_id)` pair is relabeled to a dense synthetic thread
//! id, so the merged log analyzes like one client with the summed
//! concurrency. Wall clocks are assumed NTP-aligned; ordering across
//! clients beyond timestamp comparison is not reconstructed.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, info};

use crate::error::BenchError;
use crate::ops::OperationLog;

/// Merge logs from distinct clients into one analyzable log.
///
/// Fails with `NoOverlap` when the active ranges do not intersect (or a
/// client has no computable active range).
pub fn merge_logs(logs: &[OperationLog]) -> Result<OperationLog> {
    let mut all = OperationLog::new();
    for log in logs {
        all.ops.extend(log.ops.iter().cloned());
    }
    if all.is_empty() {
        return Err(BenchError::NoOverlap.into());
    }

    // Intersect per-client active ranges.
    let mut start = 0u64;
    let mut end = u64::MAX;
    for client in all.clients() {
        let client_ops = OperationLog::with_ops(
            all.ops
                .iter()
                .filter(|o| o.client_id == client)
                .cloned()
                .collect(),
        );
        let Some((c_start, c_end)) = client_ops.active_range(true) else {
            debug!("Client {} has no active range", client);
            return Err(BenchError::NoOverlap.into());
        };
        debug!(
            "Client {} active range: {}ns .. {}ns ({} ops)",
            client,
            c_start,
            c_end,
            client_ops.len()
        );
        start = start.max(c_start);
        end = end.min(c_end);
    }
    if end <= start {
        return Err(BenchError::NoOverlap.into());
    }

    // Keep operations fully inside the intersection, by start and end.
    let mut merged = all.filter_inside(start, end);

    // Dense synthetic thread ids over (client, thread) pairs.
    let mut mapping: BTreeMap<(String, u16), u16> = BTreeMap::new();
    for op in merged.iter() {
        let key = (op.client_id.clone(), op.thread_id);
        let next = mapping.len() as u16;
        mapping.entry(key).or_insert(next);
    }
    for op in merged.ops.iter_mut() {
        op.thread_id = mapping[&(op.client_id.clone(), op.thread_id)];
    }

    merged.sort_by_start();
    info!(
        "Merged {} clients into {} operations over {:.2}s of overlap",
        logs.len(),
        merged.len(),
        (end - start) as f64 / 1e9
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{OpType, Operation};

    const SEC: u64 = 1_000_000_000;

    fn op(client: &str, thread: u16, start: u64, end: u64) -> Operation {
        Operation {
            op_type: OpType::Put,
            client_id: client.into(),
            endpoint: "e1".into(),
            thread_id: thread,
            obj_count: 1,
            size_bytes: 1000,
            start_ns: start,
            first_byte_ns: None,
            end_ns: end,
            error: None,
        }
    }

    /// One client, one thread, back-to-back ops covering [from, to).
    fn steady_client(client: &str, from: u64, to: u64) -> OperationLog {
        let mut ops = Vec::new();
        let mut t = from;
        while t + SEC / 10 <= to {
            ops.push(op(client, 0, t, t + SEC / 10));
            t += SEC / 10;
        }
        OperationLog::with_ops(ops)
    }

    #[test]
    fn test_non_overlapping_ranges_fail() {
        // Active ranges [0, 10s) and [20s, 30s).
        let a = steady_client("a", 0, 10 * SEC);
        let b = steady_client("b", 20 * SEC, 30 * SEC);
        let err = merge_logs(&[a, b]).expect_err("must not merge");
        assert!(matches!(
            err.downcast_ref::<BenchError>(),
            Some(BenchError::NoOverlap)
        ));
    }

    #[test]
    fn test_overlap_keeps_intersection_only() {
        // Active ranges roughly [0, 10s) and [5s, 15s) -> overlap [5s, 10s).
        let a = steady_client("a", 0, 10 * SEC);
        let b = steady_client("b", 5 * SEC, 15 * SEC);
        let merged = merge_logs(&[a, b]).unwrap();

        let (start, end) = merged.time_range().unwrap();
        assert!(start >= 5 * SEC - SEC / 10);
        assert!(end <= 10 * SEC + SEC / 10);
        for o in merged.iter() {
            assert!(o.start_ns >= 4 * SEC && o.end_ns <= 11 * SEC);
        }
        // Both clients contribute.
        assert_eq!(merged.clients(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_merge_single_log_is_identity_in_steady_state() {
        let a = steady_client("a", 0, 10 * SEC);
        let merged = merge_logs(&[a.clone()]).unwrap();
        // All ops lie inside the active range, so nothing is dropped.
        assert_eq!(merged.len(), a.len());
        assert_eq!(merged.total_bytes(), a.total_bytes());
    }

    #[test]
    fn test_thread_relabeling_is_dense() {
        // Client "a" runs two interleaved threads with sparse ids (0 and 3).
        let mut a_ops = steady_client("a", 0, 5 * SEC).ops;
        for (i, o) in a_ops.iter_mut().enumerate() {
            o.thread_id = if i % 2 == 0 { 0 } else { 3 };
        }
        let a = OperationLog::with_ops(a_ops);
        let b = steady_client("b", 0, 5 * SEC);

        let merged = merge_logs(&[a, b]).unwrap();
        assert_eq!(merged.threads(), 3);

        let mut ids: Vec<u16> = merged.ops.iter().map(|o| o.thread_id).collect();
        ids.sort_unstable();
        ids.dedup();
        // Dense: 0..n
        assert_eq!(ids, (0..ids.len() as u16).collect::<Vec<_>>());
    }
}
