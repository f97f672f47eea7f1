// tests/merge_cmp.rs

// Cross-client merging and before/after comparison on real runs driven
// against in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tempfile::TempDir;

use storbench::analyze::analyze_log;
use storbench::client::StorePool;
use storbench::compare::compare_analyses;
use storbench::driver::{run_benchmark, BenchOpts};
use storbench::endpoints::EndpointPool;
use storbench::merge::merge_logs;
use storbench::oplog::{load_log, save_log};
use storbench::ops::{OpType, OperationLog};

fn memory_pool(endpoints: &EndpointPool) -> StorePool {
    let backing: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    StorePool::from_stores(
        endpoints
            .endpoints()
            .iter()
            .map(|ep| (ep.clone(), backing.clone()))
            .collect(),
    )
}

async fn run_put_client(client_id: &str, concurrent: usize) -> Result<OperationLog> {
    let endpoints = EndpointPool::parse("10.0.0.1:9000")?;
    let pool = memory_pool(&endpoints);
    let mut opts = BenchOpts::new(OpType::Put, client_id.to_string());
    opts.concurrent = concurrent;
    opts.duration = Duration::from_millis(400);
    opts.obj_size = 8 * 1024;
    opts.run_seed = 7;
    let result = run_benchmark(pool, endpoints, opts, None).await?;
    Ok(result.log)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_merge_concurrent_clients() -> Result<()> {
    // Two clients measuring at the same time: their active ranges overlap.
    let (a, b) = tokio::join!(run_put_client("client-a", 2), run_put_client("client-b", 2));
    let (a, b) = (a?, b?);

    let merged = merge_logs(&[a.clone(), b.clone()])?;
    assert!(!merged.is_empty());
    assert_eq!(
        merged.clients(),
        vec!["client-a".to_string(), "client-b".to_string()]
    );
    // Synthetic thread ids cover both clients' workers.
    assert_eq!(merged.threads(), 4);

    // The merged log analyzes as one four-thread client.
    let analyses = analyze_log(&merged, Duration::from_millis(100));
    assert_eq!(analyses.len(), 1);
    assert!(!analyses[0].skipped);
    assert_eq!(analyses[0].concurrency, 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_merge_round_trips_through_files() -> Result<()> {
    let (a, b) = tokio::join!(run_put_client("client-a", 2), run_put_client("client-b", 2));
    let (a, b) = (a?, b?);

    let dir = TempDir::new()?;
    let path_a = dir.path().join("a.data");
    let path_b = dir.path().join("b.data");
    let path_m = dir.path().join("merged.data");
    save_log(&path_a, &a)?;
    save_log(&path_b, &b)?;

    let merged = merge_logs(&[load_log(&path_a)?, load_log(&path_b)?])?;
    save_log(&path_m, &merged)?;
    let reloaded = load_log(&path_m)?;
    assert_eq!(reloaded.len(), merged.len());
    assert_eq!(reloaded.total_bytes(), merged.total_bytes());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cmp_reports_concurrency_gain() -> Result<()> {
    // Two runs differing only in concurrency.
    let before_log = run_put_client("client-a", 2).await?;
    let after_log = run_put_client("client-a", 6).await?;

    let before = analyze_log(&before_log, Duration::from_millis(100));
    let after = analyze_log(&after_log, Duration::from_millis(100));
    let cmps = compare_analyses(&before, &after)?;
    assert_eq!(cmps.len(), 1);
    let c = &cmps[0];

    assert!(
        c.average_bps.relative > 0.0,
        "more workers against an in-memory store must raise throughput"
    );
    assert!(c
        .parameter_changes
        .iter()
        .any(|p| p.contains("concurrency: 2 -> 6")));
    // Identical object size: not reported as a parameter change.
    assert!(!c.parameter_changes.iter().any(|p| p.contains("object size")));
    Ok(())
}
