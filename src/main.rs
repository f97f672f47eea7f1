// -----------------------------------------------------------------------------
// storbench - benchmarking harness for S3-compatible object stores
// -----------------------------------------------------------------------------

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use clap::{Args, Parser, Subcommand};
use tokio::runtime::Builder as RtBuilder;
use tracing::{info, warn};

use storbench::analyze::{analyze_log, print_analysis, write_segments_csv};
use storbench::client::{ClientConfig, StorePool};
use storbench::compare::{compare_analyses, print_comparison};
use storbench::constants::{DEFAULT_BATCH, DEFAULT_BUCKET, DEFAULT_CONCURRENCY, DEFAULT_OBJECTS};
use storbench::driver::{run_benchmark, BenchOpts};
use storbench::endpoints::EndpointPool;
use storbench::error::{exit_code_for, BenchError};
use storbench::merge::merge_logs;
use storbench::oplog::{load_log, save_log, OpLogWriter};
use storbench::ops::OpType;
use storbench::sizes::parse_size;

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(
    name = "storbench",
    version,
    about = "Benchmark S3-compatible object stores and analyze the results"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Flags shared by every benchmark command.
#[derive(Args, Debug, Clone)]
struct BenchArgs {
    /// Endpoint spec: comma list and/or one `{N...M}` range per token,
    /// e.g. `10.0.0.{1...4}:9000`
    #[arg(long, env = "STORBENCH_HOST", default_value = "127.0.0.1:9000")]
    host: String,

    #[arg(long, env = "STORBENCH_ACCESS_KEY", default_value = "", hide_env_values = true)]
    access_key: String,

    #[arg(long, env = "STORBENCH_SECRET_KEY", default_value = "", hide_env_values = true)]
    secret_key: String,

    /// Use TLS (https) towards the endpoints
    #[arg(long)]
    tls: bool,

    /// Request server-side encryption (handled by the wire client)
    #[arg(long)]
    encrypt: bool,

    /// Target bucket
    #[arg(long, default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// Number of concurrent workers
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrent: usize,

    /// Measurement duration, e.g. `60s`, `5m`
    #[arg(long, default_value = "60s")]
    duration: String,

    /// Objects to pre-populate for GET/DELETE/LIST/STAT benchmarks
    #[arg(long, default_value_t = DEFAULT_OBJECTS)]
    objects: usize,

    /// Object size with optional IEC/SI suffix, e.g. `1MiB`
    #[arg(long = "obj-size", default_value = "1MiB")]
    obj_size: String,

    /// Batch size for DELETE operations
    #[arg(long, default_value_t = DEFAULT_BATCH)]
    batch: usize,

    /// Disable the per-thread key prefix
    #[arg(long)]
    noprefix: bool,

    /// Skip pre-run and post-run bucket cleanup
    #[arg(long)]
    noclear: bool,

    /// Synchronized start time `HH:MM` (local); aligns runs across clients
    #[arg(long = "syncstart")]
    syncstart: Option<String>,

    /// Benchmark data output path (default: auto-generated)
    #[arg(long = "benchdata")]
    benchdata: Option<PathBuf>,

    /// Client id recorded in the log (default: $HOSTNAME or `local`)
    #[arg(long = "client-id")]
    client_id: Option<String>,

    /// Per-request timeout, e.g. `1m`
    #[arg(long, default_value = "1m")]
    timeout: String,

    /// Server profiling hint forwarded to the server admin API
    #[arg(long = "serverprof", value_parser = ["cpu", "mem", "block", "mutex", "trace"])]
    serverprof: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark object uploads
    Put {
        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Benchmark object downloads (pre-populates objects first)
    Get {
        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Benchmark batched object deletion (pre-populates objects first)
    Delete {
        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Benchmark listings over the per-thread prefixes
    List {
        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Benchmark object metadata probes
    Stat {
        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Analyze a benchmark data file
    Analyze {
        /// Benchmark data file
        file: PathBuf,

        /// Segment duration, e.g. `1s`
        #[arg(long = "analyze-dur", default_value = "1s")]
        analyze_dur: String,

        /// Write per-segment CSV to this path
        #[arg(long = "analyze-out")]
        analyze_out: Option<PathBuf>,

        /// Include per-request statistics
        #[arg(long)]
        requests: bool,

        /// Write the full analysis as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Merge benchmark data from several clients, keeping the overlap
    Merge {
        /// Input benchmark data files
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,

        /// Merged output path
        #[arg(long, default_value = "storbench-merged.data")]
        out: PathBuf,
    },
    /// Compare two benchmark runs
    Cmp {
        before: PathBuf,
        after: PathBuf,

        /// Segment duration, e.g. `1s`
        #[arg(long = "analyze-dur", default_value = "1s")]
        analyze_dur: String,
    },
}

// -----------------------------------------------------------------------------
// main
// -----------------------------------------------------------------------------
fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Configuration errors exit 1, including usage problems.
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::new(format!("storbench={}", level));
    fmt().with_env_filter(filter).init();

    let (result, default_code) = match cli.command {
        Commands::Put { bench } => (run_bench_cmd(OpType::Put, bench), 2),
        Commands::Get { bench } => (run_bench_cmd(OpType::Get, bench), 2),
        Commands::Delete { bench } => (run_bench_cmd(OpType::Delete, bench), 2),
        Commands::List { bench } => (run_bench_cmd(OpType::List, bench), 2),
        Commands::Stat { bench } => (run_bench_cmd(OpType::Stat, bench), 2),
        Commands::Analyze {
            file,
            analyze_dur,
            analyze_out,
            requests,
            json,
        } => (
            analyze_cmd(&file, &analyze_dur, analyze_out.as_deref(), requests, json.as_deref()),
            3,
        ),
        Commands::Merge { files, out } => (merge_cmd(&files, &out), 3),
        Commands::Cmp {
            before,
            after,
            analyze_dur,
        } => (cmp_cmd(&before, &after, &analyze_dur), 3),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("storbench: {:#}", e);
            ExitCode::from(exit_code_for(&e, default_code))
        }
    }
}

fn parse_duration_flag(flag: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|_| BenchError::BadDuration(format!("{}={}", flag, value)).into())
}

fn bad_flag(flag: &str, reason: impl ToString) -> anyhow::Error {
    BenchError::BadFlag {
        flag: flag.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

// -----------------------------------------------------------------------------
// Benchmark commands
// -----------------------------------------------------------------------------
fn run_bench_cmd(op: OpType, args: BenchArgs) -> Result<()> {
    let duration = parse_duration_flag("duration", &args.duration)?;
    let request_timeout = parse_duration_flag("timeout", &args.timeout)?;
    let obj_size = parse_size(&args.obj_size).map_err(|e| bad_flag("obj-size", e))?;
    let sync_start = args
        .syncstart
        .as_deref()
        .map(|s| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|_| bad_flag("syncstart", "expected HH:MM"))
        })
        .transpose()?;
    if args.concurrent == 0 {
        return Err(bad_flag("concurrent", "must be at least 1"));
    }
    if op == OpType::Delete && args.batch == 0 {
        return Err(bad_flag("batch", "must be at least 1"));
    }
    if let Some(prof) = &args.serverprof {
        warn!(
            "Server profiling ({}) is forwarded to the server admin API and has no effect in this build",
            prof
        );
    }

    let endpoints = EndpointPool::parse(&args.host)?;
    let client_cfg = ClientConfig {
        access_key: args.access_key.clone(),
        secret_key: args.secret_key.clone(),
        tls: args.tls,
        encrypt: args.encrypt,
        bucket: args.bucket.clone(),
        region: "us-east-1".to_string(),
    };
    let pool = StorePool::connect(endpoints.endpoints(), &client_cfg)?;

    let benchdata = args.benchdata.clone().unwrap_or_else(|| {
        PathBuf::from(format!(
            "storbench-{}-{}.data",
            op.as_str().to_lowercase(),
            Local::now().format("%Y%m%d-%H%M%S")
        ))
    });
    let writer = OpLogWriter::create(&benchdata)?;

    let client_id = args
        .client_id
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "local".to_string());

    let mut opts = BenchOpts::new(op, client_id);
    opts.concurrent = args.concurrent;
    opts.duration = duration;
    opts.objects = args.objects;
    opts.obj_size = obj_size;
    opts.batch = args.batch;
    opts.noprefix = args.noprefix;
    opts.noclear = args.noclear;
    opts.sync_start = sync_start;
    opts.request_timeout = request_timeout;

    let rt = RtBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let result = rt.block_on(run_benchmark(pool, endpoints, opts, Some(writer)))?;

    info!("Benchmark data written to {}", benchdata.display());
    result.latencies.print_summary();

    let analyses = analyze_log(&result.log, storbench::constants::DEFAULT_SEGMENT_DURATION);
    print_analysis(&analyses, true);
    println!("\nBenchmark data: {}", benchdata.display());
    Ok(())
}

// -----------------------------------------------------------------------------
// Analysis commands
// -----------------------------------------------------------------------------
fn analyze_cmd(
    file: &std::path::Path,
    analyze_dur: &str,
    analyze_out: Option<&std::path::Path>,
    requests: bool,
    json: Option<&std::path::Path>,
) -> Result<()> {
    let segment_dur = parse_duration_flag("analyze-dur", analyze_dur)?;
    let log = load_log(file)?;
    info!("Loaded {} operations from {}", log.len(), file.display());

    let analyses = analyze_log(&log, segment_dur);
    print_analysis(&analyses, requests);

    if let Some(path) = analyze_out {
        let mut out = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_segments_csv(&mut out, &analyses)?;
        println!("Segment CSV written to {}", path.display());
    }
    if let Some(path) = json {
        let out = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(out, &analyses).context("Failed to serialize analysis")?;
        println!("Analysis JSON written to {}", path.display());
    }
    Ok(())
}

fn merge_cmd(files: &[PathBuf], out: &std::path::Path) -> Result<()> {
    let mut logs = Vec::with_capacity(files.len());
    for file in files {
        let log = load_log(file)?;
        info!("Loaded {} operations from {}", log.len(), file.display());
        logs.push(log);
    }
    let merged = merge_logs(&logs)?;
    save_log(out, &merged)?;
    println!(
        "Merged {} files into {} operations: {}",
        files.len(),
        merged.len(),
        out.display()
    );
    Ok(())
}

fn cmp_cmd(before: &std::path::Path, after: &std::path::Path, analyze_dur: &str) -> Result<()> {
    let segment_dur = parse_duration_flag("analyze-dur", analyze_dur)?;
    let before_analysis = analyze_log(&load_log(before)?, segment_dur);
    let after_analysis = analyze_log(&load_log(after)?, segment_dur);
    let comparisons = compare_analyses(&before_analysis, &after_analysis)?;
    print_comparison(&comparisons);
    Ok(())
}
