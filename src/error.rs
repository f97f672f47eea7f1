//! Benchmark error kinds and their exit-code classification.
//!
//! Most plumbing propagates `anyhow::Result`; the kinds below mark the
//! failures that decide process exit codes: 1 for configuration errors,
//! 2 for runtime errors during a benchmark, 3 for analysis errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("invalid endpoint spec `{0}`: {1}")]
    BadEndpointSpec(String, String),

    #[error("invalid flag {flag}: {reason}")]
    BadFlag { flag: String, reason: String },

    #[error("invalid duration `{0}`")]
    BadDuration(String),

    #[error("bucket setup failed: {0}")]
    BucketSetup(String),

    #[error("no successful operations for {window_secs}s ({errors} errors); aborting")]
    AllWorkersFailing { window_secs: u64, errors: u64 },

    #[error("corrupted benchmark data in {path} at record {record}: {reason}")]
    LogCorrupted {
        path: PathBuf,
        record: usize,
        reason: String,
    },

    #[error("merge found no overlapping active time range between clients")]
    NoOverlap,
}

impl BenchError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            BenchError::BadEndpointSpec(..)
            | BenchError::BadFlag { .. }
            | BenchError::BadDuration(..) => 1,
            BenchError::BucketSetup(..) | BenchError::AllWorkersFailing { .. } => 2,
            BenchError::LogCorrupted { .. } | BenchError::NoOverlap => 3,
        }
    }
}

/// Exit code for an error chain: the innermost `BenchError` decides,
/// otherwise the caller-supplied default applies.
pub fn exit_code_for(err: &anyhow::Error, default: u8) -> u8 {
    for cause in err.chain() {
        if let Some(bench) = cause.downcast_ref::<BenchError>() {
            return bench.exit_code();
        }
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            BenchError::BadEndpointSpec("x".into(), "empty".into()).exit_code(),
            1
        );
        assert_eq!(BenchError::BucketSetup("denied".into()).exit_code(), 2);
        assert_eq!(BenchError::NoOverlap.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_through_chain() {
        let err = anyhow::Error::new(BenchError::NoOverlap).context("merging 2 logs");
        assert_eq!(exit_code_for(&err, 2), 3);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&plain, 2), 2);
    }
}
