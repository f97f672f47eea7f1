//! Benchmark data file persistence.
//!
//! A log file is 8 magic bytes and one version byte, followed by a
//! zstd-compressed CSV body (header + one row per operation, fixed column
//! order, see `OPLOG_HEADER`). Rows are streamed during the run and flushed
//! at bounded intervals, so a crash loses at most the unflushed tail. The
//! loader drops a truncated final record but rejects malformed records
//! anywhere earlier.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use tracing::{debug, warn};

use crate::constants::{ERROR_STRING_CAP, LOG_MAGIC, LOG_VERSION, LOG_ZSTD_LEVEL, OPLOG_HEADER};
use crate::error::BenchError;
use crate::ops::{OpType, Operation, OperationLog};

/// Streaming writer for benchmark data files.
pub struct OpLogWriter {
    writer: Box<dyn Write + Send>,
    path: PathBuf,
    idx: u64,
}

impl OpLogWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create benchmark data file: {}", path.display()))?;

        // Magic and version precede the compressed body.
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;

        let encoder = zstd::stream::Encoder::new(file, LOG_ZSTD_LEVEL)
            .context("Failed to create zstd encoder")?
            .auto_finish();
        let mut writer: Box<dyn Write + Send> =
            Box::new(BufWriter::with_capacity(64 * 1024, encoder));

        writeln!(writer, "{}", OPLOG_HEADER).context("Failed to write log header")?;

        Ok(OpLogWriter {
            writer,
            path: path.to_path_buf(),
            idx: 0,
        })
    }

    /// Append one operation as a CSV row.
    pub fn append(&mut self, op: &Operation) -> Result<()> {
        let first_byte = op
            .first_byte_ns
            .map(|v| v.to_string())
            .unwrap_or_default();
        let error = op.error.as_deref().map(clean_field).unwrap_or_default();
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.idx,
            op.thread_id,
            op.op_type,
            clean_field(&op.client_id),
            clean_field(&op.endpoint),
            op.obj_count,
            op.size_bytes,
            op.start_ns,
            first_byte,
            op.end_ns,
            error,
        )
        .context("Failed to write log row")?;
        self.idx += 1;
        Ok(())
    }

    /// Push buffered rows through the compressor to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush benchmark data")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.idx
    }
}

impl std::fmt::Debug for OpLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpLogWriter")
            .field("path", &self.path)
            .field("idx", &self.idx)
            .finish()
    }
}

/// Fields live in an unquoted CSV row: keep them free of separators and
/// cap their length.
fn clean_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(ERROR_STRING_CAP));
    for c in s.chars() {
        if out.len() + c.len_utf8() > ERROR_STRING_CAP {
            break;
        }
        out.push(match c {
            ',' | '\n' | '\r' => ' ',
            c => c,
        });
    }
    out
}

/// Persist a complete log (used by `merge` output).
pub fn save_log(path: &Path, log: &OperationLog) -> Result<()> {
    let mut writer = OpLogWriter::create(path)?;
    for op in log.iter() {
        writer.append(op)?;
    }
    writer.flush()
}

/// Load a benchmark data file.
///
/// A short or malformed final record is dropped (mid-run crash); any
/// malformed earlier record fails the whole file with `LogCorrupted`.
pub fn load_log(path: &Path) -> Result<OperationLog> {
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open benchmark data file: {}", path.display()))?;

    let mut header = [0u8; 9];
    file.read_exact(&mut header).map_err(|_| BenchError::LogCorrupted {
        path: path.to_path_buf(),
        record: 0,
        reason: "file shorter than magic header".into(),
    })?;
    if &header[..8] != LOG_MAGIC {
        return Err(BenchError::LogCorrupted {
            path: path.to_path_buf(),
            record: 0,
            reason: "bad magic bytes".into(),
        }
        .into());
    }
    if header[8] != LOG_VERSION {
        return Err(BenchError::LogCorrupted {
            path: path.to_path_buf(),
            record: 0,
            reason: format!("unsupported log version {}", header[8]),
        }
        .into());
    }

    let body = read_compressed_body(path, file)?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_slice());

    let records: Vec<_> = reader.records().collect();
    let last = records.len().saturating_sub(1);

    let mut log = OperationLog::new();
    for (i, record) in records.into_iter().enumerate() {
        let parsed = record
            .map_err(|e| e.to_string())
            .and_then(|rec| parse_record(&rec));
        match parsed {
            Ok(op) => log.push(op),
            Err(reason) if i == last => {
                warn!(
                    "Dropping truncated final record {} of {}: {}",
                    i + 1,
                    path.display(),
                    reason
                );
            }
            Err(reason) => {
                return Err(BenchError::LogCorrupted {
                    path: path.to_path_buf(),
                    record: i + 1,
                    reason,
                }
                .into());
            }
        }
    }

    debug!("Loaded {} operations from {}", log.len(), path.display());
    Ok(log)
}

/// Decompress the CSV body, tolerating a truncated zstd tail.
fn read_compressed_body(path: &Path, file: File) -> Result<Vec<u8>> {
    let mut decoder = zstd::stream::read::Decoder::new(file)
        .context("Failed to create zstd decoder")?;
    let mut body = Vec::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        match decoder.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
            Err(e) if !body.is_empty() => {
                warn!(
                    "Truncated compressed stream in {} ({}); keeping {} decoded bytes",
                    path.display(),
                    e,
                    body.len()
                );
                break;
            }
            Err(e) => {
                return Err(BenchError::LogCorrupted {
                    path: path.to_path_buf(),
                    record: 0,
                    reason: format!("compressed body unreadable: {}", e),
                }
                .into());
            }
        }
    }
    Ok(body)
}

fn parse_record(rec: &csv::StringRecord) -> Result<Operation, String> {
    if rec.len() < 11 {
        return Err(format!("expected 11 columns, found {}", rec.len()));
    }
    let field = |i: usize| rec.get(i).unwrap_or("");

    let thread_id: u16 = field(1).parse().map_err(|_| "bad thread id".to_string())?;
    let op_type: OpType = field(2).parse()?;
    let obj_count: u32 = field(5).parse().map_err(|_| "bad obj_count".to_string())?;
    let size_bytes: u64 = field(6).parse().map_err(|_| "bad bytes".to_string())?;
    let start_ns: u64 = field(7).parse().map_err(|_| "bad start_ns".to_string())?;
    let first_byte_ns = match field(8) {
        "" => None,
        v => Some(v.parse::<u64>().map_err(|_| "bad first_byte_ns".to_string())?),
    };
    let end_ns: u64 = field(9).parse().map_err(|_| "bad end_ns".to_string())?;
    if end_ns < start_ns {
        return Err("end precedes start".into());
    }
    let error = match field(10) {
        "" => None,
        v => Some(v.to_string()),
    };

    Ok(Operation {
        op_type,
        client_id: field(3).to_string(),
        endpoint: field(4).to_string(),
        thread_id,
        obj_count,
        size_bytes,
        start_ns,
        first_byte_ns,
        end_ns,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_field_strips_separators() {
        assert_eq!(clean_field("a,b\nc"), "a b c");
        let long = "x".repeat(1000);
        assert_eq!(clean_field(&long).len(), ERROR_STRING_CAP);
    }

    #[test]
    fn test_parse_record_rejects_reversed_times() {
        let rec = csv::StringRecord::from(vec![
            "0", "1", "PUT", "c1", "e1", "1", "100", "2000", "", "1000", "",
        ]);
        assert!(parse_record(&rec).is_err());
    }

    #[test]
    fn test_parse_record_optional_fields() {
        let rec = csv::StringRecord::from(vec![
            "0", "3", "GET", "c1", "http://e1", "1", "512", "1000", "1400", "2000", "",
        ]);
        let op = parse_record(&rec).unwrap();
        assert_eq!(op.thread_id, 3);
        assert_eq!(op.first_byte_ns, Some(1400));
        assert!(op.error.is_none());

        let rec = csv::StringRecord::from(vec![
            "1", "3", "GET", "c1", "http://e1", "1", "0", "1000", "", "2000", "timeout",
        ]);
        let op = parse_record(&rec).unwrap();
        assert_eq!(op.first_byte_ns, None);
        assert_eq!(op.error.as_deref(), Some("timeout"));
    }
}
