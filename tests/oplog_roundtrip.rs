// tests/oplog_roundtrip.rs

// Persistence round-trips and crash tolerance of benchmark data files.

use std::fs::File;
use std::io::{Read, Write};

use anyhow::Result;
use tempfile::TempDir;

use storbench::constants::{LOG_MAGIC, LOG_VERSION, OPLOG_HEADER};
use storbench::error::BenchError;
use storbench::oplog::{load_log, save_log, OpLogWriter};
use storbench::ops::{OpType, Operation, OperationLog};

fn sample_op(idx: u64) -> Operation {
    Operation {
        op_type: if idx % 2 == 0 { OpType::Put } else { OpType::Get },
        client_id: "client-1".into(),
        endpoint: format!("10.0.0.{}:9000", idx % 3 + 1),
        thread_id: (idx % 4) as u16,
        obj_count: 1,
        size_bytes: 1024 + idx,
        start_ns: 1_700_000_000_000_000_000 + idx * 1_000_000,
        first_byte_ns: (idx % 2 == 1).then(|| 1_700_000_000_000_000_000 + idx * 1_000_000 + 200),
        end_ns: 1_700_000_000_000_000_000 + idx * 1_000_000 + 900_000,
        error: (idx % 7 == 3).then(|| "simulated failure".to_string()),
    }
}

fn sample_log(n: u64) -> OperationLog {
    OperationLog::with_ops((0..n).map(sample_op).collect())
}

/// Write a raw benchmark data file with an arbitrary CSV body.
fn write_raw(path: &std::path::Path, body: &str) {
    let mut file = File::create(path).unwrap();
    file.write_all(LOG_MAGIC).unwrap();
    file.write_all(&[LOG_VERSION]).unwrap();
    let compressed = zstd::stream::encode_all(body.as_bytes(), 3).unwrap();
    file.write_all(&compressed).unwrap();
}

#[test]
fn test_round_trip_preserves_every_field() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("run.data");

    let log = sample_log(50);
    let mut writer = OpLogWriter::create(&path)?;
    for op in log.iter() {
        writer.append(op)?;
    }
    writer.flush()?;
    drop(writer);

    let loaded = load_log(&path)?;
    assert_eq!(loaded.len(), log.len());
    for (a, b) in loaded.iter().zip(log.iter()) {
        assert_eq!(a, b);
    }
    Ok(())
}

#[test]
fn test_reload_yields_identical_csv_body() -> Result<()> {
    // Persist, reload, persist again: the CSV bodies must match byte for
    // byte (compression framing aside).
    let dir = TempDir::new()?;
    let first = dir.path().join("first.data");
    let second = dir.path().join("second.data");

    save_log(&first, &sample_log(30))?;
    let loaded = load_log(&first)?;
    save_log(&second, &loaded)?;

    let body = |path: &std::path::Path| -> Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let mut header = [0u8; 9];
        file.read_exact(&mut header)?;
        let mut out = Vec::new();
        zstd::stream::read::Decoder::new(file)?.read_to_end(&mut out)?;
        Ok(out)
    };
    assert_eq!(body(&first)?, body(&second)?);
    Ok(())
}

#[test]
fn test_truncated_final_record_is_dropped() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("crash.data");

    let good = "0,0,PUT,c1,e1,1,100,1000,,2000,\n1,1,PUT,c1,e1,1,100,1500,,2500,\n";
    let truncated = "2,0,PUT,c1,e1,1,10"; // cut mid-record
    write_raw(&path, &format!("{}\n{}{}", OPLOG_HEADER, good, truncated));

    let log = load_log(&path)?;
    assert_eq!(log.len(), 2);
    assert_eq!(log.ops[1].start_ns, 1500);
    Ok(())
}

#[test]
fn test_malformed_middle_record_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corrupt.data");

    let body = format!(
        "{}\n0,0,PUT,c1,e1,1,100,1000,,2000,\n1,0,PUT,c1,e1,not-a-number\n2,0,PUT,c1,e1,1,100,3000,,4000,\n",
        OPLOG_HEADER
    );
    write_raw(&path, &body);

    let err = load_log(&path).expect_err("corruption must be fatal");
    match err.downcast_ref::<BenchError>() {
        Some(BenchError::LogCorrupted { record, .. }) => assert_eq!(*record, 2),
        other => panic!("expected LogCorrupted, got {:?}", other),
    }
}

#[test]
fn test_bad_magic_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.data");
    let mut file = File::create(&path).unwrap();
    file.write_all(b"NOTMAGIC!").unwrap();
    file.write_all(&zstd::stream::encode_all(OPLOG_HEADER.as_bytes(), 3).unwrap())
        .unwrap();
    drop(file);

    let err = load_log(&path).expect_err("bad magic must fail");
    assert!(matches!(
        err.downcast_ref::<BenchError>(),
        Some(BenchError::LogCorrupted { .. })
    ));
}

#[test]
fn test_unsupported_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("future.data");
    let mut file = File::create(&path).unwrap();
    file.write_all(LOG_MAGIC).unwrap();
    file.write_all(&[99]).unwrap();
    drop(file);

    assert!(load_log(&path).is_err());
}

#[test]
fn test_error_strings_survive_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("errors.data");

    let mut op = sample_op(0);
    op.error = Some("connection reset by peer".to_string());
    save_log(&path, &OperationLog::with_ops(vec![op]))?;

    let loaded = load_log(&path)?;
    assert_eq!(
        loaded.ops[0].error.as_deref(),
        Some("connection reset by peer")
    );
    Ok(())
}
