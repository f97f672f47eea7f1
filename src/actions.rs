//! Per-operation drivers with timing hooks.
//!
//! Each driver issues exactly one S3 request against one endpoint and
//! returns a fully-populated `Operation`: `start` immediately before the
//! network call, `end` after the final body byte (GET) or request
//! completion, `first_byte` at the first response chunk on GET. Errors are
//! recorded inside the operation; a request-level timeout is recorded with
//! `end = start + timeout`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};
use tokio::time::timeout;

use crate::constants::ERROR_STRING_CAP;
use crate::ops::{OpType, Operation, RunClock};

/// Per-worker context shared by every action invocation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub client_id: String,
    pub thread_id: u16,
    pub timeout: Duration,
    pub clock: Arc<RunClock>,
}

impl ActionContext {
    fn op(&self, op_type: OpType, endpoint: &str, start_ns: u64) -> Operation {
        Operation {
            op_type,
            client_id: self.client_id.clone(),
            endpoint: endpoint.to_string(),
            thread_id: self.thread_id,
            obj_count: 1,
            size_bytes: 0,
            start_ns,
            first_byte_ns: None,
            end_ns: start_ns,
            error: None,
        }
    }

    fn timeout_ns(&self) -> u64 {
        self.timeout.as_nanos() as u64
    }

    /// Stamp completion, keeping `end - start > 0` even when the store
    /// answers within clock resolution.
    fn finish(&self, op: &mut Operation) {
        op.end_ns = self.clock.now_ns().max(op.start_ns + 1);
    }
}

fn bounded_error(e: impl ToString) -> Option<String> {
    let mut s = e.to_string();
    if s.len() > ERROR_STRING_CAP {
        let mut cut = ERROR_STRING_CAP;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    Some(s)
}

/// Upload one object.
pub async fn put_object(
    store: &dyn ObjectStore,
    endpoint: &str,
    ctx: &ActionContext,
    key: &str,
    payload: Bytes,
) -> Operation {
    let path = StorePath::from(key);
    let size = payload.len() as u64;

    let start_ns = ctx.clock.now_ns();
    let mut op = ctx.op(OpType::Put, endpoint, start_ns);

    match timeout(ctx.timeout, store.put(&path, PutPayload::from(payload))).await {
        Ok(Ok(_)) => {
            ctx.finish(&mut op);
            op.size_bytes = size;
        }
        Ok(Err(e)) => {
            ctx.finish(&mut op);
            op.error = bounded_error(e);
        }
        Err(_) => {
            op.end_ns = start_ns + ctx.timeout_ns();
            op.error = bounded_error("request timeout");
        }
    }
    op
}

/// Download one object, consuming the full body and stamping time to first
/// byte. `size_bytes` reflects bytes actually received, also on failure.
pub async fn get_object(
    store: &dyn ObjectStore,
    endpoint: &str,
    ctx: &ActionContext,
    key: &str,
) -> Operation {
    let path = StorePath::from(key);

    let start_ns = ctx.clock.now_ns();
    let mut op = ctx.op(OpType::Get, endpoint, start_ns);

    let body = async {
        let mut first_byte = None;
        let mut received = 0u64;
        let mut error = None;

        match store.get(&path).await {
            Ok(result) => {
                let mut stream = result.into_stream();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => {
                            if first_byte.is_none() {
                                first_byte = Some(ctx.clock.now_ns());
                            }
                            received += chunk.len() as u64;
                        }
                        Err(e) => {
                            error = bounded_error(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => error = bounded_error(e),
        }
        (first_byte, received, error)
    };

    match timeout(ctx.timeout, body).await {
        Ok((first_byte, received, error)) => {
            ctx.finish(&mut op);
            op.first_byte_ns = first_byte;
            op.size_bytes = received;
            op.error = error;
        }
        Err(_) => {
            op.end_ns = start_ns + ctx.timeout_ns();
            op.error = bounded_error("request timeout");
        }
    }
    op
}

/// Delete a batch of objects as one logical operation.
pub async fn delete_objects(
    store: &dyn ObjectStore,
    endpoint: &str,
    ctx: &ActionContext,
    keys: &[String],
) -> Operation {
    let start_ns = ctx.clock.now_ns();
    let mut op = ctx.op(OpType::Delete, endpoint, start_ns);
    op.obj_count = keys.len() as u32;

    let body = async {
        let locations = futures::stream::iter(
            keys.iter()
                .map(|k| Ok(StorePath::from(k.as_str()))),
        )
        .boxed();
        let mut results = store.delete_stream(locations);
        let mut error = None;
        while let Some(res) = results.next().await {
            if let Err(e) = res {
                if error.is_none() {
                    error = bounded_error(e);
                }
            }
        }
        error
    };

    match timeout(ctx.timeout, body).await {
        Ok(error) => {
            ctx.finish(&mut op);
            op.error = error;
        }
        Err(_) => {
            op.end_ns = start_ns + ctx.timeout_ns();
            op.error = bounded_error("request timeout");
        }
    }
    op
}

/// List objects under a prefix; `obj_count` is the number of entries seen.
pub async fn list_objects(
    store: &dyn ObjectStore,
    endpoint: &str,
    ctx: &ActionContext,
    prefix: Option<&str>,
) -> Operation {
    let prefix_path = prefix.map(StorePath::from);

    let start_ns = ctx.clock.now_ns();
    let mut op = ctx.op(OpType::List, endpoint, start_ns);

    let body = async {
        let mut stream = store.list(prefix_path.as_ref());
        let mut listed = 0u32;
        let mut error = None;
        while let Some(res) = stream.next().await {
            match res {
                Ok(_) => listed += 1,
                Err(e) => {
                    error = bounded_error(e);
                    break;
                }
            }
        }
        (listed, error)
    };

    match timeout(ctx.timeout, body).await {
        Ok((listed, error)) => {
            ctx.finish(&mut op);
            op.obj_count = listed;
            op.error = error;
        }
        Err(_) => {
            op.end_ns = start_ns + ctx.timeout_ns();
            op.obj_count = 0;
            op.error = bounded_error("request timeout");
        }
    }
    op
}

/// Metadata probe for one object. No payload is transferred.
pub async fn stat_object(
    store: &dyn ObjectStore,
    endpoint: &str,
    ctx: &ActionContext,
    key: &str,
) -> Operation {
    let path = StorePath::from(key);

    let start_ns = ctx.clock.now_ns();
    let mut op = ctx.op(OpType::Stat, endpoint, start_ns);

    match timeout(ctx.timeout, store.head(&path)).await {
        Ok(Ok(_meta)) => {
            ctx.finish(&mut op);
        }
        Ok(Err(e)) => {
            ctx.finish(&mut op);
            op.error = bounded_error(e);
        }
        Err(_) => {
            op.end_ns = start_ns + ctx.timeout_ns();
            op.error = bounded_error("request timeout");
        }
    }
    op
}
