//! Deterministic payload generation.
//!
//! PUT bodies come from a pseudo-random source seeded once per run; each
//! worker derives its own stream from the run seed and its thread id, so
//! payloads are reproducible without any shared mutable state. Content is
//! not required to be unique per object.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Derive a worker-local RNG from the run seed and thread id.
pub fn worker_rng(run_seed: u64, thread_id: u16) -> StdRng {
    StdRng::seed_from_u64(run_seed ^ ((thread_id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)))
}

/// Pre-generated PUT payload for one worker. Cloning the payload is a
/// cheap refcount bump, so the same body is reused for every upload.
#[derive(Debug, Clone)]
pub struct PayloadSource {
    data: Bytes,
}

impl PayloadSource {
    pub fn new(run_seed: u64, thread_id: u16, size: u64) -> Self {
        let mut rng = worker_rng(run_seed, thread_id);
        let mut buf = vec![0u8; size as usize];
        rng.fill_bytes(&mut buf);
        PayloadSource { data: Bytes::from(buf) }
    }

    pub fn payload(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Fresh process-wide run seed.
pub fn random_run_seed() -> u64 {
    rand::rng().random()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payloads_deterministic_per_seed_and_thread() {
        let a = PayloadSource::new(42, 0, 1024);
        let b = PayloadSource::new(42, 0, 1024);
        let c = PayloadSource::new(42, 1, 1024);
        let d = PayloadSource::new(43, 0, 1024);

        assert_eq!(a.payload(), b.payload());
        assert_ne!(a.payload(), c.payload());
        assert_ne!(a.payload(), d.payload());
    }

    #[test]
    fn test_payload_size() {
        let src = PayloadSource::new(1, 0, 4096);
        assert_eq!(src.len(), 4096);
        assert_eq!(src.payload().len(), 4096);
    }
}
