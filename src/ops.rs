use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one recorded operation attempt within a run.
///
/// Ordering follows `seq`, so ids sort in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId {
    pub seq: u64,
    pub nonce: Uuid,
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.nonce.simple().to_string();
        write!(f, "op-{:06}-{}", self.seq, &short[..8])
    }
}

/// Randomness behind id nonces and run ids, swappable in tests.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);

    /// Version-4 UUID drawn from this source.
    fn uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::thread_rng().fill_bytes(dest);
    }
}

/// Deterministic source: the same seed yields the same sequence.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        SeededRandom {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fill_bytes(dest);
    }
}

/// Hands out strictly increasing, unique operation ids.
pub struct OperationIdGenerator {
    next: AtomicU64,
    random: Arc<dyn RandomSource>,
}

impl fmt::Debug for OperationIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationIdGenerator")
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl Default for OperationIdGenerator {
    fn default() -> Self {
        Self::with_random(Arc::new(SystemRandom))
    }
}

impl OperationIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_random(random: Arc<dyn RandomSource>) -> Self {
        OperationIdGenerator {
            next: AtomicU64::new(0),
            random,
        }
    }

    pub fn next_id(&self) -> OperationId {
        let seq = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        OperationId {
            seq,
            nonce: self.random.uuid(),
        }
    }
}

/// Time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            current: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let step = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::zero());
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard += step;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) fn elapsed_between(start: DateTime<Utc>, end: DateTime<Utc>) -> std::time::Duration {
    end.signed_duration_since(start)
        .to_std()
        .unwrap_or_default()
}
