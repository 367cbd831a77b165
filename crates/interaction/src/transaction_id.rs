//! Transaction identifier generation.
//!
//! Ids are laid out as `timestamp:40 | random:8 | counter:16`. The timestamp
//! is milliseconds since 2010-01-01T00:00:00Z; the random byte keeps two
//! processes restarted in the same millisecond apart. All contexts of a
//! process draw from one shared generator, see [`next`].

use std::time::{SystemTime, UNIX_EPOCH};

use mal_transport::TransactionId;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

const EPOCH_MS: u64 = 1_262_304_000_000;
const COUNTER_BITS: u32 = 16;
const RANDOM_BITS: u32 = 8;
const TIMESTAMP_BITS: u32 = 64 - COUNTER_BITS - RANDOM_BITS;
const COUNTER_LIMIT: u64 = 1 << COUNTER_BITS;
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

/// Generates process-unique transaction ids.
#[derive(Debug)]
pub struct TransactionIdGenerator {
    state: Mutex<GeneratorState>,
}

#[derive(Debug)]
struct GeneratorState {
    timestamp: u64,
    high: u64,
    counter: u64,
}

impl GeneratorState {
    /// Recomputes the high bits. The timestamp part always moves forward so a
    /// high part is never handed out twice, even within one millisecond.
    fn reseed(&mut self) {
        let mut timestamp = current_millis().saturating_sub(EPOCH_MS) & TIMESTAMP_MASK;
        if timestamp <= self.timestamp {
            timestamp = (self.timestamp + 1) & TIMESTAMP_MASK;
        }
        let random = u64::from(rand::random::<u8>());

        self.timestamp = timestamp;
        self.high = (timestamp << (COUNTER_BITS + RANDOM_BITS)) | (random << COUNTER_BITS);
        self.counter = 0;
    }
}

impl TransactionIdGenerator {
    /// Creates a generator seeded from the current clock.
    pub fn new() -> Self {
        let mut state = GeneratorState {
            timestamp: 0,
            high: 0,
            counter: 0,
        };
        state.reseed();
        Self {
            state: Mutex::new(state),
        }
    }

    /// Returns the next id.
    pub fn next(&self) -> TransactionId {
        let mut state = self.state.lock();
        if state.counter == COUNTER_LIMIT {
            state.reseed();
        }
        let id = state.high | state.counter;
        state.counter += 1;
        TransactionId::from_raw(id)
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static GENERATOR: Lazy<TransactionIdGenerator> = Lazy::new(TransactionIdGenerator::new);

/// Returns the next process-unique transaction id.
pub fn next() -> TransactionId {
    GENERATOR.next()
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_distinct_across_counter_resets() {
        let generator = TransactionIdGenerator::new();
        let count = COUNTER_LIMIT as usize * 5 + 17;

        let ids: HashSet<_> = (0..count).map(|_| generator.next()).collect();

        assert_eq!(ids.len(), count);
    }

    #[test]
    fn test_ids_distinct_under_concurrency() {
        let generator = Arc::new(TransactionIdGenerator::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..30_000).map(|_| generator.next()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(ids.len(), 8 * 30_000);
    }

    #[test]
    fn test_shared_generator_is_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..20_000).map(|_| next()).collect::<Vec<_>>()))
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id), "duplicate id {id}");
            }
        }
    }

    #[test]
    fn test_timestamp_bits_roughly_track_clock() {
        let generator = TransactionIdGenerator::new();
        let id = generator.next().as_raw();
        let timestamp = id >> (COUNTER_BITS + RANDOM_BITS);
        let now = current_millis() - EPOCH_MS;

        assert!(timestamp <= now + 1);
        assert!(now.saturating_sub(timestamp) < 60_000);
    }
}
