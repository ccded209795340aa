//! Snowflake ID Generator
//!
//! Twitter-style distributed unique ID generation for message ids:
//! 41-bit millisecond timestamp, 10-bit machine id, 12-bit per-millisecond
//! sequence. Generation is serialized under one lock so ids are unique and
//! strictly increasing per generator.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Custom epoch (2015-01-01T00:00:00.000Z)
const EPOCH: u64 = 1420070400000;

/// 12-bit sequence mask
const SEQUENCE_MASK: u64 = 0xFFF;

struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

/// Snowflake ID generator
pub struct SnowflakeGenerator {
    machine_id: u64,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    /// Create a new snowflake generator
    pub fn new(machine_id: u64) -> Self {
        Self {
            machine_id: machine_id & 0x3FF, // 10 bits
            state: Mutex::new(GeneratorState {
                last_timestamp: 0,
                sequence: 0,
            }),
        }
    }

    /// Generate a new snowflake ID
    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock();

        let mut timestamp = current_timestamp();
        if timestamp < state.last_timestamp {
            // Clock moved backwards; keep issuing from the last seen tick.
            timestamp = state.last_timestamp;
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; wait out the tick.
                while timestamp <= state.last_timestamp {
                    timestamp = current_timestamp();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        (((timestamp - EPOCH) << 22) | (self.machine_id << 12) | state.sequence) as i64
    }
}

/// Get current timestamp in milliseconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

/// Extract timestamp from snowflake ID
pub fn extract_timestamp(snowflake: i64) -> u64 {
    ((snowflake as u64) >> 22) + EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_generate_unique() {
        let generator = SnowflakeGenerator::new(1);
        let id1 = generator.generate();
        let id2 = generator.generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn ids_within_one_millisecond_are_strictly_increasing() {
        let generator = SnowflakeGenerator::new(1);
        // More ids than the 12-bit sequence holds, forcing at least one
        // rollover into the next millisecond.
        let mut prev = generator.generate();
        for _ in 0..5000 {
            let id = generator.generate();
            assert!(id > prev);
            prev = id;
        }
    }

    #[test]
    fn concurrent_generation_never_collides() {
        let generator = Arc::new(SnowflakeGenerator::new(1));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..2000).map(|_| generator.generate()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_extract_timestamp() {
        let generator = SnowflakeGenerator::new(1);
        let id = generator.generate();
        let ts = extract_timestamp(id);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(ts <= now);
        assert!(ts > now - 1000);
    }
}
