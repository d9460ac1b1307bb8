//! Cluster-unique 64-bit id generator.
//!
//! Snowflake-shaped layout: 41 bits of milliseconds since a fixed epoch,
//! 10 bits of node id, 12 bits of per-millisecond sequence. A fixed
//! per-process node number plus the time-sequenced low bits keeps ids
//! unique across restarts and concurrent callers.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// 2024-01-01T00:00:00Z in unix milliseconds.
const EPOCH_MS: i64 = 1_704_067_200_000;

const NODE_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
const MAX_NODE: i64 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
struct GeneratorState {
    last_ms: i64,
    sequence: i64,
}

#[derive(Debug)]
pub struct IdGenerator {
    node: i64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Create a generator for the given node id (0..=1023).
    pub fn new(node: i64) -> anyhow::Result<Self> {
        if !(0..=MAX_NODE).contains(&node) {
            anyhow::bail!("id generator node must be in 0..={MAX_NODE}, got {node}");
        }
        Ok(Self {
            node,
            state: Mutex::new(GeneratorState {
                last_ms: 0,
                sequence: 0,
            }),
        })
    }

    /// Generate the next id. Blocks (spins) for at most one millisecond when
    /// the per-millisecond sequence overflows.
    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().expect("id generator lock poisoned");
        let mut now = current_ms();

        // A clock rolled backwards reuses the last observed millisecond; the
        // sequence still guarantees uniqueness within it.
        if now < state.last_ms {
            now = state.last_ms;
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    now = current_ms();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        ((now - EPOCH_MS) << (NODE_BITS + SEQUENCE_BITS))
            | (self.node << SEQUENCE_BITS)
            | state.sequence
    }
}

fn current_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn rejects_out_of_range_nodes() {
        assert!(IdGenerator::new(-1).is_err());
        assert!(IdGenerator::new(1024).is_err());
        assert!(IdGenerator::new(0).is_ok());
        assert!(IdGenerator::new(1023).is_ok());
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let generator = IdGenerator::new(1).unwrap();
        let mut previous = 0;
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!(id > previous);
            assert!(seen.insert(id));
            previous = id;
        }
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let generator = Arc::new(IdGenerator::new(2).unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let generator = Arc::clone(&generator);
            handles.push(std::thread::spawn(move || {
                (0..2_000).map(|_| generator.next_id()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id generated: {id}");
            }
        }
    }

    #[test]
    fn node_bits_are_embedded() {
        let generator = IdGenerator::new(37).unwrap();
        let id = generator.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE, 37);
    }
}
