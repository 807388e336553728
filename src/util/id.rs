//! Snowflake-style batch id generation.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Bits reserved for the node id.
const NODE_BITS: u64 = 10;
/// Bits reserved for the per-millisecond sequence.
const SEQUENCE_BITS: u64 = 12;
/// Sequence values wrap within one millisecond.
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Generator of monotonic, process-unique 64-bit batch ids.
///
/// Ids pack a 41-bit millisecond timestamp, a 10-bit node id, and a 12-bit
/// sequence counter. Uniqueness only has to hold within a live log: once a
/// batch's finished marker is replayed, its id is consumed.
#[derive(Debug)]
pub struct BatchIdGenerator {
    node: u64,
    state: Mutex<GeneratorState>,
}

#[derive(Debug)]
struct GeneratorState {
    last_millis: u64,
    sequence: u64,
}

impl BatchIdGenerator {
    /// Create a generator for the given node id (low 10 bits are used).
    pub fn new(node: u64) -> Self {
        Self {
            node: node & ((1 << NODE_BITS) - 1),
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    /// Generate the next id. Never yields the same value twice and never
    /// moves backwards.
    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        let mut now = current_millis();

        if now < state.last_millis {
            // Clock went backwards; stay on the last observed timestamp.
            now = state.last_millis;
        }

        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond, move to the next.
                now += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = now;

        (now << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS) | state.sequence
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
