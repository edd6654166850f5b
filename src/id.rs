//! In-process generation of chapter and content IDs
//!
//! IDs are 63-bit snowflake-style values: milliseconds since a fixed epoch,
//! a worker number, and a per-millisecond sequence. They are unique within
//! one process and roughly ordered by creation time.

use chrono::Utc;
use std::sync::{Mutex, PoisonError};

/// 2020-01-01T00:00:00Z in Unix milliseconds
const EPOCH_MS: i64 = 1_577_836_800_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_WORKER: u16 = (1 << WORKER_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
struct State {
    last_ms: i64,
    sequence: i64,
}

/// Snowflake-style ID generator shared by all workers
#[derive(Debug)]
pub struct IdGenerator {
    worker: i64,
    state: Mutex<State>,
}

impl IdGenerator {
    /// Creates a generator; worker numbers above 1023 are masked
    pub fn new(worker: u16) -> Self {
        Self {
            worker: i64::from(worker & MAX_WORKER),
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    /// Returns the next unique ID
    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis() - EPOCH_MS;
        // The state is two integers; a panic elsewhere cannot leave it torn.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now > state.last_ms {
            state.last_ms = now;
            state.sequence = 0;
        } else {
            // Same millisecond or clock moved back: keep counting from the
            // last timestamp, borrowing the next millisecond on overflow.
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                state.last_ms += 1;
            }
        }

        (state.last_ms << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker << SEQUENCE_BITS)
            | state.sequence
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}
