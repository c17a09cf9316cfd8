use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch: 2025-01-01T00:00:00Z in milliseconds since Unix epoch.
const COURIER_EPOCH_MS: u64 = 1_735_689_600_000;

/// Bit layout (MSB → LSB): 42-bit timestamp, 10-bit worker, 12-bit sequence.
const WORKER_BITS: u64 = 10;
const SEQ_BITS: u64 = 12;
const SEQ_MAX: u64 = (1 << SEQ_BITS) - 1;

/// Generator of 64-bit snowflake message identifiers.
///
/// IDs from one generator are strictly increasing, which is what gives a chat
/// its total send order: messages persisted later always carry larger IDs.
/// The worker bits keep IDs distinct across processes; the sequence bits
/// break ties within a single millisecond.
pub struct SnowflakeGenerator {
    worker_id: u64,
    clock: Mutex<Clock>,
}

struct Clock {
    last_ms: u64,
    seq: u64,
}

impl SnowflakeGenerator {
    pub fn new(worker_id: u16) -> Self {
        assert!(
            (worker_id as u64) < (1 << WORKER_BITS),
            "worker_id must fit in {WORKER_BITS} bits"
        );
        Self {
            worker_id: worker_id as u64,
            clock: Mutex::new(Clock { last_ms: 0, seq: 0 }),
        }
    }

    pub fn generate(&self) -> i64 {
        let mut clock = self.clock.lock().unwrap();

        // If the wall clock stepped backwards, hold the line at last_ms and
        // burn sequence numbers until real time catches up.
        let mut now_ms = current_ms().max(clock.last_ms);

        if now_ms == clock.last_ms {
            clock.seq = (clock.seq + 1) & SEQ_MAX;
            if clock.seq == 0 {
                // 4096 IDs in one millisecond — spin until the next tick.
                while now_ms <= clock.last_ms {
                    now_ms = current_ms();
                }
            }
        } else {
            clock.seq = 0;
        }
        clock.last_ms = now_ms;

        let ts = now_ms - COURIER_EPOCH_MS;
        ((ts << (WORKER_BITS + SEQ_BITS)) | (self.worker_id << SEQ_BITS) | clock.seq) as i64
    }
}

fn current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before Unix epoch")
        .as_millis() as u64
}

/// Extract the creation timestamp (ms since Unix epoch) from a snowflake ID.
pub fn snowflake_timestamp_ms(id: i64) -> u64 {
    ((id as u64) >> (WORKER_BITS + SEQ_BITS)) + COURIER_EPOCH_MS
}
