#![forbid(unsafe_code)]

const DEFAULT_LOCK_TTL_MS: i64 = 30_000;
const DEFAULT_LOCK_WAIT_MS: u64 = 5_000;
const DEFAULT_LOCK_POLL_MS: u64 = 25;

/// Tuning for the inbound processor's lock handling.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// TTL applied to every root lock the processor takes.
    pub lock_ttl_ms: i64,
    /// How long to wait for a contended root lock before failing with
    /// `LockTimeout`.
    pub lock_wait_ms: u64,
    /// Interval between acquisition attempts while waiting.
    pub lock_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
            lock_poll_ms: DEFAULT_LOCK_POLL_MS,
        }
    }
}
