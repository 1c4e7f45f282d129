//! Retry backoff schedule.
//!
//! Fixed table indexed by retry count, capped at the last entry. The
//! queue drops an entry once `retry_count` reaches the configured
//! maximum, so the cap only matters when operators raise the retry limit
//! above the table length.

/// Delay before the next attempt, by retry count: 1s, 2s, 5s, 10s, 30s.
pub const BACKOFF_MS: [u64; 5] = [1_000, 2_000, 5_000, 10_000, 30_000];

/// Default maximum failed attempts before a message is dropped.
pub const MAX_RETRIES: u32 = 5;

/// Delay for the given (already incremented) retry count.
pub fn delay_ms(retry_count: u32) -> u64 {
    let index = (retry_count.saturating_sub(1) as usize).min(BACKOFF_MS.len() - 1);
    BACKOFF_MS[index]
}
