//! Wall-clock timestamp helper shared across crates that record `lastUpdated`
//! style fields (no `chrono`/`time` dependency in this workspace).

use crate::{ErrorClass, ErrorCode, ErrorEnvelope, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> Result<u64> {
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("clock error: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    u64::try_from(duration.as_millis()).map_err(|_| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            "timestamp overflow",
            ErrorClass::NonRetriable,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_epoch_ms_is_positive_and_monotonic_enough() -> Result<()> {
        let first = now_epoch_ms()?;
        let second = now_epoch_ms()?;
        assert!(second >= first);
        Ok(())
    }
}
