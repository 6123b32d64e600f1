//! Clock helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock as unix milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_is_monotonic_enough() {
        let a = unix_millis();
        let b = unix_millis();
        assert!(b >= a);
        // sanity: after 2020-01-01
        assert!(a > 1_577_836_800_000);
    }
}
