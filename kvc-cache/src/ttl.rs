//! TTL conversion to the store's millisecond expiry.

use std::time::Duration;

/// Converts a TTL to whole milliseconds, truncating any fraction.
///
/// Zero means "no expiry" and yields `None`. A nonzero TTL shorter than one
/// millisecond becomes 1ms, since the store treats 0 as an invalid expiry.
pub fn ttl_to_millis(ttl: Duration) -> Option<u64> {
    if ttl.is_zero() {
        return None;
    }
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    Some(millis.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_no_expiry() {
        assert_eq!(ttl_to_millis(Duration::ZERO), None);
    }

    #[test]
    fn fractional_seconds_truncate() {
        assert_eq!(ttl_to_millis(Duration::from_secs_f64(1.5)), Some(1500));
        assert_eq!(ttl_to_millis(Duration::from_micros(2_999_999)), Some(2999));
        assert_eq!(ttl_to_millis(Duration::from_secs(5)), Some(5000));
    }

    #[test]
    fn sub_millisecond_clamps_to_one() {
        assert_eq!(ttl_to_millis(Duration::from_nanos(1)), Some(1));
    }

    #[test]
    fn huge_values_saturate() {
        assert_eq!(ttl_to_millis(Duration::MAX), Some(u64::MAX));
    }
}
