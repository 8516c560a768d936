//! Wall clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch with sub-second precision, as carried by `ping`
pub fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Whether two wire timestamps denote the same probe
pub fn same_timestamp(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_secs_f64() > 1_577_836_800.0);
    }

    #[test]
    fn test_same_timestamp() {
        let t = now_secs_f64();
        assert!(same_timestamp(t, t));
        assert!(!same_timestamp(t, t + 0.5));
    }
}
