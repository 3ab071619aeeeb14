mod api_limiter;
mod login_limiter;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use api_limiter::{ApiRateLimiter, RateLimitDecision};
pub use login_limiter::{LoginGate, LoginRateLimiter};

/// Start of the fixed window containing `now`: `floor(now / window) * window`.
/// Shared by the API limiter and the alert metric counters.
pub fn fixed_window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_secs = window.as_secs() as i64;
    if window_secs == 0 {
        return now;
    }
    let start = (now.timestamp() / window_secs) * window_secs;
    DateTime::from_timestamp(start, 0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_window_start_floors_to_boundary() {
        let now = DateTime::from_timestamp(1_000_037, 500).unwrap();
        let start = fixed_window_start(now, Duration::from_secs(60));
        assert_eq!(start.timestamp(), 999_960);
        assert_eq!(start.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_fixed_window_start_on_boundary() {
        let now = DateTime::from_timestamp(1_200, 0).unwrap();
        let start = fixed_window_start(now, Duration::from_secs(60));
        assert_eq!(start.timestamp(), 1_200);
    }

    #[test]
    fn test_adjacent_windows_differ() {
        let w = Duration::from_secs(60);
        let a = fixed_window_start(DateTime::from_timestamp(119, 0).unwrap(), w);
        let b = fixed_window_start(DateTime::from_timestamp(120, 0).unwrap(), w);
        assert_ne!(a, b);
    }
}
