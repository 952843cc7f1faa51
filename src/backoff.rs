use std::time::Duration;

/// Maximum number of failed attempts before a job becomes `FAILED`
/// permanently.
pub const MAX_ATTEMPTS: i32 = 10;

/// Cap on the retry delay.
const BACKOFF_CAP_SECONDS: u64 = 300;

/// Delay before the next attempt after `attempts` failures.
///
/// `min(300, 2^attempts)` seconds: 2s, 4s, 8s, ... 256s, then capped at
/// five minutes from the ninth failure on.
pub fn backoff(attempts: u32) -> Duration {
    let delay = 2u64
        .checked_pow(attempts)
        .unwrap_or(u64::MAX)
        .min(BACKOFF_CAP_SECONDS);
    Duration::from_secs(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(4), Duration::from_secs(16));
        assert_eq!(backoff(5), Duration::from_secs(32));
        assert_eq!(backoff(8), Duration::from_secs(256));
    }

    #[test]
    fn caps_at_five_minutes() {
        assert_eq!(backoff(9), Duration::from_secs(300));
        assert_eq!(backoff(10), Duration::from_secs(300));
        assert_eq!(backoff(64), Duration::from_secs(300));
    }

    #[test]
    fn is_monotone_up_to_the_attempt_limit() {
        let mut previous = Duration::ZERO;
        for attempts in 1..=(MAX_ATTEMPTS as u32) {
            let delay = backoff(attempts);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(BACKOFF_CAP_SECONDS));
            previous = delay;
        }
    }
}
