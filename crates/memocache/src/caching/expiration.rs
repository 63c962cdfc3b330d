use std::time::{Duration, SystemTime};

/// Decides whether an entry last written at `mtime` has outlived `ttl` at time `now`.
///
/// An `mtime` in the future (clock skew) counts as just written.
pub fn is_expired(mtime: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    now.duration_since(mtime).unwrap_or_default() >= ttl
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_fresh_and_expired() {
        let now = SystemTime::now();

        assert!(!is_expired(now, TTL, now));
        assert!(!is_expired(now - Duration::from_secs(59), TTL, now));
        // the boundary itself is already expired
        assert!(is_expired(now - TTL, TTL, now));
        assert!(is_expired(now - Duration::from_secs(3600), TTL, now));
    }

    #[test]
    fn test_mtime_in_the_future() {
        let now = SystemTime::now();
        let mtime = now + Duration::from_secs(3600);

        assert!(!is_expired(mtime, TTL, now));
    }
}
