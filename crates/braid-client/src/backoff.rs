use std::time::Duration;

/// Client gives up and reports `failed` after this many consecutive
/// connect attempts (spec §4.11).
pub const MAX_ATTEMPTS: u32 = 5;

const SCHEDULE_SECS: [u64; 5] = [1, 2, 4, 8, 10];

/// Delay before the 1-indexed `attempt`'th reconnect try, per spec §4.11's
/// literal schedule (1s, 2s, 4s, 8s, 10s cap). Unlike the teacher's
/// `ChannelManager::connect_with_backoff` (5s base, 300s cap, ±10% jitter
/// to avoid a `rand` dependency), the client contract here names exact
/// seconds, so the schedule is a fixed table and no jitter is applied.
pub fn delay_for(attempt: u32) -> Duration {
    let idx = (attempt.saturating_sub(1) as usize).min(SCHEDULE_SECS.len() - 1);
    Duration::from_secs(SCHEDULE_SECS[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_matches_spec() {
        assert_eq!(delay_for(1), Duration::from_secs(1));
        assert_eq!(delay_for(2), Duration::from_secs(2));
        assert_eq!(delay_for(3), Duration::from_secs(4));
        assert_eq!(delay_for(4), Duration::from_secs(8));
        assert_eq!(delay_for(5), Duration::from_secs(10));
        // stays capped beyond the schedule's length
        assert_eq!(delay_for(20), Duration::from_secs(10));
    }
}
