use super::*;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[test]
fn base_delay_doubles_and_caps() {
    let mut backoff = Backoff::new(BackoffPolicy::default());
    let delays: Vec<_> = (0..6).map(|_| backoff.next_base()).collect();
    assert_eq!(delays, vec![secs(1), secs(2), secs(4), secs(5), secs(5), secs(5)]);
    assert_eq!(backoff.attempts(), 6);
}

#[test]
fn reset_restarts_schedule() {
    let mut backoff = Backoff::new(BackoffPolicy::default());
    backoff.next_base();
    backoff.next_base();
    backoff.reset();
    assert_eq!(backoff.attempts(), 0);
    assert_eq!(backoff.next_base(), secs(1));
}

#[test]
fn jitter_bounds_follow_randomization_factor() {
    let mut low = Backoff::new(BackoffPolicy::default());
    assert_eq!(low.next_delay_with(-1.0), Duration::from_millis(500));

    let mut high = Backoff::new(BackoffPolicy::default());
    assert_eq!(high.next_delay_with(1.0), Duration::from_millis(1500));

    let mut mid = Backoff::new(BackoffPolicy::default());
    assert_eq!(mid.next_delay_with(0.0), secs(1));
}

#[test]
fn jittered_delay_never_exceeds_cap() {
    let mut backoff = Backoff::new(BackoffPolicy::default());
    for _ in 0..4 {
        backoff.next_base();
    }
    assert_eq!(backoff.next_delay_with(1.0), secs(5));
}

#[test]
fn random_delay_stays_within_band() {
    let mut backoff = Backoff::new(BackoffPolicy::default());
    for _ in 0..50 {
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(500), "{delay:?}");
        assert!(delay <= Duration::from_millis(1500), "{delay:?}");
    }
}

#[test]
fn policy_is_sanitized() {
    let mut backoff = Backoff::new(BackoffPolicy { initial: secs(3), max: secs(1), jitter: f64::NAN });
    assert_eq!(backoff.next_delay_with(1.0), secs(3));
    assert_eq!(backoff.next_delay_with(1.0), secs(3));
}
