// ── Shared reconnect backoff ──
//
// `delay = min(min_delay * factor^attempt, max_delay) * jitter`. Jitter
// is deterministic (seeded from the attempt number, not RNG) so the
// same attempt count always produces the same delay -- convenient for
// tests and avoids pulling in a random crate for a cosmetic feature.
// Grounded on the teacher's websocket reconnect loop.

use std::time::Duration;

use fleet_config::ReconnectBackoff;

pub fn calculate_backoff(attempt: u32, config: &ReconnectBackoff) -> Duration {
    let base = config.min.as_secs_f64() * config.factor.powi(attempt as i32);
    let capped = base.min(config.max.as_secs_f64());
    let jitter_factor = 1.0 + 0.25 * ((attempt as f64 * 7.3).sin());
    let with_jitter = (capped * jitter_factor).max(0.0);
    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_increases_with_attempt() {
        let cfg = ReconnectBackoff::default();
        let d0 = calculate_backoff(0, &cfg);
        let d1 = calculate_backoff(1, &cfg);
        let d2 = calculate_backoff(2, &cfg);
        assert!(d1 > d0);
        assert!(d2 > d1);
    }

    #[test]
    fn backoff_caps_at_max() {
        let cfg = ReconnectBackoff::default();
        let d = calculate_backoff(20, &cfg);
        assert!(d <= cfg.max + cfg.max / 4);
    }
}
