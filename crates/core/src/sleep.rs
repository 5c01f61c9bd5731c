use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};

/// Apply +/-30% random jitter to a back-off of `secs` seconds.
pub fn jittered(secs: f64) -> Duration {
    let jitter = secs * 0.3;
    let actual = secs + rand::thread_rng().gen_range(-jitter..jitter);
    Duration::from_secs_f64(actual.max(0.01))
}

/// Sleep up to `total`, waking every 100ms to check `should_stop`.
/// Returns true when the sleep was cut short.
pub fn sleep_unless(total: Duration, should_stop: &dyn Fn() -> bool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if should_stop() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}
