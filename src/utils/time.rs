use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall clock time in microseconds since the Unix
/// epoch. This is the timestamp attached to received messages and logged
/// events.
pub fn timestamp_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64 * 1_000_000 + i64::from(elapsed.subsec_micros()),
        // A clock before 1970 is not worth more than a zero.
        Err(_) => 0,
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn timestamps_advance() {
        use std::thread;
        use std::time::Duration;

        let a = super::timestamp_now();
        thread::sleep(Duration::from_millis(2));
        let b = super::timestamp_now();

        assert!(a > 1_500_000_000_000_000);
        assert!(b > a);
    }
}
