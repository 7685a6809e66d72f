use std::time::Duration;

/// Exponential reconnect backoff, doubling from a 2s floor to a 60s cap.
/// Reset after a connection survives long enough to be considered healthy.
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        let floor = Duration::from_secs(2);
        Self { floor, cap: Duration::from_secs(60), current: floor }
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    /// Returns the delay to wait before the next attempt, then doubles it
    /// (capped) for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap() {
        let mut b = Backoff::new();
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        assert_eq!(b.next_delay(), Duration::from_secs(8));
    }

    #[test]
    fn caps_at_sixty_seconds() {
        let mut b = Backoff::new();
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut b = Backoff::new();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(2));
    }
}
