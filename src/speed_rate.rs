//! Throughput watchdog for a single transfer direction.
//!
//! The counter has no clock of its own: the caller samples it on every I/O
//! with the current time (in seconds) and the number of bytes just moved.

/// Reported by [`SpeedRateCounter::advance`] once a transfer has been too slow
/// for too long.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedOverflow {
    /// Average speed in bytes per second at the time of detection.
    pub speed: f64,
    /// Seconds spent below the floor.
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct SpeedRateCounter {
    initial_time: Option<f64>,
    current_time: f64,
    total_bytes: u64,
    min_speed: f64,
    max_duration: f64,
    slow_start_time: Option<f64>,
}

impl SpeedRateCounter {
    /// `min_speed` in bytes per second, `max_duration` in seconds.
    pub fn new(min_speed: f64, max_duration: f64) -> Self {
        Self {
            initial_time: None,
            current_time: 0.0,
            total_bytes: 0,
            min_speed,
            max_duration,
            slow_start_time: None,
        }
    }

    /// Records `bytes` moved at `time`. The first call only anchors the
    /// measurement window.
    pub fn advance(&mut self, time: f64, bytes: u64) -> Result<(), SpeedOverflow> {
        let Some(initial_time) = self.initial_time else {
            self.initial_time = Some(time);
            self.current_time = time;
            return Ok(());
        };

        let previous_time = self.current_time;
        self.current_time = time.max(previous_time);
        self.total_bytes += bytes;

        if self.current_time - initial_time < 1.0 {
            return Ok(());
        }

        if self.current_speed() >= self.min_speed {
            self.slow_start_time = None;
            return Ok(());
        }

        let slow_start = *self.slow_start_time.get_or_insert(previous_time);
        let duration = self.current_time - slow_start;
        if duration > self.max_duration {
            tracing::debug!(
                speed = self.current_speed(),
                duration,
                min_speed = self.min_speed,
                "transfer below speed floor for too long"
            );
            return Err(SpeedOverflow {
                speed: self.current_speed(),
                duration,
            });
        }
        Ok(())
    }

    /// Average bytes per second since the first sample; zero until at least
    /// one second has passed.
    pub fn current_speed(&self) -> f64 {
        match self.initial_time {
            Some(initial) if self.current_time - initial >= 1.0 => {
                self.total_bytes as f64 / (self.current_time - initial)
            }
            _ => 0.0,
        }
    }

    /// Seconds the transfer has currently been below the floor.
    pub fn current_duration(&self) -> f64 {
        self.slow_start_time
            .map_or(0.0, |start| (self.current_time - start).max(0.0))
    }

    pub fn is_started(&self) -> bool {
        self.initial_time.is_some()
    }

    pub fn min_speed(&self) -> f64 {
        self.min_speed
    }

    pub fn max_duration(&self) -> f64 {
        self.max_duration
    }

    pub fn reset(&mut self) {
        self.initial_time = None;
        self.current_time = 0.0;
        self.total_bytes = 0;
        self.slow_start_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_SPEED: f64 = 100.0;
    const MAX_DURATION: f64 = 5.0;

    #[test]
    fn test_slow_for_too_long_overflows() {
        let mut counter = SpeedRateCounter::new(MIN_SPEED, MAX_DURATION);
        assert!(counter.advance(0.0, 0).is_ok());
        let overflow = counter
            .advance(MAX_DURATION + 1.0, MIN_SPEED as u64 - 1)
            .unwrap_err();
        assert!(overflow.speed < MIN_SPEED);
        assert!(overflow.duration > MAX_DURATION);
    }

    #[test]
    fn test_recovery_clears_slow_timer() {
        let mut counter = SpeedRateCounter::new(MIN_SPEED, MAX_DURATION);
        counter.advance(0.0, 0).unwrap();
        counter.advance(2.0, 10).unwrap();
        assert!(counter.current_duration() > 0.0);

        counter.advance(4.0, 1000).unwrap();
        assert!(counter.current_speed() >= MIN_SPEED);
        assert_eq!(counter.current_duration(), 0.0);

        // still fast on average, no matter how long it runs
        assert!(counter.advance(10.0, 0).is_ok());
    }

    #[test]
    fn test_no_verdict_within_first_second() {
        let mut counter = SpeedRateCounter::new(MIN_SPEED, 0.0);
        counter.advance(0.0, 0).unwrap();
        assert!(counter.advance(0.5, 1).is_ok());
        assert_eq!(counter.current_speed(), 0.0);
    }

    #[test]
    fn test_first_call_only_anchors() {
        let mut counter = SpeedRateCounter::new(MIN_SPEED, MAX_DURATION);
        counter.advance(3.0, 5000).unwrap();
        counter.advance(4.0, 150).unwrap();
        assert_eq!(counter.current_speed(), 150.0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut counter = SpeedRateCounter::new(MIN_SPEED, MAX_DURATION);
        counter.advance(0.0, 0).unwrap();
        counter.advance(3.0, 1).unwrap();
        counter.reset();
        assert!(!counter.is_started());
        assert_eq!(counter.current_speed(), 0.0);
        assert_eq!(counter.current_duration(), 0.0);
    }
}
