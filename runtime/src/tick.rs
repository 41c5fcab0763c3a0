use std::time::{Duration, Instant};

/// Deadline generator for a fixed-cadence timer. Each deadline is the
/// previous deadline plus the period, not "now plus the period", so a
/// late tick fires immediately instead of being skipped and the cadence
/// never drifts.
pub struct Ticker {
	at: Instant,
	period: Duration,
}

impl Ticker {
	pub fn new(now: Instant, period: Duration) -> Self {
		Self { at: now, period }
	}

	/// Advance to the next deadline and return the delay to arm a timer
	/// with. Zero when the deadline is already in the past.
	pub fn next_delay(&mut self, now: Instant) -> Duration {
		self.at += self.period;
		self.at.saturating_duration_since(now)
	}
}

#[test]
fn test_late_ticks_not_skipped() {
	let t0 = Instant::now();
	let mut ticker = Ticker::new(t0, Duration::from_millis(20));

	// First deadline is 20ms out.
	assert_eq!(ticker.next_delay(t0), Duration::from_millis(20));

	// The caller is 50ms late: the next two deadlines (40ms, 60ms) are
	// already due and fire with no delay, then cadence resumes.
	let late = t0 + Duration::from_millis(70);
	assert_eq!(ticker.next_delay(late), Duration::ZERO);
	assert_eq!(ticker.next_delay(late), Duration::ZERO);
	assert_eq!(ticker.next_delay(late), Duration::from_millis(10));
}
