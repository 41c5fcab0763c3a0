use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use stakker::Stakker;
use utils::error::Result;

use crate::GLOBAL;

static EXIT: AtomicBool = AtomicBool::new(false);

pub fn init() -> Stakker {
	// Capture both a monotonic and an absolute view of "now" so that
	// wall-clock time can be derived from the monotonic clock later.
	let now = Instant::now();
	let now_sys = SystemTime::now();

	let mut s = Stakker::new(now);
	s.set_systime(Some(now_sys));
	s
}

/// Drive the actor runtime until shutdown or Ctrl+C. Only the poll call
/// suspends; its timeout is bounded by the next timer so a 20 ms audio
/// tick is never slept past.
pub fn exec(stakker: &mut Stakker, exit_fn: impl FnOnce()) -> Result {
	ctrlc::set_handler(|| EXIT.store(true, Ordering::Relaxed)).map_err(|err| log::error!("Failed to set Ctrl+C handler: {err}"))?;

	GLOBAL.with(|this| {
		let mut t = Instant::now();
		let mut idle_pending = stakker.run(t, false);

		while stakker.not_shutdown() {
			if EXIT.load(Ordering::Relaxed) {
				// Let the exit function defer cleanup of remaining actors,
				// then run the deferral queue once to execute it.
				exit_fn();
				stakker.run(t, false);
				break;
			};

			let timeout = if idle_pending {
				// Items in the idle queue: poll without blocking.
				Some(Duration::from_secs(0))
			} else {
				stakker.next_wait(t)
			};

			// No timers and no sockets means no further work can arrive.
			if timeout.is_none() && !this.borrow().is_io() {
				break;
			}

			let Ok(is_io) = this.borrow_mut().poll(timeout) else {
				EXIT.store(true, Ordering::Relaxed);
				continue;
			};

			t = Instant::now();
			idle_pending = stakker.run(t, idle_pending && !is_io);
		}

		Ok(())
	})
}
