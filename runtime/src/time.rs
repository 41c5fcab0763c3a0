use std::time::SystemTime;

/// Get the current system time, simulated from the monotonic clock so
/// that it can never step backwards mid-run.
pub fn system(core: &stakker::Core) -> SystemTime {
	let time = core.systime();
	let dur = core.now() - core.start_instant();
	time + dur
}

/// Get the UNIX time in seconds.
pub fn unix(core: &stakker::Core) -> u32 {
	let unix = system(core)
		.duration_since(SystemTime::UNIX_EPOCH)
		.expect("The current time should be after the UNIX epoch");

	unix.as_secs().try_into().expect("32-bit UNIX time should not overflow")
}

/// Milliseconds since runtime start. Every component derives its clock
/// from this so that timestamps are comparable across actors. Wraps
/// after ~49 days, like the protocol timestamps it feeds.
pub fn ms(core: &stakker::Core) -> u32 {
	(core.now() - core.start_instant()).as_millis() as u32
}
