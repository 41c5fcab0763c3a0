//! The DATETIME information element, RFC 5456 section 8.6.28: a packed
//! UTC calendar time with seconds in the low 5 bits, then minutes (6),
//! hours (5), day of month (5), month (4, 1-based) and years since
//! 2000 in the top 7 bits.

use chrono::{Datelike, Timelike, Utc};

pub fn pack(year: u32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> u32 {
	(second & 0x1f)
		| (minute & 0x3f) << 5
		| (hour & 0x1f) << 11
		| (day & 0x1f) << 16
		| (month & 0x0f) << 21
		| (year.saturating_sub(2000) & 0x7f) << 25
}

/// The current UTC time in DATETIME form.
pub fn now() -> u32 {
	let t = Utc::now();
	pack(t.year() as u32, t.month(), t.day(), t.hour(), t.minute(), t.second())
}

#[test]
fn test_pack() {
	// 2026-08-01 12:34:56 UTC.
	let v = pack(2026, 8, 1, 12, 34, 56);
	assert_eq!(v & 0x1f, 56 % 32);
	assert_eq!((v >> 5) & 0x3f, 34);
	assert_eq!((v >> 11) & 0x1f, 12);
	assert_eq!((v >> 16) & 0x1f, 1);
	assert_eq!((v >> 21) & 0x0f, 8);
	assert_eq!(v >> 25, 26);
}
