//! Adaptive jitter buffer.
//!
//! Incoming frames are held in origin-timestamp order and released on
//! the 20 ms playout tick. The playout point trails the sender by an
//! adaptive margin estimated with "Ramjee Algorithm 1" (Ramjee, Kurose,
//! Towsley, Schulzrinne — "Adaptive Playout Mechanisms for Packetized
//! Audio Applications in Wide-Area Networks"): exponentially-weighted
//! estimates of one-way delay and its variation.

use log::info;

/// What the buffer needs to know about a stored payload.
pub trait SeqEntry: Copy {
	fn is_voice(&self) -> bool;
	/// Timestamp at the sender, ms.
	fn orig_ms(&self) -> u32;
	/// Local receive timestamp, ms.
	fn rx_ms(&self) -> u32;
}

/// Receives whatever the playout tick releases.
pub trait PlayoutSink<T> {
	fn play_signal(&mut self, payload: &T, local_ms: u32);
	fn play_voice(&mut self, payload: &T, local_ms: u32);
	/// Fill a gap in the voice stream with concealment.
	fn interpolate_voice(&mut self, orig_ms: u32, local_ms: u32, duration_ms: u32);
}

/// The playout tick size, ms.
const TICK: u32 = 20;

/// A 64-entry buffer holds one second of voice plus interspersed
/// control frames.
const MAX_BUFFER: usize = 64;

const ALPHA: f32 = 0.998002;
const BETA: f32 = 5.0;

pub struct SequencingBuffer<T> {
	/// Ordered by origin timestamp; equal stamps keep arrival order.
	entries: Vec<T>,

	/// The next origin time to play; always a multiple of the tick.
	origin_cursor: i32,
	talkspurt_first_origin: u32,
	last_played_orig_ms: u32,
	last_played_local_ms: u32,
	in_talkspurt: bool,
	talkspurt_frame_count: u32,
	talkspurt_timeout_ms: u32,

	/// The operative playout margin; must be a multiple of the tick.
	/// Zero bypasses reordering entirely.
	initial_margin_ms: i32,
	delay_locked: bool,

	// Ramjee Algorithm 1 state.
	di: f32,
	vi: f32,
	ideal_delay: f32,
	voice_consumed: u32,

	// Diagnostics.
	overflow_count: u32,
	late_count: u32,
	interpolated_count: u32,
	playout_count: u32,
	talkspurt_count: u32,
	max_depth: usize,
	worst_margin: i32,
	total_margin: i32,
}

impl<T: SeqEntry> SequencingBuffer<T> {
	pub fn new() -> Self {
		Self {
			entries: Vec::with_capacity(MAX_BUFFER),
			origin_cursor: 0,
			talkspurt_first_origin: 0,
			last_played_orig_ms: 0,
			last_played_local_ms: 0,
			in_talkspurt: false,
			talkspurt_frame_count: 0,
			talkspurt_timeout_ms: 60,
			initial_margin_ms: (TICK * 2) as i32,
			delay_locked: false,
			di: 0.0,
			vi: 0.0,
			ideal_delay: 0.0,
			voice_consumed: 0,
			overflow_count: 0,
			late_count: 0,
			interpolated_count: 0,
			playout_count: 0,
			talkspurt_count: 0,
			max_depth: 0,
			worst_margin: 0,
			total_margin: 0,
		}
	}

	pub fn reset(&mut self) {
		*self = Self::new();
	}

	pub fn set_initial_margin(&mut self, ms: u32) {
		debug_assert_eq!(ms % TICK, 0);
		self.initial_margin_ms = ms as i32;
		// Seed the estimator at the configured margin.
		self.di = ms as f32;
		self.vi = 0.0;
	}

	pub fn set_talkspurt_timeout(&mut self, ms: u32) {
		self.talkspurt_timeout_ms = ms;
	}

	/// Pin the operative margin at its configured value; the estimator
	/// keeps running for observability.
	pub fn lock_delay(&mut self) {
		self.delay_locked = true;
	}

	pub fn unlock_delay(&mut self) {
		self.delay_locked = false;
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn in_talkspurt(&self) -> bool {
		self.in_talkspurt
	}

	pub fn late_count(&self) -> u32 {
		self.late_count
	}

	pub fn interpolated_count(&self) -> u32 {
		self.interpolated_count
	}

	pub fn overflow_count(&self) -> u32 {
		self.overflow_count
	}

	pub fn ideal_delay_ms(&self) -> f32 {
		self.ideal_delay
	}

	fn round_to_tick(v: i32) -> i32 {
		((v as f32 / TICK as f32).round() as i32) * TICK as i32
	}

	fn round_down_to_tick(v: u32) -> u32 {
		v / TICK * TICK
	}

	/// Insert a frame in origin order. Returns false (and counts an
	/// overflow) when the buffer is full.
	pub fn consume(&mut self, payload: T) -> bool {
		if self.entries.len() >= MAX_BUFFER {
			self.overflow_count += 1;
			info!("OF orig={} cursor={}", payload.orig_ms(), self.origin_cursor);
			return false;
		}

		// Stable insertion: equal origins keep arrival order.
		let at = self.entries.partition_point(|e| e.orig_ms() <= payload.orig_ms());
		self.entries.insert(at, payload);

		// Keep the delay estimate as current as possible: update on
		// arrival, not playout.
		if payload.is_voice() {
			let start_of_call = self.voice_consumed == 0;
			self.voice_consumed += 1;
			self.update_delay_target(start_of_call, payload.rx_ms(), payload.orig_ms());
		}

		true
	}

	fn update_delay_target(&mut self, start_of_call: bool, rx_ms: u32, orig_ms: u32) {
		let ni = rx_ms as f32 - orig_ms as f32;

		if start_of_call {
			// The very first voice frame seeds the estimate; it floats
			// from there.
			self.di = ni;
			self.vi = 0.0;
		} else {
			self.di = ALPHA * self.di + (1.0 - ALPHA) * ni;
			self.vi = ALPHA * self.vi + (1.0 - ALPHA) * (self.di - ni).abs();
		}

		self.ideal_delay = self.di + BETA * self.vi;
	}

	/// Release whatever this 20 ms tick is due: signal frames in origin
	/// order, at most one voice frame, or an interpolation request when
	/// the talkspurt has a hole in it.
	pub fn play_out(&mut self, local_ms: u32, sink: &mut impl PlayoutSink<T>) {
		let mut voice_played = false;

		self.max_depth = self.max_depth.max(self.entries.len());

		if self.initial_margin_ms == 0 {
			// Bypass: release the head frame as-is, keeping just enough
			// talkspurt state for gap concealment.
			if let Some(head) = self.entries.first().copied() {
				self.entries.remove(0);

				if head.is_voice() {
					sink.play_voice(&head, local_ms);
					voice_played = true;
					self.playout_count += 1;
					if !self.in_talkspurt {
						self.in_talkspurt = true;
						self.talkspurt_frame_count = 0;
						self.talkspurt_first_origin = head.orig_ms();
					}
					self.talkspurt_frame_count += 1;
					self.last_played_local_ms = local_ms;
					self.last_played_orig_ms = head.orig_ms();
				} else {
					sink.play_signal(&head, local_ms);
				}
			}
		} else {
			// Work through the buffer chronologically: release signals,
			// find the talkspurt start, play the due voice frame,
			// discard expired ones.
			while let Some(head) = self.entries.first().copied() {
				// Signal frames release in origin order ahead of the
				// next voice frame.
				if !head.is_voice() {
					self.entries.remove(0);
					sink.play_signal(&head, local_ms);
					continue;
				}

				let old_cursor = self.origin_cursor;

				// Out-of-sequence or repeated voice is discarded.
				if head.orig_ms() <= self.last_played_orig_ms {
					info!("Discarded OOS frame ({} <= {})", head.orig_ms(), self.last_played_orig_ms);
					self.late_count += 1;
					self.entries.remove(0);
					continue;
				}

				// First frame of a talkspurt: place the cursor an
				// initial margin behind it, on a tick boundary (frames
				// are not guaranteed to arrive tick-aligned).
				if !self.in_talkspurt {
					self.origin_cursor = Self::round_to_tick(head.orig_ms() as i32 - self.initial_margin_ms);

					if self.origin_cursor > old_cursor {
						info!("Start TS, moving forward {} -> {}", old_cursor, self.origin_cursor);
					} else if self.origin_cursor < old_cursor {
						info!("Start TS, moving backward {} <- {}", self.origin_cursor, old_cursor);
					}

					self.in_talkspurt = true;
					self.talkspurt_frame_count = 0;
					self.talkspurt_first_origin = head.orig_ms();
					self.last_played_orig_ms = 0;
					self.last_played_local_ms = 0;
				}

				if (head.orig_ms() as i32) < self.origin_cursor {
					// An expired frame may still be worth a small step
					// back: never behind what has already played, never
					// off a tick boundary, never more than the margin.
					let proposed = self.last_played_orig_ms.max(Self::round_down_to_tick(head.orig_ms()));

					if proposed as i32 >= self.origin_cursor - self.initial_margin_ms {
						self.origin_cursor = proposed as i32;
						info!("Mid TS, moved cursor back ({} <- {})", self.origin_cursor, old_cursor);
					} else {
						info!("Mid TS, discarded frame ({} << {})", head.orig_ms(), self.origin_cursor);
						self.late_count += 1;
						self.entries.remove(0);
					}
					// Either way the loop gets another look.
				} else if (head.orig_ms() as i32) < self.origin_cursor + TICK as i32 {
					// Inside the current tick: play it.
					self.entries.remove(0);
					sink.play_voice(&head, local_ms);

					voice_played = true;
					self.last_played_local_ms = local_ms;
					self.last_played_orig_ms = self.origin_cursor as u32;
					self.playout_count += 1;

					let margin = local_ms as i32 - head.rx_ms() as i32;
					if self.talkspurt_first_origin == head.orig_ms() {
						self.worst_margin = margin;
						self.total_margin = margin;
						self.talkspurt_frame_count = 1;
					} else {
						self.worst_margin = self.worst_margin.min(margin);
						self.total_margin += margin;
						self.talkspurt_frame_count += 1;
					}

					// Only one voice frame per tick.
					break;
				} else {
					// The next voice is still in the future; the gap
					// (if any) is filled by interpolation below.
					break;
				}
			}
		}

		// Per-tick epilogue, exactly once.
		if self.in_talkspurt && self.talkspurt_frame_count > 0 {
			if !voice_played {
				sink.interpolate_voice(self.origin_cursor as u32, local_ms, TICK);
				self.interpolated_count += 1;
			}

			if local_ms >= self.last_played_local_ms + self.talkspurt_timeout_ms {
				self.in_talkspurt = false;
				self.talkspurt_count += 1;
				let avg = if self.talkspurt_frame_count != 0 { self.total_margin / self.talkspurt_frame_count as i32 } else { 0 };
				info!(
					"End TS, avgM: {}, shortM: {}, OC: {}, size: {}",
					avg,
					self.worst_margin,
					self.origin_cursor,
					self.entries.len()
				);
			}
		}

		// The remote clock keeps moving whether or not audio arrived;
		// so does the expectation.
		self.origin_cursor += TICK as i32;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// A bare test payload: voice or signal, with a token for identity.
	#[derive(Clone, Copy, Debug, PartialEq)]
	struct P {
		voice: bool,
		token: u32,
		orig: u32,
		rx: u32,
	}

	impl SeqEntry for P {
		fn is_voice(&self) -> bool {
			self.voice
		}
		fn orig_ms(&self) -> u32 {
			self.orig
		}
		fn rx_ms(&self) -> u32 {
			self.rx
		}
	}

	fn voice(token: u32, orig: u32, rx: u32) -> P {
		P { voice: true, token, orig, rx }
	}

	fn signal(token: u32, orig: u32, rx: u32) -> P {
		P { voice: false, token, orig, rx }
	}

	#[derive(Default)]
	struct Sink {
		voices: Vec<(u32, u32)>,
		signals: Vec<(u32, u32)>,
		interpolates: Vec<u32>,
	}

	impl PlayoutSink<P> for Sink {
		fn play_signal(&mut self, p: &P, local_ms: u32) {
			self.signals.push((p.token, local_ms));
		}
		fn play_voice(&mut self, p: &P, local_ms: u32) {
			self.voices.push((p.token, local_ms));
		}
		fn interpolate_voice(&mut self, _orig: u32, local_ms: u32, _dur: u32) {
			self.interpolates.push(local_ms);
		}
	}

	#[test]
	fn signals_release_in_origin_order_around_voice() {
		let mut jb = SequencingBuffer::new();
		jb.set_initial_margin(20);
		jb.lock_delay();

		let mut sink = Sink::default();

		assert!(jb.consume(signal(2, 20, 10)));
		assert!(jb.consume(signal(1, 20, 10)));
		assert!(jb.consume(signal(3, 40, 30)));
		assert!(jb.consume(voice(4, 60, 100)));
		assert!(jb.consume(signal(5, 60, 100)));
		assert_eq!(jb.len(), 5);

		// All signals ahead of the first voice release immediately.
		jb.play_out(100, &mut sink);
		assert_eq!(jb.len(), 2);
		assert_eq!(sink.signals.len(), 3);
		// Stable order for the equal origins.
		assert_eq!(sink.signals[0].0, 2);
		assert_eq!(sink.signals[1].0, 1);
		assert_eq!(sink.voices.len(), 0);

		// The voice releases on the next tick, margin behind origin.
		jb.play_out(120, &mut sink);
		assert_eq!(jb.len(), 1);
		assert_eq!(sink.voices.len(), 1);
		assert_eq!(sink.voices[0].0, 4);

		// Then the trailing signal; the voice gap interpolates.
		jb.play_out(140, &mut sink);
		assert_eq!(jb.len(), 0);
		assert_eq!(sink.signals.len(), 4);
		assert_eq!(sink.interpolates.len(), 1);
		assert!(jb.in_talkspurt());
	}

	#[test]
	fn reorders_near_simultaneous_arrivals() {
		let mut jb = SequencingBuffer::new();
		jb.set_initial_margin(20);
		jb.lock_delay();

		let mut sink = Sink::default();

		jb.consume(voice(0, 0, 10));
		jb.play_out(20, &mut sink);
		assert!(jb.is_empty());

		jb.consume(voice(1, 20, 25));
		// Way early for its slot; held until t=80.
		jb.consume(voice(3, 60, 35));

		jb.play_out(40, &mut sink);
		assert!(!jb.is_empty());

		jb.consume(voice(2, 40, 36));

		jb.play_out(60, &mut sink);
		jb.play_out(80, &mut sink);
		assert!(!jb.is_empty());
		jb.play_out(100, &mut sink);

		let played: Vec<u32> = sink.voices.iter().map(|v| v.0).collect();
		assert_eq!(played, vec![1, 2, 3]);
	}

	/// The late-frame scenario: margin 0 (bypass), one frame delayed
	/// past its tick. Playout emits in order, interpolates across the
	/// hole, and picks the late frame up on the next tick.
	#[test]
	fn bypass_late_frame_interpolates_then_recovers() {
		let mut jb = SequencingBuffer::new();
		jb.set_initial_margin(0);
		jb.lock_delay();

		let arrivals = [
			(10u32, 0u32),
			(25, 20),
			(48, 40),
			(65, 60),
			(119, 80),
		];

		let mut sink = Sink::default();
		let mut next = 0usize;

		for tick in (20..=120).step_by(20) {
			while next < arrivals.len() && arrivals[next].0 <= tick {
				assert!(jb.consume(voice(arrivals[next].1, arrivals[next].1, arrivals[next].0)));
				next += 1;
			}
			jb.play_out(tick, &mut sink);
		}

		// Origins 0..60 play at ticks 20..80; tick 100 interpolates;
		// tick 120 recovers origin 80.
		let played: Vec<(u32, u32)> = sink.voices.clone();
		assert_eq!(played, vec![(0, 20), (20, 40), (40, 60), (60, 80), (80, 120)]);
		assert_eq!(sink.interpolates, vec![100]);
	}

	#[test]
	fn overflow_is_counted_and_refused() {
		let mut jb = SequencingBuffer::new();
		jb.set_initial_margin(20);

		for i in 0..MAX_BUFFER as u32 {
			assert!(jb.consume(voice(i, i * 20, i * 20 + 5)));
		}
		assert!(!jb.consume(voice(999, 99_000, 99_000)));
		assert_eq!(jb.overflow_count(), 1);
		assert_eq!(jb.len(), MAX_BUFFER);
	}

	#[test]
	fn duplicate_voice_is_discarded_late() {
		let mut jb = SequencingBuffer::new();
		jb.set_initial_margin(20);
		jb.lock_delay();

		let mut sink = Sink::default();

		jb.consume(voice(1, 40, 10));
		jb.play_out(20, &mut sink);
		jb.play_out(40, &mut sink);
		assert_eq!(sink.voices.len(), 1);

		// A repeat of the already-played origin is dropped.
		jb.consume(voice(2, 40, 50));
		jb.play_out(60, &mut sink);
		assert_eq!(sink.voices.len(), 1);
		assert_eq!(jb.late_count(), 1);
	}

	#[test]
	fn talkspurt_closes_after_timeout() {
		let mut jb = SequencingBuffer::new();
		jb.set_initial_margin(20);
		jb.set_talkspurt_timeout(40);
		jb.lock_delay();

		let mut sink = Sink::default();

		jb.consume(voice(1, 20, 5));
		jb.play_out(20, &mut sink);
		jb.play_out(40, &mut sink);
		assert_eq!(sink.voices.len(), 1);
		assert!(jb.in_talkspurt());

		// Silence: interpolation until the timeout closes the spurt.
		jb.play_out(60, &mut sink);
		jb.play_out(80, &mut sink);
		assert!(!jb.in_talkspurt());
		assert!(!sink.interpolates.is_empty());

		// The next voice starts a fresh talkspurt rather than being
		// discarded against the old played-origin mark.
		jb.consume(voice(2, 200, 185));
		jb.play_out(200, &mut sink);
		jb.play_out(220, &mut sink);
		assert_eq!(sink.voices.len(), 2);
	}

	#[test]
	fn delay_estimator_tracks_flight_time() {
		let mut jb: SequencingBuffer<P> = SequencingBuffer::new();
		jb.set_initial_margin(40);

		// Constant 30 ms flight: the estimate settles at 30.
		for i in 0..200u32 {
			jb.consume(voice(i, i * 20, i * 20 + 30));
			// Drain so the buffer never overflows.
			let mut sink = Sink::default();
			jb.play_out(i * 20 + 40, &mut sink);
		}

		let d = jb.ideal_delay_ms();
		assert!(d > 25.0 && d < 45.0, "ideal delay {d}");
	}
}
