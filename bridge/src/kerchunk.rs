//! The kerchunk filter. A "kerchunk" is a brief spurious transmission
//! (someone keying up to see if the repeater responds). Leading audio
//! from an untrusted source is buffered rather than played; if activity
//! persists past the evaluation window the source earns trust and the
//! buffer drains into the conference, otherwise it is discarded.

use std::collections::VecDeque;

use bus::Message;
use log::info;

use crate::pcm::TICK_MS;

/// Leading frames quieter than this are treated as no audio at all.
const VAD_POWER_THRESHOLD_DB: f32 = -40.0;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FilterState {
	Passing,
	Buffering,
	Draining,
}

pub struct KerchunkFilter {
	enabled: bool,
	state: FilterState,

	/// Activity persisting this long earns trust.
	evaluation_interval_ms: u32,
	/// Trust survives this long past the end of activity.
	trust_interval_ms: u32,
	/// Hangover applied before declaring activity ended.
	debounce_interval_ms: u32,

	is_active: bool,
	is_trusted: bool,
	last_frame_ms: u32,
	last_activity_end_ms: u32,
	buffering_start_ms: u32,

	queue: VecDeque<Message>,
}

impl KerchunkFilter {
	pub fn new() -> Self {
		Self {
			enabled: false,
			state: FilterState::Passing,
			evaluation_interval_ms: 3000,
			trust_interval_ms: 60 * 1000,
			debounce_interval_ms: 1000,
			is_active: false,
			is_trusted: false,
			last_frame_ms: 0,
			last_activity_end_ms: 0,
			buffering_start_ms: 0,
			queue: VecDeque::new(),
		}
	}

	pub fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;
	}

	pub fn set_evaluation_interval_ms(&mut self, ms: u32) {
		self.evaluation_interval_ms = ms;
	}

	pub fn reset(&mut self) {
		self.state = FilterState::Passing;
		self.is_active = false;
		self.is_trusted = false;
		self.last_frame_ms = 0;
		self.last_activity_end_ms = 0;
		self.buffering_start_ms = 0;
		self.queue.clear();
	}

	fn frame_power_db(msg: &Message) -> f32 {
		// Sample every sixth PCM16 value; plenty for a power estimate.
		let body = msg.body();
		let mut sum = 0.0f32;
		let mut count = 0;

		let mut at = 0;
		while at + 1 < body.len() {
			let s = i16::from_le_bytes([body[at], body[at + 1]]) as f32 / 32767.0;
			sum += s * s;
			count += 1;
			at += 12;
		}

		if count == 0 {
			return -99.0;
		}
		10.0 * (sum / count as f32).log10()
	}

	/// Feed one post-transcode message, pushing anything playable into
	/// `out`.
	pub fn consume(&mut self, msg: Message, now_ms: u32, out: &mut Vec<Message>) {
		if !self.enabled || !msg.is_voice() {
			out.push(msg);
			return;
		}

		// Quiet leading frames after a long idle period are discarded
		// outright; they are key-up artifacts, not speech.
		let is_leading = now_ms.wrapping_sub(self.last_frame_ms) > 10 * 1000;
		if is_leading && Self::frame_power_db(&msg) < VAD_POWER_THRESHOLD_DB {
			return;
		}

		if !self.is_active {
			self.is_active = true;
		}

		if self.state == FilterState::Passing && !self.is_trusted {
			info!("Buffering a possible kerchunk");
			self.state = FilterState::Buffering;
			self.buffering_start_ms = now_ms;
		}

		match self.state {
			FilterState::Passing => out.push(msg),
			FilterState::Buffering | FilterState::Draining => self.queue.push_back(msg),
		}

		self.last_frame_ms = now_ms;
	}

	/// Per-tick state maintenance, draining at most one buffered frame.
	pub fn audio_rate_tick(&mut self, now_ms: u32, out: &mut Vec<Message>) {
		// Falling edge of activity, after debounce.
		if self.is_active && now_ms.wrapping_sub(self.last_frame_ms) > self.debounce_interval_ms {
			self.is_active = false;
			self.last_activity_end_ms = now_ms;
		}

		// Sustained activity earns trust.
		if !self.is_trusted && self.is_active && now_ms.wrapping_sub(self.buffering_start_ms) > self.evaluation_interval_ms {
			self.is_trusted = true;
		}

		// Trust decays after prolonged silence.
		if self.is_trusted && !self.is_active && now_ms.wrapping_sub(self.last_activity_end_ms) > self.trust_interval_ms {
			self.is_trusted = false;
		}

		match self.state {
			FilterState::Buffering => {
				if self.is_trusted {
					info!("Not a kerchunk, playing");
					self.state = FilterState::Draining;
				} else if now_ms.wrapping_sub(self.buffering_start_ms) > self.evaluation_interval_ms {
					info!("Kerchunk detected, flushing {} ms", self.queue.len() as u32 * TICK_MS);
					self.queue.clear();
					self.state = FilterState::Passing;
				}
			}
			FilterState::Draining => match self.queue.pop_front() {
				Some(msg) => out.push(msg),
				None => {
					info!("Kerchunk queue has been emptied");
					self.state = FilterState::Passing;
				}
			},
			FilterState::Passing => {}
		}
	}
}
