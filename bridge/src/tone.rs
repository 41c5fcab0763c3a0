//! Synthetic audio sources for the play queue: CW tones, a frequency
//! sweep, and pre-built white noise for receiver testing.

use std::collections::VecDeque;

use rand::Rng;

use crate::pcm::{PcmFrame, BLOCK_48K};

const RATE: f32 = 48000.0;
const TWO_PI: f32 = 2.0 * core::f32::consts::PI;

/// A continuous-phase oscillator producing one 48 k block per tick.
pub struct ToneGen {
	omega: f32,
	phi: f32,
	level: f32,
}

impl ToneGen {
	pub fn new(level: f32, freq_hz: f32) -> Self {
		Self {
			omega: TWO_PI * freq_hz / RATE,
			phi: 0.0,
			level,
		}
	}

	pub fn set_freq(&mut self, freq_hz: f32) {
		// Phase continues across frequency changes to avoid clicks.
		self.omega = TWO_PI * freq_hz / RATE;
	}

	pub fn next_frame(&mut self) -> PcmFrame {
		let mut f = PcmFrame::default();
		for s in f.samples_mut() {
			*s = (self.level * self.phi.cos() * 32767.0) as i16;
			self.phi = (self.phi + self.omega) % TWO_PI;
		}
		f
	}
}

/// Queue `ticks` frames of a steady tone.
pub fn load_cw(level: f32, freq_hz: f32, ticks: usize, queue: &mut VecDeque<PcmFrame>) {
	let mut gen = ToneGen::new(level, freq_hz);
	for _ in 0..ticks {
		queue.push_back(gen.next_frame());
	}
}

/// Queue a five-second logarithmic sweep from 100 Hz to 3 kHz.
pub fn load_sweep(level: f32, queue: &mut VecDeque<PcmFrame>) {
	let ticks = 5 * 50;
	let mut gen = ToneGen::new(level, 100.0);

	for i in 0..ticks {
		let t = i as f32 / ticks as f32;
		gen.set_freq(100.0 * (30.0f32).powf(t));
		queue.push_back(gen.next_frame());
	}
}

/// Queue `ticks` frames of silence.
pub fn load_silence(ticks: usize, queue: &mut VecDeque<PcmFrame>) {
	for _ in 0..ticks {
		queue.push_back(PcmFrame::default());
	}
}

/// Pre-build a noise table at construction time so the audio path
/// never touches the RNG.
pub fn make_white_noise(ticks: usize, amplitude: f32) -> Vec<PcmFrame> {
	let mut rng = rand::thread_rng();
	let mut frames = Vec::with_capacity(ticks);

	for _ in 0..ticks {
		let mut f = PcmFrame::default();
		for s in f.samples_mut() {
			*s = (amplitude * rng.gen_range(-1.0f32..1.0) * 32767.0) as i16;
		}
		frames.push(f);
	}

	frames
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tone_is_continuous_across_frames() {
		let mut gen = ToneGen::new(0.5, 440.0);
		let a = gen.next_frame();
		let b = gen.next_frame();

		// No discontinuity at the frame seam beyond one sample step.
		let last = a.samples()[BLOCK_48K - 1] as i32;
		let first = b.samples()[0] as i32;
		let max_step = (0.5 * 32767.0 * TWO_PI * 440.0 / RATE) as i32 + 2;
		assert!((last - first).abs() <= max_step);

		// Audible level.
		assert!(a.rms() > 0.3);
	}

	#[test]
	fn generators_fill_queues() {
		let mut q = VecDeque::new();
		load_cw(0.5, 440.0, 250, &mut q);
		assert_eq!(q.len(), 250);

		q.clear();
		load_sweep(0.5, &mut q);
		assert_eq!(q.len(), 250);

		q.clear();
		load_silence(25, &mut q);
		assert_eq!(q.len(), 25);
		assert_eq!(q[0].rms(), 0.0);

		let noise = make_white_noise(10, 0.5);
		assert_eq!(noise.len(), 10);
		assert!(noise[0].rms() > 0.1);
	}
}
