//! Sample-rate conversion between the wire rates (8 k, 16 k) and the
//! 48 kHz conference rate. Upsampling is zero-order hold followed by a
//! low-pass FIR; downsampling is the same FIR run as a decimator. The
//! Q15 filter banks below were designed for these exact transitions
//! (Kaiser window, cutoff just under the narrow band edge).

use log::error;

use crate::pcm::{BLOCK_16K, BLOCK_48K, BLOCK_8K};

/// 8 k <-> 48 k low-pass, 91 taps.
const F8_COEFFS: [i16; 91] = [
	-151, -85, 8, 105, 181, 215, 194, 121, 9, -113, -214, -266, -252, -169, -35, 119, 255, 334, 331, 239, 75, -125, -311, -433,
	-451, -350, -142, 129, 400, 598, 660, 550, 270, -133, -574, -945, -1131, -1039, -615, 135, 1146, 2300, 3442, 4408, 5053,
	5280, 5053, 4408, 3442, 2300, 1146, 135, -615, -1039, -1131, -945, -574, -133, 270, 550, 660, 598, 400, 129, -142, -350,
	-451, -433, -311, -125, 75, 239, 331, 334, 255, 119, -35, -169, -252, -266, -214, -113, 9, 121, 194, 215, 181, 105, 8, -85,
	-151,
];

/// 16 k <-> 48 k low-pass, 71 taps (Kaiser, beta 1, cutoff 7700 Hz).
const F16_COEFFS: [i16; 71] = [
	-154, 69, 246, 198, -47, -269, -249, 17, 292, 309, 24, -314, -380, -79, 334, 465, 151, -353, -573, -252, 369, 715, 396,
	-382, -918, -620, 393, 1254, 1025, -401, -1956, -2010, 406, 4678, 8771, 10456, 8771, 4678, 406, -2010, -1956, -401, 1025,
	1254, 393, -620, -918, -382, 396, 715, 369, -252, -573, -353, 151, 465, 334, -79, -380, -314, 24, 309, 292, 17, -249, -269,
	-47, 198, 246, 69, -154,
];

pub struct Resampler {
	in_rate: u32,
	out_rate: u32,
	taps: &'static [i16],
	/// FIR delay line at 48 kHz, `taps - 1` samples.
	state: Vec<i16>,
}

impl Resampler {
	pub fn new() -> Self {
		Self {
			in_rate: 0,
			out_rate: 0,
			taps: &[],
			state: Vec::new(),
		}
	}

	pub fn set_rates(&mut self, in_rate: u32, out_rate: u32) {
		self.in_rate = in_rate;
		self.out_rate = out_rate;

		self.taps = match (in_rate, out_rate) {
			(8000, 48000) | (48000, 8000) => &F8_COEFFS,
			(16000, 48000) | (48000, 16000) => &F16_COEFFS,
			(a, b) if a == b => &[],
			_ => {
				error!("No filter for {in_rate} -> {out_rate}");
				&[]
			}
		};

		self.reset();
	}

	pub fn reset(&mut self) {
		self.state.clear();
		self.state.resize(self.taps.len().saturating_sub(1), 0);
	}

	fn block_for(rate: u32) -> usize {
		match rate {
			8000 => BLOCK_8K,
			16000 => BLOCK_16K,
			48000 => BLOCK_48K,
			_ => 0,
		}
	}

	/// One FIR output at position `n` over the concatenation of the
	/// delay line and the current block.
	fn fir_at(&self, block: &[i16], n: usize) -> i16 {
		let hist = self.state.len();
		let mut acc = 0i64;

		for (k, &tap) in self.taps.iter().enumerate() {
			let pos = n + hist - k;
			let s = if pos < hist { self.state[pos] } else { block[pos - hist] };
			acc += tap as i64 * s as i64;
		}

		(acc >> 15).clamp(i16::MIN as i64, i16::MAX as i64) as i16
	}

	fn push_state(&mut self, block: &[i16]) {
		let hist = self.state.len();
		if hist == 0 {
			return;
		}
		if block.len() >= hist {
			self.state.copy_from_slice(&block[block.len() - hist..]);
		} else {
			self.state.rotate_left(block.len());
			let at = hist - block.len();
			self.state[at..].copy_from_slice(block);
		}
	}

	/// Convert one 20 ms block. Input and output sizes must match the
	/// configured rates exactly.
	pub fn resample(&mut self, input: &[i16], output: &mut [i16]) {
		let in_block = Self::block_for(self.in_rate);
		let out_block = Self::block_for(self.out_rate);

		if input.len() != in_block || output.len() != out_block {
			error!("Resample block mismatch ({} -> {})", input.len(), output.len());
			output.fill(0);
			return;
		}

		if self.in_rate == self.out_rate {
			output.copy_from_slice(input);
			return;
		}

		if self.out_rate == 48000 {
			// Hold each narrow sample across the wide period, then
			// low-pass away the images.
			let factor = (48000 / self.in_rate) as usize;
			let mut held = [0i16; BLOCK_48K];
			for (i, &s) in input.iter().enumerate() {
				for j in 0..factor {
					held[i * factor + j] = s;
				}
			}

			for n in 0..BLOCK_48K {
				output[n] = self.fir_at(&held, n);
			}
			self.push_state(&held);
		} else {
			// Low-pass at the narrow band edge, keep every Mth output.
			let factor = (48000 / self.out_rate) as usize;
			for (i, o) in output.iter_mut().enumerate() {
				*o = self.fir_at(input, i * factor);
			}
			self.push_state(input);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn dc_level(samples: &[i16]) -> f64 {
		samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64
	}

	#[test]
	fn upsample_preserves_dc() {
		let mut r = Resampler::new();
		r.set_rates(8000, 48000);

		let input = [8000i16; BLOCK_8K];
		let mut output = [0i16; BLOCK_48K];

		// Run a few blocks so the filter settles.
		for _ in 0..4 {
			r.resample(&input, &mut output);
		}

		// The filter banks carry a small fixed gain; DC should land in
		// its neighbourhood, not collapse or blow up.
		let level = dc_level(&output) / 8000.0;
		assert!(level > 0.8 && level < 1.2, "gain {level}");
	}

	#[test]
	fn downsample_preserves_dc() {
		let mut r = Resampler::new();
		r.set_rates(48000, 8000);

		let input = [8000i16; BLOCK_48K];
		let mut output = [0i16; BLOCK_8K];

		for _ in 0..4 {
			r.resample(&input, &mut output);
		}

		let level = dc_level(&output) / 8000.0;
		assert!(level > 0.8 && level < 1.2, "gain {level}");
	}

	#[test]
	fn sixteen_k_paths() {
		let mut r = Resampler::new();
		r.set_rates(16000, 48000);

		let input = [4000i16; BLOCK_16K];
		let mut output = [0i16; BLOCK_48K];
		for _ in 0..4 {
			r.resample(&input, &mut output);
		}
		let level = dc_level(&output) / 4000.0;
		assert!(level > 0.8 && level < 1.2, "gain {level}");
	}

	#[test]
	fn same_rate_is_passthrough() {
		let mut r = Resampler::new();
		r.set_rates(48000, 48000);

		let mut input = [0i16; BLOCK_48K];
		for (i, s) in input.iter_mut().enumerate() {
			*s = i as i16;
		}
		let mut output = [0i16; BLOCK_48K];
		r.resample(&input, &mut output);
		assert_eq!(input, output);
	}

	#[test]
	fn block_mismatch_produces_silence() {
		let mut r = Resampler::new();
		r.set_rates(8000, 48000);

		let input = [1000i16; 100];
		let mut output = [77i16; BLOCK_48K];
		r.resample(&input, &mut output);
		assert!(output.iter().all(|&s| s == 0));
	}
}
