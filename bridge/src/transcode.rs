//! Wire-codec transcoding: G.711 µ-law and A-law companding and the
//! little-endian signed-linear formats. Decoding runs behind a packet
//! loss concealer so a gap request produces plausible audio instead of
//! silence clicks.

use log::error;
use utils::bytes::{get_i16_le, put_i16_le};
use wire::Codec;

use crate::plc::Plc;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// G.711 µ-law compression of one sample.
pub fn ulaw_encode(pcm: i16) -> u8 {
	let sign = if pcm < 0 { 0x7f } else { 0xff };
	let v = (pcm as i32).abs().min(ULAW_CLIP) + ULAW_BIAS;

	let mut exponent = 7u8;
	let mut mask = 0x4000;
	while exponent > 0 && v & mask == 0 {
		exponent -= 1;
		mask >>= 1;
	}

	let mantissa = (v >> (exponent + 3)) & 0x0f;
	let code = !(((exponent as i32) << 4) | mantissa) as u8;

	// Flip the sign bit off for negative samples.
	code & sign
}

pub fn ulaw_decode(code: u8) -> i16 {
	let code = !code;
	let exponent = (code >> 4) & 0x07;
	let mantissa = (code & 0x0f) as i32;
	let magnitude = ((mantissa << 3) + ULAW_BIAS) << exponent;
	let v = magnitude - ULAW_BIAS;

	if code & 0x80 != 0 {
		-v as i16
	} else {
		v as i16
	}
}

const ALAW_CLIP: i32 = 32635;

/// G.711 A-law compression of one sample.
pub fn alaw_encode(pcm: i16) -> u8 {
	let sign = if pcm >= 0 { 0x80u8 } else { 0 };
	let v = (pcm as i32).abs().min(ALAW_CLIP);

	let code = if v >= 256 {
		let mut exponent = 7u8;
		let mut mask = 0x4000;
		while exponent > 1 && v & mask == 0 {
			exponent -= 1;
			mask >>= 1;
		}
		let mantissa = (v >> (exponent + 3)) & 0x0f;
		((exponent << 4) as u8) | mantissa as u8
	} else {
		(v >> 4) as u8
	};

	(code | sign) ^ 0x55
}

pub fn alaw_decode(code: u8) -> i16 {
	let code = code ^ 0x55;
	let sign = code & 0x80 != 0;
	let exponent = (code >> 4) & 0x07;
	let mantissa = (code & 0x0f) as i32;

	let v = if exponent == 0 {
		(mantissa << 4) + 8
	} else {
		((mantissa << 4) + 0x108) << (exponent - 1)
	};

	if sign {
		v as i16
	} else {
		-v as i16
	}
}

/// Stateful decoder for one call's inbound leg. The PLC keeps history
/// so interpolation requests synthesise from the last good frame.
pub struct Decoder {
	codec: Codec,
	plc: Plc,
}

impl Decoder {
	pub fn new() -> Self {
		Self { codec: Codec::UNKNOWN, plc: Plc::new() }
	}

	pub fn set_codec(&mut self, codec: Codec) {
		self.codec = codec;
		self.reset();
	}

	pub fn reset(&mut self) {
		self.plc.reset();
	}

	/// Decode one wire frame into PCM at the codec's native rate.
	/// Returns the sample count, zero on malformed input.
	pub fn decode(&mut self, code: &[u8], pcm: &mut [i16]) -> usize {
		let n = self.codec.block_samples();
		if n == 0 || pcm.len() < n {
			return 0;
		}

		match self.codec {
			Codec::ULAW => {
				if code.len() != n {
					return 0;
				}
				for (o, &c) in pcm.iter_mut().zip(code) {
					*o = ulaw_decode(c);
				}
			}
			Codec::ALAW => {
				if code.len() != n {
					return 0;
				}
				for (o, &c) in pcm.iter_mut().zip(code) {
					*o = alaw_decode(c);
				}
			}
			Codec::SLIN8 | Codec::SLIN16 | Codec::SLIN48 => {
				if code.len() != n * 2 {
					return 0;
				}
				for (i, o) in pcm.iter_mut().take(n).enumerate() {
					*o = get_i16_le(code, i * 2);
				}
			}
			_ => {
				error!("Decode with unsupported CODEC {:?}", self.codec);
				return 0;
			}
		}

		self.plc.good_frame(&pcm[..n]);
		n
	}

	/// Conceal one missing frame.
	pub fn decode_gap(&mut self, pcm: &mut [i16]) -> usize {
		let n = self.codec.block_samples();
		if n == 0 || pcm.len() < n {
			return 0;
		}
		self.plc.conceal(&mut pcm[..n]);
		n
	}

	pub fn codec(&self) -> Codec {
		self.codec
	}
}

/// Stateless encoder for one call's outbound leg.
pub struct Encoder {
	codec: Codec,
}

impl Encoder {
	pub fn new() -> Self {
		Self { codec: Codec::UNKNOWN }
	}

	pub fn set_codec(&mut self, codec: Codec) {
		self.codec = codec;
	}

	/// Encode one PCM block; returns the number of code bytes written.
	pub fn encode(&self, pcm: &[i16], out: &mut [u8]) -> usize {
		let n = pcm.len();

		match self.codec {
			Codec::ULAW => {
				if out.len() < n {
					return 0;
				}
				for (o, &s) in out.iter_mut().zip(pcm) {
					*o = ulaw_encode(s);
				}
				n
			}
			Codec::ALAW => {
				if out.len() < n {
					return 0;
				}
				for (o, &s) in out.iter_mut().zip(pcm) {
					*o = alaw_encode(s);
				}
				n
			}
			Codec::SLIN8 | Codec::SLIN16 | Codec::SLIN48 => {
				if out.len() < n * 2 {
					return 0;
				}
				for (i, &s) in pcm.iter().enumerate() {
					put_i16_le(out, i * 2, s);
				}
				n * 2
			}
			_ => {
				error!("Encode with unsupported CODEC {:?}", self.codec);
				0
			}
		}
	}
}

/// Pack PCM into the little-endian bus form (SLIN at 48 kHz).
pub fn slin_encode(pcm: &[i16], out: &mut [u8]) -> usize {
	for (i, &s) in pcm.iter().enumerate() {
		put_i16_le(out, i * 2, s);
	}
	pcm.len() * 2
}

pub fn slin_decode(code: &[u8], pcm: &mut [i16]) -> usize {
	let n = code.len() / 2;
	for (i, o) in pcm.iter_mut().take(n).enumerate() {
		*o = get_i16_le(code, i * 2);
	}
	n
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ulaw_known_values() {
		// Silence compands to 0xff, full negative to 0x00-side codes.
		assert_eq!(ulaw_encode(0), 0xff);
		assert_eq!(ulaw_decode(0xff), 0);
		assert!(ulaw_decode(ulaw_encode(32000)) > 30000);
		assert!(ulaw_decode(ulaw_encode(-32000)) < -30000);
	}

	#[test]
	fn ulaw_companding_error_is_bounded() {
		// µ-law error grows with amplitude; proportionally it stays
		// within the step size of each chord.
		for pcm in (-32000i16..32000).step_by(193) {
			let got = ulaw_decode(ulaw_encode(pcm)) as i32;
			let err = (got - pcm as i32).abs();
			let bound = ((pcm as i32).abs() / 16).max(40);
			assert!(err <= bound, "pcm={pcm} got={got}");
		}
	}

	#[test]
	fn alaw_companding_error_is_bounded() {
		for pcm in (-32000i16..32000).step_by(193) {
			let got = alaw_decode(alaw_encode(pcm)) as i32;
			let err = (got - pcm as i32).abs();
			let bound = ((pcm as i32).abs() / 16).max(40);
			assert!(err <= bound, "pcm={pcm} got={got}");
		}
	}

	#[test]
	fn slin_roundtrip() {
		let pcm = [0i16, 1, -1, 32767, -32768, 1234];
		let mut code = [0u8; 12];
		assert_eq!(slin_encode(&pcm, &mut code), 12);
		// Little-endian on the wire.
		assert_eq!(code[6], 0xff);
		assert_eq!(code[7], 0x7f);

		let mut back = [0i16; 6];
		assert_eq!(slin_decode(&code, &mut back), 6);
		assert_eq!(back, pcm);
	}

	#[test]
	fn decoder_validates_frame_size() {
		let mut d = Decoder::new();
		d.set_codec(Codec::ULAW);

		let mut pcm = [0i16; 160];
		assert_eq!(d.decode(&[0u8; 160], &mut pcm), 160);
		assert_eq!(d.decode(&[0u8; 159], &mut pcm), 0);

		d.set_codec(Codec::SLIN16);
		let mut pcm = [0i16; 320];
		assert_eq!(d.decode(&[0u8; 640], &mut pcm), 320);
		assert_eq!(d.decode(&[0u8; 320], &mut pcm), 0);
	}

	#[test]
	fn gap_concealment_fades() {
		let mut d = Decoder::new();
		d.set_codec(Codec::ULAW);

		// Feed a loud frame, then conceal repeatedly: output decays.
		let loud: Vec<u8> = core::iter::repeat(ulaw_encode(20000)).take(160).collect();
		let mut pcm = [0i16; 160];
		d.decode(&loud, &mut pcm);

		let mut prev = i16::MAX;
		for _ in 0..6 {
			d.decode_gap(&mut pcm);
			let peak = pcm.iter().map(|s| s.unsigned_abs()).max().unwrap() as i16;
			assert!(peak <= prev);
			prev = peak;
		}
		// After enough gaps the concealment reaches silence.
		for _ in 0..20 {
			d.decode_gap(&mut pcm);
		}
		assert!(pcm.iter().all(|&s| s == 0));
	}
}
