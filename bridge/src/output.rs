//! The outbound half of a conference slot: the 48 kHz mix comes in,
//! the peer's negotiated wire codec goes out.

use bus::{Kind, Message};
use log::error;
use wire::Codec;

use crate::pcm::{BLOCK_48K, BLOCK_8K};
use crate::resample::Resampler;
use crate::transcode::{slin_decode, Encoder};

const RECENT_TIMEOUT_MS: u32 = 2000;

pub struct BridgeOut {
	codec: Codec,
	resampler: Resampler,
	encoder: Encoder,
	last_activity_ms: u32,
}

impl BridgeOut {
	pub fn new() -> Self {
		Self {
			codec: Codec::UNKNOWN,
			resampler: Resampler::new(),
			encoder: Encoder::new(),
			last_activity_ms: 0,
		}
	}

	pub fn reset(&mut self) {
		self.codec = Codec::UNKNOWN;
		self.resampler.reset();
		self.last_activity_ms = 0;
	}

	pub fn set_codec(&mut self, codec: Codec) {
		self.codec = codec;
		self.encoder.set_codec(codec);
		self.resampler.set_rates(48000, codec.sample_rate());
	}

	pub fn is_active_recently(&self, now_ms: u32) -> bool {
		self.last_activity_ms != 0 && now_ms.wrapping_sub(self.last_activity_ms) < RECENT_TIMEOUT_MS
	}

	/// Convert one outbound message. Audio must arrive as SLIN48;
	/// signals pass through untouched.
	pub fn consume(&mut self, msg: Message, now_ms: u32, out: &mut Vec<Message>) {
		if msg.kind() != Kind::Audio {
			out.push(msg);
			return;
		}

		if msg.codec() != Codec::SLIN48 || msg.body().len() != BLOCK_48K * 2 {
			error!("Bridge output expected SLIN48, got {:?}", msg.codec());
			return;
		}

		self.last_activity_ms = now_ms;

		if self.codec == Codec::SLIN48 {
			out.push(msg);
			return;
		}

		let mut pcm48 = [0i16; BLOCK_48K];
		slin_decode(msg.body(), &mut pcm48);

		let block = self.codec.block_samples();
		if block == 0 {
			error!("Bridge output with no negotiated CODEC");
			return;
		}

		let mut narrow = [0i16; BLOCK_8K * 2];
		self.resampler.resample(&pcm48, &mut narrow[..block]);

		let mut code = [0u8; BLOCK_8K * 4];
		let n = self.encoder.encode(&narrow[..block], &mut code);
		if n == 0 {
			return;
		}

		let mut converted = Message::audio(self.codec, &code[..n], msg.orig_ms, msg.rx_ms);
		converted.src = msg.src;
		converted.dst = msg.dst;
		out.push(converted);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bus::Signal;
	use crate::transcode::slin_encode;

	fn mix_frame(level: i16) -> Message {
		let pcm = [level; BLOCK_48K];
		let mut code = [0u8; BLOCK_48K * 2];
		slin_encode(&pcm, &mut code);
		Message::audio(Codec::SLIN48, &code, 40, 45)
	}

	#[test]
	fn downconverts_to_wire_codec() {
		let mut output = BridgeOut::new();
		output.set_codec(Codec::ULAW);

		let mut out = Vec::new();
		output.consume(mix_frame(8000), 100, &mut out);

		assert_eq!(out.len(), 1);
		assert_eq!(out[0].codec(), Codec::ULAW);
		assert_eq!(out[0].body().len(), 160);
		assert_eq!(out[0].orig_ms, 40);
		assert!(output.is_active_recently(101));
	}

	#[test]
	fn slin16_payload_size() {
		let mut output = BridgeOut::new();
		output.set_codec(Codec::SLIN16);

		let mut out = Vec::new();
		output.consume(mix_frame(8000), 100, &mut out);
		assert_eq!(out[0].body().len(), 640);
	}

	#[test]
	fn signals_pass_through() {
		let mut output = BridgeOut::new();
		output.set_codec(Codec::ULAW);

		let mut out = Vec::new();
		output.consume(Message::signal(Signal::RadioUnkeyGen, 0, 100), 100, &mut out);
		assert_eq!(out.len(), 1);
		assert!(out[0].is_signal(Signal::RadioUnkeyGen));
		// Signals do not count as transmit activity.
		assert!(!output.is_active_recently(101));
	}

	#[test]
	fn wrong_format_is_dropped() {
		let mut output = BridgeOut::new();
		output.set_codec(Codec::ULAW);

		let mut out = Vec::new();
		output.consume(Message::audio(Codec::ULAW, &[0u8; 160], 0, 0), 100, &mut out);
		assert!(out.is_empty());
	}
}
