//! The inbound half of a conference slot: de-jitter, loss concealment,
//! decode, resample to the 48 kHz conference rate, then the kerchunk
//! filter. Output messages all carry SLIN48 payloads.

use bus::{Kind, Message, Signal};
use log::error;
use wire::Codec;

use crate::kerchunk::KerchunkFilter;
use crate::pcm::BLOCK_48K;
use crate::resample::Resampler;
use crate::seqbuf::{PlayoutSink, SeqEntry, SequencingBuffer};
use crate::transcode::{slin_encode, Decoder};

/// Audio counts as "recently active" for this long after the last
/// frame.
const RECENT_TIMEOUT_MS: u32 = 2000;

impl SeqEntry for Message {
	fn is_voice(&self) -> bool {
		self.kind() == Kind::Audio
	}

	fn orig_ms(&self) -> u32 {
		self.orig_ms
	}

	fn rx_ms(&self) -> u32 {
		self.rx_ms
	}
}

/// What one playout tick released, before transcoding.
enum Played {
	Voice(Message),
	Signal(Message),
	Interpolate,
}

#[derive(Default)]
struct Collector {
	events: Vec<Played>,
}

impl PlayoutSink<Message> for Collector {
	fn play_signal(&mut self, payload: &Message, _local_ms: u32) {
		self.events.push(Played::Signal(*payload));
	}

	fn play_voice(&mut self, payload: &Message, _local_ms: u32) {
		self.events.push(Played::Voice(*payload));
	}

	fn interpolate_voice(&mut self, _orig_ms: u32, _local_ms: u32, _duration_ms: u32) {
		self.events.push(Played::Interpolate);
	}
}

pub struct BridgeIn {
	codec: Codec,
	jitbuf: SequencingBuffer<Message>,
	decoder: Decoder,
	resampler: Resampler,
	kerchunk: KerchunkFilter,

	last_unkey_ms: u32,
	last_audio_ms: u32,
	active: bool,
	last_active_change_ms: u32,
}

impl BridgeIn {
	pub fn new() -> Self {
		let mut jitbuf = SequencingBuffer::new();
		jitbuf.set_initial_margin(40);

		Self {
			codec: Codec::UNKNOWN,
			jitbuf,
			decoder: Decoder::new(),
			resampler: Resampler::new(),
			kerchunk: KerchunkFilter::new(),
			last_unkey_ms: 0,
			last_audio_ms: 0,
			active: false,
			last_active_change_ms: 0,
		}
	}

	pub fn reset(&mut self) {
		self.codec = Codec::UNKNOWN;
		self.jitbuf.reset();
		self.jitbuf.set_initial_margin(40);
		self.decoder.reset();
		self.resampler.reset();
		self.kerchunk.reset();
		self.last_unkey_ms = 0;
		self.last_audio_ms = 0;
		self.active = false;
		self.last_active_change_ms = 0;
	}

	pub fn set_codec(&mut self, codec: Codec) {
		self.codec = codec;
		self.decoder.set_codec(codec);
		self.resampler.set_rates(codec.sample_rate(), 48000);
	}

	pub fn set_bypass_jitter_buffer(&mut self, bypass: bool) {
		self.jitbuf.set_initial_margin(if bypass { 0 } else { 40 });
	}

	pub fn set_kerchunk_filter_enabled(&mut self, enabled: bool) {
		self.kerchunk.set_enabled(enabled);
	}

	pub fn set_kerchunk_evaluation_interval_ms(&mut self, ms: u32) {
		self.kerchunk.set_evaluation_interval_ms(ms);
	}

	pub fn last_unkey_ms(&self) -> u32 {
		self.last_unkey_ms
	}

	pub fn is_active_recently(&self, now_ms: u32) -> bool {
		self.last_audio_ms != 0 && now_ms.wrapping_sub(self.last_audio_ms) < RECENT_TIMEOUT_MS
	}

	pub fn last_active_change_ms(&self) -> u32 {
		self.last_active_change_ms
	}

	/// Feed a raw network message: voice still in the wire codec, or an
	/// UNKEY signal which rides the jitter buffer to stay in sequence
	/// with the audio around it.
	pub fn consume(&mut self, msg: &Message) {
		debug_assert!(msg.is_voice() || msg.is_signal(Signal::RadioUnkey));
		self.jitbuf.consume(*msg);
	}

	/// One 20 ms tick: release due frames, conceal holes, convert to
	/// the conference format. Everything playable lands in `out`.
	pub fn audio_rate_tick(&mut self, now_ms: u32, out: &mut Vec<Message>) {
		let mut collector = Collector::default();
		self.jitbuf.play_out(now_ms, &mut collector);

		for event in collector.events {
			match event {
				Played::Voice(msg) => {
					let mut pcm = [0i16; BLOCK_48K];
					let n = self.decoder.decode(msg.body(), &mut pcm[..self.codec.block_samples().max(1).min(BLOCK_48K)]);
					if n == 0 {
						error!("Undecodable voice frame dropped");
						continue;
					}
					self.emit_48k(&pcm[..n], &msg, now_ms, out);
				}
				Played::Interpolate => {
					let mut pcm = [0i16; BLOCK_48K];
					let n = self.decoder.decode_gap(&mut pcm[..self.codec.block_samples().max(1).min(BLOCK_48K)]);
					if n == 0 {
						continue;
					}
					let template = Message::audio(self.codec, &[], 0, now_ms);
					self.emit_48k(&pcm[..n], &template, now_ms, out);
				}
				Played::Signal(msg) => {
					if msg.is_signal(Signal::RadioUnkey) {
						self.last_unkey_ms = now_ms;
					}
					// Signals skip transcoding and the kerchunk queue.
					out.push(msg);
				}
			}
		}

		self.kerchunk.audio_rate_tick(now_ms, out);

		// Track the activity edge for status reporting.
		let now_active = self.is_active_recently(now_ms);
		if now_active != self.active {
			self.active = now_active;
			self.last_active_change_ms = now_ms;
		}
	}

	/// Upsample one native-rate block and queue it (through the
	/// kerchunk filter) as a SLIN48 message.
	fn emit_48k(&mut self, pcm: &[i16], template: &Message, now_ms: u32, out: &mut Vec<Message>) {
		let mut pcm48 = [0i16; BLOCK_48K];
		self.resampler.resample(pcm, &mut pcm48);

		let mut code = [0u8; BLOCK_48K * 2];
		slin_encode(&pcm48, &mut code);

		let mut msg = Message::audio(Codec::SLIN48, &code, template.orig_ms, template.rx_ms);
		msg.src = template.src;
		msg.dst = template.dst;

		self.last_audio_ms = now_ms;
		self.kerchunk.consume(msg, now_ms, out);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pcm::BLOCK_8K;
	use crate::transcode::ulaw_encode;

	fn ulaw_frame(level: i16, orig: u32, rx: u32) -> Message {
		let code: Vec<u8> = core::iter::repeat(ulaw_encode(level)).take(BLOCK_8K).collect();
		Message::audio(Codec::ULAW, &code, orig, rx)
	}

	#[test]
	fn ulaw_voice_comes_out_as_slin48() {
		let mut input = BridgeIn::new();
		input.set_codec(Codec::ULAW);
		input.set_bypass_jitter_buffer(true);

		let mut out = Vec::new();
		input.consume(&ulaw_frame(12000, 20, 25));
		input.audio_rate_tick(40, &mut out);

		assert_eq!(out.len(), 1);
		assert_eq!(out[0].codec(), Codec::SLIN48);
		assert_eq!(out[0].body().len(), BLOCK_48K * 2);
		assert!(input.is_active_recently(41));
	}

	#[test]
	fn gap_in_talkspurt_is_concealed() {
		let mut input = BridgeIn::new();
		input.set_codec(Codec::ULAW);
		input.set_bypass_jitter_buffer(true);

		let mut out = Vec::new();
		input.consume(&ulaw_frame(12000, 20, 25));
		input.audio_rate_tick(40, &mut out);
		assert_eq!(out.len(), 1);

		// Nothing arrives for the next tick: the PLC fills the hole.
		out.clear();
		input.audio_rate_tick(60, &mut out);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].codec(), Codec::SLIN48);
	}

	#[test]
	fn unkey_signal_passes_through() {
		let mut input = BridgeIn::new();
		input.set_codec(Codec::ULAW);
		input.set_bypass_jitter_buffer(true);

		let unkey = Message::signal(Signal::RadioUnkey, 100, 105);
		input.consume(&unkey);

		let mut out = Vec::new();
		input.audio_rate_tick(120, &mut out);
		assert_eq!(out.len(), 1);
		assert!(out[0].is_signal(Signal::RadioUnkey));
		assert_eq!(input.last_unkey_ms(), 120);
	}
}
