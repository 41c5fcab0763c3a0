//! The speech-synthesis worker. The core never links a synthesiser
//! directly: it speaks the TTS_REQ / TTS_AUDIO / TTS_END message
//! contract over a channel pair, and the worker thread behind it can be
//! any [`Synthesizer`]. The built-in one renders text as Morse code —
//! the traditional repeater fallback when no voice engine is fitted.

use std::thread::JoinHandle;

use bus::{Kind, Message};
use crossbeam_channel::{Receiver, Sender};
use log::info;
use runtime::WakeHandle;

use crate::pcm::{BLOCK_16K, BLOCK_48K};
use crate::resample::Resampler;
use crate::transcode::slin_encode;

/// Produces 16 kHz mono PCM for a phrase, delivered in whole blocks.
pub trait Synthesizer: Send {
	fn synthesize(&mut self, text: &str, emit: &mut dyn FnMut(&[i16; BLOCK_16K]));
}

/// Run the synthesis worker. Requests arrive on `req_rx`; every block
/// of rendered speech goes back as a TTS_AUDIO message (already
/// resampled to 48 kHz SLIN) followed by a TTS_END, with the request's
/// source address echoed so the bridge can route the stream to the
/// right call.
pub fn spawn(mut synth: Box<dyn Synthesizer>, req_rx: Receiver<Message>, res_tx: Sender<Message>, wake: WakeHandle) -> JoinHandle<()> {
	std::thread::Builder::new()
		.name("tts".into())
		.spawn(move || {
			let mut resampler = Resampler::new();

			while let Ok(req) = req_rx.recv() {
				if req.kind() != Kind::TtsReq {
					continue;
				}

				let text = String::from_utf8_lossy(req.body()).into_owned();
				info!("TTS REQ: {text}");

				resampler.set_rates(16000, 48000);

				synth.synthesize(&text, &mut |pcm16| {
					let mut pcm48 = [0i16; BLOCK_48K];
					resampler.resample(pcm16, &mut pcm48);

					let mut code = [0u8; BLOCK_48K * 2];
					slin_encode(&pcm48, &mut code);

					let mut msg = Message::new(Kind::TtsAudio, 0, &code, 0, 0);
					msg.src = req.src;
					let _ = res_tx.send(msg);
				});

				let mut end = Message::new(Kind::TtsEnd, 0, &[], 0, 0);
				end.src = req.src;
				let _ = res_tx.send(end);
				wake.wake();

				info!("TTS complete");
			}
		})
		.expect("spawn tts worker")
}

// ----- Morse rendering ------------------------------------------------------

const RATE: f32 = 16000.0;

pub struct MorseSynthesizer {
	/// Dit length in samples; 20 WPM is 60 ms.
	dit: usize,
	freq_hz: f32,
	level: f32,
}

impl MorseSynthesizer {
	pub fn new() -> Self {
		Self {
			dit: (0.060 * RATE) as usize,
			freq_hz: 600.0,
			level: 0.4,
		}
	}
}

fn morse_for(c: char) -> Option<&'static str> {
	Some(match c.to_ascii_uppercase() {
		'A' => ".-",
		'B' => "-...",
		'C' => "-.-.",
		'D' => "-..",
		'E' => ".",
		'F' => "..-.",
		'G' => "--.",
		'H' => "....",
		'I' => "..",
		'J' => ".---",
		'K' => "-.-",
		'L' => ".-..",
		'M' => "--",
		'N' => "-.",
		'O' => "---",
		'P' => ".--.",
		'Q' => "--.-",
		'R' => ".-.",
		'S' => "...",
		'T' => "-",
		'U' => "..-",
		'V' => "...-",
		'W' => ".--",
		'X' => "-..-",
		'Y' => "-.--",
		'Z' => "--..",
		'0' => "-----",
		'1' => ".----",
		'2' => "..---",
		'3' => "...--",
		'4' => "....-",
		'5' => ".....",
		'6' => "-....",
		'7' => "--...",
		'8' => "---..",
		'9' => "----.",
		'.' => ".-.-.-",
		',' => "--..--",
		'-' => "-....-",
		_ => return None,
	})
}

impl Synthesizer for MorseSynthesizer {
	fn synthesize(&mut self, text: &str, emit: &mut dyn FnMut(&[i16; BLOCK_16K])) {
		let mut block = [0i16; BLOCK_16K];
		let mut at = 0usize;
		let mut phi = 0.0f32;
		let omega = 2.0 * core::f32::consts::PI * self.freq_hz / RATE;
		let level = self.level;

		fn push(
			samples: usize,
			keyed: bool,
			level: f32,
			omega: f32,
			block: &mut [i16; BLOCK_16K],
			at: &mut usize,
			phi: &mut f32,
			emit: &mut dyn FnMut(&[i16; BLOCK_16K]),
		) {
			for _ in 0..samples {
				block[*at] = if keyed { (level * phi.sin() * 32767.0) as i16 } else { 0 };
				*phi = (*phi + omega) % (2.0 * core::f32::consts::PI);
				*at += 1;
				if *at == BLOCK_16K {
					emit(block);
					*at = 0;
				}
			}
		}

		for word in text.split_whitespace() {
			for c in word.chars() {
				let Some(pattern) = morse_for(c) else { continue };
				for mark in pattern.chars() {
					let len = if mark == '-' { self.dit * 3 } else { self.dit };
					push(len, true, level, omega, &mut block, &mut at, &mut phi, emit);
					// Inter-element gap.
					push(self.dit, false, level, omega, &mut block, &mut at, &mut phi, emit);
				}
				// Inter-character gap (3 dits total).
				push(self.dit * 2, false, level, omega, &mut block, &mut at, &mut phi, emit);
			}
			// Inter-word gap (7 dits total).
			push(self.dit * 4, false, level, omega, &mut block, &mut at, &mut phi, emit);
		}

		// Flush the tail block, zero-padded.
		if at > 0 {
			for s in &mut block[at..] {
				*s = 0;
			}
			emit(&block);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn morse_produces_whole_blocks_of_audio() {
		let mut synth = MorseSynthesizer::new();

		let mut blocks = 0;
		let mut energy = 0.0f64;
		synth.synthesize("CQ 61057", &mut |pcm| {
			blocks += 1;
			energy += pcm.iter().map(|&s| (s as f64).powi(2)).sum::<f64>();
		});

		// "CQ 61057" at 20 WPM is a couple of seconds of audio.
		assert!(blocks > 50, "{blocks} blocks");
		assert!(energy > 0.0);
	}

	#[test]
	fn unknown_characters_are_skipped() {
		let mut synth = MorseSynthesizer::new();
		let mut blocks = 0;
		synth.synthesize("~~~", &mut |_| blocks += 1);
		assert_eq!(blocks, 0);
	}
}
