//! One conference participant: the in/out pipelines, the play queue
//! of synthetic audio (speech, tones, recordings), DTMF accumulation,
//! and the parrot diagnostic mode.

use std::collections::VecDeque;

use bus::{payload, Addr, Kind, Message, Signal};
use crossbeam_channel::Sender;
use log::info;
use stakker::Fwd;
use wire::Codec;

use crate::input::BridgeIn;
use crate::output::BridgeOut;
use crate::pcm::{self, PcmFrame, BLOCK_48K};
use crate::tone;
use crate::transcode::{slin_decode, slin_encode};

/// Recording ends after this much unbroken silence.
const PARROT_RECORD_TIMEOUT_MS: u32 = 5000;

/// Recording also ends shortly after the sender unkeys.
const PARROT_UNKEY_GRACE_MS: u32 = 250;

/// The longest recording the parrot keeps (30 s of ticks).
const PARROT_CAPTURE_LIMIT: usize = 1500;

/// Frames trimmed from each end before measuring levels (300 ms).
const LEVEL_TRIM_FRAMES: usize = 15;

/// A call stays a "commander" (and keeps receiving status speech) for
/// this long after its last DTMF.
const COMMANDER_TIMEOUT_MS: u32 = 30 * 1000;

/// DTMF inactivity that completes a command string.
const DTMF_WINDOW_MS: u32 = 2500;

/// Speech-level gate for the parrot recorder.
const VAD_RMS: f32 = 0.005;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Mode {
	#[default]
	Normal,
	Parrot,
	Tone,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ParrotState {
	#[default]
	None,
	Connected,
	WaitingForNetTest,
	Greeting0,
	TtsGreeting0,
	PlayingGreeting0,
	Greeting1,
	TtsGreeting1,
	PlayingGreeting1,
	WaitingForRecord,
	Recording,
	PauseAfterRecord,
	TtsAfterRecord,
	PlayingAfterRecord,
}

/// Bridge-level facilities a slot needs while processing.
pub(crate) struct Ctx<'a> {
	pub now_ms: u32,
	pub bus: &'a Fwd<Message>,
	pub tts_tx: &'a Sender<Message>,
	pub net_tx: &'a Sender<Message>,
	pub bridge_bus: u32,
	pub white_noise: &'a [PcmFrame],
}

/// A completed DTMF command, handed up to the bridge for dispatch.
pub(crate) struct DtmfCommand {
	pub slot: usize,
	pub command: String,
}

pub(crate) struct BridgeCall {
	pub active: bool,
	/// Network identity of the call this slot fronts.
	pub line_id: u32,
	pub call_id: u32,
	/// This slot's own call id on the bridge bus.
	pub slot: u32,
	pub remote_node: String,
	pub permanent: bool,
	pub echo: bool,
	pub source_addr_validated: bool,
	pub mode: Mode,
	start_ms: u32,

	pub bridge_in: BridgeIn,
	pub bridge_out: BridgeOut,

	/// This tick's contribution to the conference, 48 kHz.
	pub stage_in: Option<PcmFrame>,
	/// This tick's mixed conference output.
	stage_out: Option<PcmFrame>,
	play_queue: VecDeque<PcmFrame>,
	last_cycle_generated_output: bool,

	dtmf_accumulator: String,
	last_dtmf_rx_ms: u32,

	pub link_report: String,
	link_report_change_ms: u32,
	pub talker_id: String,
	talker_id_change_ms: u32,
	output_talker_id: String,
	pub levels: payload::CallLevels,

	parrot_state: ParrotState,
	parrot_state_start_ms: u32,
	capture: Vec<PcmFrame>,
	record_started_ms: u32,
	last_voice_activity_ms: u32,
	net_result: Option<payload::NetDiagRes>,

	tone_gen: Option<tone::ToneGen>,
}

impl BridgeCall {
	pub fn new(slot: u32) -> Self {
		Self {
			active: false,
			line_id: 0,
			call_id: 0,
			slot,
			remote_node: String::new(),
			permanent: false,
			echo: false,
			source_addr_validated: false,
			mode: Mode::Normal,
			start_ms: 0,
			bridge_in: BridgeIn::new(),
			bridge_out: BridgeOut::new(),
			stage_in: None,
			stage_out: None,
			play_queue: VecDeque::new(),
			last_cycle_generated_output: false,
			dtmf_accumulator: String::new(),
			last_dtmf_rx_ms: 0,
			link_report: String::new(),
			link_report_change_ms: 0,
			talker_id: String::new(),
			talker_id_change_ms: 0,
			output_talker_id: String::new(),
			levels: payload::CallLevels::default(),
			parrot_state: ParrotState::None,
			parrot_state_start_ms: 0,
			capture: Vec::new(),
			record_started_ms: 0,
			last_voice_activity_ms: 0,
			net_result: None,
			tone_gen: None,
		}
	}

	pub fn reset(&mut self) {
		let slot = self.slot;
		*self = Self::new(slot);
	}

	#[allow(clippy::too_many_arguments)]
	pub fn setup(
		&mut self,
		ctx: &Ctx,
		line_id: u32,
		call_id: u32,
		start_ms: u32,
		codec: Codec,
		p: &payload::CallStart,
		initial_mode: Mode,
		use_kerchunk_filter: bool,
		kerchunk_evaluation_ms: u32,
	) {
		self.reset();
		self.active = true;
		self.line_id = line_id;
		self.call_id = call_id;
		self.remote_node = p.remote_number.clone();
		self.start_ms = start_ms;
		self.echo = p.echo;
		self.permanent = p.permanent;
		self.source_addr_validated = p.source_addr_validated;

		self.bridge_in.set_codec(codec);
		self.bridge_in.set_bypass_jitter_buffer(p.bypass_jitter_buffer);
		self.bridge_out.set_codec(codec);

		self.bridge_in.set_kerchunk_filter_enabled(use_kerchunk_filter);
		self.bridge_in.set_kerchunk_evaluation_interval_ms(kerchunk_evaluation_ms);

		if initial_mode == Mode::Parrot {
			self.enter_parrot_mode(ctx.now_ms);
		} else {
			self.mode = initial_mode;
			if initial_mode == Mode::Tone {
				self.tone_gen = Some(tone::ToneGen::new(0.3, 1000.0));
			}
		}
	}

	pub fn belongs_to(&self, msg: &Message) -> bool {
		self.active && msg.src.bus == self.line_id && msg.src.call == self.call_id
	}

	pub fn is_normal(&self) -> bool {
		self.mode == Mode::Normal
	}

	pub fn is_recent_commander(&self, now_ms: u32) -> bool {
		self.last_dtmf_rx_ms != 0 && now_ms.wrapping_sub(self.last_dtmf_rx_ms) < COMMANDER_TIMEOUT_MS
	}

	pub fn enter_parrot_mode(&mut self, now_ms: u32) {
		info!("Slot {} entering parrot mode", self.slot);
		self.mode = Mode::Parrot;
		self.parrot_state = ParrotState::Connected;
		self.parrot_state_start_ms = now_ms;
	}

	fn set_parrot_state(&mut self, state: ParrotState, now_ms: u32) {
		self.parrot_state = state;
		self.parrot_state_start_ms = now_ms;
	}

	// ----- Inbound messages ------------------------------------------------

	pub fn consume(&mut self, ctx: &Ctx, msg: &Message) {
		match msg.kind() {
			Kind::TtsAudio | Kind::TtsEnd => self.process_tts(ctx, msg),
			Kind::NetDiagRes => {
				let Some(res) = payload::NetDiagRes::from_bytes(msg.body()) else { return };
				info!("Got network diagnostic response {}", res.code);
				self.net_result = Some(res);
				if self.parrot_state == ParrotState::WaitingForNetTest {
					self.set_parrot_state(ParrotState::Greeting0, ctx.now_ms);
				}
			}
			Kind::Audio => self.bridge_in.consume(msg),
			Kind::Signal => match msg.as_signal() {
				Some(Signal::RadioUnkey) => self.bridge_in.consume(msg),
				Some(Signal::LinkReport) => {
					let report = String::from_utf8_lossy(msg.body()).into_owned();
					if report != self.link_report {
						self.link_report = report;
						self.link_report_change_ms = ctx.now_ms;
					}
				}
				Some(Signal::CallTalkerId) => {
					let talker = String::from_utf8_lossy(msg.body()).into_owned();
					// Only adopt a talker id while that caller is
					// actually being heard.
					if talker != self.talker_id && self.bridge_in.is_active_recently(ctx.now_ms) {
						info!("Input talker ID from {} set {talker}", self.remote_node);
						self.talker_id = talker;
						self.talker_id_change_ms = ctx.now_ms;
					}
				}
				Some(Signal::DtmfPress) => {
					let Some(p) = payload::Dtmf::from_bytes(msg.body()) else { return };
					self.process_dtmf_press(ctx, p.symbol as char);
				}
				Some(Signal::CallLevels) => {
					if let Some(p) = payload::CallLevels::from_bytes(msg.body()) {
						self.levels = p;
					}
				}
				_ => {}
			},
			_ => {}
		}
	}

	fn process_dtmf_press(&mut self, ctx: &Ctx, symbol: char) {
		if self.mode == Mode::Parrot {
			// Test sources on demand while parroting.
			match symbol {
				'1' => {
					info!("Starting sweep");
					tone::load_sweep(0.5, &mut self.play_queue);
					self.set_parrot_state(ParrotState::PlayingAfterRecord, ctx.now_ms);
				}
				'2' => {
					info!("Starting tone");
					tone::load_cw(0.5, 440.0, 50 * 5, &mut self.play_queue);
					self.set_parrot_state(ParrotState::PlayingAfterRecord, ctx.now_ms);
				}
				'3' => {
					info!("Playing white noise");
					for frame in ctx.white_noise {
						self.play_queue.push_back(*frame);
					}
					self.set_parrot_state(ParrotState::PlayingAfterRecord, ctx.now_ms);
				}
				_ => {}
			}
			return;
		}

		if symbol == '*' {
			self.dtmf_accumulator.clear();
		}
		self.dtmf_accumulator.push(symbol);
		self.last_dtmf_rx_ms = ctx.now_ms;
	}

	fn process_tts(&mut self, ctx: &Ctx, msg: &Message) {
		// Synthesised audio goes to the play queue regardless of mode.
		if msg.kind() == Kind::TtsAudio {
			let mut pcm = [0i16; BLOCK_48K];
			slin_decode(msg.body(), &mut pcm);
			self.play_queue.push_back(PcmFrame::new(&pcm));
			return;
		}

		// TTS_END drives the parrot prompts forward.
		if self.mode == Mode::Parrot {
			match self.parrot_state {
				ParrotState::TtsGreeting0 => self.set_parrot_state(ParrotState::PlayingGreeting0, ctx.now_ms),
				ParrotState::TtsGreeting1 => self.set_parrot_state(ParrotState::PlayingGreeting1, ctx.now_ms),
				ParrotState::TtsAfterRecord => {
					// The level report has been queued; the recording
					// follows it.
					for frame in &self.capture {
						self.play_queue.push_back(*frame);
					}
					self.set_parrot_state(ParrotState::PlayingAfterRecord, ctx.now_ms);
				}
				_ => {}
			}
		}
	}

	pub fn request_tts(&mut self, ctx: &Ctx, text: &str) {
		info!("Slot {} TTS: {text}", self.slot);
		let mut msg = Message::new(Kind::TtsReq, 0, text.as_bytes(), 0, ctx.now_ms);
		msg.src = Addr::new(ctx.bridge_bus, self.slot);
		let _ = ctx.tts_tx.send(msg);
	}

	fn request_net_test(&mut self, ctx: &Ctx) {
		let p = payload::NetDiagReq { node: self.remote_node.clone() };
		let mut msg = Message::new(Kind::NetDiagReq, 0, &p.to_bytes(), 0, ctx.now_ms);
		msg.src = Addr::new(ctx.bridge_bus, self.slot);
		let _ = ctx.net_tx.send(msg);
	}

	// ----- Audio tick ------------------------------------------------------

	/// Run the input pipeline for one tick, staging at most one frame
	/// of contribution, then any mode-specific work.
	pub fn audio_rate_tick(&mut self, ctx: &Ctx) {
		let mut produced = Vec::new();
		self.bridge_in.audio_rate_tick(ctx.now_ms, &mut produced);

		for msg in &produced {
			match self.mode {
				Mode::Normal => {
					if msg.kind() == Kind::Audio {
						let mut pcm = [0i16; BLOCK_48K];
						slin_decode(msg.body(), &mut pcm);
						self.stage_in = Some(PcmFrame::new(&pcm));
					}
				}
				Mode::Parrot => self.process_parrot_audio(ctx, msg),
				Mode::Tone => {}
			}
		}

		match self.mode {
			Mode::Parrot => self.parrot_tick(ctx),
			Mode::Tone => {
				// Keep a shallow backlog of tone so playout never runs
				// dry between ticks.
				if self.play_queue.len() < 2 {
					if let Some(gen) = &mut self.tone_gen {
						self.play_queue.push_back(gen.next_frame());
					}
				}
			}
			Mode::Normal => {}
		}
	}

	fn process_parrot_audio(&mut self, ctx: &Ctx, msg: &Message) {
		if msg.is_signal(Signal::RadioUnkey) {
			if self.parrot_state == ParrotState::Recording {
				info!("Record end (UNKEY)");
				// The grace period is handled in the tick so trailing
				// audio still lands in the capture.
			}
			return;
		}

		if msg.kind() != Kind::Audio {
			return;
		}

		let mut pcm = [0i16; BLOCK_48K];
		slin_decode(msg.body(), &mut pcm);
		let frame = PcmFrame::new(&pcm);

		let vad = frame.rms() > VAD_RMS;
		if vad {
			self.last_voice_activity_ms = ctx.now_ms;
		}

		match self.parrot_state {
			ParrotState::WaitingForRecord => {
				if vad {
					info!("Record start");
					self.capture.clear();
					self.capture.push(frame);
					self.record_started_ms = ctx.now_ms;
					self.set_parrot_state(ParrotState::Recording, ctx.now_ms);
				}
			}
			ParrotState::Recording => {
				if self.capture.len() < PARROT_CAPTURE_LIMIT {
					self.capture.push(frame);
				}
			}
			_ => {}
		}
	}

	fn parrot_tick(&mut self, ctx: &Ctx) {
		let now = ctx.now_ms;
		let in_state_ms = now.wrapping_sub(self.parrot_state_start_ms);

		match self.parrot_state {
			ParrotState::Connected => {
				// Give key-up clicks a moment to pass, then check the
				// path quality.
				if in_state_ms > 2000 {
					self.request_net_test(ctx);
					self.set_parrot_state(ParrotState::WaitingForNetTest, now);
				}
			}
			ParrotState::WaitingForNetTest => {
				// The result normally arrives as a message; don't wait
				// forever on a dead diagnostic channel.
				if in_state_ms > 10_000 {
					self.set_parrot_state(ParrotState::Greeting0, now);
				}
			}
			ParrotState::Greeting0 => {
				self.request_tts(ctx, "Parrot test. Transmit and I will play back.");
				self.set_parrot_state(ParrotState::TtsGreeting0, now);
			}
			ParrotState::PlayingGreeting0 => {
				if self.play_queue.is_empty() {
					self.set_parrot_state(ParrotState::Greeting1, now);
				}
			}
			ParrotState::Greeting1 => {
				let text = match self.net_result {
					Some(res) if res.code == 0 => format!("Network delay {} milliseconds.", res.rtt_ms),
					Some(res) => format!("Network test failed, code {}.", res.code),
					None => "Network test unavailable.".to_string(),
				};
				self.request_tts(ctx, &text);
				self.set_parrot_state(ParrotState::TtsGreeting1, now);
			}
			ParrotState::PlayingGreeting1 => {
				if self.play_queue.is_empty() {
					self.set_parrot_state(ParrotState::WaitingForRecord, now);
				}
			}
			ParrotState::Recording => {
				let silence = now.wrapping_sub(self.last_voice_activity_ms) > PARROT_RECORD_TIMEOUT_MS;

				let unkey_ms = self.bridge_in.last_unkey_ms();
				let unkeyed = unkey_ms != 0 && unkey_ms >= self.record_started_ms && now.wrapping_sub(unkey_ms) > PARROT_UNKEY_GRACE_MS;

				if silence || unkeyed {
					info!("Record end ({} frames)", self.capture.len());
					self.set_parrot_state(ParrotState::PauseAfterRecord, now);
				}
			}
			ParrotState::PauseAfterRecord => {
				if in_state_ms > 750 {
					let (peak_db, rms_db) = self.measure_capture();
					let text = format!("Peak {} d B. Average {} d B.", peak_db, rms_db);
					self.request_tts(ctx, &text);
					self.set_parrot_state(ParrotState::TtsAfterRecord, now);
				}
			}
			ParrotState::PlayingAfterRecord => {
				if self.play_queue.is_empty() {
					self.set_parrot_state(ParrotState::WaitingForRecord, now);
				}
			}
			// The TTS_* states advance on TTS_END in process_tts, and
			// WaitingForRecord advances on voice activity.
			_ => {}
		}
	}

	/// Peak and RMS power of the recording in whole dB, with the first
	/// and last 300 ms trimmed to drop key clicks and squelch tails.
	fn measure_capture(&self) -> (i32, i32) {
		let body: &[PcmFrame] = if self.capture.len() > LEVEL_TRIM_FRAMES * 2 {
			&self.capture[LEVEL_TRIM_FRAMES..self.capture.len() - LEVEL_TRIM_FRAMES]
		} else {
			&self.capture
		};

		if body.is_empty() {
			return (-99, -99);
		}

		let peak = body.iter().map(|f| f.peak()).fold(0.0, f32::max);
		let mean_sq: f32 = body.iter().map(|f| {
			let r = f.rms();
			r * r
		}).sum::<f32>() / body.len() as f32;

		(pcm::to_db(peak).round() as i32, pcm::to_db(mean_sq.sqrt()).round() as i32)
	}

	// ----- Mixing ----------------------------------------------------------

	pub fn has_input_audio(&self) -> bool {
		self.stage_in.is_some()
	}

	pub fn clear_input_audio(&mut self) {
		self.stage_in = None;
	}

	/// Add this slot's staged input into the mix accumulator, scaled by
	/// the contributor count.
	pub fn extract_input_audio(&self, mix: &mut [i32; BLOCK_48K], mix_count: i32) {
		if let Some(frame) = &self.stage_in {
			for (acc, &s) in mix.iter_mut().zip(frame.samples()) {
				*acc += s as i32 / mix_count;
			}
		}
	}

	pub fn set_conference_output(&mut self, mix: &[i32; BLOCK_48K], mix_count: i32) {
		if mix_count == 0 {
			return;
		}
		let mut frame = PcmFrame::default();
		for (o, &v) in frame.samples_mut().iter_mut().zip(mix.iter()) {
			*o = v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
		}
		self.stage_out = Some(frame);
	}

	/// Compose this tick's output: synthetic material from the play
	/// queue, conference audio, or both averaged. The trailing edge of
	/// output raises a generated UNKEY towards the network.
	pub fn produce_output(&mut self, ctx: &Ctx) {
		let mut output = [0i16; BLOCK_48K];
		let mut sources = 0i32;

		if let Some(front) = self.play_queue.pop_front() {
			sources += 1;
			output.copy_from_slice(front.samples());
		}

		if self.mode == Mode::Normal {
			if let Some(stage) = self.stage_out.take() {
				sources += 1;
				for (o, &s) in output.iter_mut().zip(stage.samples()) {
					*o = *o / sources as i16 + s / sources as i16;
				}
			}
		} else {
			self.stage_out = None;
		}

		if sources > 0 {
			let mut code = [0u8; BLOCK_48K * 2];
			slin_encode(&output, &mut code);

			let mut msg = Message::audio(Codec::SLIN48, &code, 0, ctx.now_ms);
			msg.src = Addr::new(ctx.bridge_bus, self.slot);
			msg.dst = Addr::new(self.line_id, self.call_id);

			let mut out = Vec::new();
			self.bridge_out.consume(msg, ctx.now_ms, &mut out);
			for m in out {
				ctx.bus.fwd(m);
			}

			self.last_cycle_generated_output = true;
		} else {
			if self.last_cycle_generated_output {
				let mut msg = Message::signal(Signal::RadioUnkeyGen, 0, ctx.now_ms);
				msg.src = Addr::new(ctx.bridge_bus, self.slot);
				msg.dst = Addr::new(self.line_id, self.call_id);

				let mut out = Vec::new();
				self.bridge_out.consume(msg, ctx.now_ms, &mut out);
				for m in out {
					ctx.bus.fwd(m);
				}
			}
			self.last_cycle_generated_output = false;
		}
	}

	// ----- Slow ticks ------------------------------------------------------

	/// Once a second: close out a completed DTMF command, and keep the
	/// talker id asserted while transmitting.
	pub fn one_sec_tick(&mut self, ctx: &Ctx) -> Option<DtmfCommand> {
		if self.bridge_out.is_active_recently(ctx.now_ms) && !self.output_talker_id.is_empty() {
			self.signal_talker(ctx);
		}

		if !self.dtmf_accumulator.is_empty() && ctx.now_ms.wrapping_sub(self.last_dtmf_rx_ms) > DTMF_WINDOW_MS {
			let command = core::mem::take(&mut self.dtmf_accumulator);
			return Some(DtmfCommand { slot: self.slot as usize, command });
		}

		None
	}

	pub fn set_output_talker_id(&mut self, talker: &str) {
		if self.output_talker_id != talker {
			info!("Output talker ID to {} set to {talker}", self.remote_node);
			self.output_talker_id = talker.to_string();
		}
	}

	fn signal_talker(&mut self, ctx: &Ctx) {
		let mut msg = Message::signal_with(Signal::CallTalkerId, self.output_talker_id.as_bytes(), 0, ctx.now_ms);
		msg.src = Addr::new(ctx.bridge_bus, self.slot);
		msg.dst = Addr::new(self.line_id, self.call_id);
		ctx.bus.fwd(msg);
	}

	/// A UI-facing snapshot of this slot.
	pub fn status(&self, now_ms: u32) -> CallStatus {
		let connections = self
			.link_report
			.split(',')
			.map(str::trim)
			.filter(|t| !t.is_empty())
			.take(30)
			.map(|t| {
				// Strip the connection-mode prefix (T/R/C) when present.
				let node = t.strip_prefix(&['T', 'R', 'C'][..]).unwrap_or(t);
				node.to_string()
			})
			.collect();

		CallStatus {
			remote_node: self.remote_node.clone(),
			permanent: self.permanent,
			rx_active: self.bridge_in.is_active_recently(now_ms),
			talker_id: self.talker_id.clone(),
			connections,
		}
	}

	pub(crate) fn parrot_state(&self) -> ParrotState {
		self.parrot_state
	}
}

/// Per-call status for an external UI.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CallStatus {
	pub remote_node: String,
	pub permanent: bool,
	pub rx_active: bool,
	pub talker_id: String,
	pub connections: Vec<String>,
}
