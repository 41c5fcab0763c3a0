//! The conference bridge: a fixed roster of [`call::BridgeCall`] slots
//! whose 20 ms tick mixes every active talker into every listener's
//! output, with per-call transcoding at the edges. Speech synthesis and
//! network probing run on worker threads behind MPSC channels, waking
//! the event loop through a self-pipe.

pub mod call;
pub mod input;
pub mod kerchunk;
pub mod netdiag;
pub mod output;
pub mod pcm;
pub mod plc;
pub mod resample;
pub mod seqbuf;
pub mod tone;
pub mod transcode;
pub mod tts;

use core::net::SocketAddr;
use core::time::Duration;

use bus::{payload, Message, Signal, UNKNOWN_CALL};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use runtime::tick::Ticker;
use runtime::{time, Io, Wake};
use stakker::{fwd_to, Fwd, CX};
use wire::Codec;

use crate::call::{BridgeCall, CallStatus, Ctx, DtmfCommand, Mode};
use crate::pcm::{PcmFrame, BLOCK_48K};
use crate::tts::Synthesizer;

pub struct Config {
	pub bus_id: u32,
	/// The line that receives CALL_NODE / DROP requests and outbound
	/// media.
	pub network_bus_id: u32,
	pub node_number: String,
	/// Spoken to newly connected callers; empty disables.
	pub greeting: String,
	pub default_mode: Mode,
	/// Nodes whose leading audio runs through the kerchunk filter.
	pub kerchunk_nodes: Vec<String>,
	pub kerchunk_evaluation_ms: u32,
	pub max_calls: usize,
	/// Resolver and directory root for the network-diagnostic worker.
	pub resolver: SocketAddr,
	pub dns_root: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bus_id: 2,
			network_bus_id: 1,
			node_number: String::new(),
			greeting: String::new(),
			default_mode: Mode::Normal,
			kerchunk_nodes: Vec::new(),
			kerchunk_evaluation_ms: 3000,
			max_calls: 8,
			resolver: SocketAddr::new(core::net::Ipv4Addr::new(208, 67, 222, 222).into(), 53),
			dns_root: "allstarlink.org".into(),
		}
	}
}

pub struct Bridge {
	bus_id: u32,
	network_bus_id: u32,
	node_number: String,
	greeting: String,
	default_mode: Mode,
	kerchunk_nodes: Vec<String>,
	kerchunk_evaluation_ms: u32,

	bus: Fwd<Message>,
	calls: Vec<BridgeCall>,
	white_noise: Vec<PcmFrame>,

	tts_tx: Sender<Message>,
	net_tx: Sender<Message>,
	worker_rx: Receiver<Message>,
	/// Keeps the wake socket registered with the poll set.
	_wake_io: Io,

	t_audio: Ticker,
	t_1s: Ticker,
	t_10s: Ticker,
}

impl Bridge {
	pub fn init(cx: CX![], cfg: Config, bus: Fwd<Message>, synth: Box<dyn Synthesizer>) -> Option<Self> {
		let (wake, wake_io) = Wake::new(fwd_to!([cx], worker_wake() as (SocketAddr, Vec<u8>))).ok()?;

		let (tts_tx, tts_rx) = crossbeam_channel::unbounded();
		let (net_tx, net_rx) = crossbeam_channel::unbounded();
		let (res_tx, worker_rx) = crossbeam_channel::unbounded();

		tts::spawn(synth, tts_rx, res_tx.clone(), wake.handle().ok()?);
		netdiag::spawn(
			netdiag::NetDiagConfig {
				resolver: cfg.resolver,
				dns_root: cfg.dns_root.clone(),
				timeout: Duration::from_secs(1),
			},
			net_rx,
			res_tx,
			wake.handle().ok()?,
		);

		let calls = (0..cfg.max_calls as u32).map(BridgeCall::new).collect();

		let now = cx.now();
		let mut this = Self {
			bus_id: cfg.bus_id,
			network_bus_id: cfg.network_bus_id,
			node_number: cfg.node_number,
			greeting: cfg.greeting,
			default_mode: cfg.default_mode,
			kerchunk_nodes: cfg.kerchunk_nodes,
			kerchunk_evaluation_ms: cfg.kerchunk_evaluation_ms,
			bus,
			calls,
			// Five seconds of pre-built noise for the parrot's '3' test.
			white_noise: tone::make_white_noise(250, 0.5),
			tts_tx,
			net_tx,
			worker_rx,
			_wake_io: wake_io,
			t_audio: Ticker::new(now, Duration::from_millis(20)),
			t_1s: Ticker::new(now, Duration::from_secs(1)),
			t_10s: Ticker::new(now, Duration::from_secs(10)),
		};

		this.arm_audio(cx);
		this.arm_1s(cx);
		this.arm_10s(cx);

		Some(this)
	}

	fn ctx<'a>(
		now_ms: u32,
		bus: &'a Fwd<Message>,
		tts_tx: &'a Sender<Message>,
		net_tx: &'a Sender<Message>,
		bridge_bus: u32,
		white_noise: &'a [PcmFrame],
	) -> Ctx<'a> {
		Ctx {
			now_ms,
			bus,
			tts_tx,
			net_tx,
			bridge_bus,
			white_noise,
		}
	}

	// ----- Timers ----------------------------------------------------------

	fn arm_audio(&mut self, cx: CX![]) {
		let delay = self.t_audio.next_delay(cx.now());
		let actor = cx.access_actor().clone();
		cx.after(delay, move |s| actor.apply(s, |this, cx| this.tick_audio(cx)));
	}

	fn arm_1s(&mut self, cx: CX![]) {
		let delay = self.t_1s.next_delay(cx.now());
		let actor = cx.access_actor().clone();
		cx.after(delay, move |s| actor.apply(s, |this, cx| this.tick_1s(cx)));
	}

	fn arm_10s(&mut self, cx: CX![]) {
		let delay = self.t_10s.next_delay(cx.now());
		let actor = cx.access_actor().clone();
		cx.after(delay, move |s| actor.apply(s, |this, cx| this.tick_10s(cx)));
	}

	/// The heart of the conference. Each tick: every slot prepares an
	/// input frame, every listener gets a custom mix of the others (or
	/// of everyone, with echo on), then every slot emits its output and
	/// the contributions are cleared.
	fn tick_audio(&mut self, cx: CX![]) {
		self.arm_audio(cx);

		let now_ms = time::ms(cx);
		let ctx = Self::ctx(
			now_ms,
			&self.bus,
			&self.tts_tx,
			&self.net_tx,
			self.bus_id,
			&self.white_noise,
		);

		for call in &mut self.calls {
			if call.active {
				call.audio_rate_tick(&ctx);
			}
		}

		run_mixer(&mut self.calls);

		for call in &mut self.calls {
			if call.active {
				call.produce_output(&ctx);
			}
		}

		for call in &mut self.calls {
			call.clear_input_audio();
		}
	}

	fn tick_1s(&mut self, cx: CX![]) {
		self.arm_1s(cx);

		let now_ms = time::ms(cx);

		// Completed DTMF commands are collected first, then dispatched;
		// dispatch can touch any slot.
		let mut commands: Vec<DtmfCommand> = Vec::new();
		{
			let ctx = Self::ctx(
				now_ms,
				&self.bus,
				&self.tts_tx,
				&self.net_tx,
				self.bus_id,
				&self.white_noise,
			);

			for call in &mut self.calls {
				if call.active {
					if let Some(cmd) = call.one_sec_tick(&ctx) {
						commands.push(cmd);
					}
				}
			}
		}

		for cmd in commands {
			self.process_dtmf_command(now_ms, cmd);
		}

		// Propagate the current talker's id to every other call.
		let talker = self
			.calls
			.iter()
			.find(|c| c.active && c.is_normal() && c.bridge_in.is_active_recently(now_ms))
			.map(|c| c.talker_id.clone());

		if let Some(talker) = talker {
			for call in &mut self.calls {
				if call.active && call.is_normal() {
					call.set_output_talker_id(&talker);
				}
			}
		}
	}

	fn tick_10s(&mut self, cx: CX![]) {
		self.arm_10s(cx);

		let count = self.calls.iter().filter(|c| c.active).count();
		if count > 0 {
			debug!("Bridge slots active: {count}");
		}
	}

	// ----- Worker results --------------------------------------------------

	/// The self-pipe fired: drain everything the workers produced.
	fn worker_wake(&mut self, cx: CX![], _src: SocketAddr, _buf: Vec<u8>) {
		let now_ms = time::ms(cx);
		let ctx = Self::ctx(
			now_ms,
			&self.bus,
			&self.tts_tx,
			&self.net_tx,
			self.bus_id,
			&self.white_noise,
		);

		while let Ok(msg) = self.worker_rx.try_recv() {
			// Workers echo the request's source: (bridge bus, slot).
			let slot = msg.src.call as usize;
			match self.calls.get_mut(slot) {
				Some(call) if call.active => call.consume(&ctx, &msg),
				_ => {}
			}
		}
	}

	// ----- Bus input -------------------------------------------------------

	pub fn consume(&mut self, cx: CX![], msg: Message) {
		let now_ms = time::ms(cx);

		match msg.as_signal() {
			Some(Signal::CallStart) => self.call_start(now_ms, &msg),
			Some(Signal::CallEnd) => self.call_end(now_ms, &msg),
			Some(Signal::CallFailed) => self.call_failed(now_ms, &msg),
			_ => {
				let ctx = Self::ctx(
					now_ms,
					&self.bus,
					&self.tts_tx,
					&self.net_tx,
					self.bus_id,
					&self.white_noise,
				);

				for call in &mut self.calls {
					if call.belongs_to(&msg) {
						call.consume(&ctx, &msg);
						break;
					}
				}
			}
		}
	}

	fn call_start(&mut self, now_ms: u32, msg: &Message) {
		let Some(p) = payload::CallStart::from_bytes(msg.body()) else {
			warn!("Malformed CALL_START payload");
			return;
		};

		// Replace any stale slot for this (line, call) identity.
		for call in &mut self.calls {
			if call.belongs_to(msg) {
				call.reset();
			}
		}

		let Some(idx) = self.calls.iter().position(|c| !c.active) else {
			info!("Max sessions, rejecting call {}", msg.src.call);
			let reject = Message::signal(Signal::CallTerminate, 0, now_ms)
				.with_route(bus::Addr::bus(self.bus_id), msg.src);
			self.bus.fwd(reject);
			return;
		};

		info!(
			"Call {}:{} started node {} CODEC {:#010x}, jbBypass {}, echo {}, validated {}",
			msg.src.bus, msg.src.call, p.remote_number, p.codec, p.bypass_jitter_buffer, p.echo, p.source_addr_validated
		);

		let use_kerchunk = self.kerchunk_nodes.iter().any(|n| *n == p.remote_number);
		if use_kerchunk {
			info!("Enabling kerchunk filter, evaluation {} ms", self.kerchunk_evaluation_ms);
		}

		let ctx = Self::ctx(
			now_ms,
			&self.bus,
			&self.tts_tx,
			&self.net_tx,
			self.bus_id,
			&self.white_noise,
		);

		let default_mode = self.default_mode;
		let kerchunk_ms = self.kerchunk_evaluation_ms;
		self.calls[idx].setup(
			&ctx,
			msg.src.bus,
			msg.src.call,
			p.start_ms,
			Codec(p.codec),
			&p,
			default_mode,
			use_kerchunk,
			kerchunk_ms,
		);

		// Greet callers who dialled in; not calls we placed ourselves.
		let greeting = self.greeting.clone();
		if !p.originated && self.calls[idx].is_normal() && !greeting.is_empty() {
			self.calls[idx].request_tts(&ctx, &greeting);
		}

		let prompt = format!("Node {} connected.", spell_digits(&p.remote_number));
		announce_to_commanders(&mut self.calls, &ctx, &prompt, Some(idx));
	}

	fn call_end(&mut self, now_ms: u32, msg: &Message) {
		let Some(p) = payload::CallEnd::from_bytes(msg.body()) else {
			warn!("Malformed CALL_END payload");
			return;
		};

		info!("Call ended {}:{} ({})", msg.src.bus, msg.src.call, p.remote_number);

		for call in &mut self.calls {
			if call.belongs_to(msg) {
				call.reset();
			}
		}

		let ctx = Self::ctx(
			now_ms,
			&self.bus,
			&self.tts_tx,
			&self.net_tx,
			self.bus_id,
			&self.white_noise,
		);
		let prompt = format!("Node {} disconnected.", spell_digits(&p.remote_number));
		announce_to_commanders(&mut self.calls, &ctx, &prompt, None);
	}

	fn call_failed(&mut self, now_ms: u32, msg: &Message) {
		let Some(p) = payload::CallFailed::from_bytes(msg.body()) else {
			warn!("Malformed CALL_FAILED payload");
			return;
		};

		// Keep the spoken target to a sane length.
		let target: String = p.target_number.chars().take(10).collect();
		let prompt = format!("Unable to connect to node {}. {}.", spell_digits(&target), p.message);

		let ctx = Self::ctx(
			now_ms,
			&self.bus,
			&self.tts_tx,
			&self.net_tx,
			self.bus_id,
			&self.white_noise,
		);
		announce_to_commanders(&mut self.calls, &ctx, &prompt, None);
	}


	// ----- DTMF command dispatch -------------------------------------------

	fn process_dtmf_command(&mut self, now_ms: u32, cmd: DtmfCommand) {
		match classify_dtmf(&cmd.command) {
			DtmfAction::CallNode(target) => {
				info!("Request to call {} -> {target}", self.node_number);
				let p = payload::CallNode {
					local_number: self.node_number.clone(),
					target_number: target,
				};
				let msg = Message::signal_with(Signal::CallNode, &p.to_bytes(), 0, now_ms).with_route(
					bus::Addr::new(self.bus_id, cmd.slot as u32),
					bus::Addr::new(self.network_bus_id, UNKNOWN_CALL),
				);
				self.bus.fwd(msg);
			}
			DtmfAction::DropAllOutbound => {
				info!("Request to disconnect all");
				let msg = Message::signal(Signal::DropAllCallsOutbound, 0, now_ms).with_route(
					bus::Addr::new(self.bus_id, cmd.slot as u32),
					bus::Addr::new(self.network_bus_id, UNKNOWN_CALL),
				);
				self.bus.fwd(msg);
			}
			DtmfAction::SpeakStatus => {
				let nodes: Vec<String> = self
					.calls
					.iter()
					.filter(|c| c.active)
					.map(|c| spell_digits(&c.remote_node))
					.collect();

				let prompt = if nodes.is_empty() {
					"Not connected.".to_string()
				} else {
					format!("Connected to {}.", nodes.join(" and "))
				};

				let ctx = Self::ctx(
					now_ms,
					&self.bus,
					&self.tts_tx,
					&self.net_tx,
					self.bus_id,
					&self.white_noise,
				);
				if let Some(call) = self.calls.get_mut(cmd.slot) {
					call.request_tts(&ctx, &prompt);
				}
			}
			DtmfAction::EnterParrot => {
				if let Some(call) = self.calls.get_mut(cmd.slot) {
					call.enter_parrot_mode(now_ms);
				}
			}
			DtmfAction::Unknown => {
				info!("Unrecognised DTMF command ignored {:?}", cmd.command);
			}
		}
	}

	pub fn statuses(&self, now_ms: u32) -> Vec<CallStatus> {
		self.calls.iter().filter(|c| c.active).map(|c| c.status(now_ms)).collect()
	}
}

/// Speak a status prompt to every normal call that has commanded
/// something recently, except `skip`.
fn announce_to_commanders(calls: &mut [BridgeCall], ctx: &Ctx, prompt: &str, skip: Option<usize>) {
	for (i, call) in calls.iter_mut().enumerate() {
		if Some(i) == skip {
			continue;
		}
		if call.active && call.is_normal() && call.is_recent_commander(ctx.now_ms) {
			call.request_tts(ctx, prompt);
		}
	}
}

/// Per-listener mixing: each active slot receives the sum of every
/// other contributing slot's staged input, each contribution scaled by
/// the contributor count (echoing slots also hear themselves).
fn run_mixer(calls: &mut [BridgeCall]) {
	for i in 0..calls.len() {
		if !calls[i].active {
			continue;
		}

		let mut mix_count = 0i32;
		for (j, other) in calls.iter().enumerate() {
			if !other.active || !other.has_input_audio() {
				continue;
			}
			if i == j && !other.echo {
				continue;
			}
			mix_count += 1;
		}

		let mut mix = [0i32; BLOCK_48K];
		if mix_count > 0 {
			for (j, other) in calls.iter().enumerate() {
				if !other.active || !other.has_input_audio() {
					continue;
				}
				if i == j && !other.echo {
					continue;
				}
				other.extract_input_audio(&mut mix, mix_count);
			}
		}

		calls[i].set_conference_output(&mix, mix_count);
	}
}

/// Commands accumulated from DTMF: `*3<node>` calls out, `*71` drops
/// all outbound links, `*70` speaks the link status, `*76` turns the
/// call into a parrot.
#[derive(Clone, PartialEq, Eq, Debug)]
enum DtmfAction {
	CallNode(String),
	DropAllOutbound,
	SpeakStatus,
	EnterParrot,
	Unknown,
}

fn classify_dtmf(cmd: &str) -> DtmfAction {
	if let Some(target) = cmd.strip_prefix("*3") {
		if !target.is_empty() {
			return DtmfAction::CallNode(target.to_string());
		}
	}
	if cmd.starts_with("*71") {
		return DtmfAction::DropAllOutbound;
	}
	if cmd.starts_with("*70") {
		return DtmfAction::SpeakStatus;
	}
	if cmd == "*76" {
		return DtmfAction::EnterParrot;
	}
	DtmfAction::Unknown
}

/// Put spaces between characters so digits are spoken one at a time.
fn spell_digits(text: &str) -> String {
	let mut out = String::new();
	for (i, c) in text.chars().enumerate() {
		if i > 0 {
			out.push(' ');
		}
		out.push(c);
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use core::cell::RefCell;
	use std::rc::Rc;

	use crate::transcode::slin_decode;
	use bus::Kind;

	fn collector() -> (Fwd<Message>, Rc<RefCell<Vec<Message>>>) {
		let store = Rc::new(RefCell::new(Vec::new()));
		let inner = store.clone();
		(Fwd::new(move |m| inner.borrow_mut().push(m)), store)
	}

	fn test_ctx<'a>(
		now_ms: u32,
		bus: &'a Fwd<Message>,
		tts: &'a Sender<Message>,
		net: &'a Sender<Message>,
		noise: &'a [PcmFrame],
	) -> Ctx<'a> {
		Ctx {
			now_ms,
			bus,
			tts_tx: tts,
			net_tx: net,
			bridge_bus: 2,
			white_noise: noise,
		}
	}

	fn normal_slot(slot: u32, line: u32, call: u32) -> BridgeCall {
		let (bus, _store) = collector();
		let (tts, _) = crossbeam_channel::unbounded();
		let (net, _) = crossbeam_channel::unbounded();
		let ctx = test_ctx(0, &bus, &tts, &net, &[]);

		let mut c = BridgeCall::new(slot);
		let p = payload::CallStart {
			codec: Codec::SLIN48.0,
			remote_number: format!("6105{slot}"),
			..Default::default()
		};
		c.setup(&ctx, line, call, 0, Codec::SLIN48, &p, Mode::Normal, false, 3000);
		c
	}

	/// Three slots: 0.5 full scale, 0.25 full scale, silent. No echo.
	/// Slot one hears slot two alone; the silent slot hears the other
	/// two averaged.
	#[test]
	fn mixer_scales_by_contributor_count() {
		let mut calls = vec![normal_slot(0, 1, 20), normal_slot(1, 1, 21), normal_slot(2, 1, 22)];

		calls[0].stage_in = Some(PcmFrame::new(&[16384; BLOCK_48K]));
		calls[1].stage_in = Some(PcmFrame::new(&[8192; BLOCK_48K]));
		// Slot 2 is active but silent: no staged input.

		run_mixer(&mut calls);

		let (bus, store) = collector();
		let (tts, _) = crossbeam_channel::unbounded();
		let (net, _) = crossbeam_channel::unbounded();
		let ctx = test_ctx(100, &bus, &tts, &net, &[]);

		for call in &mut calls {
			call.produce_output(&ctx);
		}

		let msgs = store.borrow();
		assert_eq!(msgs.len(), 3);

		let sample_of = |m: &Message| {
			assert_eq!(m.kind(), Kind::Audio);
			assert_eq!(m.codec(), Codec::SLIN48);
			let mut pcm = [0i16; BLOCK_48K];
			slin_decode(m.body(), &mut pcm);
			pcm[100]
		};

		// Slot 0 hears slot 1 alone: 8192 / 1.
		assert_eq!(sample_of(&msgs[0]), 8192);
		// Slot 1 hears slot 0 alone: 16384 / 1.
		assert_eq!(sample_of(&msgs[1]), 16384);
		// Slot 2 hears both, averaged: 16384/2 + 8192/2 = 12288.
		assert_eq!(sample_of(&msgs[2]), 12288);
	}

	#[test]
	fn echo_includes_own_audio() {
		let mut calls = vec![normal_slot(0, 1, 20)];
		calls[0].echo = true;
		calls[0].stage_in = Some(PcmFrame::new(&[10000; BLOCK_48K]));

		run_mixer(&mut calls);

		let (bus, store) = collector();
		let (tts, _) = crossbeam_channel::unbounded();
		let (net, _) = crossbeam_channel::unbounded();
		let ctx = test_ctx(100, &bus, &tts, &net, &[]);
		calls[0].produce_output(&ctx);

		let msgs = store.borrow();
		assert_eq!(msgs.len(), 1);
		let mut pcm = [0i16; BLOCK_48K];
		slin_decode(msgs[0].body(), &mut pcm);
		assert_eq!(pcm[0], 10000);
	}

	#[test]
	fn silent_tick_after_output_generates_unkey() {
		let mut calls = vec![normal_slot(0, 1, 20), normal_slot(1, 1, 21)];
		calls[1].stage_in = Some(PcmFrame::new(&[8192; BLOCK_48K]));

		run_mixer(&mut calls);

		let (bus, store) = collector();
		let (tts, _) = crossbeam_channel::unbounded();
		let (net, _) = crossbeam_channel::unbounded();

		{
			let ctx = test_ctx(100, &bus, &tts, &net, &[]);
			calls[0].produce_output(&ctx);
		}
		calls[0].clear_input_audio();
		calls[1].clear_input_audio();

		// Next tick: nothing staged, so the mixer yields nothing and
		// the trailing edge emits a generated UNKEY.
		run_mixer(&mut calls);
		{
			let ctx = test_ctx(120, &bus, &tts, &net, &[]);
			calls[0].produce_output(&ctx);
		}

		let msgs = store.borrow();
		assert_eq!(msgs.len(), 2);
		assert!(msgs[1].is_signal(Signal::RadioUnkeyGen));
		assert_eq!(msgs[1].dst, bus::Addr::new(1, 20));
	}

	/// The DTMF command scenario: `*361057` collected symbol by symbol,
	/// completed by 2.6 s of silence, dispatched as a CALL_NODE.
	#[test]
	fn dtmf_command_accumulates_and_completes() {
		let (bus, _store) = collector();
		let (tts, _) = crossbeam_channel::unbounded();
		let (net, _) = crossbeam_channel::unbounded();

		let mut call = normal_slot(0, 1, 20);

		let mut t = 1000;
		for symbol in ['*', '3', '6', '1', '0', '5', '7'] {
			let ctx = test_ctx(t, &bus, &tts, &net, &[]);
			let p = payload::Dtmf { symbol: symbol as u8 };
			let msg = Message::signal_with(Signal::DtmfPress, &p.to_bytes(), 0, t);
			call.consume(&ctx, &msg);
			t += 100;
		}

		// Still inside the window: no command yet.
		let ctx = test_ctx(t + 1000, &bus, &tts, &net, &[]);
		assert!(call.one_sec_tick(&ctx).is_none());

		// 2.6 s after the last symbol: the command completes.
		let ctx = test_ctx(t + 2600, &bus, &tts, &net, &[]);
		let cmd = call.one_sec_tick(&ctx).expect("command");
		assert_eq!(cmd.command, "*361057");

		assert_eq!(classify_dtmf(&cmd.command), DtmfAction::CallNode("61057".into()));
		assert!(call.is_recent_commander(t + 2600));
	}

	#[test]
	fn dtmf_classification() {
		assert_eq!(classify_dtmf("*361057"), DtmfAction::CallNode("61057".into()));
		assert_eq!(classify_dtmf("*71"), DtmfAction::DropAllOutbound);
		assert_eq!(classify_dtmf("*70"), DtmfAction::SpeakStatus);
		assert_eq!(classify_dtmf("*76"), DtmfAction::EnterParrot);
		assert_eq!(classify_dtmf("*99"), DtmfAction::Unknown);
		assert_eq!(classify_dtmf("*3"), DtmfAction::Unknown);
	}

	#[test]
	fn spell_digits_spaces_characters() {
		assert_eq!(spell_digits("61057"), "6 1 0 5 7");
		assert_eq!(spell_digits(""), "");
	}

	/// A fresh parrot call walks its greeting states: net test, two
	/// prompts, then waiting for a recording.
	#[test]
	fn parrot_walks_greeting_states() {
		use crate::call::ParrotState;

		let (bus, _store) = collector();
		let (tts, tts_rx) = crossbeam_channel::unbounded();
		let (net, net_rx) = crossbeam_channel::unbounded();

		let mut call = normal_slot(0, 1, 20);
		call.enter_parrot_mode(0);
		assert_eq!(call.parrot_state(), ParrotState::Connected);

		// After the settling delay the net test goes out.
		let ctx = test_ctx(2100, &bus, &tts, &net, &[]);
		call.audio_rate_tick(&ctx);
		assert_eq!(call.parrot_state(), ParrotState::WaitingForNetTest);
		assert_eq!(net_rx.try_recv().unwrap().kind(), Kind::NetDiagReq);

		// The diagnostic response starts the first greeting.
		let res = payload::NetDiagRes { code: 0, rtt_ms: 48 };
		let msg = Message::new(Kind::NetDiagRes, 0, &res.to_bytes(), 0, 2200);
		call.consume(&ctx, &msg);
		assert_eq!(call.parrot_state(), ParrotState::Greeting0);

		let ctx = test_ctx(2300, &bus, &tts, &net, &[]);
		call.audio_rate_tick(&ctx);
		assert_eq!(call.parrot_state(), ParrotState::TtsGreeting0);
		assert_eq!(tts_rx.try_recv().unwrap().kind(), Kind::TtsReq);

		// TTS completes; the queue is empty so playback finishes at
		// once and the second greeting follows.
		let end = Message::new(Kind::TtsEnd, 0, &[], 0, 2400);
		call.consume(&ctx, &end);
		assert_eq!(call.parrot_state(), ParrotState::PlayingGreeting0);

		let ctx = test_ctx(2500, &bus, &tts, &net, &[]);
		call.audio_rate_tick(&ctx);
		assert_eq!(call.parrot_state(), ParrotState::Greeting1);

		let ctx = test_ctx(2520, &bus, &tts, &net, &[]);
		call.audio_rate_tick(&ctx);
		assert_eq!(call.parrot_state(), ParrotState::TtsGreeting1);
		let req = tts_rx.try_recv().unwrap();
		assert!(String::from_utf8_lossy(req.body()).contains("48"));

		call.consume(&ctx, &end);
		let ctx = test_ctx(2560, &bus, &tts, &net, &[]);
		call.audio_rate_tick(&ctx);
		assert_eq!(call.parrot_state(), ParrotState::WaitingForRecord);
	}
}
