//! The IAX2 line engine: one actor per UDP listening socket, owning a
//! bounded set of call slots and the DNS socket that resolves peers in
//! the node directory. Inbound datagrams demultiplex to call slots;
//! outbound traffic arrives as bus messages from the conference bridge.

pub mod auth;
pub mod call;
mod dnsflow;
mod inbound;
mod outbound;
pub mod retx;

use core::net::{Ipv4Addr, SocketAddr};
use core::time::Duration;
use std::net::UdpSocket;

use bus::{payload, Message, Signal};
use ed25519_dalek::SigningKey;
use log::{error, info, warn};
use runtime::tick::Ticker;
use runtime::{time, Io};
use stakker::{fwd_to, CX};
use utils::error::{LogErr, Result};
use wire::Codec;

use crate::call::{Call, Side, State};

/// Hang up a call that has received nothing at all for this long.
const INACTIVITY_TIMEOUT_MS: u32 = 40 * 1000;

/// How long a terminated call lingers so its retransmission buffer can
/// drain before the slot is recycled.
const TERMINATION_TIMEOUT_MS: u32 = 5 * 1000;

/// How long the callee has to react to a NEW.
const CALL_INITIATION_TIMEOUT_MS: u32 = 2 * 1000;

const NORMAL_PING_INTERVAL_MS: u32 = 10 * 1000;
/// The first few pings run fast to bootstrap the delay estimator.
const FAST_PING_INTERVAL_MS: u32 = 2 * 1000;
const FAST_PING_COUNT: u32 = 5;
const LAGRQ_INTERVAL_MS: u32 = 10 * 1000;

/// How a caller must prove itself before an inbound call is accepted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AuthMode {
	/// No source validation, no challenge.
	Open,
	/// Call token plus source address checked against the directory.
	SourceIp,
	/// Public key fetched from DNS TXT, ED25519 challenge issued.
	ChallengeEd25519,
}

/// Validates the numbers inbound calls are allowed to reach (or come
/// from). Absent authorizers allow everything.
pub trait NumberAuthorizer {
	fn is_authorized(&self, number: &str) -> bool;
}

/// Resolves a node number locally before DNS is consulted, for private
/// nodes that never appear in the public directory.
pub trait LocalRegistry {
	fn lookup(&self, number: &str) -> Option<RegistryEntry>;
}

pub struct RegistryEntry {
	pub addr: SocketAddr,
	pub user: String,
	pub password: String,
}

pub struct Config {
	pub bus_id: u32,
	/// Where received media and signals are routed (the bridge).
	pub dest_bus_id: u32,
	pub port: u16,
	pub resolver: SocketAddr,
	pub dns_root: String,
	pub auth_mode: AuthMode,
	/// The username presented when this line originates public calls.
	pub public_user: String,
	/// 64-hex-char ED25519 seed; required to answer challenges.
	pub private_key_hex: Option<String>,
	/// "addr:port" that receives a keepalive POKE every ten seconds.
	pub poke_target: Option<String>,
	pub poke_node_number: String,
	pub max_calls: usize,
	pub trace: bool,
	pub dest_auth: Option<Box<dyn NumberAuthorizer>>,
	pub source_auth: Option<Box<dyn NumberAuthorizer>>,
	pub registry: Option<Box<dyn LocalRegistry>>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bus_id: 1,
			dest_bus_id: 2,
			port: 4569,
			resolver: SocketAddr::new(Ipv4Addr::new(208, 67, 222, 222).into(), 53),
			dns_root: "allstarlink.org".into(),
			auth_mode: AuthMode::SourceIp,
			public_user: "radio".into(),
			private_key_hex: None,
			poke_target: None,
			poke_node_number: String::new(),
			max_calls: 8,
			trace: false,
			dest_auth: None,
			source_auth: None,
			registry: None,
		}
	}
}

pub struct Line {
	pub(crate) bus_id: u32,
	pub(crate) dest_bus_id: u32,
	pub(crate) bus: stakker::Fwd<Message>,

	pub(crate) iax: Io,
	pub(crate) dns_io: Io,
	pub(crate) resolver: SocketAddr,
	pub(crate) dns_root: String,

	/// Unix time at open, folded into call tokens so they cannot be
	/// replayed across restarts.
	pub(crate) start_time: u32,

	pub(crate) auth_mode: AuthMode,
	pub(crate) source_ip_required: bool,
	pub(crate) use_calltoken: bool,
	pub(crate) signing: Option<SigningKey>,
	pub(crate) public_user: String,

	pub(crate) poke_target: Option<SocketAddr>,
	pub(crate) poke_node_number: String,
	pub(crate) support_directed_poke: bool,

	pub(crate) calls: Vec<Call>,
	/// Call id allocation starts above the ids with special meaning on
	/// initial connection.
	local_call_id_counter: u16,
	pub(crate) dns_request_id_counter: u16,

	pub(crate) capability: u32,
	pub(crate) prefs: Vec<Codec>,

	pub(crate) dest_auth: Option<Box<dyn NumberAuthorizer>>,
	pub(crate) source_auth: Option<Box<dyn NumberAuthorizer>>,
	pub(crate) registry: Option<Box<dyn LocalRegistry>>,

	pub(crate) invalid_call_packets: u32,
	pub(crate) trace: bool,

	t_audio: Ticker,
	t_1s: Ticker,
	t_10s: Ticker,
}

impl Line {
	pub fn init(cx: CX![], cfg: Config, bus: stakker::Fwd<Message>) -> Option<Self> {
		info!("Listening on IAX port {}", cfg.port);

		let iax_sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, cfg.port))
			.ok_or_log(|e| error!("Unable to open IAX port: {e}"))?;
		let iax = Io::new(iax_sock, fwd_to!([cx], iax_rx() as (SocketAddr, Vec<u8>))).ok()?;

		let dns_sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok_or_log(|e| error!("Unable to open DNS socket: {e}"))?;
		let dns_io = Io::new(dns_sock, fwd_to!([cx], dns_rx() as (SocketAddr, Vec<u8>))).ok()?;

		let signing = match &cfg.private_key_hex {
			Some(hex) => Some(auth::signing_key(hex)?),
			None => None,
		};

		let poke_target = match &cfg.poke_target {
			Some(s) => Some(s.parse().ok_or_log(|e| error!("Bad poke address {s:?}: {e}"))?),
			None => None,
		};

		let mut calls = Vec::with_capacity(cfg.max_calls);
		calls.resize_with(cfg.max_calls, Call::default);

		let now = cx.now();
		let mut this = Self {
			bus_id: cfg.bus_id,
			dest_bus_id: cfg.dest_bus_id,
			bus,
			iax,
			dns_io,
			resolver: cfg.resolver,
			dns_root: cfg.dns_root,
			start_time: time::unix(cx),
			auth_mode: cfg.auth_mode,
			source_ip_required: cfg.auth_mode == AuthMode::SourceIp,
			use_calltoken: matches!(cfg.auth_mode, AuthMode::SourceIp),
			signing,
			public_user: cfg.public_user,
			poke_target,
			poke_node_number: cfg.poke_node_number,
			support_directed_poke: true,
			calls,
			local_call_id_counter: 20,
			dns_request_id_counter: rand::random(),
			capability: Codec::supported_mask(),
			prefs: Codec::preference_order().to_vec(),
			dest_auth: cfg.dest_auth,
			source_auth: cfg.source_auth,
			registry: cfg.registry,
			invalid_call_packets: 0,
			trace: cfg.trace,
			t_audio: Ticker::new(now, Duration::from_millis(20)),
			t_1s: Ticker::new(now, Duration::from_secs(1)),
			t_10s: Ticker::new(now, Duration::from_secs(10)),
		};

		this.arm_audio(cx);
		this.arm_1s(cx);
		this.arm_10s(cx);

		Some(this)
	}

	pub(crate) fn next_call_id(&mut self) -> u16 {
		let id = self.local_call_id_counter;
		self.local_call_id_counter = match self.local_call_id_counter.wrapping_add(1) & 0x7fff {
			// Zero and the low ids carry special meaning; skip them on
			// wrap.
			0..=19 => 20,
			n => n,
		};
		id
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

	/// The audio-cadence housekeeping pass: advance every call's state
	/// machine until it settles, then scan the timeouts.
	fn tick_audio(&mut self, cx: CX![]) {
		self.arm_audio(cx);

		let now_ms = time::ms(cx);

		// A state transition can enable the next one immediately (DNS
		// completion into initiation, validation into ACCEPT), so sweep
		// until quiescent.
		loop {
			let mut changed = false;
			for idx in 0..self.calls.len() {
				if self.calls[idx].active && self.progress_call(idx, now_ms) {
					changed = true;
				}
			}
			if !changed {
				break;
			}
		}

		for idx in 0..self.calls.len() {
			let call = &self.calls[idx];
			if !call.active {
				continue;
			}

			if call.state.live() && now_ms.wrapping_sub(call.last_frame_rx_ms) > INACTIVITY_TIMEOUT_MS {
				info!("Call {} inactive, hanging up", call.local_call_id);
				self.hangup_call(idx, now_ms);
			}
		}
	}

	/// One step of the per-call state machine; returns whether the
	/// state changed.
	fn progress_call(&mut self, idx: usize, now_ms: u32) -> bool {
		let state = self.calls[idx].state;
		let side = self.calls[idx].side;

		match (side, state) {
			(Side::Caller, State::Lookup0) => {
				let (local, remote) = {
					let c = &self.calls[idx];
					(c.local_number.clone(), c.remote_number.clone())
				};
				let host = format!("_iax._udp.{remote}.nodes.{}", self.dns_root);
				match self.send_dns_query(wire::dns::TYPE_SRV, &host) {
					Ok(id) => {
						self.calls[idx].dns_request_id = id;
						self.calls[idx].state = State::Lookup0A;
					}
					Err(()) => {
						self.publish_call_failed(&local, &remote, "DNS error (SRV2)", now_ms);
						self.terminate_call(idx, now_ms);
					}
				}
			}
			(Side::Caller, State::InitiationWait) => {
				self.send_new(idx, now_ms);
			}
			(Side::Caller, State::Waiting) => {
				if now_ms.wrapping_sub(self.calls[idx].call_initiated_ms) > CALL_INITIATION_TIMEOUT_MS {
					let (local, remote) = {
						let c = &self.calls[idx];
						(c.local_number.clone(), c.remote_number.clone())
					};
					self.publish_call_failed(&local, &remote, "Node not responding", now_ms);
					self.terminate_call(idx, now_ms);
				}
			}
			(Side::Called, State::CallerValidated) => {
				self.send_accept(idx, now_ms);
			}
			(Side::Called, State::Linked) => {
				// Auto-answer: this bridge has no human to wait for.
				self.send_control(idx, now_ms, wire::frame::control::ANSWER);
				self.send_control(idx, now_ms, wire::frame::control::STOP_SOUNDS);
				self.calls[idx].state = State::Up;
			}
			(_, State::TerminateWaiting) => {
				self.publish_call_end(idx, now_ms);
				self.terminate_call(idx, now_ms);
			}
			(_, State::Terminated) => {
				// Linger until the retransmission buffer drains or the
				// grace period runs out, then recycle the slot.
				let call = &mut self.calls[idx];
				if call.retx.is_empty() || now_ms.wrapping_sub(call.termination_ms) > TERMINATION_TIMEOUT_MS {
					info!("Call {}/{} has ended", call.local_call_id, call.remote_call_id);
					call.reset();
				}
			}
			_ => {}
		}

		self.calls[idx].state != state
	}

	/// Once a second: retransmission sweeps and keepalives.
	fn tick_1s(&mut self, cx: CX![]) {
		self.arm_1s(cx);

		let now_ms = time::ms(cx);

		for idx in 0..self.calls.len() {
			if !self.calls[idx].active {
				continue;
			}

			// Drive unacknowledged frames back onto the wire.
			let call = &mut self.calls[idx];
			let elapsed = call.local_elapsed_ms(now_ms);
			let expected = call.expected_iseq;
			let addr = call.peer;
			let mut out = Vec::new();
			call.retx.retransmit_if_necessary(elapsed, expected, |f| out.push(*f));
			if let Some(addr) = addr {
				for f in &out {
					self.send_frame_addr(f, addr);
				}
			}

			if self.calls[idx].state != State::Up {
				continue;
			}

			// PING keeps the delay estimate fresh; fast at first to
			// bootstrap it.
			let call = &self.calls[idx];
			let interval = if call.ping_count < FAST_PING_COUNT { FAST_PING_INTERVAL_MS } else { NORMAL_PING_INTERVAL_MS };
			if now_ms.wrapping_sub(call.last_ping_sent_ms) >= interval {
				self.calls[idx].last_ping_sent_ms = now_ms;
				self.send_iax(idx, now_ms, wire::frame::iax::PING);
			}

			let call = &self.calls[idx];
			if now_ms.wrapping_sub(call.last_lagrq_ms) >= LAGRQ_INTERVAL_MS {
				self.calls[idx].last_lagrq_ms = now_ms;
				self.send_iax(idx, now_ms, wire::frame::iax::LAGRQ);
			}
		}
	}

	fn tick_10s(&mut self, cx: CX![]) {
		self.arm_10s(cx);
		self.send_poke();

		for call in self.calls.iter().filter(|c| c.active && c.state == State::Up) {
			log::debug!(
				"Call {}/{} node {}: ping {} ms, lag {} ms, delay est {} ms, retx {}, seq errors {}",
				call.local_call_id,
				call.remote_call_id,
				call.remote_number,
				call.last_ping_rtt_ms,
				call.last_lag_ms,
				call.network_delay_estimate_ms,
				call.retx.retransmit_count(),
				call.rx_seq_error_count
			);
		}
	}

	// ----- Bus input -------------------------------------------------------

	/// Messages arriving from the router: drop requests, call requests,
	/// DTMF generation, and per-call audio/signals for UP calls.
	pub fn consume(&mut self, cx: CX![], msg: Message) {
		let now_ms = time::ms(cx);

		match msg.as_signal() {
			Some(Signal::DropAllCalls) => self.drop_all(now_ms),
			Some(Signal::DropAllCallsOutbound) => self.drop_all_outbound(now_ms),
			Some(Signal::DropCall) => {
				let _ = self.drop_call_id(msg.dst.call, now_ms);
			}
			Some(Signal::CallNode) => {
				let Some(p) = payload::CallNode::from_bytes(msg.body()) else {
					warn!("Malformed CALL_NODE payload");
					return;
				};
				if let Err(e) = self.place_call(now_ms, &p.local_number, &p.target_number, Codec::UNKNOWN) {
					self.publish_call_failed(&p.local_number, &p.target_number, e.reason(), now_ms);
				}
			}
			Some(Signal::DtmfGen) => {
				let Some(p) = payload::Dtmf::from_bytes(msg.body()) else { return };
				// For now this goes to every UP call.
				for idx in 0..self.calls.len() {
					if self.calls[idx].active && self.calls[idx].state == State::Up {
						self.send_dtmf(idx, now_ms, p.symbol as char);
					}
				}
			}
			_ => self.consume_for_call(now_ms, &msg),
		}
	}

	fn consume_for_call(&mut self, now_ms: u32, msg: &Message) {
		let Some(idx) = self
			.calls
			.iter()
			.position(|c| c.active && c.state == State::Up && msg.dst.call == c.local_call_id as u32)
		else {
			return;
		};

		match msg.kind() {
			bus::Kind::Audio => self.send_voice(idx, msg),
			bus::Kind::Signal => match msg.as_signal() {
				Some(Signal::CallTerminate) => self.hangup_call(idx, now_ms),
				Some(Signal::RadioUnkeyGen) => self.send_unkey(idx, now_ms),
				Some(Signal::CallTalkerId) => {
					let talker = String::from_utf8_lossy(msg.body()).into_owned();
					self.send_talker_id(idx, now_ms, &talker);
				}
				_ => {}
			},
			_ => {}
		}
	}

	// ----- Call placement and teardown -------------------------------------

	/// Start an outbound call to a node. The target is normally a bare
	/// node number resolved via the local registry and then DNS, but
	/// the explicit `user@host:port/number,password` form skips
	/// resolution entirely.
	pub fn place_call(&mut self, now_ms: u32, local_number: &str, target: &str, desired: Codec) -> Result<(), CallError> {
		info!("Request to call {local_number} -> {target}");

		let explicit = parse_explicit_target(target)?;
		let target_number = match &explicit {
			Some(t) => t.number.clone(),
			None => target.to_string(),
		};

		// Suppress a second call to an already-linked target.
		if self
			.calls
			.iter()
			.any(|c| c.active && c.remote_number == target_number && c.state.live())
		{
			info!("{local_number} -> {target_number} already linked");
			return Err(CallError::AlreadyConnected);
		}

		let idx = self.calls.iter().position(|c| !c.active).ok_or(CallError::NoSlots)?;

		let call = &mut self.calls[idx];
		call.reset();
		call.local_number = local_number.to_string();
		call.remote_number = target_number;
		call.desired_codec = desired;
		call.side = Side::Caller;
		// Back off a tick so elapsed time never reads negative in the
		// dispense paths.
		call.local_start_ms = now_ms.wrapping_sub(call::AUDIO_TICK_MS);
		call.last_lagrq_ms = now_ms;
		call.last_frame_rx_ms = now_ms;

		if let Some(t) = explicit {
			call.peer = Some(t.addr);
			call.call_user = t.user;
			call.call_password = t.password;
			call.state = State::InitiationWait;
			call.active = true;
			return Ok(());
		}

		let remote = call.remote_number.clone();
		if let Some(entry) = self.registry.as_ref().and_then(|r| r.lookup(&remote)) {
			info!("Resolved {remote} locally -> {}", entry.addr);
			let call = &mut self.calls[idx];
			call.peer = Some(entry.addr);
			call.call_user = entry.user;
			call.call_password = entry.password;
			call.state = State::InitiationWait;
			call.active = true;
			return Ok(());
		}

		let call = &mut self.calls[idx];
		call.call_user = self.public_user.clone();
		call.state = State::Lookup0;
		call.active = true;
		Ok(())
	}

	/// Drop the call(s) matching a target number.
	pub fn drop_number(&mut self, now_ms: u32, local_number: &str, target_number: &str) -> Result {
		info!("Request to drop {local_number} -> {target_number}");

		let mut count = 0;
		for idx in 0..self.calls.len() {
			let c = &self.calls[idx];
			if c.active
				&& c.remote_number == target_number
				&& (local_number == "*" || c.local_number == local_number)
				&& c.state.live()
			{
				self.hangup_call(idx, now_ms);
				count += 1;
			}
		}

		if count > 0 {
			Ok(())
		} else {
			Err(())
		}
	}

	pub fn drop_call_id(&mut self, call_id: u32, now_ms: u32) -> Result {
		info!("Request to drop call {call_id}");

		let Some(idx) = self
			.calls
			.iter()
			.position(|c| c.active && c.local_call_id as u32 == call_id && c.state.live())
		else {
			return Err(());
		};

		self.hangup_call(idx, now_ms);
		Ok(())
	}

	pub fn drop_all(&mut self, now_ms: u32) {
		for idx in 0..self.calls.len() {
			if self.calls[idx].active && self.calls[idx].state != State::Terminated {
				self.hangup_call(idx, now_ms);
			}
		}
	}

	pub fn drop_all_outbound(&mut self, now_ms: u32) {
		for idx in 0..self.calls.len() {
			let c = &self.calls[idx];
			if c.active && c.state != State::Terminated && c.side == Side::Caller {
				self.hangup_call(idx, now_ms);
			}
		}
	}

	pub fn active_calls(&self) -> usize {
		self.calls.iter().filter(|c| c.active).count()
	}

	/// The repeater-controller management syntax:
	/// `rpt cmd <node> ilink 3 <target>` places a call,
	/// `rpt cmd <node> ilink 6 0` drops everything.
	pub fn process_management_command(&mut self, now_ms: u32, cmd: &str) {
		let tokens: Vec<&str> = cmd.split(' ').filter(|t| !t.is_empty()).collect();

		if let ["rpt", "cmd", node, "ilink", "3", target] = tokens[..] {
			let _ = self.place_call(now_ms, node, target, Codec::UNKNOWN);
		} else if let ["rpt", "cmd", _node, "ilink", "6", "0"] = tokens[..] {
			self.drop_all(now_ms);
		}
	}
}

/// Why a call could not be placed, in terms a UI can speak.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallError {
	Syntax,
	AlreadyConnected,
	NoSlots,
	BadAddress,
}

impl CallError {
	pub fn reason(self) -> &'static str {
		match self {
			CallError::Syntax => "Node number syntax error",
			CallError::AlreadyConnected => "Node already connected",
			CallError::NoSlots => "Call limit exceeded",
			CallError::BadAddress => "Address format error",
		}
	}
}

#[derive(Debug)]
struct ExplicitTarget {
	user: String,
	addr: SocketAddr,
	number: String,
	password: String,
}

/// Parse the `user@host:port/number,password` explicit-target form.
/// Returns `None` for a bare node number.
fn parse_explicit_target(target: &str) -> Result<Option<ExplicitTarget>, CallError> {
	if !target.contains('/') {
		return Ok(None);
	}

	let (user, rest) = target.split_once('@').ok_or(CallError::Syntax)?;
	let (addr, rest) = rest.split_once('/').ok_or(CallError::Syntax)?;
	let (number, password) = rest.split_once(',').ok_or(CallError::Syntax)?;

	if user.is_empty() || number.is_empty() || password.is_empty() {
		return Err(CallError::Syntax);
	}

	let addr: SocketAddr = addr.parse().map_err(|_| CallError::BadAddress)?;

	Ok(Some(ExplicitTarget {
		user: user.into(),
		addr,
		number: number.into(),
		password: password.into(),
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn explicit_target_parsing() {
		let t = parse_explicit_target("radio@52.8.197.124:4569/61057,NONE").unwrap().unwrap();
		assert_eq!(t.user, "radio");
		assert_eq!(t.addr, "52.8.197.124:4569".parse().unwrap());
		assert_eq!(t.number, "61057");
		assert_eq!(t.password, "NONE");

		// A bare node number is not explicit.
		assert!(parse_explicit_target("61057").unwrap().is_none());

		// Partial forms are syntax errors, not bare numbers.
		assert_eq!(parse_explicit_target("radio@1.2.3.4:4569/61057").unwrap_err(), CallError::Syntax);
		assert_eq!(parse_explicit_target("1.2.3.4/61057,NONE").unwrap_err(), CallError::Syntax);
		assert_eq!(
			parse_explicit_target("radio@nonsense/61057,NONE").unwrap_err(),
			CallError::BadAddress
		);
	}

	#[test]
	fn call_error_reasons() {
		assert_eq!(CallError::NoSlots.reason(), "Call limit exceeded");
		assert_eq!(CallError::AlreadyConnected.reason(), "Node already connected");
	}
}
