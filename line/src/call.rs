//! Per-call slot state. Everything a single IAX2 conversation needs
//! lives here; the slots are owned exclusively by their [`Line`] and
//! recycled on termination.

use core::net::SocketAddr;

use wire::Codec;

use crate::retx::RetxBuffer;

/// The 20 ms cadence that voice timestamps align to.
pub const AUDIO_TICK_MS: u32 = 20;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Side {
	#[default]
	None,
	Caller,
	Called,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum State {
	#[default]
	None,
	/// Caller: SRV lookup not yet issued.
	Lookup0,
	/// Caller: SRV issued, waiting on the response.
	Lookup0A,
	/// Caller: A lookup issued for the SRV target.
	Lookup1A,
	/// Ready to send (or re-send, after CALLTOKEN) the NEW.
	InitiationWait,
	/// Caller: NEW sent, waiting for the callee.
	Waiting,
	/// Called: TXT lookup issued for the caller's public key.
	AuthrepWait0,
	/// Called: AUTHREQ challenge sent, waiting for the signature.
	AuthrepWait1,
	/// Called: A lookup issued to validate the caller's source IP.
	IpValidation0,
	/// Called: all validation passed, clear to ACCEPT.
	CallerValidated,
	Linked,
	Up,
	/// Termination requested; a CALL_END still needs publishing.
	TerminateWaiting,
	/// Lingering so the retransmission buffer can drain.
	Terminated,
}

impl State {
	/// Live states participate in number-matched call and drop lookups.
	pub fn live(self) -> bool {
		!matches!(self, State::TerminateWaiting | State::Terminated)
	}
}

#[derive(Default)]
pub struct Call {
	pub active: bool,
	pub side: Side,
	pub state: State,
	/// Set once the remote call id has been locked in; only trusted
	/// calls get full frame processing.
	pub trusted: bool,
	pub source_addr_validated: bool,

	pub local_call_id: u16,
	pub remote_call_id: u16,

	/// Call epoch on the local ms clock.
	pub local_start_ms: u32,
	last_dispensed_ms: u32,
	pub oseq: u8,
	pub expected_iseq: u8,
	/// The 32-bit timestamp of the last voice frame sent, watched for
	/// rollover of the upper 16 bits.
	pub last_voice_ts: u32,

	pub local_number: String,
	pub remote_number: String,
	pub call_user: String,
	pub call_password: String,
	pub calltoken: String,
	pub public_key: [u8; 32],

	pub peer: Option<SocketAddr>,
	pub desired_codec: Codec,
	pub codec: Codec,

	pub last_frame_rx_ms: u32,
	pub termination_ms: u32,
	pub call_initiated_ms: u32,

	pub retx: RetxBuffer,
	pub dns_request_id: u16,

	// Keepalive bookkeeping.
	pub last_ping_sent_ms: u32,
	pub last_ping_rtt_ms: u32,
	pub ping_count: u32,
	pub last_lagrq_ms: u32,
	pub last_lag_ms: i32,

	// One-way network delay estimator (Ramjee, fast constant).
	nd_di: f32,
	nd_vi: f32,
	pub network_delay_estimate_ms: i32,

	pub rx_seq_error_count: u32,
}

const ND_ALPHA: f32 = 0.75;
const ND_BETA: f32 = 5.0;

impl Call {
	pub fn reset(&mut self) {
		*self = Call::default();
	}

	pub fn local_elapsed_ms(&self, now_ms: u32) -> u32 {
		now_ms.wrapping_sub(self.local_start_ms)
	}

	/// Hand out the call timestamp for a general outbound frame:
	/// aligned down to the 20 ms tick, but never regressing, so two
	/// frames in one tick stay distinct and ordered.
	pub fn dispense_ms(&mut self, now_ms: u32) -> u32 {
		let tick = self.local_elapsed_ms(now_ms) / AUDIO_TICK_MS * AUDIO_TICK_MS;
		self.last_dispensed_ms = (self.last_dispensed_ms + 1).max(tick);
		self.last_dispensed_ms
	}

	/// Hand out the call timestamp for a voice frame: the frame's
	/// receive time relative to call start, tick-aligned, strictly
	/// increasing.
	pub fn dispense_voice_ms(&mut self, rx_ms: u32) -> u32 {
		let tick = rx_ms.wrapping_sub(self.local_start_ms) / AUDIO_TICK_MS * AUDIO_TICK_MS;
		self.last_dispensed_ms = (self.last_dispensed_ms + 1).max(tick);
		self.last_dispensed_ms
	}

	pub fn bump_expected_iseq(&mut self) {
		// One byte, expected to wrap.
		self.expected_iseq = self.expected_iseq.wrapping_add(1);
	}

	pub fn is_peer(&self, addr: SocketAddr) -> bool {
		self.peer == Some(addr)
	}

	/// Fold a one-way delay sample into the smoothed estimate.
	pub fn update_network_delay(&mut self, sample_ms: u32, first: bool) {
		let n = sample_ms as f32;

		if first {
			self.nd_di = n;
			self.nd_vi = 0.0;
		} else {
			self.nd_di = ND_ALPHA * self.nd_di + (1.0 - ND_ALPHA) * n;
			self.nd_vi = ND_ALPHA * self.nd_vi + (1.0 - ND_ALPHA) * (self.nd_di - n).abs();
		}

		self.network_delay_estimate_ms = (self.nd_di + ND_BETA * self.nd_vi) as i32;
	}
}
