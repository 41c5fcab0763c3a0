//! Outbound frame construction and the single transmit path. Every
//! IAX2 byte that leaves the line goes through [`Line::send_raw`].

use core::net::SocketAddr;

use bus::{payload, Message, Signal};
use log::{error, info, trace};
use wire::frame::{self, control, ftype, iax, ie};
use wire::{codec, datetime, Codec, FullFrame};

use crate::call::State;
use crate::Line;

impl Line {
	pub(crate) fn send_raw(&self, bytes: &[u8], addr: SocketAddr) {
		// Transport errors are logged inside Io; the call continues and
		// retransmission re-drives anything that mattered.
		let _ = self.iax.send_to(bytes, addr);
	}

	pub(crate) fn send_frame_addr(&self, frame: &FullFrame, addr: SocketAddr) {
		if self.trace {
			trace!(
				"====> {addr} {:?}",
				frame
			);
		}
		self.send_raw(frame.as_bytes(), addr);
	}

	/// Send a sequenced frame on a call: a copy is retained for
	/// retransmission and the outbound sequence advances for the
	/// classes that consume one.
	pub(crate) fn send_frame_call(&mut self, idx: usize, frame: &FullFrame) {
		let call = &mut self.calls[idx];

		// A missing peer address can happen very early in setup or on a
		// hangup racing address resolution.
		let Some(addr) = call.peer else {
			error!(
				"Call {}/{} unable to send {}, no peer address",
				call.local_call_id,
				call.remote_call_id,
				frame::type_desc(frame.frame_type(), frame.subclass())
			);
			return;
		};

		if call.retx.consume(frame).is_err() {
			error!("Call {}/{} retx buffer full, hanging up", call.local_call_id, call.remote_call_id);
			if call.state.live() {
				call.state = State::TerminateWaiting;
			}
		}

		if frame.counts_for_sequence() {
			call.oseq = call.oseq.wrapping_add(1);
		}

		self.send_frame_addr(frame, addr);
	}

	/// ACK with the *echoed* timestamp of the frame being acknowledged,
	/// bypassing the retransmission buffer and the sequence counters.
	pub(crate) fn send_ack(&mut self, idx: usize, timestamp: u32) {
		let call = &self.calls[idx];
		let frame = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			timestamp,
			call.oseq,
			call.expected_iseq,
			ftype::IAX,
			iax::ACK,
		);

		if let Some(addr) = call.peer {
			self.send_frame_addr(&frame, addr);
		}
	}

	pub(crate) fn send_reject(&mut self, dst_call: u16, addr: SocketAddr, cause: &str) {
		let mut frame = FullFrame::new(0, dst_call, 0, 0, 0, ftype::IAX, iax::REJECT);
		let _ = frame.push_ie_str(ie::CAUSE, cause);
		self.send_frame_addr(&frame, addr);
	}

	/// Build and send the NEW for an outbound call, resetting the
	/// sequence space. Re-entered with the token filled in after a
	/// CALLTOKEN challenge.
	pub(crate) fn send_new(&mut self, idx: usize, now_ms: u32) {
		let local_call_id = self.next_call_id();
		let capability = self.capability;
		let prefs = codec::prefs_string(&self.prefs);

		let call = &mut self.calls[idx];

		if let Some(addr) = call.peer {
			info!("Initiating a call {} -> {} ({addr})", call.local_number, call.remote_number);
		}

		// Sequences restart with the (new) call id; anything pending
		// for an earlier attempt is obsolete.
		call.oseq = 0;
		call.expected_iseq = 0;
		call.local_call_id = local_call_id;
		call.remote_call_id = 0;
		call.retx.reset();

		let desired = if call.desired_codec == Codec::UNKNOWN { Codec::ULAW } else { call.desired_codec };

		let mut frame = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			ftype::IAX,
			iax::NEW,
		);

		// The version IE must come first; the order of the rest is
		// unspecified.
		let _ = frame.push_ie_u16(ie::VERSION, 0x0002);
		let _ = frame.push_ie_str(ie::CALLED_NUMBER, &call.remote_number);
		let _ = frame.push_ie_str(ie::CODEC_PREFS, &prefs);
		let _ = frame.push_ie_str(ie::CALLING_NUMBER, &call.local_number);
		let _ = frame.push_ie_str(ie::LANGUAGE, "en");
		let _ = frame.push_ie_str(ie::CALLING_USER, &call.call_user);
		let _ = frame.push_ie_u32(ie::FORMAT, desired.0);
		let _ = frame.push_ie(ie::FORMAT_WIDE, &codec::wide_format(desired.0 as u64));
		let _ = frame.push_ie_u32(ie::CAPABILITY, capability);
		let _ = frame.push_ie(ie::CAPABILITY_WIDE, &codec::wide_format(capability as u64));
		let _ = frame.push_ie_u16(ie::ADSICPE, 0x0002);
		let _ = frame.push_ie_u32(ie::DATETIME, datetime::now());
		// Blank the first time through; refilled on CALLTOKEN.
		let token = call.calltoken.clone();
		let _ = frame.push_ie_str(ie::CALLTOKEN, &token);

		call.state = State::Waiting;
		call.call_initiated_ms = now_ms;

		self.send_frame_call(idx, &frame);
	}

	/// ACCEPT an inbound, fully validated call, announcing the assigned
	/// codec.
	pub(crate) fn send_accept(&mut self, idx: usize, now_ms: u32) {
		let call = &mut self.calls[idx];
		let codec = call.codec;

		let mut frame = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			ftype::IAX,
			iax::ACCEPT,
		);
		let _ = frame.push_ie_u32(ie::FORMAT, codec.0);
		let _ = frame.push_ie(ie::FORMAT_WIDE, &codec::wide_format(codec.0 as u64));

		info!(
			"Call {} accepted from {} {} using CODEC {:?}",
			call.local_call_id, call.remote_number, call.call_user, codec
		);

		call.trusted = true;
		call.state = State::Linked;

		self.send_frame_call(idx, &frame);
		self.publish_call_start(idx, now_ms, false);
	}

	pub(crate) fn send_control(&mut self, idx: usize, now_ms: u32, sub: u8) {
		let call = &mut self.calls[idx];
		let frame = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			ftype::CONTROL,
			sub,
		);
		self.send_frame_call(idx, &frame);
	}

	pub(crate) fn send_iax(&mut self, idx: usize, now_ms: u32, sub: u8) {
		let call = &mut self.calls[idx];
		let frame = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			ftype::IAX,
			sub,
		);
		self.send_frame_call(idx, &frame);
	}

	/// Text frames carry their NUL terminator on the wire.
	pub(crate) fn send_text(&mut self, idx: usize, now_ms: u32, text: &str) {
		let call = &mut self.calls[idx];
		let mut frame = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			ftype::TEXT,
			0,
		);

		let mut body = text.as_bytes().to_vec();
		body.push(0);
		if frame.set_body(&body).is_err() {
			error!("Text message too large, dropped");
			return;
		}

		self.send_frame_call(idx, &frame);
	}

	pub(crate) fn send_dtmf(&mut self, idx: usize, now_ms: u32, symbol: char) {
		let call = &mut self.calls[idx];
		info!("Call {} sending DTMF {symbol}", call.local_call_id);

		let frame = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			ftype::DTMF2,
			symbol as u8,
		);
		self.send_frame_call(idx, &frame);
	}

	/// Send one frame of conference audio to the peer. A full frame
	/// goes out whenever the upper 16 timestamp bits roll, so the peer
	/// can resynchronise its extended clock; mini frames otherwise.
	pub(crate) fn send_voice(&mut self, idx: usize, msg: &Message) {
		let call = &mut self.calls[idx];

		// The codec must not change after negotiation.
		if msg.codec() != call.codec {
			error!("Voice frame with unexpected CODEC {:?}", msg.codec());
			return;
		}

		let elapsed = call.dispense_voice_ms(msg.rx_ms);
		let rolled = call.last_voice_ts == 0 || (elapsed & 0xffff_0000) != (call.last_voice_ts & 0xffff_0000);
		call.last_voice_ts = elapsed;

		if rolled {
			let mut frame = FullFrame::new(
				call.local_call_id,
				call.remote_call_id,
				elapsed,
				call.oseq,
				call.expected_iseq,
				ftype::VOICE,
				frame::codec_to_subclass(call.codec.0),
			);
			if frame.set_body(msg.body()).is_err() {
				error!("Voice frame too large, dropped");
				return;
			}
			self.send_frame_call(idx, &frame);
		} else {
			let local_call_id = call.local_call_id;
			let Some(addr) = call.peer else { return };

			let mut buf = [0u8; frame::MINI_HEADER + 160 * 2 * 2];
			if let Some(n) = frame::mini_encode(local_call_id, elapsed, msg.body(), &mut buf) {
				self.send_raw(&buf[..n], addr);
			} else {
				error!("Voice frame too large for a mini frame, dropped");
			}
		}
	}

	/// Announce link-up to the remote repeater controller. The meaning
	/// of these text messages follows the AllStarLink text protocol.
	pub(crate) fn send_connect_greetings(&mut self, idx: usize, now_ms: u32) {
		let local = self.calls[idx].local_number.clone();
		let remote = self.calls[idx].remote_number.clone();

		self.send_text(idx, now_ms, &format!("T {local} COMPLETE"));
		self.send_text(idx, now_ms, &format!("T {local} CONNECTED,{local},{remote}"));
	}

	pub(crate) fn send_talker_id(&mut self, idx: usize, now_ms: u32, talker: &str) {
		let local = self.calls[idx].local_number.clone();
		// Only the first 32 characters of a talker id are meaningful.
		let talker: String = talker.chars().take(32).collect();
		self.send_text(idx, now_ms, &format!("T {local} TALKERID,{talker}"));
	}

	/// End a call that failed validation: a sequenced REJECT with the
	/// cause, then straight to the terminated linger (no CALL_END, the
	/// call never reached the bridge).
	pub(crate) fn reject_and_terminate(&mut self, idx: usize, now_ms: u32, cause: &str) {
		let call = &mut self.calls[idx];
		let mut frame = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			ftype::IAX,
			iax::REJECT,
		);
		let _ = frame.push_ie_str(ie::CAUSE, cause);

		self.send_frame_call(idx, &frame);
		self.terminate_call(idx, now_ms);
	}

	pub(crate) fn hangup_call(&mut self, idx: usize, now_ms: u32) {
		self.send_iax(idx, now_ms, iax::HANGUP);
		// The CALL_END publication happens in the progress sweep.
		self.calls[idx].state = State::TerminateWaiting;
	}

	pub(crate) fn terminate_call(&mut self, idx: usize, now_ms: u32) {
		let call = &mut self.calls[idx];
		call.state = State::Terminated;
		call.termination_ms = now_ms;
	}

	// ----- Bus publications ------------------------------------------------

	pub(crate) fn publish(&self, msg: Message) {
		self.bus.fwd(msg);
	}

	pub(crate) fn publish_call_start(&mut self, idx: usize, now_ms: u32, originated: bool) {
		let call = &self.calls[idx];
		let p = payload::CallStart {
			codec: call.codec.0,
			start_ms: call.local_start_ms,
			bypass_jitter_buffer: false,
			echo: false,
			source_addr_validated: call.source_addr_validated,
			originated,
			permanent: false,
			local_number: call.local_number.clone(),
			remote_number: call.remote_number.clone(),
		};

		let msg = Message::signal_with(Signal::CallStart, &p.to_bytes(), 0, now_ms)
			.with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
		self.publish(msg);
	}

	pub(crate) fn publish_call_end(&mut self, idx: usize, now_ms: u32) {
		let call = &self.calls[idx];
		let p = payload::CallEnd {
			local_number: call.local_number.clone(),
			remote_number: call.remote_number.clone(),
		};

		let msg = Message::signal_with(Signal::CallEnd, &p.to_bytes(), 0, now_ms)
			.with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
		self.publish(msg);
	}

	pub(crate) fn publish_call_failed(&mut self, local: &str, remote: &str, text: &str, now_ms: u32) {
		info!("Call {local}->{remote} failed: {text}");

		let p = payload::CallFailed {
			target_number: remote.into(),
			message: text.into(),
		};

		let msg = Message::signal_with(Signal::CallFailed, &p.to_bytes(), 0, now_ms)
			.with_route(bus::Addr::bus(self.bus_id), bus::Addr::bus(self.dest_bus_id));
		self.publish(msg);
	}

	pub(crate) fn addr_for(&self, idx: usize) -> bus::Addr {
		bus::Addr::new(self.bus_id, self.calls[idx].local_call_id as u32)
	}

	/// Optional ten-second POKE towards a configured address, keeping a
	/// firewall/CGNAT pinhole open.
	pub(crate) fn send_poke(&mut self) {
		let Some(target) = self.poke_target else { return };

		let mut poke = FullFrame::new(0, 0, 7777, 0, 0, ftype::IAX, iax::POKE);
		if !self.poke_node_number.is_empty() {
			let node = self.poke_node_number.clone();
			let _ = poke.push_ie_str(ie::CALLING_NUMBER, &node);
		}

		self.send_frame_addr(&poke, target);
	}

	pub(crate) fn send_unkey(&mut self, idx: usize, now_ms: u32) {
		self.send_control(idx, now_ms, control::UNKEY);
	}
}
