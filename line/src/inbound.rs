//! Inbound datagram dispatch: classification, the unauthenticated
//! startup cases (NEW / POKE / PONG forwarding), per-call trust
//! checks, the sequence + ACK policy, and in-call frame handling.

use core::net::SocketAddr;

use bus::{payload, Message, Signal};
use log::{error, info, trace, warn};
use stakker::CX;
use wire::frame::{self, control, ftype, iax, ie};
use wire::{codec, Codec, FullFrame};

use crate::call::{Side, State};
use crate::{auth, AuthMode, Line};
use wire::frame::extend_time;

impl Line {
	/// Entry point for every datagram on the IAX socket.
	pub(crate) fn iax_rx(&mut self, cx: CX![], src: SocketAddr, buf: Vec<u8>) {
		let now_ms = runtime::time::ms(cx);

		if buf.is_empty() {
			return;
		}

		if frame::is_full_frame(buf[0]) {
			self.process_full_frame(cx, &buf, src, now_ms);
		} else {
			self.process_mini_frame(&buf, src, now_ms);
		}
	}

	/// Handle a full frame. Nothing about it has been validated yet and
	/// it is not necessarily part of any call.
	fn process_full_frame(&mut self, cx: CX![], buf: &[u8], peer: SocketAddr, now_ms: u32) {
		if buf.len() < frame::FULL_HEADER || buf.len() > frame::MAX_FRAME {
			warn!("Malformed packet from {peer}: {}", utils::bytes::hex_dump(buf, 32));
			return;
		}

		let Some(frame) = FullFrame::parse(buf) else {
			warn!("Malformed packet from {peer}: {}", utils::bytes::hex_dump(buf, 32));
			return;
		};

		if self.trace && !frame.is_voice() {
			trace!("<==== {peer} {:?}", frame);
		}

		let dst_call = frame.dst_call();

		// Destination call id zero is the unauthenticated startup
		// space: NEW, POKE and the PONG-forwarding extension.
		if dst_call == 0 {
			if frame.is_new() {
				self.process_new(cx, &frame, peer, now_ms);
			} else if frame.is_type(ftype::IAX, iax::POKE) {
				self.process_poke(&frame, peer);
			} else if frame.is_type(ftype::IAX, iax::PONG) {
				self.process_unaddressed_pong(&frame, peer);
			}
			return;
		}

		// The peer claims an active call; find it and decide whether
		// the message is trustworthy before acting on it.
		let Some(idx) = self.calls.iter().position(|c| c.active && c.local_call_id == dst_call) else {
			self.invalid_call_packets += 1;
			if self.trace {
				info!("Call not recognised {}/{dst_call}, ignoring", frame.src_call());
			}
			return;
		};

		if !self.calls[idx].is_peer(peer) {
			self.invalid_call_packets += 1;
			info!("Call {dst_call} address invalid");
			// Ignore without touching state, in case this is hostile.
			return;
		}

		match self.calls[idx].side {
			Side::Caller => {
				// The callee challenged us for a token: store it and go
				// around again with a fresh NEW.
				if frame.is_type(ftype::IAX, iax::CALLTOKEN) {
					info!("Call {dst_call} got CALLTOKEN challenge");
					let Some(token) = frame.ie_str(ie::CALLTOKEN).filter(|t| !t.is_empty()) else {
						error!("Unable to get challenge token");
						return;
					};
					self.calls[idx].calltoken = token;
					self.calls[idx].state = State::InitiationWait;
					return;
				}

				// The first ACCEPT or AUTHREQ locks in the remote call
				// id and upgrades the call to trusted.
				if frame.is_type(ftype::IAX, iax::ACCEPT) || frame.is_type(ftype::IAX, iax::AUTHREQ) {
					self.calls[idx].remote_call_id = frame.src_call();
					self.calls[idx].trusted = true;
				}
			}
			Side::Called => {
				// The AUTHREP closing an ED25519 challenge arrives
				// before trust is established, so it is special-cased.
				if self.calls[idx].state == State::AuthrepWait1
					&& frame.is_type(ftype::IAX, iax::AUTHREP)
					&& self.calls[idx].remote_call_id == frame.src_call()
				{
					self.process_authrep(idx, &frame, now_ms);
					return;
				}
			}
			Side::None => {}
		}

		if !self.calls[idx].trusted {
			if !frame.is_ack() {
				info!("Message for call {dst_call} untrusted (state {:?})", self.calls[idx].state);
			}
			return;
		}

		self.process_in_call(cx, idx, &frame, now_ms);
	}

	/// The caller's signed answer to our AUTHREQ challenge.
	fn process_authrep(&mut self, idx: usize, frame: &FullFrame, now_ms: u32) {
		let call = &mut self.calls[idx];

		let challenge = auth::challenge_text(call.local_call_id, call.local_start_ms);

		let Some(sig) = frame.ie_str(ie::ED25519_RESULT).filter(|s| !s.is_empty()) else {
			error!("Call {} no challenge response", call.local_call_id);
			return;
		};

		let good = auth::verify_challenge(&call.public_key, &challenge, &sig);
		if good {
			info!("Call {} good signature", call.local_call_id);
			call.state = State::CallerValidated;
		} else {
			info!("Call {} invalid signature", call.local_call_id);
		}

		// Sequencing is normally handled further in, but this message
		// never reaches that code.
		if frame.oseq() == call.expected_iseq {
			call.bump_expected_iseq();
			if frame.ack_required() {
				self.send_ack(idx, frame.timestamp());
			}
		} else {
			error!("Call {} sequence number problem", self.calls[idx].local_call_id);
		}

		if !good {
			self.reject_and_terminate(idx, now_ms, "Invalid signature");
		}
	}

	/// An unauthenticated NEW: run the admission checks, pick a codec,
	/// allocate a slot and start validation.
	fn process_new(&mut self, _cx: CX![], frame: &FullFrame, peer: SocketAddr, now_ms: u32) {
		if self.use_calltoken {
			let expected = auth::call_token(peer.ip(), self.start_time);
			let token = frame.ie_str(ie::CALLTOKEN).unwrap_or_default();

			if token.is_empty() {
				// No token yet: challenge and drop. The caller returns
				// with the token in its next NEW.
				info!("NEW received with no token: {peer}");

				let mut challenge = FullFrame::new(1, frame.src_call(), frame.timestamp(), 0, 1, ftype::IAX, iax::CALLTOKEN);
				let _ = challenge.push_ie_str(ie::CALLTOKEN, &expected);
				self.send_frame_addr(&challenge, peer);
				return;
			}

			if token != expected {
				info!("NEW received with invalid token: {peer}");
				self.send_reject(frame.src_call(), peer, "Unknown");
				return;
			}

			info!("NEW received with valid token: {peer}");
		}

		// The called number sometimes arrives with a leading '3' by
		// AllStarLink calling convention; no real node starts with 3.
		let Some(called) = frame.ie_str(ie::CALLED_NUMBER) else {
			error!("No target number provided");
			self.send_reject(frame.src_call(), peer, "Called number missing");
			return;
		};
		let called = called.strip_prefix('3').unwrap_or(&called).to_string();

		if let Some(auth) = &self.dest_auth {
			if !auth.is_authorized(&called) {
				error!("Wrong number {called}");
				self.send_reject(frame.src_call(), peer, "Wrong number");
				return;
			}
		}

		let Some(calling) = frame.ie_str(ie::CALLING_NUMBER) else {
			error!("No calling number provided");
			self.send_reject(frame.src_call(), peer, "Calling number missing");
			return;
		};

		if let Some(auth) = &self.source_auth {
			if !auth.is_authorized(&calling) {
				info!("Call from {calling} rejected");
				self.send_reject(frame.src_call(), peer, "Unknown");
				return;
			}
		}

		let Some(calling_user) = frame.ie_str(ie::CALLING_USER) else {
			error!("No calling user provided");
			self.send_reject(frame.src_call(), peer, "Calling user missing");
			return;
		};

		let Some(caller_cap) = frame.ie_u32(ie::CAPABILITY) else {
			error!("No CODEC capability provided");
			self.send_reject(frame.src_call(), peer, "CODEC capability missing");
			return;
		};

		if caller_cap & self.capability == 0 {
			error!("No supported CODECs provided {caller_cap:08X}");
			self.send_reject(frame.src_call(), peer, "No supported CODECs");
			return;
		}

		// The FORMAT IE names a single codec the caller would prefer;
		// the preference string ranks the rest.
		let desired = frame.ie_u32(ie::FORMAT).unwrap_or(0);
		let caller_prefs = codec::parse_prefs(&frame.ie_str(ie::CODEC_PREFS).unwrap_or_default());

		let assigned = codec::assign(caller_cap, desired, &caller_prefs, self.capability, &self.prefs);
		info!("Caller capable {caller_cap:08X}, desired {desired:08X}, assigned {assigned:?}");

		let Some(idx) = self.calls.iter().position(|c| !c.active) else {
			error!("No calls available, rejecting");
			self.send_reject(frame.src_call(), peer, "No calls available");
			return;
		};

		let local_call_id = self.next_call_id();
		let call = &mut self.calls[idx];
		call.reset();
		call.side = Side::Called;
		call.trusted = false;
		call.local_call_id = local_call_id;
		call.remote_call_id = frame.src_call();
		// Back off a tick so elapsed time never reads negative.
		call.local_start_ms = now_ms.wrapping_sub(crate::call::AUDIO_TICK_MS);
		call.expected_iseq = 1;
		call.remote_number = calling;
		call.call_user = calling_user;
		call.peer = Some(peer);
		call.local_number = called;
		call.last_lagrq_ms = now_ms;
		call.last_frame_rx_ms = now_ms;
		call.codec = assigned;

		self.send_ack(idx, frame.timestamp());

		let remote = self.calls[idx].remote_number.clone();
		let host = format!("{remote}.nodes.{}", self.dns_root);

		if self.auth_mode == AuthMode::ChallengeEd25519 {
			// Fetch the caller's public key before challenging.
			info!("Call {local_call_id} starting AUTHREQ process for {host}");
			match self.send_dns_query(wire::dns::TYPE_TXT, &host) {
				Ok(id) => {
					self.calls[idx].dns_request_id = id;
					self.calls[idx].state = State::AuthrepWait0;
					self.calls[idx].active = true;
				}
				Err(()) => error!("Unable to request public key, ignoring call"),
			}
		} else {
			// Resolve the caller's registered address to validate the
			// source IP.
			match self.send_dns_query(wire::dns::TYPE_A, &host) {
				Ok(id) => {
					self.calls[idx].dns_request_id = id;
					self.calls[idx].state = State::IpValidation0;
					self.calls[idx].active = true;
				}
				Err(()) => error!("Unable to start address validation, ignoring call"),
			}
		}
	}

	/// POKE is an unauthenticated reachability test (RFC 5456 section
	/// 6.7.1), extended here so a poke carrying a target address is
	/// forwarded one hop for firewall traversal.
	fn process_poke(&mut self, frame: &FullFrame, peer: SocketAddr) {
		if let Some(target) = frame.ie_str(ie::TARGET_ADDR).filter(|_| self.support_directed_poke) {
			let Ok(fwd_addr) = target.parse::<SocketAddr>() else {
				info!("Ignoring directed POKE, unable to parse target");
				return;
			};

			let mut poke = FullFrame::new(0, 0, frame.timestamp(), 0, 0, ftype::IAX, iax::POKE);
			// The original requester becomes the return address.
			let _ = poke.push_ie_str(ie::TARGET_ADDR2, &peer.to_string());
			self.send_frame_addr(&poke, fwd_addr);
			return;
		}

		let mut pong = FullFrame::new(0, 0, frame.timestamp(), 0, 0, ftype::IAX, iax::PONG);

		// Tell the peer how it is perceived from outside; "addr:port"
		// text, not the RFC sockaddr layout.
		let _ = pong.push_ie_str(ie::APPARENT_ADDR, &peer.to_string());

		// A TARGET_ADDR2 asks for the PONG to be forwarded another hop.
		if let Some(target2) = frame.ie_str(ie::TARGET_ADDR2) {
			let _ = pong.push_ie_str(ie::TARGET_ADDR, &target2);
		}

		self.send_frame_addr(&pong, peer);
	}

	/// A PONG with a target address is relayed onwards (extension).
	fn process_unaddressed_pong(&mut self, frame: &FullFrame, _peer: SocketAddr) {
		let Some(target) = frame.ie_str(ie::TARGET_ADDR).filter(|_| self.support_directed_poke) else {
			return;
		};

		info!("PONG had target address [{target}]");

		let Ok(fwd_addr) = target.parse::<SocketAddr>() else {
			info!("Ignoring directed PONG, unable to parse target");
			return;
		};

		let mut pong = FullFrame::new(0, 0, frame.timestamp(), 0, 0, ftype::IAX, iax::PONG);
		if let Some(apparent) = frame.ie_str(ie::APPARENT_ADDR) {
			let _ = pong.push_ie_str(ie::APPARENT_ADDR, &apparent);
		}
		self.send_frame_addr(&pong, fwd_addr);
	}

	/// A trusted frame on an active call: apply the sequence and ACK
	/// policy, then act on the content.
	fn process_in_call(&mut self, cx: CX![], idx: usize, frame: &FullFrame, now_ms: u32) {
		self.calls[idx].last_frame_rx_ms = now_ms;

		// Every message updates our view of what the peer has received,
		// clearing the retransmission buffer behind it. Some peers
		// occasionally report a lower expectation (Asterisk PONGs);
		// that is ignored.
		self.calls[idx].retx.set_expected_seq(frame.iseq());

		if frame.is_ack() {
			return;
		}

		// VNAK does not consume a sequence number; service it before
		// checking sequence coherence.
		if frame.is_type(ftype::IAX, iax::VNAK) {
			info!("VNAK received, retransmitting to {}", frame.oseq());
			let call = &mut self.calls[idx];
			let expected = call.expected_iseq;
			let mut out = Vec::new();
			call.retx.retransmit_to_seq(frame.oseq(), expected, |f| out.push(*f));
			let addr = call.peer;
			if let Some(addr) = addr {
				for f in &out {
					self.send_frame_addr(f, addr);
				}
			}
			return;
		}

		if frame.oseq() == self.calls[idx].expected_iseq {
			self.calls[idx].bump_expected_iseq();
			// RFC: the ACK must return the same timestamp it received,
			// so the peer can match it to the message.
			if frame.ack_required() {
				self.send_ack(idx, frame.timestamp());
			}
		} else if frame::compare_seq_wrap(frame.oseq(), self.calls[idx].expected_iseq) < 0 {
			// A retransmit legitimately carries a low sequence: ACK it
			// again with the same timestamp so the peer settles down.
			if frame.is_retransmit() {
				if !frame.no_ack_required() {
					self.send_ack(idx, frame.timestamp());
				}
			} else {
				info!("Ignoring message already acknowledged (low sequence) {}", frame.oseq());
				self.calls[idx].rx_seq_error_count += 1;
			}
			return;
		} else {
			// Too high: a gap the peer's retransmission will fill.
			self.calls[idx].rx_seq_error_count += 1;
			return;
		}

		// Anything arriving for a dying call gets a HANGUP reminder.
		if !self.calls[idx].state.live() {
			let now = now_ms;
			self.send_iax(idx, now, iax::HANGUP);
			return;
		}

		let ty = frame.frame_type();
		let sub = frame.subclass();

		match (ty, sub) {
			(ftype::IAX, iax::AUTHREQ) => self.handle_authreq(idx, frame, now_ms),
			(ftype::IAX, iax::REJECT) => {
				info!("Call {} got REJECT", self.calls[idx].local_call_id);
				self.hangup_call(idx, now_ms);
			}
			(ftype::IAX, iax::ACCEPT) => self.handle_accept(idx, frame, now_ms),
			(ftype::IAX, iax::HANGUP) => {
				info!("Call {} got HANGUP", self.calls[idx].local_call_id);
				self.calls[idx].state = State::TerminateWaiting;
			}
			(ftype::IAX, iax::INVAL) => {
				// The peer no longer recognises this call; tear it down
				// without ceremony.
				info!("Call {} got INVAL", self.calls[idx].local_call_id);
				self.calls[idx].state = State::TerminateWaiting;
			}
			(ftype::IAX, iax::LAGRQ) => {
				// Answered with a LAGRP echoing the timestamp; a jitter
				// buffer would normally delay this, but the echo is
				// immediate here.
				let call = &mut self.calls[idx];
				let reply = FullFrame::new(
					call.local_call_id,
					call.remote_call_id,
					frame.timestamp(),
					call.oseq,
					call.expected_iseq,
					ftype::IAX,
					iax::LAGRP,
				);
				self.send_frame_call(idx, &reply);
			}
			(ftype::IAX, iax::LAGRP) => {
				let call = &mut self.calls[idx];
				call.last_lag_ms = call.local_elapsed_ms(now_ms).wrapping_sub(frame.timestamp()) as i32;
			}
			(ftype::IAX, iax::PING) => {
				let call = &mut self.calls[idx];
				let reply = FullFrame::new(
					call.local_call_id,
					call.remote_call_id,
					call.dispense_ms(now_ms),
					call.oseq,
					call.expected_iseq,
					ftype::IAX,
					iax::PONG,
				);
				self.send_frame_call(idx, &reply);
			}
			(ftype::IAX, iax::PONG) => {
				let call = &mut self.calls[idx];
				let rtt = now_ms.wrapping_sub(call.last_ping_sent_ms);
				call.last_ping_rtt_ms = rtt;
				// Gross outliers are discarded rather than smoothed.
				if rtt < 500 {
					call.ping_count += 1;
					let first = call.ping_count == 1;
					call.update_network_delay(rtt / 2, first);
				}
			}
			(ftype::VOICE, _) => self.handle_voice(idx, frame, now_ms),
			(ftype::TEXT, 0) => self.handle_text(cx, idx, frame, now_ms),
			(ftype::CONTROL, control::ANSWER) => {
				let call = &mut self.calls[idx];
				if call.side == Side::Caller {
					if call.state == State::Linked {
						call.state = State::Up;
					} else {
						info!("ANSWER in unexpected state {:?}", call.state);
					}
				}
			}
			(ftype::CONTROL, control::KEY) | (ftype::CONTROL, control::STOP_SOUNDS) => {}
			(ftype::CONTROL, control::UNKEY) => {
				let msg = Message::signal(Signal::RadioUnkey, frame.timestamp(), now_ms)
					.with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
				self.publish(msg);
			}
			(ftype::COMFORT, _) => {}
			(ftype::DTMF2, _) => {
				let symbol = sub;
				info!("Call {} DTMF press {}", self.calls[idx].local_call_id, symbol as char);
				let p = payload::Dtmf { symbol };
				let msg = Message::signal_with(Signal::DtmfPress, &p.to_bytes(), 0, now_ms)
					.with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
				self.publish(msg);
			}
			(ftype::DTMF, _) => {
				info!("Call {} DTMF release {}", self.calls[idx].local_call_id, sub as char);
			}
			_ => {
				info!("Call {} unrecognised frame {ty}/{sub}", self.calls[idx].local_call_id);
			}
		}
	}

	/// The callee challenged this caller; sign and answer.
	fn handle_authreq(&mut self, idx: usize, frame: &FullFrame, now_ms: u32) {
		info!("Call {} got AUTHREQ challenge", self.calls[idx].local_call_id);

		let Some(methods) = frame.ie_u16(ie::AUTHMETHODS) else {
			error!("Call {} unable to get AUTHMETHOD", self.calls[idx].local_call_id);
			return;
		};

		if methods & frame::AUTHMETHOD_ED25519 == 0 {
			error!("Call {} unsupported AUTHMETHOD {methods:#06x}", self.calls[idx].local_call_id);
			return;
		}

		let Some(token) = frame.ie_str(ie::CHALLENGE).filter(|t| !t.is_empty()) else {
			error!("Unable to get challenge token");
			return;
		};

		let Some(key) = &self.signing else {
			error!("No private key configured, cannot answer challenge");
			return;
		};
		let sig = auth::sign_challenge(key, &token);

		let call = &mut self.calls[idx];
		let mut reply = FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			ftype::IAX,
			iax::AUTHREP,
		);
		let _ = reply.push_ie_str(ie::ED25519_RESULT, &sig);

		self.send_frame_call(idx, &reply);
	}

	/// The callee accepted our NEW and assigned the codec.
	fn handle_accept(&mut self, idx: usize, frame: &FullFrame, now_ms: u32) {
		let elapsed = self.calls[idx].local_elapsed_ms(now_ms);
		info!("Call {} got ACCEPT t={elapsed}", self.calls[idx].local_call_id);

		// Elapsed time restarted with the NEW, so the ACCEPT time is
		// one network round trip; one-way is half.
		self.calls[idx].update_network_delay(elapsed / 2, true);

		let Some(assigned) = frame.ie_u32(ie::FORMAT) else {
			error!("Unable to get assigned CODEC");
			self.hangup_call(idx, now_ms);
			return;
		};

		let assigned = Codec(assigned);
		if !assigned.is_supported() {
			error!("Unsupported CODEC assigned {assigned:?}");
			self.hangup_call(idx, now_ms);
			return;
		}

		self.calls[idx].codec = assigned;
		info!("CODEC assigned {assigned:?}");

		self.send_connect_greetings(idx, now_ms);
		self.calls[idx].state = State::Linked;

		self.publish_call_start(idx, now_ms, true);
	}

	/// Voice in a full frame: the payload must exactly fill the codec
	/// block.
	fn handle_voice(&mut self, idx: usize, frame: &FullFrame, now_ms: u32) {
		let call = &self.calls[idx];
		let expected = call.codec.frame_bytes();

		if expected == 0 {
			error!("Voice frame with no negotiated CODEC");
			return;
		}
		if frame.body().len() != expected {
			info!("Voice frame size error ({} != {expected})", frame.body().len());
			return;
		}

		let msg = Message::audio(call.codec, frame.body(), frame.timestamp(), now_ms)
			.with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
		self.publish(msg);
	}

	/// Voice in a mini frame, matched by remote call id and address.
	fn process_mini_frame(&mut self, buf: &[u8], peer: SocketAddr, now_ms: u32) {
		let Some((src_call, ts_low, voice)) = frame::mini_parse(buf) else {
			return;
		};

		let Some(idx) = self
			.calls
			.iter()
			.position(|c| c.active && c.remote_call_id == src_call && c.is_peer(peer))
		else {
			return;
		};

		let call = &mut self.calls[idx];
		call.last_frame_rx_ms = now_ms;

		// The 16-bit stamp extends against our local call clock; this
		// assumes the two ends' clocks run in the same vicinity.
		let orig_ms = extend_time(ts_low as u32, call.local_elapsed_ms(now_ms));

		let block = call.codec.frame_bytes();
		if block == 0 {
			error!("Mini frame with no negotiated CODEC");
			return;
		}
		if voice.len() > block {
			error!("Voice frame size error ({} > {block})", voice.len());
			return;
		}

		let msg = Message::audio(call.codec, voice, orig_ms, now_ms).with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
		self.publish(msg);
	}

	/// The AllStarLink text protocol: key exchange echoes, DTMF via
	/// text, telemetry (TALKERID) and link reports.
	fn handle_text(&mut self, _cx: CX![], idx: usize, frame: &FullFrame, now_ms: u32) {
		let body = frame.body();
		let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
		let text = String::from_utf8_lossy(&body[..end]).into_owned();

		if text.is_empty() {
			return;
		}

		if text == "!NEWKEY1!" {
			// Meaning unknown; the convention is to echo it back.
			self.send_text(idx, now_ms, "!NEWKEY1!");
		} else if text == "!!DISCONNECT!!" {
			info!("Call {} got forced disconnect", self.calls[idx].local_call_id);
		} else if let Some(rest) = text.strip_prefix('D') {
			// Some softphones deliver DTMF as "D <a> <b> <c> <symbol>".
			if let Some(symbol) = rest.split_whitespace().nth(3).and_then(|t| t.chars().next()) {
				info!("Call {} DTMF press {symbol}", self.calls[idx].local_call_id);
				let p = payload::Dtmf { symbol: symbol as u8 };
				let msg = Message::signal_with(Signal::DtmfPress, &p.to_bytes(), 0, now_ms)
					.with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
				self.publish(msg);
			}
		} else if let Some(rest) = text.strip_prefix("T ") {
			// "T <node> <CMD>,<params>" telemetry.
			let mut parts = rest.splitn(2, ' ');
			let _node = parts.next();
			let Some(cmd_params) = parts.next() else { return };
			let mut cp = cmd_params.splitn(2, ',');
			let cmd = cp.next().unwrap_or("");
			let params = cp.next().unwrap_or("");

			if cmd == "TALKERID" {
				let msg = Message::signal_with(Signal::CallTalkerId, params.as_bytes(), 0, now_ms)
					.with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
				self.publish(msg);
			}
		} else if let Some(list) = text.strip_prefix("L ").or(if text == "L" { Some("") } else { None }) {
			// "L <MODE><NODE>,..." link report; empty list when alone.
			let msg = Message::signal_with(Signal::LinkReport, list.as_bytes(), 0, now_ms)
				.with_route(self.addr_for(idx), bus::Addr::bus(self.dest_bus_id));
			self.publish(msg);
		} else {
			info!("Unrecognised text: {text:?}");
		}
	}
}
