//! The DNS side of call setup. Queries go to a single configured
//! resolver over the line's second UDP socket; responses correlate back
//! to call slots by the 16-bit request id, and each waiting state knows
//! which record type it expects.

use core::net::SocketAddr;

use log::{info, warn};
use stakker::CX;
use utils::error::Result;
use wire::dns::{self, DnsError};

use crate::call::State;
use crate::{auth, AuthMode, Line};

impl Line {
	/// Issue one query, returning the request id stored in the waiting
	/// call slot.
	pub(crate) fn send_dns_query(&mut self, qtype: u16, name: &str) -> Result<u16> {
		let id = self.next_dns_id();

		let kind = match qtype {
			dns::TYPE_A => "A",
			dns::TYPE_SRV => "SRV",
			dns::TYPE_TXT => "TXT",
			_ => "?",
		};
		info!("Making DNS request ({kind}) for {name}");

		let packet = dns::make_query(id, name, qtype)?;
		self.dns_io.send_to(&packet, self.resolver)?;
		Ok(id)
	}

	fn next_dns_id(&mut self) -> u16 {
		self.dns_request_id_counter = self.dns_request_id_counter.wrapping_add(1);
		self.dns_request_id_counter
	}

	/// Entry point for every datagram on the DNS socket.
	pub(crate) fn dns_rx(&mut self, cx: CX![], src: SocketAddr, buf: Vec<u8>) {
		let now_ms = runtime::time::ms(cx);

		if src.ip() != self.resolver.ip() {
			warn!("DNS response from unexpected source {src}");
			return;
		}

		let Some(id) = dns::response_id(&buf) else { return };

		let Some(idx) = self.calls.iter().position(|c| c.active && c.dns_request_id == id) else {
			info!("Ignoring unexpected DNS response {id:#06x}");
			return;
		};

		match self.calls[idx].state {
			State::Lookup0A => self.dns_srv_response(idx, &buf, now_ms),
			State::Lookup1A => self.dns_a_response(idx, &buf, now_ms),
			State::IpValidation0 => self.dns_ip_validation_response(idx, &buf, now_ms),
			State::AuthrepWait0 => self.dns_public_key_response(idx, &buf, now_ms),
			_ => info!("Ignoring DNS response in state {:?}", self.calls[idx].state),
		}
	}

	/// SRV answer for an outbound call: learn the port, then chase the
	/// target host's address.
	fn dns_srv_response(&mut self, idx: usize, buf: &[u8], now_ms: u32) {
		let (local, remote) = self.call_numbers(idx);

		let srv = match dns::parse_srv(buf) {
			Ok(srv) => srv,
			Err(DnsError::NxDomain) => {
				self.publish_call_failed(&local, &remote, "Node is not registered", now_ms);
				self.terminate_call(idx, now_ms);
				return;
			}
			Err(DnsError::Failed) => {
				self.publish_call_failed(&local, &remote, "DNS error (SRV)", now_ms);
				self.terminate_call(idx, now_ms);
				return;
			}
		};

		// Hold the port; the address arrives with the A answer.
		self.calls[idx].peer = Some(SocketAddr::new(core::net::Ipv4Addr::UNSPECIFIED.into(), srv.port));

		match self.send_dns_query(dns::TYPE_A, &srv.target) {
			Ok(id) => {
				self.calls[idx].dns_request_id = id;
				self.calls[idx].state = State::Lookup1A;
			}
			Err(()) => {
				self.publish_call_failed(&local, &remote, "DNS error (A2)", now_ms);
				self.terminate_call(idx, now_ms);
			}
		}
	}

	/// A answer for an outbound call: the peer address is complete and
	/// initiation can start.
	fn dns_a_response(&mut self, idx: usize, buf: &[u8], now_ms: u32) {
		let (local, remote) = self.call_numbers(idx);

		let addr = match dns::parse_a(buf) {
			Ok(addr) => addr,
			Err(_) => {
				self.publish_call_failed(&local, &remote, "DNS error (A)", now_ms);
				self.terminate_call(idx, now_ms);
				return;
			}
		};

		info!("DNS responded with {addr}");

		let call = &mut self.calls[idx];
		let port = call.peer.map_or(4569, |a| a.port());
		call.peer = Some(SocketAddr::new(addr.into(), port));
		call.dns_request_id = 0;
		call.state = State::InitiationWait;
	}

	/// A answer used to validate an inbound caller's source address
	/// against its registration.
	fn dns_ip_validation_response(&mut self, idx: usize, buf: &[u8], now_ms: u32) {
		let (local, remote) = self.call_numbers(idx);

		let registered = match dns::parse_a(buf) {
			Ok(addr) => Some(addr),
			Err(_) => None,
		};

		let peer_ip = self.calls[idx].peer.map(|a| a.ip());

		match registered {
			Some(addr) if peer_ip == Some(addr.into()) => {
				info!("Call {} IP validation succeeded", self.calls[idx].local_call_id);
				self.calls[idx].source_addr_validated = true;
				self.calls[idx].state = State::CallerValidated;
			}
			Some(_) | None if !self.source_ip_required => {
				info!("Call {} ignoring IP validation failure", self.calls[idx].local_call_id);
				self.calls[idx].state = State::CallerValidated;
			}
			Some(_) => {
				self.publish_call_failed(&local, &remote, "IP address validation failed", now_ms);
				self.reject_and_terminate(idx, now_ms, "Address validation failed");
			}
			None => {
				self.publish_call_failed(&local, &remote, "DNS error (A)", now_ms);
				self.reject_and_terminate(idx, now_ms, "Address validation failed");
			}
		}
	}

	/// TXT answer carrying the caller's public key; a valid key starts
	/// the AUTHREQ challenge.
	fn dns_public_key_response(&mut self, idx: usize, buf: &[u8], now_ms: u32) {
		debug_assert_eq!(self.auth_mode, AuthMode::ChallengeEd25519);

		let (local, remote) = self.call_numbers(idx);

		let txt = match dns::parse_txt(buf) {
			Ok(txt) => txt,
			Err(_) => {
				self.publish_call_failed(&local, &remote, "DNS error (TXT)", now_ms);
				self.reject_and_terminate(idx, now_ms, "No public key");
				return;
			}
		};

		let Some(key) = auth::public_key_from_txt(&txt) else {
			self.publish_call_failed(&local, &remote, "Invalid public key", now_ms);
			self.reject_and_terminate(idx, now_ms, "Invalid public key");
			return;
		};

		let call = &mut self.calls[idx];
		call.public_key = key;

		let challenge = auth::challenge_text(call.local_call_id, call.local_start_ms);

		let mut frame = wire::FullFrame::new(
			call.local_call_id,
			call.remote_call_id,
			call.dispense_ms(now_ms),
			call.oseq,
			call.expected_iseq,
			wire::frame::ftype::IAX,
			wire::frame::iax::AUTHREQ,
		);
		let _ = frame.push_ie_u16(wire::frame::ie::AUTHMETHODS, wire::frame::AUTHMETHOD_ED25519);
		let _ = frame.push_ie_str(wire::frame::ie::CHALLENGE, &challenge);

		call.state = State::AuthrepWait1;

		self.send_frame_call(idx, &frame);
	}

	fn call_numbers(&self, idx: usize) -> (String, String) {
		let call = &self.calls[idx];
		(call.local_number.clone(), call.remote_number.clone())
	}
}
