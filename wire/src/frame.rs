//! IAX2 frame codec. A full frame is a 12-byte header followed by an
//! IE sequence or a codec payload; a mini frame is a 4-byte header
//! followed by voice. Octet 0 bit 7 distinguishes the two.
//!
//! Everything here operates on untrusted datagrams: getters are total
//! (absent or truncated fields read as `None`), setters enforce the
//! buffer invariants.

use utils::bytes::{get_u16, get_u32, put_u16, put_u32};
use utils::error::Result;

pub const MAX_FRAME: usize = 1500;
pub const FULL_HEADER: usize = 12;
pub const MINI_HEADER: usize = 4;
pub const MAX_BODY: usize = MAX_FRAME - FULL_HEADER;

/// Frame types (header octet 10).
pub mod ftype {
	pub const DTMF: u8 = 0x01;
	pub const VOICE: u8 = 0x02;
	pub const CONTROL: u8 = 0x04;
	pub const IAX: u8 = 0x06;
	pub const TEXT: u8 = 0x07;
	pub const COMFORT: u8 = 0x0a;
	// Not in RFC 5456: standalone DTMF key-press type.
	pub const DTMF2: u8 = 0x0c;
}

/// Subclasses of the IAX control type (0x06).
pub mod iax {
	pub const NEW: u8 = 0x01;
	pub const PING: u8 = 0x02;
	pub const PONG: u8 = 0x03;
	pub const ACK: u8 = 0x04;
	pub const HANGUP: u8 = 0x05;
	pub const REJECT: u8 = 0x06;
	pub const ACCEPT: u8 = 0x07;
	pub const AUTHREQ: u8 = 0x08;
	pub const AUTHREP: u8 = 0x09;
	pub const INVAL: u8 = 0x0a;
	pub const LAGRQ: u8 = 0x0b;
	pub const LAGRP: u8 = 0x0c;
	pub const VNAK: u8 = 0x12;
	pub const POKE: u8 = 0x1e;
	// Not in RFC 5456: call-token challenge.
	pub const CALLTOKEN: u8 = 0x28;
}

/// Subclasses of the control type (0x04).
pub mod control {
	pub const ANSWER: u8 = 0x04;
	pub const KEY: u8 = 0x0c;
	pub const UNKEY: u8 = 0x0d;
	pub const STOP_SOUNDS: u8 = 0xff;
}

/// Information element ids. The RFC numbering, plus the AllStarLink
/// local assignments which must be preserved for wire compatibility.
pub mod ie {
	pub const CALLED_NUMBER: u8 = 0x01;
	pub const CALLING_NUMBER: u8 = 0x02;
	pub const CALLING_USER: u8 = 0x06;
	pub const CAPABILITY: u8 = 0x08;
	pub const FORMAT: u8 = 0x09;
	pub const LANGUAGE: u8 = 0x0a;
	pub const VERSION: u8 = 0x0b;
	pub const ADSICPE: u8 = 0x0c;
	pub const AUTHMETHODS: u8 = 0x0e;
	pub const CHALLENGE: u8 = 0x0f;
	// String "addr:port" form, not the RFC sockaddr layout.
	pub const APPARENT_ADDR: u8 = 0x12;
	// Local assignments for the POKE/PONG forwarding extension.
	pub const TARGET_ADDR: u8 = 0x13;
	pub const TARGET_ADDR2: u8 = 0x18;
	pub const DATETIME: u8 = 0x1f;
	pub const CODEC_PREFS: u8 = 0x26;
	// Local assignment: hex ED25519 signature in an AUTHREP.
	pub const ED25519_RESULT: u8 = 0x29;
	pub const CAUSE: u8 = 0x31;
	pub const CALLTOKEN: u8 = 0x36;
	pub const CAPABILITY_WIDE: u8 = 0x37;
	pub const FORMAT_WIDE: u8 = 0x38;
}

/// AUTHMETHODS bit for the ED25519 challenge (local extension).
pub const AUTHMETHOD_ED25519: u16 = 0x0008;

/// A strange kind of comparison that takes wrapping into account,
/// assuming the two values are within 128 of each other. For example
/// `0xfd < 0x04` because the right-hand side is taken to have just
/// wrapped around.
pub fn compare_seq_wrap(a: u8, b: u8) -> i32 {
	let (a, b) = (a as i32, b as i32);
	if a == b {
		0
	} else if a < 0x80 {
		if b > a && b < a + 0x80 {
			-1
		} else {
			1
		}
	} else if b < a && b > a - 0x80 {
		1
	} else {
		-1
	}
}

/// Is octet 0 of a datagram the start of a full frame?
pub fn is_full_frame(first: u8) -> bool {
	first & 0x80 != 0
}

/// An owned full frame, header plus body, sized for the worst case so
/// the voice path never allocates.
#[derive(Clone, Copy)]
pub struct FullFrame {
	buf: [u8; MAX_FRAME],
	len: usize,
}

impl Default for FullFrame {
	fn default() -> Self {
		Self { buf: [0; MAX_FRAME], len: FULL_HEADER }
	}
}

impl FullFrame {
	pub fn new(src_call: u16, dst_call: u16, timestamp: u32, oseq: u8, iseq: u8, ty: u8, sub: u8) -> Self {
		let mut f = Self::default();
		f.buf[0] = 0x80 | ((src_call >> 8) as u8 & 0x7f);
		f.buf[1] = src_call as u8;
		f.buf[2] = (dst_call >> 8) as u8 & 0x7f;
		f.buf[3] = dst_call as u8;
		put_u32(&mut f.buf, 4, timestamp);
		f.buf[8] = oseq;
		f.buf[9] = iseq;
		f.buf[10] = ty;
		f.buf[11] = sub;
		f
	}

	/// Parse a received datagram. Shorter than a header is rejected;
	/// longer than the protocol maximum is truncated.
	pub fn parse(bytes: &[u8]) -> Option<Self> {
		if bytes.len() < FULL_HEADER || !is_full_frame(bytes[0]) {
			return None;
		}

		let take = bytes.len().min(MAX_FRAME);
		let mut f = Self::default();
		f.buf[..take].copy_from_slice(&bytes[..take]);
		f.len = take;
		Some(f)
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.buf[..self.len]
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		false
	}

	// ----- Header accessors ------------------------------------------------

	pub fn src_call(&self) -> u16 {
		get_u16(&self.buf, 0) & 0x7fff
	}

	pub fn dst_call(&self) -> u16 {
		get_u16(&self.buf, 2) & 0x7fff
	}

	pub fn timestamp(&self) -> u32 {
		get_u32(&self.buf, 4)
	}

	pub fn set_timestamp(&mut self, ts: u32) {
		put_u32(&mut self.buf, 4, ts);
	}

	pub fn oseq(&self) -> u8 {
		self.buf[8]
	}

	pub fn set_oseq(&mut self, seq: u8) {
		self.buf[8] = seq;
	}

	pub fn iseq(&self) -> u8 {
		self.buf[9]
	}

	pub fn set_iseq(&mut self, seq: u8) {
		self.buf[9] = seq;
	}

	pub fn frame_type(&self) -> u8 {
		self.buf[10]
	}

	pub fn subclass(&self) -> u8 {
		self.buf[11]
	}

	pub fn is_retransmit(&self) -> bool {
		self.buf[2] & 0x80 != 0
	}

	pub fn set_retransmit(&mut self) {
		self.buf[2] |= 0x80;
	}

	pub fn is_type(&self, ty: u8, sub: u8) -> bool {
		self.buf[10] == ty && self.buf[11] == sub
	}

	pub fn is_ack(&self) -> bool {
		self.is_type(ftype::IAX, iax::ACK)
	}

	pub fn is_new(&self) -> bool {
		self.is_type(ftype::IAX, iax::NEW)
	}

	pub fn is_voice(&self) -> bool {
		self.buf[10] == ftype::VOICE
	}

	/// RFC 5456 section 6.9.2: the message classes whose receipt
	/// obligates an ACK, plus the local DTMF types.
	pub fn ack_required(&self) -> bool {
		match self.frame_type() {
			ftype::IAX => matches!(
				self.subclass(),
				iax::NEW | iax::HANGUP | iax::REJECT | iax::ACCEPT | iax::PONG | iax::LAGRP | iax::AUTHREP
			),
			ftype::CONTROL => matches!(self.subclass(), control::ANSWER | control::KEY | control::UNKEY | control::STOP_SOUNDS),
			ftype::TEXT => self.subclass() == 0,
			ftype::VOICE | ftype::COMFORT | ftype::DTMF | ftype::DTMF2 => true,
			_ => false,
		}
	}

	/// The classes that must never be re-ACKed even on retransmit.
	pub fn no_ack_required(&self) -> bool {
		self.frame_type() == ftype::IAX && matches!(self.subclass(), iax::ACK | iax::VNAK | iax::PING | iax::LAGRQ)
	}

	/// RFC 5456 section 7: everything consumes an outbound sequence
	/// number except ACK and INVAL.
	pub fn counts_for_sequence(&self) -> bool {
		!(self.is_ack() || self.is_type(ftype::IAX, iax::INVAL))
	}

	// ----- Body ------------------------------------------------------------

	pub fn body(&self) -> &[u8] {
		&self.buf[FULL_HEADER..self.len]
	}

	/// Replace the body with raw bytes (voice payloads, text).
	pub fn set_body(&mut self, body: &[u8]) -> Result {
		if body.len() > MAX_BODY {
			return Err(());
		}
		self.buf[FULL_HEADER..FULL_HEADER + body.len()].copy_from_slice(body);
		self.len = FULL_HEADER + body.len();
		Ok(())
	}

	// ----- Information elements --------------------------------------------

	fn space_left(&self) -> usize {
		MAX_FRAME - self.len
	}

	/// Append a raw IE. Values longer than one octet can express, or
	/// that do not fit the frame, are rejected.
	pub fn push_ie(&mut self, id: u8, value: &[u8]) -> Result {
		if value.len() > u8::MAX as usize || self.space_left() < 2 + value.len() {
			return Err(());
		}
		self.buf[self.len] = id;
		self.buf[self.len + 1] = value.len() as u8;
		self.buf[self.len + 2..self.len + 2 + value.len()].copy_from_slice(value);
		self.len += 2 + value.len();
		Ok(())
	}

	pub fn push_ie_u8(&mut self, id: u8, v: u8) -> Result {
		self.push_ie(id, &[v])
	}

	pub fn push_ie_u16(&mut self, id: u8, v: u16) -> Result {
		self.push_ie(id, &v.to_be_bytes())
	}

	pub fn push_ie_u32(&mut self, id: u8, v: u32) -> Result {
		self.push_ie(id, &v.to_be_bytes())
	}

	pub fn push_ie_str(&mut self, id: u8, v: &str) -> Result {
		self.push_ie(id, v.as_bytes())
	}

	/// Find an IE by id. A trailing truncated element reads as absent.
	pub fn ie(&self, id: u8) -> Option<&[u8]> {
		let body = self.body();
		let mut at = 0;

		while at + 2 <= body.len() {
			let len = body[at + 1] as usize;
			if at + 2 + len > body.len() {
				return None;
			}
			if body[at] == id {
				return Some(&body[at + 2..at + 2 + len]);
			}
			at += 2 + len;
		}

		None
	}

	pub fn ie_u16(&self, id: u8) -> Option<u16> {
		match self.ie(id)? {
			v if v.len() == 2 => Some(get_u16(v, 0)),
			_ => None,
		}
	}

	pub fn ie_u32(&self, id: u8) -> Option<u32> {
		match self.ie(id)? {
			v if v.len() == 4 => Some(get_u32(v, 0)),
			_ => None,
		}
	}

	/// An IE interpreted as text. Interior NULs terminate the value,
	/// matching the zero-terminated-ASCII convention on the wire.
	pub fn ie_str(&self, id: u8) -> Option<String> {
		let v = self.ie(id)?;
		let end = v.iter().position(|&b| b == 0).unwrap_or(v.len());
		Some(String::from_utf8_lossy(&v[..end]).into_owned())
	}

	/// Walk every well-formed IE in order. A truncated trailing element
	/// ends the walk.
	pub fn ies(&self) -> impl Iterator<Item = (u8, &[u8])> {
		IeIter { body: self.body(), at: 0 }
	}
}

struct IeIter<'a> {
	body: &'a [u8],
	at: usize,
}

impl<'a> Iterator for IeIter<'a> {
	type Item = (u8, &'a [u8]);

	fn next(&mut self) -> Option<Self::Item> {
		if self.at + 2 > self.body.len() {
			return None;
		}
		let id = self.body[self.at];
		let len = self.body[self.at + 1] as usize;
		let value = self.body.get(self.at + 2..self.at + 2 + len)?;
		self.at += 2 + len;
		Some((id, value))
	}
}

impl core::fmt::Debug for FullFrame {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		write!(
			f,
			"FullFrame {{ sc={} dc={} os={} is={} ts={} ty={}/{} {} len={} }}",
			self.src_call(),
			self.dst_call(),
			self.oseq(),
			self.iseq(),
			self.timestamp(),
			self.frame_type(),
			self.subclass(),
			type_desc(self.frame_type(), self.subclass()),
			self.len
		)
	}
}

// ----- Mini frames ----------------------------------------------------------

/// Encode a voice mini frame into `out`; returns the encoded length.
pub fn mini_encode(src_call: u16, timestamp: u32, payload: &[u8], out: &mut [u8]) -> Option<usize> {
	let len = MINI_HEADER + payload.len();
	if out.len() < len || len > MAX_FRAME {
		return None;
	}
	put_u16(out, 0, src_call & 0x7fff);
	put_u16(out, 2, timestamp as u16);
	out[MINI_HEADER..len].copy_from_slice(payload);
	Some(len)
}

/// Split a mini frame into `(source-call-id, low-16 timestamp, voice)`.
pub fn mini_parse(bytes: &[u8]) -> Option<(u16, u16, &[u8])> {
	if bytes.len() < MINI_HEADER || is_full_frame(bytes[0]) {
		return None;
	}
	Some((get_u16(bytes, 0) & 0x7fff, get_u16(bytes, 2), &bytes[MINI_HEADER..]))
}

// ----- Voice subclass encoding ----------------------------------------------

/// RFC 5456 section 8.1.1: a subclass carrying a codec bit that does
/// not fit 7 bits is sent as `0x80 | log2(bit)`.
pub fn codec_to_subclass(mask: u32) -> u8 {
	if mask < 0x80 {
		mask as u8
	} else {
		0x80 | mask.trailing_zeros() as u8
	}
}

pub fn subclass_to_codec(sub: u8) -> u32 {
	if sub & 0x80 != 0 {
		1u32.wrapping_shl((sub & 0x7f) as u32)
	} else {
		sub as u32
	}
}

/// Extend a mini frame's 16-bit timestamp to the full 32 bits by a
/// windowed comparison with the local call clock: a candidate in the
/// lower or upper half-period of the window rolls the high 16 bits up
/// or down respectively. Assumes the two clocks run in the same
/// general vicinity.
pub fn extend_time(remote_time: u32, local_time: u32) -> u32 {
	if remote_time & 0xffff_0000 != 0 {
		return remote_time;
	}

	let r2 = remote_time & 0x0000_ffff;
	let l1 = local_time & 0xffff_0000;
	let l2 = local_time & 0x0000_ffff;

	if l2 >= 0x8000 {
		let boundary = (l2 - 0x8000) & 0xffff;
		if r2 < boundary {
			l1.wrapping_add(0x0001_0000) | r2
		} else {
			l1 | r2
		}
	} else {
		let boundary = (l2 + 0x8000) & 0xffff;
		if r2 > boundary {
			l1.wrapping_sub(0x0001_0000) | r2
		} else {
			l1 | r2
		}
	}
}

/// Human-readable frame description for traces.
pub fn type_desc(ty: u8, sub: u8) -> &'static str {
	match (ty, sub) {
		(ftype::VOICE, _) => "VOICE",
		(ftype::CONTROL, control::ANSWER) => "ANSWER",
		(ftype::CONTROL, control::KEY) => "KEY_RADIO",
		(ftype::CONTROL, control::UNKEY) => "UNKEY_RADIO",
		(ftype::CONTROL, control::STOP_SOUNDS) => "STOP_SOUNDS",
		(ftype::IAX, iax::NEW) => "NEW",
		(ftype::IAX, iax::PING) => "PING",
		(ftype::IAX, iax::PONG) => "PONG",
		(ftype::IAX, iax::ACK) => "ACK",
		(ftype::IAX, iax::HANGUP) => "HANGUP",
		(ftype::IAX, iax::REJECT) => "REJECT",
		(ftype::IAX, iax::ACCEPT) => "ACCEPT",
		(ftype::IAX, iax::AUTHREQ) => "AUTHREQ",
		(ftype::IAX, iax::AUTHREP) => "AUTHREP",
		(ftype::IAX, iax::INVAL) => "INVAL",
		(ftype::IAX, iax::LAGRQ) => "LAGRQ",
		(ftype::IAX, iax::LAGRP) => "LAGRP",
		(ftype::IAX, iax::VNAK) => "VNAK",
		(ftype::IAX, iax::POKE) => "POKE",
		(ftype::IAX, iax::CALLTOKEN) => "CALLTOKEN",
		(ftype::TEXT, 0) => "TEXT",
		(ftype::DTMF, _) => "DTMF",
		(ftype::DTMF2, _) => "DTMFPRESS",
		(ftype::COMFORT, _) => "COMFORT",
		_ => "(UNKNOWN)",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn seq_wrap_ordering() {
		assert_eq!(compare_seq_wrap(6, 7), -1);
		assert_eq!(compare_seq_wrap(7, 6), 1);
		assert_eq!(compare_seq_wrap(0xf3, 0x03), -1);
		assert_eq!(compare_seq_wrap(0xfd, 0x04), -1);
		assert_eq!(compare_seq_wrap(0, 0), 0);
		assert_eq!(compare_seq_wrap(0, 1), -1);
		assert_eq!(compare_seq_wrap(0, 0xff), 1);
	}

	#[test]
	fn seq_wrap_trichotomy_in_window() {
		// Any two distinct values within a 127-wide window order
		// consistently in both directions.
		for base in [0u8, 100, 200, 250] {
			for d in 1u8..127 {
				let a = base;
				let b = base.wrapping_add(d);
				assert_eq!(compare_seq_wrap(a, b), -1, "a={a} b={b}");
				assert_eq!(compare_seq_wrap(b, a), 1, "a={a} b={b}");
			}
		}
	}

	#[test]
	fn header_roundtrip() {
		let mut f = FullFrame::new(0x1234, 0x0456, 0xdeadbeef, 7, 9, ftype::IAX, iax::NEW);
		assert_eq!(f.src_call(), 0x1234);
		assert_eq!(f.dst_call(), 0x0456);
		assert_eq!(f.timestamp(), 0xdeadbeef);
		assert_eq!(f.oseq(), 7);
		assert_eq!(f.iseq(), 9);
		assert!(f.is_new());
		assert!(!f.is_retransmit());

		f.set_retransmit();
		assert!(f.is_retransmit());
		// The retransmit bit must not leak into the call id.
		assert_eq!(f.dst_call(), 0x0456);

		f.set_iseq(33);
		assert_eq!(f.iseq(), 33);

		let parsed = FullFrame::parse(f.as_bytes()).unwrap();
		assert_eq!(parsed.as_bytes(), f.as_bytes());
	}

	#[test]
	fn parse_rejects_short_and_truncates_long() {
		assert!(FullFrame::parse(&[0x80; 11]).is_none());
		assert!(FullFrame::parse(&[0x00; 16]).is_none());

		let long = [0x80u8; 2000];
		let f = FullFrame::parse(&long).unwrap();
		assert_eq!(f.len(), MAX_FRAME);
	}

	#[test]
	fn ie_roundtrip() {
		let mut f = FullFrame::new(1, 0, 0, 0, 0, ftype::IAX, iax::NEW);
		f.push_ie_u16(ie::VERSION, 2).unwrap();
		f.push_ie_str(ie::CALLED_NUMBER, "61057").unwrap();
		f.push_ie_u32(ie::CAPABILITY, 0x8044).unwrap();
		f.push_ie_u8(ie::CAUSE, 7).unwrap();

		assert_eq!(f.ie_u16(ie::VERSION), Some(2));
		assert_eq!(f.ie_str(ie::CALLED_NUMBER).as_deref(), Some("61057"));
		assert_eq!(f.ie_u32(ie::CAPABILITY), Some(0x8044));
		assert_eq!(f.ie(ie::CAUSE), Some(&[7u8][..]));

		// Absent and mis-sized lookups are total.
		assert_eq!(f.ie(ie::CHALLENGE), None);
		assert_eq!(f.ie_u32(ie::VERSION), None);
		assert_eq!(f.ie_u16(ie::CAUSE), None);
	}

	#[test]
	fn ie_iteration_preserves_order() {
		let mut f = FullFrame::new(1, 0, 0, 0, 0, ftype::IAX, iax::NEW);
		f.push_ie_u16(ie::VERSION, 2).unwrap();
		f.push_ie_str(ie::CALLED_NUMBER, "999").unwrap();
		f.push_ie(ie::CALLTOKEN, &[]).unwrap();

		let ies: Vec<(u8, &[u8])> = f.ies().collect();
		assert_eq!(ies.len(), 3);
		assert_eq!(ies[0], (ie::VERSION, &[0u8, 2][..]));
		assert_eq!(ies[1], (ie::CALLED_NUMBER, &b"999"[..]));
		assert_eq!(ies[2], (ie::CALLTOKEN, &[][..]));

		// A truncated trailer ends iteration at the last good element.
		let mut raw = f.as_bytes().to_vec();
		raw.extend_from_slice(&[ie::CAUSE, 9, 1]);
		let f = FullFrame::parse(&raw).unwrap();
		assert_eq!(f.ies().count(), 3);
	}

	#[test]
	fn ie_zero_length_found() {
		let mut f = FullFrame::new(1, 0, 0, 0, 0, ftype::IAX, iax::NEW);
		f.push_ie(ie::CALLTOKEN, &[]).unwrap();
		assert_eq!(f.ie(ie::CALLTOKEN), Some(&[][..]));
		assert_eq!(f.ie_str(ie::CALLTOKEN).as_deref(), Some(""));
	}

	#[test]
	fn ie_truncated_trailer_is_absent() {
		let mut f = FullFrame::new(1, 0, 0, 0, 0, ftype::IAX, iax::NEW);
		f.push_ie_u16(ie::VERSION, 2).unwrap();
		// Claim 200 bytes of CAUSE but provide none.
		let mut raw = f.as_bytes().to_vec();
		raw.extend_from_slice(&[ie::CAUSE, 200]);
		let f = FullFrame::parse(&raw).unwrap();
		assert_eq!(f.ie_u16(ie::VERSION), Some(2));
		assert_eq!(f.ie(ie::CAUSE), None);
	}

	#[test]
	fn ack_classification() {
		let ack = FullFrame::new(1, 2, 0, 0, 0, ftype::IAX, iax::ACK);
		assert!(!ack.ack_required());
		assert!(ack.no_ack_required());
		assert!(!ack.counts_for_sequence());

		let inval = FullFrame::new(1, 2, 0, 0, 0, ftype::IAX, iax::INVAL);
		assert!(!inval.counts_for_sequence());

		for (ty, sub) in [
			(ftype::IAX, iax::NEW),
			(ftype::IAX, iax::HANGUP),
			(ftype::IAX, iax::REJECT),
			(ftype::IAX, iax::ACCEPT),
			(ftype::IAX, iax::PONG),
			(ftype::IAX, iax::AUTHREP),
			(ftype::CONTROL, control::ANSWER),
			(ftype::CONTROL, control::KEY),
			(ftype::CONTROL, control::UNKEY),
			(ftype::CONTROL, control::STOP_SOUNDS),
			(ftype::TEXT, 0),
			(ftype::VOICE, 4),
			(ftype::COMFORT, 0),
			(ftype::DTMF, b'5'),
			(ftype::DTMF2, b'5'),
		] {
			let f = FullFrame::new(1, 2, 0, 0, 0, ty, sub);
			assert!(f.ack_required(), "ty={ty} sub={sub}");
			assert!(f.counts_for_sequence(), "ty={ty} sub={sub}");
		}

		for sub in [iax::ACK, iax::VNAK, iax::PING, iax::LAGRQ] {
			let f = FullFrame::new(1, 2, 0, 0, 0, ftype::IAX, sub);
			assert!(f.no_ack_required(), "sub={sub}");
		}
	}

	#[test]
	fn mini_roundtrip() {
		let payload = [7u8; 160];
		let mut out = [0u8; 256];
		let n = mini_encode(0x0123, 0xaabb_ccdd, &payload, &mut out).unwrap();
		assert_eq!(n, 164);
		assert!(!is_full_frame(out[0]));

		let (call, ts, body) = mini_parse(&out[..n]).unwrap();
		assert_eq!(call, 0x0123);
		assert_eq!(ts, 0xccdd);
		assert_eq!(body, &payload);
	}

	#[test]
	fn extend_time_window() {
		// For any (high, low, local) with the local clock within half a
		// period of the true time, extension is exact.
		for high in [0u32, 1, 2, 0x7fff] {
			for low in [0u32, 1, 0x4321, 0x7fff, 0x8000, 0xffff] {
				let truth = high << 16 | low;
				for drift in [-0x7000i64, -1, 0, 1, 0x7000] {
					let local = truth as i64 + drift;
					if local < 0 {
						continue;
					}
					assert_eq!(extend_time(low, local as u32), truth, "high={high:#x} low={low:#x} drift={drift}");
				}
			}
		}

		// Already-extended stamps pass through.
		assert_eq!(extend_time(0x0001_0000, 5), 0x0001_0000);
	}

	#[test]
	fn voice_subclass_encoding() {
		assert_eq!(codec_to_subclass(0x04), 0x04);
		assert_eq!(codec_to_subclass(0x40), 0x40);
		assert_eq!(codec_to_subclass(0x8000), 0x8f);
		assert_eq!(subclass_to_codec(0x8f), 0x8000);
		assert_eq!(subclass_to_codec(0x04), 0x04);
	}
}
