//! Minimal DNS codec for the node directory: enough to form A, SRV and
//! TXT queries against a single resolver and to pull the first matching
//! answer back out, with NXDOMAIN ("node is not registered") kept
//! distinct from every other failure.

use core::net::Ipv4Addr;

use bilge::prelude::*;
use log::warn;
use utils::bytes::{get_u16, put_u16};

pub const TYPE_A: u16 = 1;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_SRV: u16 = 33;
const CLASS_IN: u16 = 1;

const HEADER_LEN: usize = 12;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DnsError {
	/// The name does not exist: the node is unregistered.
	NxDomain,
	/// Any other failure: truncated packet, SERVFAIL, missing record.
	Failed,
}

#[bitsize(4)]
#[derive(FromBits, PartialEq, Debug)]
enum Rcode {
	Ok = 0,
	FormatErr = 1,
	ServerFailure = 2,
	/// The queried name does not exist.
	NameErr = 3,
	NotImplemented = 4,
	Refused = 5,
	#[fallback]
	Reserved,
}

#[bitsize(4)]
#[derive(FromBits, PartialEq, Debug)]
enum Opcode {
	Query = 0,
	IQuery = 1,
	Status = 2,
	#[fallback]
	Reserved,
}

#[bitsize(16)]
#[derive(FromBits)]
struct Flags {
	rcode: Rcode,
	z: u3,
	/// Recursion available.
	ra: bool,
	/// Recursion desired.
	rd: bool,
	/// Truncated.
	tc: bool,
	/// Authoritative answer.
	aa: bool,
	opcode: Opcode,
	/// Query (0) or response (1).
	qr: bool,
}

/// Build a recursive query for one name. Fails on names that violate
/// the label or total-length limits.
pub fn make_query(id: u16, name: &str, qtype: u16) -> Result<Vec<u8>, ()> {
	let mut out = vec![0u8; HEADER_LEN];

	put_u16(&mut out, 0, id);
	put_u16(&mut out, 2, u16::from(Flags::new(Rcode::Ok, u3::new(0), false, true, false, false, Opcode::Query, false)));
	// One question, no resource records.
	put_u16(&mut out, 4, 1);

	for label in name.split('.') {
		let bytes = label.as_bytes();
		if bytes.is_empty() || bytes.len() > 63 {
			warn!("Bad DNS label in {name:?}");
			return Err(());
		}
		out.push(bytes.len() as u8);
		out.extend_from_slice(bytes);
	}
	out.push(0);

	if out.len() - HEADER_LEN > 255 {
		warn!("DNS name too long: {name:?}");
		return Err(());
	}

	out.extend_from_slice(&qtype.to_be_bytes());
	out.extend_from_slice(&CLASS_IN.to_be_bytes());

	Ok(out)
}

/// The request id of a response, used to correlate with a call slot.
pub fn response_id(buf: &[u8]) -> Option<u16> {
	(buf.len() >= HEADER_LEN).then(|| get_u16(buf, 0))
}

/// Walk past a (possibly compressed) name, returning the next offset.
fn skip_name(buf: &[u8], mut at: usize) -> Result<usize, DnsError> {
	loop {
		let len = *buf.get(at).ok_or(DnsError::Failed)? as usize;
		match len >> 6 {
			// A label: step over it; a zero label ends the name.
			0b00 => {
				at += 1 + len;
				if len == 0 {
					return Ok(at);
				}
			}
			// A compression pointer ends the name after two octets.
			0b11 => return Ok(at + 2),
			_ => return Err(DnsError::Failed),
		}
	}
}

/// Decode a (possibly compressed) name into dotted text.
fn read_name(buf: &[u8], mut at: usize) -> Result<String, DnsError> {
	let mut name = String::new();
	let mut jumps = 0;

	loop {
		let len = *buf.get(at).ok_or(DnsError::Failed)? as usize;
		match len >> 6 {
			0b00 => {
				if len == 0 {
					return Ok(name);
				}
				let label = buf.get(at + 1..at + 1 + len).ok_or(DnsError::Failed)?;
				if !name.is_empty() {
					name.push('.');
				}
				name.push_str(&String::from_utf8_lossy(label));
				at += 1 + len;
			}
			0b11 => {
				// Guard against pointer loops in hostile responses.
				jumps += 1;
				if jumps > 32 {
					return Err(DnsError::Failed);
				}
				let hi = (len & 0x3f) << 8;
				let lo = *buf.get(at + 1).ok_or(DnsError::Failed)? as usize;
				at = hi | lo;
			}
			_ => return Err(DnsError::Failed),
		}
	}
}

/// Find the first answer record of `want_type`, returning the offset
/// and length of its RDATA.
fn find_answer(buf: &[u8], want_type: u16) -> Result<(usize, usize), DnsError> {
	if buf.len() < HEADER_LEN {
		return Err(DnsError::Failed);
	}

	let flags = Flags::from(get_u16(buf, 2));
	if !flags.qr() {
		return Err(DnsError::Failed);
	}
	match flags.rcode() {
		Rcode::Ok => {}
		Rcode::NameErr => return Err(DnsError::NxDomain),
		_ => return Err(DnsError::Failed),
	}

	let qdcount = get_u16(buf, 4);
	let ancount = get_u16(buf, 6);

	let mut at = HEADER_LEN;
	for _ in 0..qdcount {
		at = skip_name(buf, at)?;
		at += 4;
	}

	// Take the first answer of the requested type, stepping over
	// anything else (typically CNAMEs ahead of the A record).
	for _ in 0..ancount {
		at = skip_name(buf, at)?;
		if buf.len() < at + 10 {
			return Err(DnsError::Failed);
		}
		let ty = get_u16(buf, at);
		let rdlength = get_u16(buf, at + 8) as usize;
		let rdata = at + 10;
		if buf.len() < rdata + rdlength {
			return Err(DnsError::Failed);
		}
		if ty == want_type {
			return Ok((rdata, rdlength));
		}
		at = rdata + rdlength;
	}

	Err(DnsError::Failed)
}

pub fn parse_a(buf: &[u8]) -> Result<Ipv4Addr, DnsError> {
	let (at, len) = find_answer(buf, TYPE_A)?;
	if len != 4 {
		return Err(DnsError::Failed);
	}
	Ok(Ipv4Addr::new(buf[at], buf[at + 1], buf[at + 2], buf[at + 3]))
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Srv {
	pub priority: u16,
	pub weight: u16,
	pub port: u16,
	pub target: String,
}

pub fn parse_srv(buf: &[u8]) -> Result<Srv, DnsError> {
	let (at, len) = find_answer(buf, TYPE_SRV)?;
	if len < 7 {
		return Err(DnsError::Failed);
	}
	Ok(Srv {
		priority: get_u16(buf, at),
		weight: get_u16(buf, at + 2),
		port: get_u16(buf, at + 4),
		// The target may point back into the message via compression.
		target: read_name(buf, at + 6)?,
	})
}

/// All character-strings of the first TXT record, concatenated.
pub fn parse_txt(buf: &[u8]) -> Result<String, DnsError> {
	let (mut at, len) = find_answer(buf, TYPE_TXT)?;
	let end = at + len;
	let mut text = String::new();

	while at < end {
		let n = buf[at] as usize;
		let chunk = buf.get(at + 1..at + 1 + n).ok_or(DnsError::Failed)?;
		text.push_str(&String::from_utf8_lossy(chunk));
		at += 1 + n;
	}

	Ok(text)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_layout() {
		let q = make_query(0x1234, "_iax._udp.61057.nodes.allstarlink.org", TYPE_SRV).unwrap();
		assert_eq!(get_u16(&q, 0), 0x1234);
		// RD set, QR clear.
		assert_eq!(q[2] & 0x80, 0);
		assert_eq!(q[2] & 0x01, 0x01);
		assert_eq!(get_u16(&q, 4), 1);
		// First label.
		assert_eq!(q[HEADER_LEN] as usize, 4);
		assert_eq!(&q[HEADER_LEN + 1..HEADER_LEN + 5], b"_iax");
		// Trailer: root label, qtype, qclass.
		let n = q.len();
		assert_eq!(get_u16(&q, n - 4), TYPE_SRV);
		assert_eq!(get_u16(&q, n - 2), CLASS_IN);
	}

	#[test]
	fn query_rejects_bad_names() {
		assert!(make_query(1, &"x".repeat(64), TYPE_A).is_err());
		assert!(make_query(1, "a..b", TYPE_A).is_err());
	}

	/// Hand-roll a response: header, echoed question, then raw answer
	/// records supplied by the caller.
	fn response(id: u16, rcode: u8, question: &str, answers: &[&[u8]], ancount: u16) -> Vec<u8> {
		let mut buf = make_query(id, question, TYPE_A).unwrap();
		buf[2] |= 0x80;
		buf[3] |= rcode;
		put_u16(&mut buf, 6, ancount);
		for a in answers {
			buf.extend_from_slice(a);
		}
		buf
	}

	/// An answer RR with the name compressed to the question at 0x0c.
	fn rr(ty: u16, rdata: &[u8]) -> Vec<u8> {
		let mut out = vec![0xc0, 0x0c];
		out.extend_from_slice(&ty.to_be_bytes());
		out.extend_from_slice(&CLASS_IN.to_be_bytes());
		out.extend_from_slice(&300u32.to_be_bytes());
		out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
		out.extend_from_slice(rdata);
		out
	}

	#[test]
	fn a_answer() {
		let buf = response(7, 0, "host.example.org", &[&rr(TYPE_A, &[52, 8, 197, 124])], 1);
		assert_eq!(response_id(&buf), Some(7));
		assert_eq!(parse_a(&buf), Ok(Ipv4Addr::new(52, 8, 197, 124)));
	}

	#[test]
	fn a_answer_behind_cname() {
		// A CNAME record precedes the A record; it must be skipped.
		let cname = rr(5, &[4, b'r', b'e', b'a', b'l', 0]);
		let a = rr(TYPE_A, &[10, 0, 0, 1]);
		let buf = response(7, 0, "alias.example.org", &[&cname, &a], 2);
		assert_eq!(parse_a(&buf), Ok(Ipv4Addr::new(10, 0, 0, 1)));
	}

	#[test]
	fn srv_answer() {
		let mut rdata = vec![];
		rdata.extend_from_slice(&10u16.to_be_bytes());
		rdata.extend_from_slice(&5u16.to_be_bytes());
		rdata.extend_from_slice(&4569u16.to_be_bytes());
		rdata.extend_from_slice(&[4, b'h', b'o', b's', b't']);
		// Compress the tail of the target onto the question name.
		rdata.extend_from_slice(&[0xc0, 0x0c + 10]);

		let buf = response(7, 0, "_iax._udp.example.org", &[&rr(TYPE_SRV, &rdata)], 1);
		let srv = parse_srv(&buf).unwrap();
		assert_eq!(srv.port, 4569);
		assert_eq!(srv.priority, 10);
		assert_eq!(srv.target, "host.example.org");
	}

	#[test]
	fn txt_answer() {
		let key = "ab".repeat(32);
		let mut rdata = vec![key.len() as u8];
		rdata.extend_from_slice(key.as_bytes());
		let buf = response(7, 0, "61057.nodes.example.org", &[&rr(TYPE_TXT, &rdata)], 1);
		assert_eq!(parse_txt(&buf).unwrap(), key);
	}

	#[test]
	fn nxdomain_is_distinguished() {
		let buf = response(7, 3, "61057.nodes.example.org", &[], 0);
		assert_eq!(parse_a(&buf), Err(DnsError::NxDomain));
		assert_eq!(parse_srv(&buf), Err(DnsError::NxDomain));

		let buf = response(7, 2, "61057.nodes.example.org", &[], 0);
		assert_eq!(parse_a(&buf), Err(DnsError::Failed));
	}

	#[test]
	fn truncated_answers_fail() {
		let mut buf = response(7, 0, "host.example.org", &[&rr(TYPE_A, &[52, 8, 197, 124])], 1);
		buf.truncate(buf.len() - 2);
		assert_eq!(parse_a(&buf), Err(DnsError::Failed));
	}
}
