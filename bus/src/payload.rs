//! Typed signal payloads. These cross thread and component boundaries
//! inside [`Message`](crate::Message) bodies, so each one has an
//! explicit fixed byte layout rather than whatever the compiler picks:
//! little-endian integers, NUL-padded fixed-width strings, one octet
//! per flag.

use utils::bytes::{get_u32, put_u32};

pub const NUMBER_LEN: usize = 16;
pub const TEXT_LEN: usize = 64;

fn put_str<const N: usize>(dst: &mut [u8], at: usize, s: &str) {
	let bytes = s.as_bytes();
	let n = bytes.len().min(N - 1);
	dst[at..at + n].copy_from_slice(&bytes[..n]);
	// The remainder stays NUL from the zeroed buffer.
}

fn get_str(src: &[u8], at: usize, n: usize) -> String {
	let field = &src[at..at + n];
	let end = field.iter().position(|&b| b == 0).unwrap_or(n);
	String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Body of `CALL_START`.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CallStart {
	pub codec: u32,
	pub start_ms: u32,
	pub bypass_jitter_buffer: bool,
	pub echo: bool,
	pub source_addr_validated: bool,
	/// True when this end placed the call.
	pub originated: bool,
	pub permanent: bool,
	pub local_number: String,
	pub remote_number: String,
}

impl CallStart {
	pub const SIZE: usize = 4 + 4 + 5 + NUMBER_LEN * 2;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut out = [0u8; Self::SIZE];
		out[0..4].copy_from_slice(&self.codec.to_le_bytes());
		out[4..8].copy_from_slice(&self.start_ms.to_le_bytes());
		out[8] = self.bypass_jitter_buffer as u8;
		out[9] = self.echo as u8;
		out[10] = self.source_addr_validated as u8;
		out[11] = self.originated as u8;
		out[12] = self.permanent as u8;
		put_str::<NUMBER_LEN>(&mut out, 13, &self.local_number);
		put_str::<NUMBER_LEN>(&mut out, 13 + NUMBER_LEN, &self.remote_number);
		out
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() != Self::SIZE {
			return None;
		}
		Some(Self {
			codec: u32::from_le_bytes(b[0..4].try_into().unwrap()),
			start_ms: u32::from_le_bytes(b[4..8].try_into().unwrap()),
			bypass_jitter_buffer: b[8] != 0,
			echo: b[9] != 0,
			source_addr_validated: b[10] != 0,
			originated: b[11] != 0,
			permanent: b[12] != 0,
			local_number: get_str(b, 13, NUMBER_LEN),
			remote_number: get_str(b, 13 + NUMBER_LEN, NUMBER_LEN),
		})
	}
}

/// Body of `CALL_END`.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CallEnd {
	pub local_number: String,
	pub remote_number: String,
}

impl CallEnd {
	pub const SIZE: usize = NUMBER_LEN * 2;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut out = [0u8; Self::SIZE];
		put_str::<NUMBER_LEN>(&mut out, 0, &self.local_number);
		put_str::<NUMBER_LEN>(&mut out, NUMBER_LEN, &self.remote_number);
		out
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() != Self::SIZE {
			return None;
		}
		Some(Self {
			local_number: get_str(b, 0, NUMBER_LEN),
			remote_number: get_str(b, NUMBER_LEN, NUMBER_LEN),
		})
	}
}

/// Body of `CALL_FAILED`: the target that could not be reached and a
/// human-readable reason suitable for display or speech.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CallFailed {
	pub target_number: String,
	pub message: String,
}

impl CallFailed {
	pub const SIZE: usize = NUMBER_LEN + TEXT_LEN;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut out = [0u8; Self::SIZE];
		put_str::<NUMBER_LEN>(&mut out, 0, &self.target_number);
		put_str::<TEXT_LEN>(&mut out, NUMBER_LEN, &self.message);
		out
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() != Self::SIZE {
			return None;
		}
		Some(Self {
			target_number: get_str(b, 0, NUMBER_LEN),
			message: get_str(b, NUMBER_LEN, TEXT_LEN),
		})
	}
}

/// Body of `CALL_NODE`: a request to place an outbound call.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CallNode {
	pub local_number: String,
	pub target_number: String,
}

impl CallNode {
	pub const SIZE: usize = NUMBER_LEN * 2;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut out = [0u8; Self::SIZE];
		put_str::<NUMBER_LEN>(&mut out, 0, &self.local_number);
		put_str::<NUMBER_LEN>(&mut out, NUMBER_LEN, &self.target_number);
		out
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() != Self::SIZE {
			return None;
		}
		Some(Self {
			local_number: get_str(b, 0, NUMBER_LEN),
			target_number: get_str(b, NUMBER_LEN, NUMBER_LEN),
		})
	}
}

/// Body of `DTMF_PRESS` and `DTMF_GEN`: one symbol.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Dtmf {
	pub symbol: u8,
}

impl Dtmf {
	pub const SIZE: usize = 1;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		[self.symbol]
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		match b {
			&[symbol] => Some(Self { symbol }),
			_ => None,
		}
	}
}

/// Body of `CALL_LEVELS`: meter readings in whole dB.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CallLevels {
	pub rx0_db: i16,
	pub tx0_db: i16,
	pub rx1_db: i16,
	pub tx1_db: i16,
}

impl CallLevels {
	pub const SIZE: usize = 8;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut out = [0u8; Self::SIZE];
		out[0..2].copy_from_slice(&self.rx0_db.to_le_bytes());
		out[2..4].copy_from_slice(&self.tx0_db.to_le_bytes());
		out[4..6].copy_from_slice(&self.rx1_db.to_le_bytes());
		out[6..8].copy_from_slice(&self.tx1_db.to_le_bytes());
		out
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() != Self::SIZE {
			return None;
		}
		Some(Self {
			rx0_db: i16::from_le_bytes(b[0..2].try_into().unwrap()),
			tx0_db: i16::from_le_bytes(b[2..4].try_into().unwrap()),
			rx1_db: i16::from_le_bytes(b[4..6].try_into().unwrap()),
			tx1_db: i16::from_le_bytes(b[6..8].try_into().unwrap()),
		})
	}
}

/// Body of `NET_DIAG_1_REQ`: the node whose reachability to probe.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct NetDiagReq {
	pub node: String,
}

impl NetDiagReq {
	pub const SIZE: usize = NUMBER_LEN;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut out = [0u8; Self::SIZE];
		put_str::<NUMBER_LEN>(&mut out, 0, &self.node);
		out
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() != Self::SIZE {
			return None;
		}
		Some(Self { node: get_str(b, 0, NUMBER_LEN) })
	}
}

/// Body of `NET_DIAG_1_RES`. `code` zero means the probe succeeded and
/// `rtt_ms` holds the round trip; negative codes identify the failing
/// step (DNS SRV, DNS A, socket, timeout).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct NetDiagRes {
	pub code: i32,
	pub rtt_ms: u32,
}

impl NetDiagRes {
	pub const SIZE: usize = 8;

	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut out = [0u8; Self::SIZE];
		out[0..4].copy_from_slice(&self.code.to_le_bytes());
		put_u32(&mut out, 4, self.rtt_ms);
		out
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() != Self::SIZE {
			return None;
		}
		Some(Self {
			code: i32::from_le_bytes(b[0..4].try_into().unwrap()),
			rtt_ms: get_u32(b, 4),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn call_start_roundtrip() {
		let p = CallStart {
			codec: 0x8000,
			start_ms: 123456,
			bypass_jitter_buffer: true,
			echo: false,
			source_addr_validated: true,
			originated: true,
			permanent: false,
			local_number: "29283".into(),
			remote_number: "61057".into(),
		};
		let b = p.to_bytes();
		assert_eq!(CallStart::from_bytes(&b), Some(p));
		assert_eq!(CallStart::from_bytes(&b[1..]), None);
	}

	#[test]
	fn call_start_layout_is_stable() {
		let p = CallStart { codec: 4, local_number: "1".into(), ..Default::default() };
		let b = p.to_bytes();
		assert_eq!(b[0], 4);
		assert_eq!(b[13], b'1');
		assert_eq!(b[14], 0);
	}

	#[test]
	fn string_payloads_roundtrip() {
		let p = CallFailed { target_number: "61057".into(), message: "Node is not registered".into() };
		assert_eq!(CallFailed::from_bytes(&p.to_bytes()), Some(p));

		let p = CallNode { local_number: "29283".into(), target_number: "61057".into() };
		assert_eq!(CallNode::from_bytes(&p.to_bytes()), Some(p));

		let p = CallEnd { local_number: "29283".into(), remote_number: "61057".into() };
		assert_eq!(CallEnd::from_bytes(&p.to_bytes()), Some(p));
	}

	#[test]
	fn over_long_strings_truncate_with_nul() {
		let p = CallNode {
			local_number: "0123456789abcdefOVERFLOW".into(),
			target_number: String::new(),
		};
		let got = CallNode::from_bytes(&p.to_bytes()).unwrap();
		assert_eq!(got.local_number, "0123456789abcde");
	}

	#[test]
	fn small_payloads_roundtrip() {
		let p = Dtmf { symbol: b'*' };
		assert_eq!(Dtmf::from_bytes(&p.to_bytes()), Some(p));

		let p = CallLevels { rx0_db: -12, tx0_db: 0, rx1_db: -99, tx1_db: 3 };
		assert_eq!(CallLevels::from_bytes(&p.to_bytes()), Some(p));

		let p = NetDiagRes { code: -2, rtt_ms: 48 };
		assert_eq!(NetDiagRes::from_bytes(&p.to_bytes()), Some(p));

		let p = NetDiagReq { node: "61057".into() };
		assert_eq!(NetDiagReq::from_bytes(&p.to_bytes()), Some(p));
	}
}
