use wire::Codec;

/// Room for 20 ms of 48 kHz 16-bit mono, the widest audio payload.
pub const MAX_BODY: usize = 160 * 6 * 2;

/// Marks a message addressed to a bus rather than a particular call.
pub const UNKNOWN_CALL: u32 = u32::MAX;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Kind {
	None,
	Audio,
	/// A request to conceal a missing voice frame.
	AudioInterpolate,
	Text,
	Signal,
	TtsReq,
	TtsAudio,
	TtsEnd,
	NetDiagReq,
	NetDiagRes,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum Signal {
	None = 0,
	CallStart,
	CallEnd,
	CallTerminate,
	CallFailed,
	/// A request for an outbound network call.
	CallNode,
	DropCall,
	DropAllCalls,
	DropAllCallsOutbound,
	RadioUnkey,
	/// A request to emit an UNKEY to the network.
	RadioUnkeyGen,
	DtmfPress,
	/// A request to emit a DTMF symbol to the network.
	DtmfGen,
	CallTalkerId,
	LinkReport,
	CallLevels,
	CosOn,
	CosOff,
}

impl Signal {
	pub fn from_u32(v: u32) -> Option<Signal> {
		use Signal::*;
		Some(match v {
			0 => None,
			1 => CallStart,
			2 => CallEnd,
			3 => CallTerminate,
			4 => CallFailed,
			5 => CallNode,
			6 => DropCall,
			7 => DropAllCalls,
			8 => DropAllCallsOutbound,
			9 => RadioUnkey,
			10 => RadioUnkeyGen,
			11 => DtmfPress,
			12 => DtmfGen,
			13 => CallTalkerId,
			14 => LinkReport,
			15 => CallLevels,
			16 => CosOn,
			17 => CosOff,
			_ => return Option::None,
		})
	}
}

/// A routing endpoint: a bus (line, bridge, worker) and a call on it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Addr {
	pub bus: u32,
	pub call: u32,
}

impl Addr {
	pub fn new(bus: u32, call: u32) -> Self {
		Self { bus, call }
	}

	pub fn bus(bus: u32) -> Self {
		Self { bus, call: UNKNOWN_CALL }
	}
}

/// The unit of inter-component communication. Fixed-size and `Copy` so
/// the audio path moves it without allocating; roughly one 48 kHz frame
/// plus a header.
#[derive(Clone, Copy)]
pub struct Message {
	kind: Kind,
	/// Codec bits for audio, [`Signal`] for signals, ignored otherwise.
	format: u32,
	len: u16,
	body: [u8; MAX_BODY],
	/// Timestamp at the originator, ms.
	pub orig_ms: u32,
	/// Local receive timestamp, ms.
	pub rx_ms: u32,
	pub src: Addr,
	pub dst: Addr,
}

impl Default for Message {
	fn default() -> Self {
		Self {
			kind: Kind::None,
			format: 0,
			len: 0,
			body: [0; MAX_BODY],
			orig_ms: 0,
			rx_ms: 0,
			src: Addr::default(),
			dst: Addr::default(),
		}
	}
}

impl Message {
	pub fn new(kind: Kind, format: u32, body: &[u8], orig_ms: u32, rx_ms: u32) -> Self {
		let mut m = Self {
			kind,
			format,
			orig_ms,
			rx_ms,
			..Self::default()
		};
		m.set_body(body);
		m
	}

	pub fn audio(codec: Codec, body: &[u8], orig_ms: u32, rx_ms: u32) -> Self {
		Self::new(Kind::Audio, codec.0, body, orig_ms, rx_ms)
	}

	pub fn signal(sig: Signal, orig_ms: u32, rx_ms: u32) -> Self {
		Self::new(Kind::Signal, sig as u32, &[], orig_ms, rx_ms)
	}

	pub fn signal_with(sig: Signal, body: &[u8], orig_ms: u32, rx_ms: u32) -> Self {
		Self::new(Kind::Signal, sig as u32, body, orig_ms, rx_ms)
	}

	pub fn kind(&self) -> Kind {
		self.kind
	}

	pub fn format(&self) -> u32 {
		self.format
	}

	pub fn codec(&self) -> Codec {
		Codec(self.format)
	}

	pub fn body(&self) -> &[u8] {
		&self.body[..self.len as usize]
	}

	pub fn set_body(&mut self, body: &[u8]) {
		// Oversized payloads cannot occur from our own codecs; truncate
		// rather than abort if one ever does.
		let n = body.len().min(MAX_BODY);
		self.body[..n].copy_from_slice(&body[..n]);
		self.len = n as u16;
	}

	pub fn is_voice(&self) -> bool {
		self.kind == Kind::Audio
	}

	pub fn as_signal(&self) -> Option<Signal> {
		(self.kind == Kind::Signal).then(|| Signal::from_u32(self.format))?
	}

	pub fn is_signal(&self, sig: Signal) -> bool {
		self.kind == Kind::Signal && self.format == sig as u32
	}

	pub fn with_route(mut self, src: Addr, dst: Addr) -> Self {
		self.src = src;
		self.dst = dst;
		self
	}
}

impl core::fmt::Debug for Message {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		write!(
			f,
			"Message {{ {:?} fmt={:#x} len={} orig={} rx={} {}:{} -> {}:{} }}",
			self.kind, self.format, self.len, self.orig_ms, self.rx_ms, self.src.bus, self.src.call, self.dst.bus, self.dst.call
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn signal_codes_roundtrip() {
		for v in 0..=17 {
			let sig = Signal::from_u32(v).unwrap();
			assert_eq!(sig as u32, v);
		}
		assert_eq!(Signal::from_u32(18), None);
	}

	#[test]
	fn accessors() {
		let m = Message::audio(Codec::ULAW, &[1, 2, 3], 40, 55).with_route(Addr::new(1, 20), Addr::bus(2));
		assert!(m.is_voice());
		assert_eq!(m.codec(), Codec::ULAW);
		assert_eq!(m.body(), &[1, 2, 3]);
		assert_eq!(m.orig_ms, 40);
		assert_eq!(m.dst.call, UNKNOWN_CALL);

		let s = Message::signal(Signal::RadioUnkey, 0, 55);
		assert!(s.is_signal(Signal::RadioUnkey));
		assert_eq!(s.as_signal(), Some(Signal::RadioUnkey));
		assert!(!s.is_voice());
		assert_eq!(m.as_signal(), None);
	}
}
