//! Media format identifiers. On the wire a codec is one bit of the
//! 32-bit capability bitmask (RFC 5457 numbering); preference lists
//! travel as letter strings where `'B' + bit-index` names each bit.

/// A codec bitmask. A negotiated codec holds exactly one set bit;
/// capability sets hold several.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Codec(pub u32);

impl Codec {
	pub const UNKNOWN: Codec = Codec(0);
	pub const ULAW: Codec = Codec(0x0000_0004);
	pub const ALAW: Codec = Codec(0x0000_0008);
	/// 8 kHz 16-bit signed linear, little-endian.
	pub const SLIN8: Codec = Codec(0x0000_0040);
	/// 16 kHz 16-bit signed linear, little-endian.
	pub const SLIN16: Codec = Codec(0x0000_8000);
	/// 48 kHz 16-bit signed linear. Not an official assignment; used as
	/// the internal bus format.
	pub const SLIN48: Codec = Codec(0x2000_0000);

	/// The codecs this bridge can transcode.
	pub fn supported_mask() -> u32 {
		Codec::ULAW.0 | Codec::ALAW.0 | Codec::SLIN8.0 | Codec::SLIN16.0
	}

	/// The local preference order used when a caller expresses none.
	pub fn preference_order() -> [Codec; 4] {
		[Codec::SLIN16, Codec::SLIN8, Codec::ULAW, Codec::ALAW]
	}

	pub fn is_supported(self) -> bool {
		self.0 != 0 && (self.0 & Codec::supported_mask()) == self.0 && self.0.is_power_of_two()
	}

	pub fn sample_rate(self) -> u32 {
		match self {
			Codec::ULAW | Codec::ALAW | Codec::SLIN8 => 8000,
			Codec::SLIN16 => 16000,
			Codec::SLIN48 => 48000,
			_ => 0,
		}
	}

	/// Samples per 20 ms tick.
	pub fn block_samples(self) -> usize {
		(self.sample_rate() / 50) as usize
	}

	/// Bytes of one 20 ms voice frame on the wire.
	pub fn frame_bytes(self) -> usize {
		match self {
			Codec::ULAW | Codec::ALAW => 160,
			Codec::SLIN8 => 160 * 2,
			Codec::SLIN16 => 160 * 2 * 2,
			Codec::SLIN48 => 160 * 6 * 2,
			_ => 0,
		}
	}

	/// The preference letter for a single-bit codec.
	pub fn letter(self) -> Option<char> {
		if !self.0.is_power_of_two() {
			return None;
		}
		char::from_u32('B' as u32 + self.0.trailing_zeros())
	}

	pub fn from_letter(c: char) -> Option<Codec> {
		let bit = (c as u32).checked_sub('B' as u32)?;
		if bit >= 32 {
			return None;
		}
		Some(Codec(1 << bit))
	}
}

impl core::fmt::Debug for Codec {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		match *self {
			Codec::UNKNOWN => write!(f, "UNKNOWN"),
			Codec::ULAW => write!(f, "G711_ULAW"),
			Codec::ALAW => write!(f, "G711_ALAW"),
			Codec::SLIN8 => write!(f, "SLIN_8K"),
			Codec::SLIN16 => write!(f, "SLIN_16K"),
			Codec::SLIN48 => write!(f, "SLIN_48K"),
			Codec(bits) => write!(f, "{bits:#010x}"),
		}
	}
}

/// Parse a preference-letter string ("QHD" means SLIN16, SLIN8, ULAW).
/// Unknown letters are skipped.
pub fn parse_prefs(s: &str) -> Vec<Codec> {
	s.chars().filter_map(Codec::from_letter).collect()
}

pub fn prefs_string(prefs: &[Codec]) -> String {
	prefs.iter().filter_map(|c| c.letter()).collect()
}

/// The 9-byte wide-format encoding used by the CAPABILITY-WIDE (0x37)
/// and FORMAT-WIDE (0x38) IEs: a version octet followed by the 64-bit
/// mask, big-endian.
pub fn wide_format(mask: u64) -> [u8; 9] {
	let mut out = [0u8; 9];
	out[1..].copy_from_slice(&mask.to_be_bytes());
	out
}

/// Assign the call codec per RFC 5456 section 6.2.3: restricted to the
/// intersection of both capability sets, preferring the caller's FORMAT
/// request, then the caller's preference list, then the local one, then
/// any common bit.
pub fn assign(caller_cap: u32, caller_desired: u32, caller_prefs: &[Codec], local_cap: u32, local_prefs: &[Codec]) -> Codec {
	let common = caller_cap & local_cap;
	if common == 0 {
		return Codec::UNKNOWN;
	}

	if caller_desired.is_power_of_two() && caller_desired & common != 0 {
		return Codec(caller_desired);
	}

	for pref in caller_prefs.iter().chain(local_prefs) {
		if pref.0 & common != 0 {
			return *pref;
		}
	}

	Codec(1 << common.trailing_zeros())
}
