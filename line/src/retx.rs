//! Per-call reliable-delivery buffer. Outbound full frames are held
//! here until the peer's reported expected-inbound sequence advances
//! past them; anything unacknowledged for long enough goes out again
//! with the retransmit bit set.

use log::{info, warn};
use utils::error::Result;
use wire::frame::compare_seq_wrap;
use wire::FullFrame;

pub const CAPACITY: usize = 16;

/// How quickly retransmission starts on a missing ACK. This needs to be
/// fairly aggressive to keep Asterisk peers happy.
pub const RETRANSMIT_INTERVAL_MS: u32 = 2000;

pub struct RetxBuffer {
	/// Send order, which is also wrap-ascending sequence order.
	frames: Vec<FullFrame>,
	/// High-water mark of the peer's expected inbound sequence.
	expected_seq: u8,
	retransmit_count: u32,
}

impl Default for RetxBuffer {
	fn default() -> Self {
		Self {
			frames: Vec::with_capacity(CAPACITY),
			expected_seq: 0,
			retransmit_count: 0,
		}
	}
}

impl RetxBuffer {
	pub fn reset(&mut self) {
		self.frames.clear();
		self.expected_seq = 0;
		self.retransmit_count = 0;
	}

	/// Hold a copy of an outbound frame for possible retransmission.
	/// A full buffer or a sequence already present is refused; the
	/// caller treats either as grounds to end the call. The outbound
	/// sequence must be unique over the live window, so a duplicate is
	/// always a bug upstream.
	pub fn consume(&mut self, frame: &FullFrame) -> Result {
		if self.frames.len() >= CAPACITY {
			return Err(());
		}

		if self.frames.iter().any(|f| f.oseq() == frame.oseq()) {
			warn!("Retransmission buffer rejected duplicate seq {}", frame.oseq());
			return Err(());
		}

		self.frames.push(*frame);
		Ok(())
	}

	/// Advance the acknowledgment high-water mark, dropping every frame
	/// the peer has now seen. Some peers (Asterisk PONGs) report a
	/// lower expectation than previously seen; that is ignored, not an
	/// error, and reported as `false`.
	pub fn set_expected_seq(&mut self, n: u8) -> bool {
		if compare_seq_wrap(n, self.expected_seq) >= 0 {
			self.expected_seq = n;
			self.frames.retain(|f| compare_seq_wrap(f.oseq(), n) >= 0);
			true
		} else {
			false
		}
	}

	/// Re-send every unacknowledged frame older than the retransmit
	/// interval. Copies go out with the retransmit flag set and the
	/// inbound-sequence field rewritten to present reality.
	pub fn retransmit_if_necessary(&mut self, now_ms: u32, expected_in_seq: u8, mut sink: impl FnMut(&FullFrame)) {
		for frame in &self.frames {
			if compare_seq_wrap(frame.oseq(), self.expected_seq) >= 0 && now_ms > frame.timestamp().wrapping_add(RETRANSMIT_INTERVAL_MS) {
				info!("Call {}/{} retransmitting {}", frame.dst_call(), frame.src_call(), frame.oseq());

				let mut rf = *frame;
				rf.set_retransmit();
				rf.set_iseq(expected_in_seq);
				sink(&rf);
				self.retransmit_count += 1;
			}
		}
	}

	/// Service a peer's VNAK: re-send everything unacknowledged up to
	/// and including `target_seq`, regardless of age.
	pub fn retransmit_to_seq(&mut self, target_seq: u8, expected_in_seq: u8, mut sink: impl FnMut(&FullFrame)) {
		for frame in &self.frames {
			if compare_seq_wrap(frame.oseq(), self.expected_seq) >= 0 && compare_seq_wrap(frame.oseq(), target_seq) <= 0 {
				let mut rf = *frame;
				rf.set_retransmit();
				rf.set_iseq(expected_in_seq);
				sink(&rf);
				self.retransmit_count += 1;
			}
		}
	}

	pub fn is_empty(&self) -> bool {
		self.frames.is_empty()
	}

	pub fn len(&self) -> usize {
		self.frames.len()
	}

	pub fn expected_seq(&self) -> u8 {
		self.expected_seq
	}

	pub fn retransmit_count(&self) -> u32 {
		self.retransmit_count
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wire::frame::{ftype, iax};

	fn frame(oseq: u8, ts: u32) -> FullFrame {
		let mut f = FullFrame::new(5, 6, ts, oseq, 0, ftype::IAX, iax::NEW);
		f.set_oseq(oseq);
		f
	}

	#[test]
	fn ack_advances_and_evicts() {
		let mut rtb = RetxBuffer::default();
		assert!(rtb.consume(&frame(6, 0)).is_ok());

		// An expectation below the buffered frame leaves it in place.
		assert!(rtb.set_expected_seq(5));
		assert!(!rtb.is_empty());

		// Advancing past it evicts.
		assert!(rtb.set_expected_seq(7));
		assert!(rtb.is_empty());

		// Moving the mark backwards is refused.
		assert!(!rtb.set_expected_seq(3));
		assert_eq!(rtb.expected_seq(), 7);
	}

	#[test]
	fn retransmits_after_interval_with_rewritten_iseq() {
		let mut rtb = RetxBuffer::default();
		assert!(rtb.consume(&frame(3, 10)).is_ok());

		let mut sent = vec![];

		// Too soon: nothing goes out.
		rtb.retransmit_if_necessary(1000, 9, |f| sent.push(*f));
		assert!(sent.is_empty());

		// Past the interval: one copy, flagged, iseq rewritten.
		rtb.retransmit_if_necessary(2011, 9, |f| sent.push(*f));
		assert_eq!(sent.len(), 1);
		assert!(sent[0].is_retransmit());
		assert_eq!(sent[0].iseq(), 9);
		assert_eq!(sent[0].oseq(), 3);
		assert_eq!(rtb.retransmit_count(), 1);

		// The stored frame is untouched by the copy.
		assert!(!rtb.is_empty());

		// An ACK covering it finally clears the buffer.
		assert!(rtb.set_expected_seq(4));
		assert!(rtb.is_empty());
	}

	#[test]
	fn partial_ack_leaves_tail() {
		let mut rtb = RetxBuffer::default();
		assert!(rtb.consume(&frame(0, 10)).is_ok());
		assert!(rtb.consume(&frame(1, 20)).is_ok());

		let mut count = 0;
		rtb.retransmit_if_necessary(5000, 0, |_| count += 1);
		assert_eq!(count, 2);

		rtb.set_expected_seq(1);
		count = 0;
		rtb.retransmit_if_necessary(10000, 0, |f| {
			count += 1;
			assert_eq!(f.oseq(), 1);
		});
		assert_eq!(count, 1);

		rtb.set_expected_seq(2);
		count = 0;
		rtb.retransmit_if_necessary(20000, 0, |_| count += 1);
		assert_eq!(count, 0);
		assert!(rtb.is_empty());
	}

	#[test]
	fn duplicate_sequence_is_refused() {
		let mut rtb = RetxBuffer::default();
		assert!(rtb.consume(&frame(0, 10)).is_ok());
		assert!(rtb.consume(&frame(0, 10)).is_err());
	}

	#[test]
	fn overflow_is_surfaced() {
		let mut rtb = RetxBuffer::default();
		for i in 0..CAPACITY as u8 {
			assert!(rtb.consume(&frame(i, 0)).is_ok());
		}
		assert!(rtb.consume(&frame(100, 0)).is_err());
	}

	#[test]
	fn vnak_retransmits_to_target() {
		let mut rtb = RetxBuffer::default();
		for i in 0..4 {
			assert!(rtb.consume(&frame(i, 0)).is_ok());
		}

		// VNAK asking for everything up to seq 2, regardless of age.
		let mut seqs = vec![];
		rtb.retransmit_to_seq(2, 7, |f| {
			assert!(f.is_retransmit());
			assert_eq!(f.iseq(), 7);
			seqs.push(f.oseq());
		});
		assert_eq!(seqs, vec![0, 1, 2]);
	}

	#[test]
	fn sequence_wrap() {
		// The acknowledgment mark crawls up to the top of the sequence
		// space, then follows a send across the wrap without a
		// duplicate-detect misfire.
		let mut rtb = RetxBuffer::default();
		for n in [100, 200, 250, 255] {
			assert!(rtb.set_expected_seq(n));
		}

		assert!(rtb.consume(&frame(255, 0)).is_ok());
		assert!(rtb.consume(&frame(0, 20)).is_ok());
		assert_eq!(rtb.len(), 2);

		// Peer acknowledges 255; its expectation wraps to 0.
		assert!(rtb.set_expected_seq(0));
		assert_eq!(rtb.len(), 1);

		assert!(rtb.set_expected_seq(1));
		assert!(rtb.is_empty());
	}
}
