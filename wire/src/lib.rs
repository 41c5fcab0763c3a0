//! On-wire codecs: the IAX2 frame formats (RFC 5456 plus the
//! AllStarLink extensions), the codec-id bitmask algebra, and a minimal
//! DNS query/answer codec for the node directory.

pub mod codec;
pub mod datetime;
pub mod dns;
pub mod frame;

pub use codec::Codec;
pub use frame::{compare_seq_wrap, FullFrame};
