//! Caller authentication primitives: the MD5 call token used against
//! address spoofing, and the ED25519 challenge/response (a local
//! extension advertised as AUTHMETHODS bit 0x0008).

use core::net::IpAddr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::warn;
use md5::{Digest, Md5};
use utils::error::{LogErr, LogNone};

/// The opaque token handed to an unauthenticated caller in a CALLTOKEN
/// challenge. Deterministic per (peer address, line start time) so the
/// reply can be checked without storing state for unverified peers.
pub fn call_token(peer: IpAddr, start_time: u32) -> String {
	let mut h = Md5::new();
	h.update(format!("T:{}:{:X}", peer, start_time));
	hex::encode(h.finalize())
}

/// The text a caller must sign to prove key ownership. Unique per call
/// attempt without needing a nonce store.
pub fn challenge_text(local_call_id: u16, local_start_ms: u32) -> String {
	format!("{}{}", local_call_id, local_start_ms)
}

/// Load a signing key from the 64-hex-char seed form used in config.
pub fn signing_key(seed_hex: &str) -> Option<SigningKey> {
	let seed: [u8; 32] = hex::decode(seed_hex)
		.ok_or_log(|e| warn!("Private key is not hex: {e}"))?
		.try_into()
		.ok()
		.some_or_log(|| warn!("Private key must be 32 bytes"))?;

	Some(SigningKey::from_bytes(&seed))
}

/// Sign a challenge, producing the 128-hex-char ED25519-RESULT value.
pub fn sign_challenge(key: &SigningKey, challenge: &str) -> String {
	hex::encode(key.sign(challenge.as_bytes()).to_bytes())
}

/// Verify a peer's 128-hex-char signature over the challenge text.
pub fn verify_challenge(public_key: &[u8; 32], challenge: &str, sig_hex: &str) -> bool {
	if sig_hex.len() != 128 {
		return false;
	}

	let Some(sig) = hex::decode(sig_hex).ok_or_log(|e| warn!("Signature is not hex: {e}")) else {
		return false;
	};
	let Ok(sig) = Signature::from_slice(&sig) else {
		return false;
	};
	let Some(key) = VerifyingKey::from_bytes(public_key).ok_or_log(|e| warn!("Bad caller public key: {e}")) else {
		return false;
	};

	key.verify(challenge.as_bytes(), &sig).is_ok()
}

/// Decode a 64-hex-char DNS TXT record into a raw public key.
pub fn public_key_from_txt(txt: &str) -> Option<[u8; 32]> {
	if txt.len() != 64 {
		return None;
	}
	hex::decode(txt).ok()?.try_into().ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn token_is_deterministic() {
		let addr: IpAddr = "52.8.197.124".parse().unwrap();
		let a = call_token(addr, 0x1234);
		let b = call_token(addr, 0x1234);
		assert_eq!(a, b);
		assert_eq!(a.len(), 32);

		// Any input change produces a different token.
		assert_ne!(a, call_token(addr, 0x1235));
		assert_ne!(a, call_token("52.8.197.125".parse().unwrap(), 0x1234));
	}

	#[test]
	fn challenge_roundtrip() {
		let key = signing_key(&"7f".repeat(32)).unwrap();
		let public: [u8; 32] = key.verifying_key().to_bytes();

		let challenge = challenge_text(23, 194000);
		let sig = sign_challenge(&key, &challenge);
		assert_eq!(sig.len(), 128);

		assert!(verify_challenge(&public, &challenge, &sig));
		// A different challenge or a damaged signature fails.
		assert!(!verify_challenge(&public, "23194001", &sig));
		let mut bad = sig.clone();
		bad.replace_range(0..2, if &sig[0..2] == "00" { "01" } else { "00" });
		assert!(!verify_challenge(&public, &challenge, &bad));
	}

	#[test]
	fn bad_key_material_is_rejected() {
		assert!(signing_key("zz").is_none());
		assert!(signing_key(&"7f".repeat(31)).is_none());
		assert!(public_key_from_txt("deadbeef").is_none());
		assert!(public_key_from_txt(&"ab".repeat(32)).is_some());
	}
}
