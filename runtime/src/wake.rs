use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use log::error;
use stakker::Fwd;
use utils::error::*;

use crate::Io;

/// A self-pipe for worker threads. The read side is a loopback UDP
/// socket registered with the poll set; the write side is a cloneable
/// handle a thread pokes after enqueueing work, rousing the event loop
/// from its poll. A loopback socket pair is used instead of a raw pipe
/// so the same code runs under WSAPoll.
pub struct Wake {
	tx: UdpSocket,
}

impl Wake {
	/// Create the wake channel. `fwd` fires on the event-loop thread
	/// every time a worker wakes it; the waking datagram's content is
	/// meaningless.
	pub fn new(fwd: Fwd<(SocketAddr, Vec<u8>)>) -> Result<(Wake, Io)> {
		let rx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).ok_or_log(|e| error!("Failed to bind wake socket: {e}")).ok_or(())?;
		let addr = rx.local_addr().ok_or_log(|e| error!("Wake socket has no address: {e}")).ok_or(())?;

		let tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).ok_or_log(|e| error!("Failed to bind wake sender: {e}")).ok_or(())?;
		tx.connect(addr).ok_or_log(|e| error!("Failed to connect wake sender: {e}")).ok_or(())?;

		let io = Io::new(rx, fwd)?;

		Ok((Wake { tx }, io))
	}

	pub fn handle(&self) -> Result<WakeHandle> {
		let tx = self.tx.try_clone().ok_or_log(|e| error!("Failed to clone wake sender: {e}")).ok_or(())?;
		Ok(WakeHandle { tx })
	}
}

/// The write side of a [`Wake`], owned by a worker thread.
pub struct WakeHandle {
	tx: UdpSocket,
}

impl WakeHandle {
	pub fn wake(&self) {
		// A lost wake datagram only delays delivery until the next poll
		// timeout, so the result is advisory.
		let _ = self.tx.send(&[0]);
	}
}
