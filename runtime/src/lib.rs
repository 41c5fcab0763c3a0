extern crate alloc;

use alloc::collections::VecDeque;
use core::cell::RefCell;
use core::time::Duration;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};

use log::{error, warn};
use stakker::Fwd;

mod logger;
mod rt;
pub mod tick;
pub mod time;
mod wake;

pub use logger::Logger;
pub use rt::*;
pub use wake::{Wake, WakeHandle};

/// The largest datagram any protocol spoken here can produce.
pub const MAX_DATAGRAM: usize = 1500;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{poll, pollfd as Poll, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use windows_sys::Win32::Networking::WinSock::{
		WSAPoll as poll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll,
	};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_socket() as _
	}
}

pub use sys::AsRawFd;
use sys::*;
use utils::error::*;

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

thread_local! {
	static GLOBAL: RefCell<State> = const {
		RefCell::new(State {
			fds: Vec::new(),
			entries: Vec::new()
		})
	};
}

struct State {
	fds: Vec<Poll>,
	entries: Vec<Entry>,
}

impl State {
	fn with<X, F: FnOnce(&mut Self) -> X>(f: F) -> X {
		GLOBAL.with(|x| f(&mut x.borrow_mut()))
	}

	fn idx_of(&mut self, raw: RawFd) -> usize {
		self.fds.iter().position(|f| f.fd == raw).expect("Socket is present")
	}

	/// Returns whether any more I/O is waiting.
	fn is_io(&self) -> bool {
		!self.fds.is_empty()
	}

	/// Poll the fds. Returns whether any file descriptors are ready for I/O.
	fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
		let ret = unsafe {
			poll(
				self.fds.as_mut_ptr(),
				self.fds.len().try_into().expect("Fewer than u32::MAX fds"),
				as_timeout(timeout),
			)
		};

		let mut pending: u32 = ret.try_into().map_err(|_| error!("poll() failed: {}", io::Error::last_os_error()))?;

		if pending == 0 {
			return Ok(false);
		}

		for idx in 0.. {
			if idx >= self.fds.len() {
				break;
			}

			let Poll { events, revents, .. } = &mut self.fds[idx];
			let entry = &mut self.entries[idx];

			if *revents == 0 {
				continue;
			}

			if *revents & (POLLHUP | POLLNVAL) != 0 {
				// A UDP socket cannot recover from these; stop watching it
				// rather than spinning on the poll set.
				error!("Dropping socket from poll set (revents {:#x})", revents);
				self.fds.swap_remove(idx);
				self.entries.swap_remove(idx);
				pending -= 1;

				if pending == 0 {
					break;
				}
				continue;
			}

			// POLLERR on UDP carries a queued ICMP error; the recvfrom in
			// flush_read consumes and logs it.
			if *revents & (POLLIN | POLLERR) != 0 {
				entry.flush_read();
			}

			if *revents & POLLOUT != 0 {
				entry.flush_write();
			};

			*events = POLLIN;

			if !entry.queue.is_empty() {
				*events |= POLLOUT;
			}

			*revents = 0;

			pending -= 1;

			if pending == 0 {
				break;
			}
		}

		Ok(true)
	}
}

struct Entry {
	sock: UdpSocket,
	fwd: Fwd<(SocketAddr, Vec<u8>)>,
	queue: VecDeque<(SocketAddr, Box<[u8]>)>,
}

impl Entry {
	fn flush_read(&mut self) {
		let mut buf = vec![0u8; MAX_DATAGRAM + 1];

		loop {
			match self.sock.recv_from(&mut buf) {
				Ok((n, src)) => {
					let mut datagram = buf;
					datagram.truncate(n);
					self.fwd.fwd((src, datagram));
					buf = vec![0u8; MAX_DATAGRAM + 1];
				}
				Err(e) if e.kind() == ErrorKind::WouldBlock => return,
				Err(e) => {
					// Transport errors are logged and the socket keeps
					// running; retransmission re-drives anything lost.
					warn!("recv_from failed: {e}");
					return;
				}
			}
		}
	}

	fn flush_write(&mut self) {
		loop {
			let Some((addr, buf)) = self.queue.back() else { return };
			let addr = *addr;

			match self.sock.send_to(buf, addr) {
				Ok(_) => {}
				Err(e) if e.kind() == ErrorKind::WouldBlock => return,
				Err(e) => warn!("Deferred send_to {addr} failed: {e}"),
			}

			// Sent or failed hard; either way the entry is finished.
			self.queue.pop_back();
		}
	}
}

/// Poll the thread's registered sockets once, dispatching any ready
/// I/O. This is what `exec` does between actor runs; it is exposed so
/// harnesses embedding the runtime (and the integration tests) can
/// pump I/O themselves.
pub fn poll_io(timeout: Option<Duration>) -> bool {
	State::with(|s| {
		if !s.is_io() {
			return false;
		}
		s.poll(timeout).unwrap_or(false)
	})
}

/// A non-blocking UDP socket registered with the thread's poll set.
/// Inbound datagrams are forwarded as `(source, bytes)` pairs; writes
/// that would block are queued and drained when the fd signals POLLOUT.
pub struct Io {
	inner: UdpSocket,
}

impl Io {
	pub fn new(inner: UdpSocket, fwd: Fwd<(SocketAddr, Vec<u8>)>) -> Result<Self> {
		inner.set_nonblocking(true).ok_or_log(|e| error!("set_nonblocking failed: {e}")).ok_or(())?;

		let sock = inner.try_clone().ok_or_log(|e| error!("Socket clone failed: {e}")).ok_or(())?;

		State::with(|i| {
			i.fds.push(Poll { fd: as_raw(&inner), events: POLLIN, revents: 0 });
			i.entries.push(Entry { sock, fwd, queue: VecDeque::new() });
		});

		Ok(Self { inner })
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		self.inner.local_addr().ok_or_log(|e| error!("local_addr failed: {e}")).ok_or(())
	}

	/// Send one datagram. A full kernel buffer queues the datagram for
	/// the next POLLOUT; a hard transport error is logged and reported.
	pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result {
		match self.inner.send_to(buf, addr) {
			Ok(n) if n == buf.len() => Ok(()),
			Ok(n) => {
				error!("Short send to {addr}: {n}/{} bytes", buf.len());
				Err(())
			}
			Err(e) if e.kind() == ErrorKind::WouldBlock => {
				State::with(|i| {
					let idx = i.idx_of(as_raw(&self.inner));
					i.entries[idx].queue.push_front((addr, buf.into()));
					i.fds[idx].events |= POLLOUT;
				});
				Ok(())
			}
			Err(e) => {
				error!("send_to {addr} failed: {e}");
				Err(())
			}
		}
	}
}

impl Drop for Io {
	fn drop(&mut self) {
		State::with(|i| {
			let idx = i.idx_of(as_raw(&self.inner));
			i.entries.swap_remove(idx);
			i.fds.swap_remove(idx);
		})
	}
}
