//! The network-diagnostic worker: given a node number, resolve it
//! through the directory and POKE it, reporting reachability and round
//! trip. Runs on its own thread with plain blocking sockets; results
//! come back as NET_DIAG_1_RES messages through the wake channel.

use core::net::SocketAddr;
use core::time::Duration;
use std::net::UdpSocket;
use std::thread::JoinHandle;
use std::time::Instant;

use bus::{payload, Kind, Message};
use crossbeam_channel::{Receiver, Sender};
use log::info;
use runtime::WakeHandle;
use wire::frame::{ftype, iax};
use wire::{dns, FullFrame};

pub struct NetDiagConfig {
	pub resolver: SocketAddr,
	pub dns_root: String,
	pub timeout: Duration,
}

pub fn spawn(cfg: NetDiagConfig, req_rx: Receiver<Message>, res_tx: Sender<Message>, wake: WakeHandle) -> JoinHandle<()> {
	std::thread::Builder::new()
		.name("netdiag".into())
		.spawn(move || {
			while let Ok(req) = req_rx.recv() {
				if req.kind() != Kind::NetDiagReq {
					continue;
				}

				let Some(p) = payload::NetDiagReq::from_bytes(req.body()) else {
					continue;
				};

				info!("Network test requested for node {}", p.node);

				let result = probe(&cfg, &p.node).unwrap_or_else(|code| payload::NetDiagRes { code, rtt_ms: 0 });

				let mut msg = Message::new(Kind::NetDiagRes, 0, &result.to_bytes(), 0, 0);
				msg.src = req.src;
				let _ = res_tx.send(msg);
				wake.wake();
			}
		})
		.expect("spawn netdiag worker")
}

/// Blocking DNS exchange against the configured resolver.
fn dns_exchange(cfg: &NetDiagConfig, name: &str, qtype: u16) -> Result<Vec<u8>, i32> {
	let sock = UdpSocket::bind(("0.0.0.0", 0)).map_err(|_| -4)?;
	sock.set_read_timeout(Some(cfg.timeout)).map_err(|_| -4)?;

	let query = dns::make_query(rand::random(), name, qtype).map_err(|_| -1)?;
	sock.send_to(&query, cfg.resolver).map_err(|_| -1)?;

	let mut buf = vec![0u8; 512];
	let (n, _) = sock.recv_from(&mut buf).map_err(|_| -1)?;
	buf.truncate(n);
	Ok(buf)
}

fn probe(cfg: &NetDiagConfig, node: &str) -> Result<payload::NetDiagRes, i32> {
	// Find the node's registered endpoint: SRV for the port and host,
	// then A for the address.
	let srv_name = format!("_iax._udp.{node}.nodes.{}", cfg.dns_root);
	let srv = dns::parse_srv(&dns_exchange(cfg, &srv_name, dns::TYPE_SRV)?).map_err(|_| -2)?;
	let addr = dns::parse_a(&dns_exchange(cfg, &srv.target, dns::TYPE_A)?).map_err(|_| -3)?;

	let target = SocketAddr::new(addr.into(), srv.port);
	info!("Testing {target}");

	let sock = UdpSocket::bind(("0.0.0.0", 0)).map_err(|_| -4)?;
	sock.set_read_timeout(Some(cfg.timeout)).map_err(|_| -5)?;

	let poke = FullFrame::new(0, 0, 7777, 0, 0, ftype::IAX, iax::POKE);
	sock.send_to(poke.as_bytes(), target).map_err(|_| -6)?;

	let started = Instant::now();
	let mut buf = [0u8; 1600];

	// Accept the first PONG from the target within the timeout.
	loop {
		let (n, from) = sock.recv_from(&mut buf).map_err(|_| -7)?;
		if from != target {
			continue;
		}
		let Some(frame) = FullFrame::parse(&buf[..n]) else { continue };
		if frame.is_type(ftype::IAX, iax::PONG) {
			return Ok(payload::NetDiagRes {
				code: 0,
				rtt_ms: started.elapsed().as_millis() as u32,
			});
		}
	}
}
