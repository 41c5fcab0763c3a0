//! End-to-end exercise of the line engine over loopback UDP: a fake
//! caller and a fake DNS resolver drive a real `Line` actor through
//! the call-token challenge, admission, validation, ACCEPT and the
//! retransmission machinery.

use core::cell::RefCell;
use core::time::Duration;
use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;
use std::time::Instant;

use bus::{Message, Signal};
use line::{AuthMode, Config, Line};
use stakker::{actor, ret_nop, ActorOwn, Fwd, Stakker};
use wire::frame::{ftype, iax, ie};
use wire::{Codec, FullFrame};

/// Run I/O and the actor queue together for roughly `ms`.
fn pump(stakker: &mut Stakker, ms: u64) {
	let deadline = Instant::now() + Duration::from_millis(ms);
	while Instant::now() < deadline {
		runtime::poll_io(Some(Duration::from_millis(2)));
		stakker.run(Instant::now(), false);
	}
}

struct Harness {
	stakker: Stakker,
	_line: ActorOwn<Line>,
	bus_log: Rc<RefCell<Vec<Message>>>,
	peer: UdpSocket,
	resolver: UdpSocket,
	line_addr: SocketAddr,
}

/// Each test binds its own line port: the test harness runs tests in
/// parallel threads within one process.
fn start(port: u16) -> Harness {
	let mut stakker = runtime::init();
	let s = &mut stakker;

	let resolver = UdpSocket::bind("127.0.0.1:0").unwrap();
	resolver.set_nonblocking(true).unwrap();

	let bus_log = Rc::new(RefCell::new(Vec::new()));
	let log = bus_log.clone();
	let bus: Fwd<Message> = Fwd::new(move |m| log.borrow_mut().push(m));

	let cfg = Config {
		bus_id: 1,
		dest_bus_id: 2,
		port,
		resolver: resolver.local_addr().unwrap(),
		auth_mode: AuthMode::SourceIp,
		..Config::default()
	};

	let line = actor!(s, Line::init(cfg, bus), ret_nop!());

	// Let the sockets come up.
	pump(s, 30);

	let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
	peer.set_nonblocking(true).unwrap();

	Harness {
		stakker,
		_line: line,
		bus_log,
		peer,
		resolver,
		line_addr: SocketAddr::new([127, 0, 0, 1].into(), port),
	}
}

/// Collect every frame the peer has received.
fn drain_peer(peer: &UdpSocket) -> Vec<Vec<u8>> {
	let mut out = Vec::new();
	let mut buf = [0u8; 1600];
	while let Ok((n, _)) = peer.recv_from(&mut buf) {
		out.push(buf[..n].to_vec());
	}
	out
}

fn make_new(src_call: u16, timestamp: u32, token: &str) -> FullFrame {
	let mut frame = FullFrame::new(src_call, 0, timestamp, 0, 0, ftype::IAX, iax::NEW);
	frame.push_ie_u16(ie::VERSION, 0x0002).unwrap();
	frame.push_ie_str(ie::CALLED_NUMBER, "3999").unwrap();
	frame.push_ie_str(ie::CODEC_PREFS, "DHQ").unwrap();
	frame.push_ie_str(ie::CALLING_NUMBER, "61057").unwrap();
	frame.push_ie_str(ie::CALLING_USER, "radio").unwrap();
	// SLIN16 + G711 µ-law + SLIN8.
	frame.push_ie_u32(ie::CAPABILITY, 0x0000_8044).unwrap();
	frame.push_ie_u32(ie::FORMAT, Codec::ULAW.0).unwrap();
	frame.push_ie_str(ie::CALLTOKEN, token).unwrap();
	frame
}

/// Answer one DNS query on the fake resolver with an A record for
/// 127.0.0.1, so source-IP validation of the loopback caller passes.
fn serve_dns_a(resolver: &UdpSocket) -> bool {
	let mut buf = [0u8; 512];
	let Ok((n, from)) = resolver.recv_from(&mut buf) else {
		return false;
	};

	let mut response = buf[..n].to_vec();
	// QR bit, no error.
	response[2] |= 0x80;
	// One answer record.
	response[6] = 0;
	response[7] = 1;
	// Name pointer to the question, type A, class IN, TTL, rdlength 4.
	response.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 1, 0x2c, 0, 4]);
	response.extend_from_slice(&[127, 0, 0, 1]);

	resolver.send_to(&response, from).unwrap();
	true
}

#[test]
fn call_token_challenge_and_accept() {
	let mut h = start(46911);

	// (i) NEW without a token.
	let new0 = make_new(100, 1234, "");
	h.peer.send_to(new0.as_bytes(), h.line_addr).unwrap();
	pump(&mut h.stakker, 60);

	// (ii) The reply is a CALLTOKEN challenge carrying IE 0x36, echoing
	// our timestamp, from call id 1.
	let frames = drain_peer(&h.peer);
	assert_eq!(frames.len(), 1, "expected only the challenge");
	let challenge = FullFrame::parse(&frames[0]).unwrap();
	assert!(challenge.is_type(ftype::IAX, iax::CALLTOKEN));
	assert_eq!(challenge.src_call(), 1);
	assert_eq!(challenge.dst_call(), 100);
	assert_eq!(challenge.timestamp(), 1234);
	let token = challenge.ie_str(ie::CALLTOKEN).expect("token IE");
	assert_eq!(token.len(), 32);

	// (iii) NEW again with the token; the line ACKs and turns to DNS
	// for source validation.
	let new1 = make_new(100, 1454, &token);
	h.peer.send_to(new1.as_bytes(), h.line_addr).unwrap();
	pump(&mut h.stakker, 60);

	let frames = drain_peer(&h.peer);
	assert!(!frames.is_empty());
	let ack = FullFrame::parse(&frames[0]).unwrap();
	assert!(ack.is_ack());
	// The ACK echoes the timestamp of the frame it acknowledges.
	assert_eq!(ack.timestamp(), 1454);

	assert!(serve_dns_a(&h.resolver), "line should have queried DNS");
	pump(&mut h.stakker, 100);

	// (iv) ACCEPT with FORMAT = G711 µ-law, followed by ANSWER and
	// STOP_SOUNDS as the call auto-answers.
	let frames = drain_peer(&h.peer);
	let parsed: Vec<FullFrame> = frames.iter().filter_map(|f| FullFrame::parse(f)).collect();

	let accept = parsed
		.iter()
		.find(|f| f.is_type(ftype::IAX, iax::ACCEPT))
		.expect("ACCEPT");
	assert_eq!(accept.ie_u32(ie::FORMAT), Some(Codec::ULAW.0));
	assert_eq!(accept.dst_call(), 100);

	assert!(parsed.iter().any(|f| f.is_type(ftype::CONTROL, wire::frame::control::ANSWER)));
	assert!(parsed.iter().any(|f| f.is_type(ftype::CONTROL, wire::frame::control::STOP_SOUNDS)));

	// Outbound sequencing: every sequenced frame strictly increases.
	let mut seqs: Vec<u8> = parsed.iter().filter(|f| f.counts_for_sequence() && !f.is_retransmit()).map(|f| f.oseq()).collect();
	let sorted = {
		let mut s = seqs.clone();
		s.sort_unstable();
		s
	};
	assert_eq!(seqs, sorted);
	seqs.dedup();
	assert_eq!(seqs.len(), sorted.len(), "no duplicate outbound sequence");

	// The CALL_START signal reached the bus with the assigned codec.
	let log = h.bus_log.borrow();
	let start = log.iter().find(|m| m.is_signal(Signal::CallStart)).expect("CALL_START");
	let p = bus::payload::CallStart::from_bytes(start.body()).unwrap();
	assert_eq!(p.codec, Codec::ULAW.0);
	assert_eq!(p.remote_number, "61057");
	assert!(!p.originated);
	assert_eq!(start.dst.bus, 2);
}

#[test]
fn unacknowledged_accept_is_retransmitted() {
	let mut h = start(46913);

	let new0 = make_new(100, 40, "");
	h.peer.send_to(new0.as_bytes(), h.line_addr).unwrap();
	pump(&mut h.stakker, 60);
	let token = FullFrame::parse(&drain_peer(&h.peer)[0]).unwrap().ie_str(ie::CALLTOKEN).unwrap();

	let new1 = make_new(100, 60, &token);
	h.peer.send_to(new1.as_bytes(), h.line_addr).unwrap();
	pump(&mut h.stakker, 60);
	assert!(serve_dns_a(&h.resolver));

	// Never ACK anything: after the retransmit interval the ACCEPT
	// comes around again with the retransmit bit set.
	pump(&mut h.stakker, 3300);

	let frames = drain_peer(&h.peer);
	let parsed: Vec<FullFrame> = frames.iter().filter_map(|f| FullFrame::parse(f)).collect();

	let originals: Vec<&FullFrame> = parsed
		.iter()
		.filter(|f| f.is_type(ftype::IAX, iax::ACCEPT) && !f.is_retransmit())
		.collect();
	let retransmits: Vec<&FullFrame> = parsed
		.iter()
		.filter(|f| f.is_type(ftype::IAX, iax::ACCEPT) && f.is_retransmit())
		.collect();

	assert_eq!(originals.len(), 1);
	assert!(!retransmits.is_empty(), "ACCEPT should retransmit without an ACK");
	// The copy is the same frame, same sequence.
	assert_eq!(retransmits[0].oseq(), originals[0].oseq());
	assert_eq!(retransmits[0].timestamp(), originals[0].timestamp());
}

#[test]
fn mini_frame_voice_reaches_the_bus() {
	let mut h = start(46915);

	// Bring the call up.
	let new0 = make_new(100, 40, "");
	h.peer.send_to(new0.as_bytes(), h.line_addr).unwrap();
	pump(&mut h.stakker, 60);
	let token = FullFrame::parse(&drain_peer(&h.peer)[0]).unwrap().ie_str(ie::CALLTOKEN).unwrap();
	let new1 = make_new(100, 60, &token);
	h.peer.send_to(new1.as_bytes(), h.line_addr).unwrap();
	pump(&mut h.stakker, 60);
	assert!(serve_dns_a(&h.resolver));
	pump(&mut h.stakker, 100);

	// The line allocated a local call id; mini frames match on OUR call
	// id in their source field (the id the line knows the peer by).
	drain_peer(&h.peer);

	// Mini voice frame: our call id 100, low timestamp, one 20 ms
	// µ-law block.
	let payload = [0x55u8; 160];
	let mut mini = [0u8; 164];
	let n = wire::frame::mini_encode(100, 2000, &payload, &mut mini).unwrap();
	h.peer.send_to(&mini[..n], h.line_addr).unwrap();
	pump(&mut h.stakker, 60);

	let log = h.bus_log.borrow();
	let voice = log.iter().find(|m| m.is_voice()).expect("voice on the bus");
	assert_eq!(voice.codec(), Codec::ULAW);
	assert_eq!(voice.body(), &payload[..]);
	assert_eq!(voice.dst.bus, 2);
	// The origin stamp is the extended 16-bit time.
	assert_eq!(voice.orig_ms & 0xffff, 2000);
}
