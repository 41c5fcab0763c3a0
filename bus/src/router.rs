use log::trace;
use stakker::{Fwd, CX};

use crate::Message;

/// Delivers each message to every route registered for its destination
/// bus id. Routes are registered once at wiring time; delivery happens
/// on the event-loop thread in submission order.
pub struct Router {
	routes: Vec<(u32, Fwd<Message>)>,
}

impl Router {
	pub fn init(_cx: CX![]) -> Option<Self> {
		Some(Self { routes: Vec::new() })
	}

	pub fn add_route(&mut self, _cx: CX![], bus: u32, fwd: Fwd<Message>) {
		self.routes.push((bus, fwd));
	}

	pub fn route(&mut self, _cx: CX![], msg: Message) {
		trace!("route {:?}", msg);

		for (bus, fwd) in &self.routes {
			if *bus == msg.dst.bus {
				fwd.fwd(msg);
			}
		}
	}
}
