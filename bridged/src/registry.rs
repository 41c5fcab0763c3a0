//! Optional local node registry and number allow-lists, loaded from the
//! config file. Private nodes that never appear in the public DNS
//! directory resolve here first; the allow-lists gate which numbers may
//! be called and which callers are admitted.

use core::net::SocketAddr;

use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct RegistryNode {
	pub node: String,
	/// "addr:port" of the node's IAX listener.
	pub addr: String,
	#[serde(default = "default_user")]
	pub user: String,
	#[serde(default = "default_password")]
	pub password: String,
}

fn default_user() -> String {
	"radio".into()
}

fn default_password() -> String {
	"NONE".into()
}

/// A fixed table of privately-known nodes.
pub struct LocalNodes {
	nodes: Vec<RegistryNode>,
}

impl LocalNodes {
	pub fn new(nodes: Vec<RegistryNode>) -> Self {
		Self { nodes }
	}
}

impl line::LocalRegistry for LocalNodes {
	fn lookup(&self, number: &str) -> Option<line::RegistryEntry> {
		let entry = self.nodes.iter().find(|n| n.node == number)?;
		let addr: SocketAddr = entry.addr.parse().ok()?;
		Some(line::RegistryEntry {
			addr,
			user: entry.user.clone(),
			password: entry.password.clone(),
		})
	}
}

/// An allow-list authorizer; an empty list means everything passes.
pub struct AllowList {
	numbers: Vec<String>,
}

impl AllowList {
	pub fn new(numbers: Vec<String>) -> Self {
		Self { numbers }
	}
}

impl line::NumberAuthorizer for AllowList {
	fn is_authorized(&self, number: &str) -> bool {
		self.numbers.is_empty() || self.numbers.iter().any(|n| n == number)
	}
}
