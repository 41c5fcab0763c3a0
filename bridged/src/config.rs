//! The daemon's JSON configuration. Everything except the node number
//! has a sensible default, so a minimal file is just
//! `{"node_number": "61057"}`.

use serde::Deserialize;
use utils::error::{LogErr, Result};

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
	/// The AllStarLink node number this bridge answers for.
	pub node_number: String,

	#[serde(default = "default_port")]
	pub port: u16,

	/// "open", "source-ip" or "challenge".
	#[serde(default = "default_auth")]
	pub auth_mode: String,

	#[serde(default = "default_resolver")]
	pub resolver: String,

	#[serde(default = "default_dns_root")]
	pub dns_root: String,

	/// Spoken to inbound callers; empty disables.
	#[serde(default)]
	pub greeting: String,

	/// "normal" or "parrot".
	#[serde(default = "default_mode")]
	pub default_mode: String,

	/// Nodes whose leading audio passes the kerchunk filter.
	#[serde(default)]
	pub kerchunk_nodes: Vec<String>,

	#[serde(default = "default_kerchunk_ms")]
	pub kerchunk_evaluation_ms: u32,

	/// 64-hex-char ED25519 seed for answering challenges.
	#[serde(default)]
	pub private_key: Option<String>,

	/// "addr:port" given a POKE every ten seconds to hold a firewall
	/// pinhole open.
	#[serde(default)]
	pub poke_addr: Option<String>,

	#[serde(default = "default_max_calls")]
	pub max_calls: usize,

	#[serde(default)]
	pub trace: bool,

	/// "trace".."error"; defaults to "info".
	#[serde(default = "default_log_level")]
	pub log_level: String,

	/// Privately-known nodes, tried before the public directory.
	#[serde(default)]
	pub local_nodes: Vec<crate::registry::RegistryNode>,

	/// Called numbers this bridge will accept calls for. Empty admits
	/// any number.
	#[serde(default)]
	pub allowed_called: Vec<String>,

	/// Calling numbers admitted. Empty admits any caller.
	#[serde(default)]
	pub allowed_callers: Vec<String>,
}

fn default_port() -> u16 {
	4569
}

fn default_auth() -> String {
	"source-ip".into()
}

fn default_resolver() -> String {
	"208.67.222.222:53".into()
}

fn default_dns_root() -> String {
	"allstarlink.org".into()
}

fn default_mode() -> String {
	"normal".into()
}

fn default_kerchunk_ms() -> u32 {
	3000
}

fn default_max_calls() -> usize {
	8
}

fn default_log_level() -> String {
	"info".into()
}

pub fn load(path: &str) -> Result<Config> {
	let text = std::fs::read_to_string(path).ok_or_log(|e| log::error!("Cannot read {path}: {e}")).ok_or(())?;
	let cfg: Config = serde_json::from_str(&text).ok_or_log(|e| log::error!("Cannot parse {path}: {e}")).ok_or(())?;
	Ok(cfg)
}
