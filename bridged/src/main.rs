//! Wiring for the conference bridge daemon: configuration, logger, the
//! router, one IAX2 line and one bridge, all on the single-threaded
//! poll loop.

mod config;
mod registry;

use bridge::Bridge;
use bus::{Message, Router};
use line::Line;
use log::{error, info, LevelFilter};
use runtime::Logger;
use stakker::{actor, call, fwd_to, ret_nop};

const LINE_BUS: u32 = 1;
const BRIDGE_BUS: u32 = 2;

fn level_from(name: &str) -> LevelFilter {
	match name {
		"trace" => LevelFilter::Trace,
		"debug" => LevelFilter::Debug,
		"warn" => LevelFilter::Warn,
		"error" => LevelFilter::Error,
		_ => LevelFilter::Info,
	}
}

fn main() {
	let path = std::env::args().nth(1).unwrap_or_else(|| "bridged.json".into());

	Logger::install(LevelFilter::Info);

	let Ok(cfg) = config::load(&path) else {
		std::process::exit(1);
	};
	log::set_max_level(level_from(&cfg.log_level));

	info!("Bridge node {} starting on port {}", cfg.node_number, cfg.port);

	let auth_mode = match cfg.auth_mode.as_str() {
		"open" => line::AuthMode::Open,
		"challenge" => line::AuthMode::ChallengeEd25519,
		"source-ip" => line::AuthMode::SourceIp,
		other => {
			error!("Unknown auth_mode {other:?}");
			std::process::exit(1);
		}
	};

	let Ok(resolver) = cfg.resolver.parse() else {
		error!("Bad resolver address {:?}", cfg.resolver);
		std::process::exit(1);
	};

	let default_mode = match cfg.default_mode.as_str() {
		"parrot" => bridge::call::Mode::Parrot,
		_ => bridge::call::Mode::Normal,
	};

	let mut stakker0 = runtime::init();
	let stakker = &mut stakker0;

	let router = actor!(stakker, Router::init(), ret_nop!());
	let bus = fwd_to!([router], route() as (Message));

	let registry: Option<Box<dyn line::LocalRegistry>> = if cfg.local_nodes.is_empty() {
		None
	} else {
		Some(Box::new(registry::LocalNodes::new(cfg.local_nodes.clone())))
	};

	let dest_auth: Option<Box<dyn line::NumberAuthorizer>> = if cfg.allowed_called.is_empty() {
		None
	} else {
		Some(Box::new(registry::AllowList::new(cfg.allowed_called.clone())))
	};

	let source_auth: Option<Box<dyn line::NumberAuthorizer>> = if cfg.allowed_callers.is_empty() {
		None
	} else {
		Some(Box::new(registry::AllowList::new(cfg.allowed_callers.clone())))
	};

	let line_cfg = line::Config {
		bus_id: LINE_BUS,
		dest_bus_id: BRIDGE_BUS,
		port: cfg.port,
		resolver,
		dns_root: cfg.dns_root.clone(),
		auth_mode,
		private_key_hex: cfg.private_key.clone(),
		poke_target: cfg.poke_addr.clone(),
		poke_node_number: cfg.node_number.clone(),
		max_calls: cfg.max_calls,
		trace: cfg.trace,
		dest_auth,
		source_auth,
		registry,
		..line::Config::default()
	};

	let line = actor!(stakker, Line::init(line_cfg, bus.clone()), ret_nop!());

	let bridge_cfg = bridge::Config {
		bus_id: BRIDGE_BUS,
		network_bus_id: LINE_BUS,
		node_number: cfg.node_number.clone(),
		greeting: cfg.greeting.clone(),
		default_mode,
		kerchunk_nodes: cfg.kerchunk_nodes.clone(),
		kerchunk_evaluation_ms: cfg.kerchunk_evaluation_ms,
		max_calls: cfg.max_calls,
		resolver,
		dns_root: cfg.dns_root.clone(),
	};

	let synth = Box::new(bridge::tts::MorseSynthesizer::new());
	let bridge = actor!(stakker, Bridge::init(bridge_cfg, bus.clone(), synth), ret_nop!());

	call!([router], add_route(LINE_BUS, fwd_to!([line], consume() as (Message))));
	call!([router], add_route(BRIDGE_BUS, fwd_to!([bridge], consume() as (Message))));

	let result = runtime::exec(stakker, move || {
		info!("Shutting down");
		drop(line);
		drop(bridge);
		drop(router);
	});

	if result.is_err() {
		std::process::exit(1);
	}
}
