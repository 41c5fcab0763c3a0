use std::time::SystemTime;

use log::Level;
use nu_ansi_term::ansi::RESET;
use nu_ansi_term::{Color, Style};

pub struct Logger;

impl Logger {
	pub fn install(level: log::LevelFilter) {
		let _ = log::set_logger(&Logger);
		log::set_max_level(level);
	}
}

impl log::Log for Logger {
	fn enabled(&self, _: &log::Metadata) -> bool {
		true
	}

	fn log(&self, record: &log::Record) {
		let time = humantime::format_rfc3339_millis(SystemTime::now());

		let color = match record.level() {
			Level::Trace => Color::Purple,
			Level::Debug => Color::Blue,
			Level::Info => Color::Green,
			Level::Warn => Color::Yellow,
			Level::Error => Color::Red,
		};

		let dim = Style::new().dimmed().prefix();
		let bold = Style::new().bold().prefix();

		eprintln!(
			"{dim}{time}{RESET} {}{:5}{RESET} {bold}{}{RESET} {}",
			color.bold().prefix(),
			record.level(),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}
