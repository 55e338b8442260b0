use owo_colors::OwoColorize;
use tokio::sync::mpsc;

use remon::config;
use remon::sink::OutputSink;
use remon::stdin;
use remon::supervisor::Supervisor;
use remon::watcher::ChangeWatcher;

#[tokio::main]
async fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();

	if args.is_empty() {
		print_usage();
		std::process::exit(1);
	}

	let cli = match config::parse_args(&args) {
		Ok(cli) => cli,
		Err(e) => fatal(&e),
	};
	if cli.help {
		print_usage();
		return;
	}
	if cli.version {
		println!("remon {}", env!("CARGO_PKG_VERSION"));
		return;
	}

	let level = match cli.verbosity {
		0 => tracing::Level::INFO,
		1 => tracing::Level::DEBUG,
		_ => tracing::Level::TRACE,
	};
	tracing_subscriber::fmt().with_max_level(level).init();

	let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
	let config = match config::resolve(cli, &cwd) {
		Ok(c) => c,
		Err(e) => fatal(&e),
	};

	let sink = match OutputSink::open(config.log_path.as_deref()) {
		Ok(s) => s,
		Err(e) => fatal(&e),
	};

	let (trigger_tx, trigger_rx) = mpsc::channel(64);

	let _watcher = match ChangeWatcher::start(&config, trigger_tx.clone()) {
		Ok(w) => w,
		Err(e) => fatal(&e),
	};

	tokio::spawn(stdin::listen(trigger_tx));
	tracing::info!("type '{}' + enter to restart manually", stdin::RESTART_COMMAND);

	if let Err(e) = Supervisor::new(config, sink).run(trigger_rx).await {
		fatal(&e);
	}
}

fn fatal(msg: &str) -> ! {
	eprintln!("{}: {}", "error".red().bold(), msg);
	std::process::exit(1);
}

fn print_usage() {
	eprintln!(
		"{} {} - restart your app when files change",
		"remon".bold(),
		env!("CARGO_PKG_VERSION")
	);
	eprintln!();
	eprintln!("usage: {} [options] <exec> [args...]", "remon".bold());
	eprintln!();
	eprintln!("{}", "options".cyan().bold());
	eprintln!("  {} <path>      Watch a path (repeatable, default: project root)", "-w, --watch".bold());
	eprintln!("  {} <glob>     Ignore matching paths (repeatable)", "-i, --ignore".bold());
	eprintln!("  {} <name>     Termination signal: INT, TERM or KILL (default INT)", "-s, --signal".bold());
	eprintln!("  {} <file>        Append child output to a file instead of the console", "-l, --log".bold());
	eprintln!("  {}              Do not restart when files are added", "--no-add".bold());
	eprintln!("  {}           Do not restart when files change", "--no-change".bold());
	eprintln!("  {}           Also restart when files are removed", "--on-unlink".bold());
	eprintln!("  {}                   Increase diagnostic verbosity", "-v".bold());
	eprintln!();
	eprintln!("config file: {} at the project root, overridden by flags", config::CONFIG_FILE);
	eprintln!("runtime: type '{}' + enter to restart the child", stdin::RESTART_COMMAND.bold());
}
