//! Configuration resolution: defaults, `.remon.toml`, CLI overrides.
//!
//! Everything here runs once, before the supervisor starts. The result is a
//! single immutable [`ResolvedConfig`]; nothing downstream re-reads files or
//! re-validates paths.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::watcher::WatchKind;

pub const CONFIG_FILE: &str = ".remon.toml";

const DEFAULT_IGNORES: &[&str] = &[".git", "node_modules", "target"];

/// Signal delivered to the child to initiate shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
	Int,
	Term,
	Kill,
}

impl TermSignal {
	/// Accepts `INT`, `TERM`, `KILL`, case-insensitive, optional `SIG` prefix.
	pub fn parse(name: &str) -> Result<Self, String> {
		let upper = name.trim().to_ascii_uppercase();
		let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
		match bare {
			"INT" => Ok(TermSignal::Int),
			"TERM" => Ok(TermSignal::Term),
			"KILL" => Ok(TermSignal::Kill),
			_ => Err(format!("invalid signal: {} (expected INT, TERM or KILL)", name)),
		}
	}

	pub fn to_nix(self) -> nix::sys::signal::Signal {
		use nix::sys::signal::Signal;
		match self {
			TermSignal::Int => Signal::SIGINT,
			TermSignal::Term => Signal::SIGTERM,
			TermSignal::Kill => Signal::SIGKILL,
		}
	}
}

impl std::fmt::Display for TermSignal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			TermSignal::Int => "SIGINT",
			TermSignal::Term => "SIGTERM",
			TermSignal::Kill => "SIGKILL",
		};
		write!(f, "{}", name)
	}
}

/// Which filesystem event kinds may trigger a restart.
///
/// The defaults mirror a typical dev loop: restart on added or changed
/// files, ignore deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
	pub on_add: bool,
	pub on_change: bool,
	pub on_unlink: bool,
}

impl Default for RestartPolicy {
	fn default() -> Self {
		Self {
			on_add: true,
			on_change: true,
			on_unlink: false,
		}
	}
}

impl RestartPolicy {
	pub fn allows(&self, kind: WatchKind) -> bool {
		match kind {
			WatchKind::Add => self.on_add,
			WatchKind::Change => self.on_change,
			WatchKind::Unlink => self.on_unlink,
		}
	}
}

/// The one configuration record the core runs from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
	pub exec_path: PathBuf,
	pub process_args: Vec<String>,
	pub include: Vec<PathBuf>,
	pub exclude: Vec<glob::Pattern>,
	pub signal: TermSignal,
	pub log_path: Option<PathBuf>,
	pub policy: RestartPolicy,
	pub verbosity: u8,
}

/// Raw command-line flags, before merging with the project config file.
///
/// `help` and `version` are only recognized before the exec path; anything
/// after the first positional (or after `--`) belongs to the child.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
	pub exec: Option<String>,
	pub help: bool,
	pub version: bool,
	pub args: Vec<String>,
	pub watch: Vec<String>,
	pub ignore: Vec<String>,
	pub signal: Option<String>,
	pub log: Option<String>,
	pub no_add: bool,
	pub no_change: bool,
	pub on_unlink: bool,
	pub verbosity: u8,
}

/// Optional `.remon.toml` at the project root. Every field overrides the
/// built-in defaults and is itself overridden by the command line, except
/// `ignore`, which accumulates.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectToml {
	pub exec: Option<String>,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub watch: Vec<String>,
	#[serde(default)]
	pub ignore: Vec<String>,
	pub signal: Option<String>,
	pub log: Option<String>,
	#[serde(default)]
	pub restart: RestartToml,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RestartToml {
	pub on_add: Option<bool>,
	pub on_change: Option<bool>,
	pub on_unlink: Option<bool>,
}

pub fn parse_args(args: &[String]) -> Result<CliArgs, String> {
	let mut cli = CliArgs::default();
	let mut i = 0;
	while i < args.len() {
		let arg = &args[i];
		if cli.exec.is_some() {
			cli.args.push(arg.clone());
			i += 1;
			continue;
		}
		match arg.as_str() {
			"-w" | "--watch" => {
				i += 1;
				cli.watch.push(flag_value(args, i, arg)?);
			}
			"-i" | "--ignore" => {
				i += 1;
				cli.ignore.push(flag_value(args, i, arg)?);
			}
			"-s" | "--signal" => {
				i += 1;
				cli.signal = Some(flag_value(args, i, arg)?);
			}
			"-l" | "--log" => {
				i += 1;
				cli.log = Some(flag_value(args, i, arg)?);
			}
			"--no-add" => cli.no_add = true,
			"--no-change" => cli.no_change = true,
			"--on-unlink" => cli.on_unlink = true,
			"-v" => cli.verbosity += 1,
			"-h" | "--help" => cli.help = true,
			"-V" | "--version" => cli.version = true,
			"--" => {
				if let Some(first) = args.get(i + 1) {
					cli.exec = Some(first.clone());
					cli.args.extend(args[i + 2..].iter().cloned());
				}
				break;
			}
			other if other.starts_with('-') => {
				return Err(format!("unknown option: {}", other));
			}
			other => cli.exec = Some(other.to_string()),
		}
		i += 1;
	}
	Ok(cli)
}

fn flag_value(args: &[String], i: usize, flag: &str) -> Result<String, String> {
	args.get(i)
		.cloned()
		.ok_or_else(|| format!("{} requires a value", flag))
}

/// Nearest ancestor holding a `.remon.toml`, else the nearest holding
/// `.git`, else the starting directory itself.
pub fn find_project_root(start: &Path) -> PathBuf {
	let mut git_root = None;
	for dir in start.ancestors() {
		if dir.join(CONFIG_FILE).is_file() {
			return dir.to_path_buf();
		}
		if git_root.is_none() && dir.join(".git").exists() {
			git_root = Some(dir.to_path_buf());
		}
	}
	git_root.unwrap_or_else(|| start.to_path_buf())
}

fn load_project_toml(root: &Path) -> ProjectToml {
	let path = root.join(CONFIG_FILE);
	if path.exists() {
		match std::fs::read_to_string(&path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(file) => return file,
				Err(e) => eprintln!("warning: failed to parse {}: {}", path.display(), e),
			},
			Err(e) => eprintln!("warning: failed to read {}: {}", path.display(), e),
		}
	}
	ProjectToml::default()
}

/// Merge defaults, the project file and the command line into one record.
///
/// All relative paths resolve against the discovered project root. Fails on
/// a missing or non-regular exec path, an unknown signal name or an invalid
/// ignore pattern; callers treat any error here as fatal.
pub fn resolve(cli: CliArgs, cwd: &Path) -> Result<ResolvedConfig, String> {
	let root = find_project_root(cwd);
	let file = load_project_toml(&root);

	let exec = cli
		.exec
		.or(file.exec)
		.ok_or("no executable given (usage: remon [options] <exec> [args...])")?;
	let exec_path = absolutize(&root, Path::new(&exec));
	let meta = std::fs::metadata(&exec_path)
		.map_err(|e| format!("exec path {}: {}", exec_path.display(), e))?;
	if !meta.is_file() {
		return Err(format!("exec path {} is not a regular file", exec_path.display()));
	}

	let process_args = if cli.args.is_empty() { file.args } else { cli.args };

	let mut watch = if cli.watch.is_empty() { file.watch } else { cli.watch };
	if watch.is_empty() {
		watch.push(".".to_string());
	}
	let include = watch
		.iter()
		.map(|w| absolutize(&root, Path::new(w)))
		.collect();

	let mut ignore: Vec<String> = DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect();
	ignore.extend(file.ignore);
	ignore.extend(cli.ignore);
	let exclude = compile_patterns(&ignore)?;

	let signal = match cli.signal.or(file.signal) {
		Some(name) => TermSignal::parse(&name)?,
		None => TermSignal::Int,
	};

	let log_path = cli
		.log
		.or(file.log)
		.map(|l| absolutize(&root, Path::new(&l)));

	let mut policy = RestartPolicy::default();
	if let Some(v) = file.restart.on_add {
		policy.on_add = v;
	}
	if let Some(v) = file.restart.on_change {
		policy.on_change = v;
	}
	if let Some(v) = file.restart.on_unlink {
		policy.on_unlink = v;
	}
	if cli.no_add {
		policy.on_add = false;
	}
	if cli.no_change {
		policy.on_change = false;
	}
	if cli.on_unlink {
		policy.on_unlink = true;
	}

	Ok(ResolvedConfig {
		exec_path,
		process_args,
		include,
		exclude,
		signal,
		log_path,
		policy,
		verbosity: cli.verbosity,
	})
}

pub fn compile_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>, String> {
	patterns
		.iter()
		.map(|p| glob::Pattern::new(p).map_err(|e| format!("invalid ignore pattern {}: {}", p, e)))
		.collect()
}

fn absolutize(root: &Path, path: &Path) -> PathBuf {
	if path.is_absolute() {
		path.to_path_buf()
	} else if path == Path::new(".") {
		root.to_path_buf()
	} else {
		root.join(path)
	}
}
