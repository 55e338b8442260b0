//! The single-child process supervisor.
//!
//! Owns the only child process slot in the program. All state mutation
//! happens inside [`Supervisor::run`], a single consumer loop fed by a
//! trigger channel; the watcher and the stdin listener only ever hold a
//! sender. The loop guarantees that at most one child exists at any instant
//! and that a burst of restart requests collapses into one relaunch.
//!
//! Shutdown of the child is best-effort: the configured signal is sent once
//! and the loop then waits for the close event with no escalation timeout.
//! A child that ignores the signal stalls the restart indefinitely.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::ResolvedConfig;
use crate::scan::ErrorScan;
use crate::sink::{Channel, OutputSink};

/// Pause between an observed child exit and the next launch, letting the OS
/// release file descriptors and ports held by the old process.
const QUIESCENCE: Duration = Duration::from_millis(300);

/// Restart request delivered to the supervisor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
	FileAdded(PathBuf),
	FileChanged(PathBuf),
	FileRemoved(PathBuf),
	Manual,
}

impl std::fmt::Display for Trigger {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Trigger::FileAdded(p) => write!(f, "file added: {}", p.display()),
			Trigger::FileChanged(p) => write!(f, "file changed: {}", p.display()),
			Trigger::FileRemoved(p) => write!(f, "file removed: {}", p.display()),
			Trigger::Manual => write!(f, "manual restart"),
		}
	}
}

pub struct Supervisor {
	config: ResolvedConfig,
	sink: OutputSink,
	generation: u64,
}

impl Supervisor {
	pub fn new(config: ResolvedConfig, sink: OutputSink) -> Self {
		Self {
			config,
			sink,
			generation: 0,
		}
	}

	/// Launch the child and consume triggers until the channel closes or the
	/// sink fails. Returns `Err` only for fatal conditions (a sink write
	/// failure); per-child problems are reported and absorbed.
	pub async fn run(mut self, mut triggers: mpsc::Receiver<Trigger>) -> Result<(), String> {
		// Held by the loop itself so the channel never closes; reader tasks
		// report sink write failures here.
		let (fatal_tx, mut fatal_rx) = mpsc::channel::<String>(4);

		let mut child = self.try_launch(&fatal_tx);
		let mut terminating = false;

		loop {
			child = match child.take() {
				Some(mut current) => {
					tokio::select! {
						status = current.wait() => {
							if terminating {
								terminating = false;
								self.relaunch_after_drain(&mut triggers, &fatal_tx).await
							} else {
								match status {
									Ok(s) => tracing::warn!(
										"process exited ({}), waiting for file change or '{}' before restart",
										describe_exit(&s),
										crate::stdin::RESTART_COMMAND
									),
									Err(e) => tracing::warn!("process wait failed: {}", e),
								}
								None
							}
						}
						Some(msg) = fatal_rx.recv() => return Err(msg),
						req = triggers.recv() => match req {
							Some(trigger) => {
								if terminating {
									tracing::debug!("restart in flight, absorbing: {}", trigger);
								} else {
									tracing::info!("{}, restarting", trigger);
									self.signal(&current);
									terminating = true;
								}
								Some(current)
							}
							None => return Ok(()),
						}
					}
				}
				None => {
					tokio::select! {
						Some(msg) = fatal_rx.recv() => return Err(msg),
						req = triggers.recv() => match req {
							// No child to wait on: a bare restart request is a launch
							Some(trigger) => {
								tracing::info!("{}, starting", trigger);
								self.try_launch(&fatal_tx)
							}
							None => return Ok(()),
						}
					}
				}
			};
		}
	}

	/// Close observed after an intentional kill: wait out the quiescence
	/// window, collapse any triggers that queued during termination, launch.
	async fn relaunch_after_drain(
		&mut self,
		triggers: &mut mpsc::Receiver<Trigger>,
		fatal_tx: &mpsc::Sender<String>,
	) -> Option<Child> {
		tokio::time::sleep(QUIESCENCE).await;
		let mut absorbed = 0u32;
		while triggers.try_recv().is_ok() {
			absorbed += 1;
		}
		if absorbed > 0 {
			tracing::debug!("coalesced {} queued trigger(s)", absorbed);
		}
		self.try_launch(fatal_tx)
	}

	fn try_launch(&mut self, fatal_tx: &mpsc::Sender<String>) -> Option<Child> {
		match self.launch(fatal_tx) {
			Ok(child) => Some(child),
			Err(e) => {
				// Spawn-level failure: report and leave the slot empty until
				// the next trigger, never crash the supervisor itself.
				tracing::error!("{}", e);
				None
			}
		}
	}

	fn launch(&mut self, fatal_tx: &mpsc::Sender<String>) -> Result<Child, String> {
		let mut cmd = Command::new(&self.config.exec_path);
		cmd.args(&self.config.process_args)
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());

		let mut child = cmd
			.spawn()
			.map_err(|e| format!("failed to spawn {}: {}", self.config.exec_path.display(), e))?;

		self.generation += 1;
		tracing::info!(
			"started {} (pid {}, gen {})",
			self.config.exec_path.display(),
			child.id().unwrap_or(0),
			self.generation
		);

		if let Some(stdout) = child.stdout.take() {
			let sink = self.sink.clone();
			let fatal = fatal_tx.clone();
			tokio::spawn(async move {
				pipe_stdout(stdout, sink, fatal).await;
			});
		}
		if let Some(stderr) = child.stderr.take() {
			let sink = self.sink.clone();
			let fatal = fatal_tx.clone();
			tokio::spawn(async move {
				pipe_stderr(stderr, sink, fatal).await;
			});
		}

		Ok(child)
	}

	fn signal(&self, child: &Child) {
		use nix::sys::signal::kill;
		use nix::unistd::Pid;

		if let Some(pid) = child.id() {
			tracing::debug!("sending {} to pid {}", self.config.signal, pid);
			if let Err(e) = kill(Pid::from_raw(pid as i32), self.config.signal.to_nix()) {
				tracing::warn!("failed to signal pid {}: {}", pid, e);
			}
		}
	}
}

async fn pipe_stdout<R: tokio::io::AsyncRead + Unpin>(
	mut reader: R,
	sink: OutputSink,
	fatal: mpsc::Sender<String>,
) {
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => {
				if let Err(e) = sink.write(Channel::Stdout, &buf[..n]).await {
					let _ = fatal.send(format!("sink write failed: {}", e)).await;
					break;
				}
			}
			Err(_) => break,
		}
	}
}

/// Like stdout, but every chunk also runs through the error scan; matched
/// bursts echo to the console even when the sink is a log file.
async fn pipe_stderr<R: tokio::io::AsyncRead + Unpin>(
	mut reader: R,
	sink: OutputSink,
	fatal: mpsc::Sender<String>,
) {
	let mut buf = [0u8; 4096];
	let mut scan = ErrorScan::new();
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => {
				if let Err(e) = sink.write(Channel::Stderr, &buf[..n]).await {
					let _ = fatal.send(format!("sink write failed: {}", e)).await;
					break;
				}
				for line in scan.feed(&buf[..n]) {
					eprintln!("{}", line.red());
				}
			}
			Err(_) => break,
		}
	}
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
	match status.code() {
		Some(code) => format!("exit code {}", code),
		None => "killed by signal".to_string(),
	}
}
