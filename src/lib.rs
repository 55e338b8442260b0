//! # remon
//!
//! Development-time process supervisor: watch files, restart your app.
//!
//! Spawns a single child process, streams its output to the console or an
//! append-mode log file, and restarts it when watched files change or when
//! `rs` is typed on stdin. Exactly one child instance is ever alive: a
//! restart signals the old process, waits for it to exit, pauses briefly so
//! the OS can release its resources, then launches the next instance.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use remon::{config, OutputSink, Supervisor, ChangeWatcher};
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let args: Vec<String> = vec!["target/debug/server".into()];
//! let cli = config::parse_args(&args).unwrap();
//! let cwd = std::env::current_dir().unwrap();
//! let cfg = config::resolve(cli, &cwd).unwrap();
//!
//! let sink = OutputSink::open(cfg.log_path.as_deref()).unwrap();
//! let (tx, rx) = mpsc::channel(64);
//! let _watcher = ChangeWatcher::start(&cfg, tx).unwrap();
//! Supervisor::new(cfg, sink).run(rx).await.unwrap();
//! # }
//! ```

pub mod config;
pub mod scan;
pub mod sink;
pub mod stdin;
pub mod supervisor;
pub mod watcher;

pub use config::{ResolvedConfig, RestartPolicy, TermSignal};
pub use sink::OutputSink;
pub use supervisor::{Supervisor, Trigger};
pub use watcher::ChangeWatcher;
