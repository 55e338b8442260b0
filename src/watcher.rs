//! Filesystem change watcher.
//!
//! Translates raw `notify` events into restart triggers. Exclusion patterns
//! are checked before the restart policy, and nothing is forwarded until the
//! baseline scan of pre-existing files has completed, so the initial
//! population never restarts the child.

use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::ResolvedConfig;
use crate::supervisor::Trigger;

/// Filesystem event kinds the restart policy can gate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
	Add,
	Change,
	Unlink,
}

/// Keeps the underlying watcher alive; dropping it stops watching.
pub struct ChangeWatcher {
	_watcher: RecommendedWatcher,
}

impl ChangeWatcher {
	/// Register recursive watches on the include roots, run the baseline
	/// scan, then start forwarding qualifying events as restart triggers.
	/// Events that arrive before the baseline completes are dropped.
	pub fn start(
		config: &ResolvedConfig,
		triggers: mpsc::Sender<Trigger>,
	) -> Result<Self, String> {
		let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();

		let mut watcher = RecommendedWatcher::new(
			move |res: Result<notify::Event, notify::Error>| {
				if let Ok(event) = res {
					let _ = raw_tx.send(event);
				}
			},
			notify::Config::default(),
		)
		.map_err(|e| format!("failed to create watcher: {}", e))?;

		for root in &config.include {
			watcher
				.watch(root, RecursiveMode::Recursive)
				.map_err(|e| format!("failed to watch {}: {}", root.display(), e))?;
		}

		if config.verbosity > 0 {
			for pattern in &config.exclude {
				tracing::debug!("ignoring {}", pattern);
			}
		}
		let baseline = baseline_scan(&config.include, &config.exclude);
		tracing::info!(
			"watching {} file(s) under {} root(s)",
			baseline,
			config.include.len()
		);

		// Ready point: anything the initial population produced is dropped,
		// only events from here on may trigger a restart.
		while raw_rx.try_recv().is_ok() {}

		let exclude = config.exclude.clone();
		let policy = config.policy;
		tokio::spawn(async move {
			while let Some(event) = raw_rx.recv().await {
				let Some(kind) = classify(&event.kind) else {
					continue;
				};
				for path in &event.paths {
					if is_excluded(path, &exclude) {
						tracing::trace!("excluded: {}", path.display());
						continue;
					}
					if !policy.allows(kind) {
						continue;
					}
					let trigger = match kind {
						WatchKind::Add => Trigger::FileAdded(path.clone()),
						WatchKind::Change => Trigger::FileChanged(path.clone()),
						WatchKind::Unlink => Trigger::FileRemoved(path.clone()),
					};
					if triggers.send(trigger).await.is_err() {
						return;
					}
				}
			}
		});

		Ok(Self { _watcher: watcher })
	}
}

pub fn classify(kind: &EventKind) -> Option<WatchKind> {
	match kind {
		EventKind::Create(_) => Some(WatchKind::Add),
		EventKind::Modify(_) => Some(WatchKind::Change),
		EventKind::Remove(_) => Some(WatchKind::Unlink),
		_ => None,
	}
}

/// A pattern suppresses a path when it matches the full path or any single
/// component, so a bare `node_modules` excludes the whole subtree.
pub fn is_excluded(path: &Path, patterns: &[glob::Pattern]) -> bool {
	let full = path.to_string_lossy();
	patterns.iter().any(|p| {
		p.matches(&full)
			|| path
				.components()
				.any(|c| p.matches(&c.as_os_str().to_string_lossy()))
	})
}

fn baseline_scan(roots: &[PathBuf], exclude: &[glob::Pattern]) -> usize {
	let mut count = 0;
	for root in roots {
		walk(root, exclude, &mut count);
	}
	count
}

fn walk(dir: &Path, exclude: &[glob::Pattern], count: &mut usize) {
	let entries = match std::fs::read_dir(dir) {
		Ok(e) => e,
		Err(_) => return,
	};
	for entry in entries.flatten() {
		let path = entry.path();
		if is_excluded(&path, exclude) {
			continue;
		}
		if path.is_dir() {
			walk(&path, exclude, count);
		} else {
			*count += 1;
		}
	}
}
