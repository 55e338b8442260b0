use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use remon::config::{compile_patterns, ResolvedConfig, RestartPolicy, TermSignal};
use remon::sink::OutputSink;
use remon::supervisor::{Supervisor, Trigger};
use remon::watcher::ChangeWatcher;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("remon-test-{}-{}", n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
	let path = dir.join(name);
	std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
	std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
	path
}

fn test_config(exec: &Path, args: &[&str], log: Option<&Path>) -> ResolvedConfig {
	ResolvedConfig {
		exec_path: exec.to_path_buf(),
		process_args: args.iter().map(|s| s.to_string()).collect(),
		include: vec![],
		exclude: vec![],
		signal: TermSignal::Term,
		log_path: log.map(|p| p.to_path_buf()),
		policy: RestartPolicy::default(),
		verbosity: 0,
	}
}

fn watch_config(root: &Path, ignore: &[&str], policy: RestartPolicy) -> ResolvedConfig {
	ResolvedConfig {
		exec_path: "/bin/true".into(),
		process_args: vec![],
		include: vec![root.to_path_buf()],
		exclude: compile_patterns(&ignore.iter().map(|s| s.to_string()).collect::<Vec<_>>())
			.unwrap(),
		signal: TermSignal::Term,
		log_path: None,
		policy,
		verbosity: 0,
	}
}

fn read_log(path: &Path) -> String {
	std::fs::read_to_string(path).unwrap_or_default()
}

fn count_lines(path: &Path, needle: &str) -> usize {
	read_log(path).lines().filter(|l| l.contains(needle)).count()
}

async fn settle(ms: u64) {
	tokio::time::sleep(Duration::from_millis(ms)).await;
}

// --- Supervisor: output and clean-exit behavior ---

#[tokio::test]
async fn echo_output_reaches_log_and_does_not_relaunch() {
	let dir = temp_dir("echo");
	let log = dir.join("out.log");

	let config = test_config(Path::new("/bin/echo"), &["hi"], Some(&log));
	let sink = OutputSink::open(Some(&log)).unwrap();
	let (_tx, rx) = mpsc::channel(64);
	let handle = tokio::spawn(Supervisor::new(config, sink).run(rx));

	settle(800).await;

	// Child ran once, exited cleanly, and was not relaunched
	assert_eq!(count_lines(&log, "hi"), 1);
	assert!(!handle.is_finished());

	handle.abort();
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn manual_trigger_relaunches_after_exit() {
	let dir = temp_dir("manual");
	let log = dir.join("out.log");
	let script = write_script(&dir, "run.sh", "echo start");

	let config = test_config(&script, &[], Some(&log));
	let sink = OutputSink::open(Some(&log)).unwrap();
	let (tx, rx) = mpsc::channel(64);
	let handle = tokio::spawn(Supervisor::new(config, sink).run(rx));

	settle(500).await;
	assert_eq!(count_lines(&log, "start"), 1);

	// Slot is empty after the clean exit; a bare trigger is a launch
	tx.send(Trigger::Manual).await.unwrap();
	settle(500).await;
	assert_eq!(count_lines(&log, "start"), 2);

	handle.abort();
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn triggers_coalesce_into_one_relaunch() {
	let dir = temp_dir("coalesce");
	let log = dir.join("out.log");
	let script = write_script(&dir, "run.sh", "echo start\nexec sleep 30");

	let config = test_config(&script, &[], Some(&log));
	let sink = OutputSink::open(Some(&log)).unwrap();
	let (tx, rx) = mpsc::channel(64);
	let handle = tokio::spawn(Supervisor::new(config, sink).run(rx));

	settle(400).await;
	assert_eq!(count_lines(&log, "start"), 1);

	// Three requests while the first child is draining
	tx.send(Trigger::Manual).await.unwrap();
	tx.send(Trigger::Manual).await.unwrap();
	tx.send(Trigger::Manual).await.unwrap();

	// Termination + quiescence + relaunch, with the burst collapsed
	settle(1500).await;
	assert_eq!(count_lines(&log, "start"), 2);

	handle.abort();
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn log_appends_across_consecutive_restarts() {
	let dir = temp_dir("append");
	let log = dir.join("out.log");
	let script = write_script(&dir, "run.sh", "echo start");

	let config = test_config(&script, &[], Some(&log));
	let sink = OutputSink::open(Some(&log)).unwrap();
	let (tx, rx) = mpsc::channel(64);
	let handle = tokio::spawn(Supervisor::new(config, sink).run(rx));

	settle(500).await;
	for round in 2..=5 {
		tx.send(Trigger::Manual).await.unwrap();
		settle(500).await;
		assert_eq!(count_lines(&log, "start"), round, "log was truncated");
	}

	handle.abort();
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn spawn_failure_leaves_supervisor_waiting() {
	let dir = temp_dir("spawn-fail");
	let log = dir.join("out.log");
	let ghost = dir.join("ghost.sh");

	// Exec path vanished between config resolution and launch
	let config = test_config(&ghost, &[], Some(&log));
	let sink = OutputSink::open(Some(&log)).unwrap();
	let (tx, rx) = mpsc::channel(64);
	let handle = tokio::spawn(Supervisor::new(config, sink).run(rx));

	settle(300).await;
	assert!(!handle.is_finished());
	assert_eq!(count_lines(&log, "revived"), 0);

	// Next trigger retries the launch once the binary exists again
	write_script(&dir, "ghost.sh", "echo revived");
	tx.send(Trigger::Manual).await.unwrap();
	settle(500).await;
	assert_eq!(count_lines(&log, "revived"), 1);

	handle.abort();
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn stderr_is_routed_to_the_sink() {
	let dir = temp_dir("stderr");
	let log = dir.join("out.log");
	let script = write_script(&dir, "run.sh", "echo oops >&2");

	let config = test_config(&script, &[], Some(&log));
	let sink = OutputSink::open(Some(&log)).unwrap();
	let (_tx, rx) = mpsc::channel(64);
	let handle = tokio::spawn(Supervisor::new(config, sink).run(rx));

	settle(500).await;
	assert_eq!(count_lines(&log, "oops"), 1);

	handle.abort();
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn failing_sink_is_fatal() {
	let dir = temp_dir("sink-fatal");
	let log = dir.join("out.log");
	std::fs::write(&log, "").unwrap();
	let script = write_script(&dir, "run.sh", "echo boom");

	// Read-only handle: the first chunk from the reader task cannot be
	// written, which must take the whole supervisor down
	let file = std::fs::File::open(&log).unwrap();
	let sink = OutputSink::File(std::sync::Arc::new(tokio::sync::Mutex::new(file)));

	let config = test_config(&script, &[], Some(&log));
	let (_tx, rx) = mpsc::channel(64);
	let result = timeout(Duration::from_secs(3), Supervisor::new(config, sink).run(rx))
		.await
		.expect("supervisor kept running on a broken sink");

	let err = result.unwrap_err();
	assert!(err.contains("sink write failed"), "got: {}", err);

	let _ = std::fs::remove_dir_all(&dir);
}

// --- Watcher: baseline, policy, exclusion ---

#[tokio::test]
async fn baseline_files_do_not_trigger() {
	let dir = temp_dir("baseline");
	std::fs::write(dir.join("a.txt"), "a").unwrap();
	std::fs::write(dir.join("b.txt"), "b").unwrap();
	std::fs::write(dir.join("c.txt"), "c").unwrap();

	let config = watch_config(&dir, &[], RestartPolicy::default());
	let (tx, mut rx) = mpsc::channel(64);
	let _watcher = ChangeWatcher::start(&config, tx).unwrap();

	settle(400).await;
	assert!(rx.try_recv().is_err(), "pre-existing files triggered a restart");

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn change_to_watched_file_triggers() {
	let dir = temp_dir("change");
	let file = dir.join("watched.txt");
	std::fs::write(&file, "v1").unwrap();

	let config = watch_config(&dir, &[], RestartPolicy::default());
	let (tx, mut rx) = mpsc::channel(64);
	let _watcher = ChangeWatcher::start(&config, tx).unwrap();

	settle(300).await;
	std::fs::write(&file, "v2").unwrap();

	let trigger = timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("no trigger within 2s")
		.unwrap();
	assert!(matches!(trigger, Trigger::FileChanged(_)), "got {:?}", trigger);

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn policy_gates_event_kinds() {
	let dir = temp_dir("policy");
	let existing = dir.join("existing.txt");
	std::fs::write(&existing, "v1").unwrap();

	let policy = RestartPolicy {
		on_add: false,
		on_change: true,
		on_unlink: false,
	};
	let config = watch_config(&dir, &[], policy);
	let (tx, mut rx) = mpsc::channel(64);
	let _watcher = ChangeWatcher::start(&config, tx).unwrap();
	settle(300).await;

	// Added file: suppressed by the policy
	std::fs::File::create(dir.join("added.txt")).unwrap();
	settle(500).await;
	assert!(rx.try_recv().is_err(), "add event was not gated");

	// Removed file: suppressed by default
	std::fs::remove_file(dir.join("added.txt")).unwrap();
	settle(500).await;
	assert!(rx.try_recv().is_err(), "unlink event was not gated");

	// Changed file: allowed
	std::fs::write(&existing, "v2").unwrap();
	let trigger = timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("no trigger within 2s")
		.unwrap();
	assert!(matches!(trigger, Trigger::FileChanged(_)));

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn excluded_paths_never_trigger() {
	let dir = temp_dir("exclude");
	std::fs::create_dir_all(dir.join("node_modules")).unwrap();

	let config = watch_config(&dir, &["node_modules"], RestartPolicy::default());
	let (tx, mut rx) = mpsc::channel(64);
	let _watcher = ChangeWatcher::start(&config, tx).unwrap();
	settle(300).await;

	std::fs::write(dir.join("node_modules/dep.js"), "x").unwrap();
	settle(500).await;
	assert!(rx.try_recv().is_err(), "excluded path triggered a restart");

	std::fs::write(dir.join("app.js"), "x").unwrap();
	let trigger = timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("no trigger within 2s")
		.unwrap();
	assert!(matches!(
		trigger,
		Trigger::FileAdded(_) | Trigger::FileChanged(_)
	));

	let _ = std::fs::remove_dir_all(&dir);
}

// --- Watcher + supervisor end to end ---

#[tokio::test]
async fn file_change_restarts_the_child() {
	let dir = temp_dir("end-to-end");
	let watched = temp_dir("end-to-end-src");
	let log = dir.join("out.log");
	let script = write_script(&dir, "run.sh", "echo start\nexec sleep 30");
	let source = watched.join("main.txt");
	std::fs::write(&source, "v1").unwrap();

	let mut config = test_config(&script, &[], Some(&log));
	config.include = vec![watched.clone()];

	let sink = OutputSink::open(Some(&log)).unwrap();
	let (tx, rx) = mpsc::channel(64);
	let _watcher = ChangeWatcher::start(&config, tx).unwrap();
	let handle = tokio::spawn(Supervisor::new(config, sink).run(rx));

	settle(400).await;
	assert_eq!(count_lines(&log, "start"), 1);

	std::fs::write(&source, "v2").unwrap();
	settle(1500).await;
	assert_eq!(count_lines(&log, "start"), 2);

	handle.abort();
	let _ = std::fs::remove_dir_all(&dir);
	let _ = std::fs::remove_dir_all(&watched);
}
