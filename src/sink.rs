//! The stable output destination for child stdout/stderr.
//!
//! Opened once at startup and shared across every restart; only the child's
//! pipe attachment changes between generations. In file mode both streams
//! append to the same file, which is never reopened or truncated mid-run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Which child stream a chunk came from. Only matters in console mode,
/// where stdout and stderr stay separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
	Stdout,
	Stderr,
}

#[derive(Clone)]
pub enum OutputSink {
	Console,
	File(Arc<Mutex<File>>),
}

impl OutputSink {
	/// Open the sink. A log file that cannot be opened is a fatal startup
	/// error: without a working sink the supervisor cannot safely run.
	pub fn open(log_path: Option<&Path>) -> Result<Self, String> {
		match log_path {
			None => Ok(OutputSink::Console),
			Some(path) => {
				let file = OpenOptions::new()
					.create(true)
					.append(true)
					.open(path)
					.map_err(|e| format!("cannot open log file {}: {}", path.display(), e))?;
				Ok(OutputSink::File(Arc::new(Mutex::new(file))))
			}
		}
	}

	/// Raw byte pass-through. Errors propagate so the supervisor can treat a
	/// failing sink as fatal rather than silently dropping child output.
	pub async fn write(&self, channel: Channel, data: &[u8]) -> std::io::Result<()> {
		match self {
			OutputSink::Console => match channel {
				Channel::Stdout => {
					let mut out = std::io::stdout().lock();
					out.write_all(data)?;
					out.flush()
				}
				Channel::Stderr => {
					let mut err = std::io::stderr().lock();
					err.write_all(data)?;
					err.flush()
				}
			},
			OutputSink::File(file) => {
				let mut file = file.lock().await;
				file.write_all(data)
			}
		}
	}
}
