//! Child stderr inspection.
//!
//! A diagnostic convenience: when a burst of stderr lines mentions an error,
//! a trimmed-down view is echoed to the console even if child output is
//! routed to a log file. Frames pointing into dependency directories are
//! dropped so the lines that remain are the ones worth reading.

const HEAD_LINES: usize = 4;
const DEP_DIRS: &[&str] = &["node_modules", "target", ".cargo"];
const NEEDLE: &str = "error";

/// Assembles raw stderr chunks into lines and filters error bursts.
pub struct ErrorScan {
	partial: String,
}

impl ErrorScan {
	pub fn new() -> Self {
		Self {
			partial: String::new(),
		}
	}

	/// Feed a raw chunk. Returns the filtered trace to echo when the lines
	/// completed by this chunk mention an error, empty otherwise. Incomplete
	/// trailing lines are held back until the next chunk.
	pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
		self.partial.push_str(&String::from_utf8_lossy(chunk));
		let mut lines = Vec::new();
		while let Some(pos) = self.partial.find('\n') {
			let line: String = self.partial.drain(..=pos).collect();
			lines.push(line.trim_end().to_string());
		}
		if lines.iter().any(|l| contains_error(l)) {
			filter_trace(&lines)
		} else {
			Vec::new()
		}
	}
}

impl Default for ErrorScan {
	fn default() -> Self {
		Self::new()
	}
}

pub fn contains_error(line: &str) -> bool {
	line.to_lowercase().contains(NEEDLE)
}

/// The first few lines of the burst plus any later line naming a path
/// outside the dependency directories.
pub fn filter_trace(lines: &[String]) -> Vec<String> {
	let mut out: Vec<String> = lines.iter().take(HEAD_LINES).cloned().collect();
	for line in lines.iter().skip(HEAD_LINES) {
		if names_project_path(line) {
			out.push(line.clone());
		}
	}
	out
}

fn names_project_path(line: &str) -> bool {
	if !line.contains('/') {
		return false;
	}
	!DEP_DIRS.iter().any(|d| line.contains(&format!("/{}/", d)))
}
