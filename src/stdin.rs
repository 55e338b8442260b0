//! Manual restart trigger: line-oriented commands on standard input.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::supervisor::Trigger;

/// Line that requests a restart. Exact match after trimming, case-sensitive.
pub const RESTART_COMMAND: &str = "rs";

pub fn is_restart_command(line: &str) -> bool {
	line.trim() == RESTART_COMMAND
}

/// Runs for the life of the supervisor. Unrecognized input is ignored.
pub async fn listen(triggers: mpsc::Sender<Trigger>) {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		if is_restart_command(&line) && triggers.send(Trigger::Manual).await.is_err() {
			return;
		}
	}
}
