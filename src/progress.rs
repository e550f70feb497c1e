//! Sweep progress reporting.
//!
//! Reports observable progress during `dedup sweep` so operators see how many
//! posts are due, how far the run is, and what happened to each post.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a sweep.
#[derive(Clone, Debug)]
pub enum SweepProgressEvent {
    /// Eligibility counted; `planned` is capped by `--limit`.
    Started {
        eligible: u64,
        planned: u64,
        dry_run: bool,
    },
    /// Post number `n` of `total` finished with `outcome`.
    Checked {
        n: u64,
        total: u64,
        post_id: String,
        outcome: &'static str,
    },
}

/// Reports sweep progress. Implementations write to stderr (human or JSON).
pub trait SweepProgressReporter: Send + Sync {
    fn report(&self, event: SweepProgressEvent);
}

/// Human-friendly progress on stderr: "sweep  checked  12 / 1,204 posts  abc  no-match".
pub struct StderrProgress;

impl SweepProgressReporter for StderrProgress {
    fn report(&self, event: SweepProgressEvent) {
        let line = match &event {
            SweepProgressEvent::Started {
                eligible,
                planned,
                dry_run,
            } => format!(
                "sweep{}  {} eligible, checking {}\n",
                if *dry_run { " (dry-run)" } else { "" },
                format_number(*eligible),
                format_number(*planned)
            ),
            SweepProgressEvent::Checked {
                n,
                total,
                post_id,
                outcome,
            } => format!(
                "sweep  checked  {} / {} posts  {}  {}\n",
                format_number(*n),
                format_number(*total),
                post_id,
                outcome
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SweepProgressReporter for JsonProgress {
    fn report(&self, event: SweepProgressEvent) {
        let obj = match &event {
            SweepProgressEvent::Started {
                eligible,
                planned,
                dry_run,
            } => serde_json::json!({
                "event": "progress",
                "phase": "started",
                "eligible": eligible,
                "planned": planned,
                "dry_run": dry_run
            }),
            SweepProgressEvent::Checked {
                n,
                total,
                post_id,
                outcome,
            } => serde_json::json!({
                "event": "progress",
                "phase": "checked",
                "n": n,
                "total": total,
                "post_id": post_id,
                "outcome": outcome
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SweepProgressReporter for NoProgress {
    fn report(&self, _event: SweepProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SweepProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
