//! Terminal feedback for the kiosk daemon and CLI flows.
//!
//! Stages print either an indicatif spinner (interactive stderr) or plain
//! arrow lines (logs, pipes); the guard reports elapsed time on drop so
//! every stage line carries its cost.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

/// Stderr reporter for the CLI flows. Construction decides once whether
/// spinners are appropriate; stages stay cheap after that.
#[derive(Clone, Copy, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    /// Builds from the `--ui` flag value: `plain` and `pretty` force the
    /// style, anything else probes stderr for a terminal.
    pub fn from_flag(ui_flag: Option<&str>) -> Self {
        let pretty = match ui_flag {
            Some("plain") => false,
            Some("pretty") => true,
            _ => std::io::stderr().is_terminal(),
        };
        Self { pretty }
    }

    /// Opens a named stage. The guard reports the elapsed time when it
    /// drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.pretty.then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}..."));
            spinner
        });
        if spinner.is_none() {
            eprintln!("--> {}", name);
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// One indented detail line under the current stage.
    pub fn note(&self, text: &str) {
        eprintln!("    {text}");
    }
}

/// Prints `ok: <stage> (<elapsed>)` when the stage ends.
pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("ok: {} ({})", self.name, format_duration(elapsed));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// Millisecond precision below one second; most backend calls finish there.
fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
