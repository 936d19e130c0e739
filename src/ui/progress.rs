// Terminal progress rendering for the wipe subcommand.

use std::io::{self, Write};

const GREEN: &str = "\x1b[38;5;82m";
const GRAY: &str = "\x1b[38;5;240m";
const CYAN: &str = "\x1b[38;5;51m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Single-line progress bar: percent, smoothed throughput, ETA.
pub struct ProgressBar {
    width: usize,
    rendered_once: bool,
}

impl ProgressBar {
    /// `width` is the number of bar slots, brackets excluded.
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(4),
            rendered_once: false,
        }
    }

    /// Render the current state. `progress` is 0..=100; throughput is
    /// bytes/sec and drives the ETA when total/written are known.
    pub fn render(
        &mut self,
        progress: f64,
        throughput: f64,
        bytes_written: Option<u64>,
        total_bytes: Option<u64>,
    ) {
        let pct = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 100.0)
        };
        let filled = ((pct / 100.0) * self.width as f64).round() as usize;
        let empty = self.width.saturating_sub(filled);

        let bar = format!(
            "{BOLD}{GREEN}{}{RESET}{GRAY}{}{RESET}",
            "█".repeat(filled),
            "░".repeat(empty)
        );

        let info = match (bytes_written, total_bytes) {
            (Some(written), Some(total)) if throughput > 0.0 => {
                let remaining = total.saturating_sub(written);
                let eta = format_duration((remaining as f64 / throughput).round() as u64);
                format!(
                    "{BOLD}{pct:.1}%{RESET} {CYAN}{}/s ETA {eta}{RESET}",
                    human_bytes(throughput)
                )
            }
            _ => format!("{BOLD}{pct:.1}%{RESET} {CYAN}working...{RESET}"),
        };

        if self.rendered_once {
            print!("\x1b[2K\r[{bar}] {info}");
        } else {
            print!("[{bar}] {info}");
            self.rendered_once = true;
        }
        io::stdout().flush().ok();
    }

    /// Terminate the bar's line once the operation is over.
    pub fn finish(&mut self) {
        if self.rendered_once {
            println!();
        }
    }
}

/// Render a byte rate or size as a short human-readable string.
pub fn human_bytes(value: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value <= 0.0 {
        return "0B".to_string();
    }
    let mut value = value;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNITS[unit])
}

/// Seconds to H:MM:SS, or M:SS under an hour.
pub fn format_duration(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}
