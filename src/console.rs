//! Terminal output for the CLI.
//!
//! Colors are used only when stdout is a terminal and `NO_COLOR` is unset.
//! Diagnostics go through `tracing`; this module is for results meant for
//! the person running the command.

use crate::notifier::DeliveryReport;
use crate::reconciler::SyncReport;
use crate::tracker::{DubStatus, StatusLabel, TickReport};
use std::io::{self, IsTerminal};

/// ANSI style codes for terminal formatting.
#[derive(Debug, Clone, Copy)]
pub enum Style {
    Bold,
    Dim,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    Gray,
}

impl Style {
    /// Returns the ANSI escape code for this style.
    fn code(self) -> &'static str {
        match self {
            Style::Bold => "1",
            Style::Dim => "2",
            Style::Red => "31",
            Style::Green => "32",
            Style::Yellow => "33",
            Style::Blue => "34",
            Style::Magenta => "35",
            Style::Cyan => "36",
            Style::Gray => "90",
        }
    }
}

const RESET: &str = "\x1b[0m";

/// Styled printer for command results.
#[derive(Debug)]
pub struct Console {
    colors_enabled: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Creates a new Console, detecting color support.
    ///
    /// Colors are disabled if:
    /// - The `NO_COLOR` environment variable is set
    /// - stdout is not a terminal (TTY)
    pub fn new() -> Self {
        let colors_enabled = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal();
        Self { colors_enabled }
    }

    /// Creates a Console with colors explicitly enabled or disabled.
    pub fn with_colors(enabled: bool) -> Self {
        Self {
            colors_enabled: enabled,
        }
    }

    /// Applies ANSI styles to text if colors are enabled.
    pub fn style(&self, text: &str, styles: &[Style]) -> String {
        if !self.colors_enabled || styles.is_empty() {
            return text.to_string();
        }

        let codes: Vec<&str> = styles.iter().map(|s| s.code()).collect();
        format!("\x1b[{}m{}{}", codes.join(";"), text, RESET)
    }

    /// Creates a colored label like `[OK]`.
    pub fn label(&self, label: &str, color: Style) -> String {
        format!("[{}]", self.style(label, &[color, Style::Bold]))
    }

    /// Prints an info message with blue `[INFO]` label.
    pub fn info(&self, message: &str) {
        println!("{} {}", self.label("INFO", Style::Blue), message);
    }

    /// Prints a success message with green `[OK]` label.
    pub fn success(&self, message: &str) {
        println!("{} {}", self.label("OK", Style::Green), message);
    }

    /// Prints a warning message with yellow `[WARN]` label.
    pub fn warning(&self, message: &str) {
        println!("{} {}", self.label("WARN", Style::Yellow), message);
    }

    /// Prints an error message with red `[ERROR]` label to stderr.
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", self.label("ERROR", Style::Red), message);
    }

    /// Prints a step message with cyan `[STEP]` label.
    pub fn step(&self, message: &str) {
        println!("{} {}", self.label("STEP", Style::Cyan), message);
    }

    /// Prints a section header in magenta bold.
    pub fn section(&self, message: &str) {
        println!();
        println!("{}", self.style(message, &[Style::Magenta, Style::Bold]));
    }

    /// Returns text styled as muted (dim gray).
    pub fn muted(&self, text: &str) -> String {
        self.style(text, &[Style::Gray, Style::Dim])
    }

    /// Formats a count with styling.
    pub fn count(&self, n: usize) -> String {
        self.style(&n.to_string(), &[Style::Green, Style::Bold])
    }

    /// Dub label colored by state.
    pub fn dub_label(&self, label: StatusLabel) -> String {
        let color = match label {
            StatusLabel::Releasing => Style::Yellow,
            StatusLabel::Finished => Style::Green,
            StatusLabel::NoDub => Style::Gray,
        };
        self.style(&label.to_string(), &[color, Style::Bold])
    }

    /// One-line summary of a title's dub, e.g.
    /// `Frieren (154587): releasing 4/28, next episode 2026-10-20 15:30 UTC`.
    pub fn status_line(&self, status: &DubStatus) -> String {
        let mut line = format!(
            "{} ({}): {} {}/{}",
            status.name,
            status.title_id,
            self.dub_label(status.label),
            status.dubbed_episodes,
            status.total_episodes
        );
        if let Some(next_air) = status.next_air {
            line.push_str(&format!(
                ", next episode {}",
                next_air.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        line
    }

    /// Prints the status line followed by its cache hint.
    pub fn print_status(&self, status: &DubStatus) {
        println!("{}", self.status_line(status));
        println!(
            "{}",
            self.muted(&format!(
                "refresh at {} (max-age {}s)",
                status.refresh_at.to_rfc3339(),
                status.max_age_secs
            ))
        );
    }

    /// Summarizes one user's sync.
    pub fn sync_line(&self, report: &SyncReport) -> String {
        format!(
            "user {}: {} titles, {} added, {} removed, {} resolved, {} skipped",
            report.user_id,
            self.count(report.remote),
            report.added,
            report.removed,
            report.resolved,
            report.skipped
        )
    }

    /// Summarizes a notification delivery run.
    pub fn delivery_line(&self, report: &DeliveryReport) -> String {
        format!(
            "{} notifications delivered, {} failed",
            self.count(report.delivered),
            report.failed
        )
    }

    /// Summarizes a daily tick.
    pub fn tick_line(&self, report: &TickReport) -> String {
        format!(
            "{} users synced ({} failed), {} dubs finished; {}",
            self.count(report.synced_users),
            report.failed_users,
            report.events,
            self.delivery_line(&report.delivery)
        )
    }
}
