//! Formatting for elapsed times, the startup banner and validation reports.

use std::time::Duration;

use owo_colors::OwoColorize;

use crate::config::{DevMode, format_duration};
use crate::manifest::ValidationReport;

/// Elapsed time for a rebuild line.
///
/// ```
/// use std::time::Duration;
/// use plugdev_cli::ui::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::from_millis(50)), "50ms");
/// assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_elapsed(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_elapsed(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else if total_ms < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// What the startup banner shows.
#[derive(Debug, Clone)]
pub struct DevBanner {
    pub origin: String,
    pub mode: DevMode,
    pub quiet_window: Duration,
    pub entries: usize,
    pub log_file: Option<String>,
    pub interactive: bool,
}

impl DevBanner {
    pub fn mode_line(&self) -> String {
        match self.mode {
            DevMode::Instant => "instant (rebuild on every change)".to_string(),
            DevMode::Lazy => format!(
                "lazy (rebuild after {} without changes)",
                format_duration(self.quiet_window)
            ),
        }
    }
}

pub fn print_dev_banner(banner: &DevBanner) {
    eprintln!();
    eprintln!("  {} {}", "plugdev".bold().cyan(), "dev server ready".bold());
    eprintln!();
    eprintln!("  {} {}", "▸ Static:".dimmed(), format!("{}/__static/js", banner.origin).bright_white());
    eprintln!("  {} {}", "▸ Live:  ".dimmed(), format!("{}/__live", banner.origin).bright_white());
    eprintln!("  {} {}", "▸ Mode:  ".dimmed(), banner.mode_line());
    eprintln!("  {} {}", "▸ Entries:".dimmed(), banner.entries);
    if let Some(log) = &banner.log_file {
        eprintln!("  {} {}", "▸ Log:   ".dimmed(), log);
    }
    if banner.interactive {
        eprintln!();
        eprintln!(
            "  {} {} to rebuild, {} to quit",
            "press".dimmed(),
            "r".bold(),
            "q".bold()
        );
    }
    eprintln!();
}

/// Print one line per error and warning, then a summary line.
pub fn print_validation_report(manifest: &str, report: &ValidationReport) {
    for error in &report.errors {
        eprintln!("  {} {}", "✗".red().bold(), error);
    }
    for warning in &report.warnings {
        eprintln!("  {} {}", "⚠".yellow().bold(), warning);
    }
    let summary = format!(
        "{}: {} error(s), {} warning(s)",
        manifest,
        report.errors.len(),
        report.warnings.len()
    );
    if report.is_valid() {
        eprintln!("{} {}", "✓".green().bold(), summary);
    } else {
        eprintln!("{} {}", "✗".red().bold(), summary.red());
    }
}
