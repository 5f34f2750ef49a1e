//! Terminal UI utilities: status lines, a spinner and formatted summaries.
//!
//! Everything writes to stderr so stdout stays free for the build worker's
//! reply line and for piping `validate` output.
//!
//! ```no_run
//! use plugdev_cli::ui;
//!
//! ui::init_colors(false);
//! let spinner = ui::Spinner::new("Building 3 entries...");
//! spinner.finish("Initial build done");
//! ui::warning("Serving over plain HTTP");
//! ```

mod format;
mod messages;
mod spinner;

pub use format::{DevBanner, format_elapsed, print_dev_banner, print_validation_report};
pub use messages::{error, info, success, warning};
pub use spinner::Spinner;

/// Check if running in a CI environment.
pub fn is_ci() -> bool {
    ["CI", "GITHUB_ACTIONS", "GITLAB_CI", "CIRCLECI", "TRAVIS"]
        .iter()
        .any(|name| std::env::var_os(name).is_some())
}

/// Whether colored output should be used.
///
/// `NO_COLOR` disables colors and wins over `FORCE_COLOR`; otherwise colors
/// follow whether stderr is attended.
pub fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::user_attended_stderr()
}

/// Apply the color decision to `owo-colors` and `console`.
pub fn init_colors(no_color: bool) {
    let enabled = !no_color && should_use_color();
    owo_colors::set_override(enabled);
    console::set_colors_enabled_stderr(enabled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        // SAFETY: tests touching the environment are serialized.
        unsafe {
            std::env::remove_var("NO_COLOR");
            std::env::remove_var("FORCE_COLOR");
        }
    }

    #[test]
    #[serial]
    fn test_no_color_wins() {
        clear();
        unsafe {
            std::env::set_var("NO_COLOR", "1");
            std::env::set_var("FORCE_COLOR", "1");
        }
        assert!(!should_use_color());
        clear();
    }

    #[test]
    #[serial]
    fn test_force_color() {
        clear();
        unsafe { std::env::set_var("FORCE_COLOR", "1") };
        assert!(should_use_color());
        clear();
    }

    #[test]
    #[serial]
    fn test_is_ci() {
        unsafe { std::env::set_var("CI", "true") };
        assert!(is_ci());
        unsafe { std::env::remove_var("CI") };
    }
}
