use std::{fmt::Write, io::IsTerminal};

use clap::builder::styling::{AnsiColor, Effects, Style, Styles};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Whether stdout is an interactive terminal that understands ANSI escapes.
static IS_ANSI_TERMINAL: std::sync::LazyLock<bool> = std::sync::LazyLock::new(|| {
    std::io::stdout().is_terminal() && std::env::var("TERM").map_or(false, |term| term != "dumb")
});

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Styles for the lines the `monoflat` binary prints around a run.
pub trait AnsiStyles {
    /// Styles a `===>` progress line.
    fn progress(&self) -> String;

    /// Styles a path the run reports back.
    fn path(&self) -> String;

    /// Styles a failure line.
    fn failure(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the styles used for clap's help output and the binary's own lines.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
}

fn paint(text: &str, style: &Style, enabled: bool) -> String {
    if !enabled {
        return text.to_string();
    }

    let mut painted = String::with_capacity(text.len() + 16);
    let _ = write!(painted, "{}{}{}", style, text, style.render_reset());
    painted
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl AnsiStyles for str {
    fn progress(&self) -> String {
        paint(self, styles().get_header(), *IS_ANSI_TERMINAL)
    }

    fn path(&self) -> String {
        paint(self, styles().get_literal(), *IS_ANSI_TERMINAL)
    }

    fn failure(&self) -> String {
        paint(self, styles().get_error(), *IS_ANSI_TERMINAL)
    }
}

impl AnsiStyles for String {
    fn progress(&self) -> String {
        self.as_str().progress()
    }

    fn path(&self) -> String {
        self.as_str().path()
    }

    fn failure(&self) -> String {
        self.as_str().failure()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paint_disabled_is_plain() {
        assert_eq!(
            paint("===> Finished", styles().get_header(), false),
            "===> Finished"
        );
    }

    #[test]
    fn test_paint_enabled_wraps_text() {
        let progress = paint("===> Finished", styles().get_header(), true);
        assert!(progress.contains("\x1b[1m"));
        assert!(progress.contains("\x1b[36m"));
        assert!(progress.contains("===> Finished"));
        assert!(progress.ends_with("\x1b[0m"));

        let failure = paint("merge", styles().get_error(), true);
        assert!(failure.contains("\x1b[31m"));
    }
}
