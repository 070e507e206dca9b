//! Terminal styling shared by commands
//!
//! Output goes through `anstream`, which strips the escape codes when stdout
//! is not a terminal.

use owo_colors::{OwoColorize, Style, Styled};
use std::fmt::Display;

/// Success marker
pub const CHECK: &str = "✓";

/// Failure marker
pub const CROSS: &str = "✗";

/// Semantic styles for CLI output
pub trait Stylize: OwoColorize + Sized {
    /// Secondary information
    fn muted(&self) -> Styled<&Self> {
        self.style(Style::new().dimmed())
    }

    /// Identifiers such as commit ids and request numbers
    fn accent(&self) -> Styled<&Self> {
        self.style(Style::new().cyan())
    }

    /// Branch names and other values the user typed
    fn emphasis(&self) -> Styled<&Self> {
        self.style(Style::new().bold())
    }

    /// Successful outcomes
    fn success(&self) -> Styled<&Self> {
        self.style(Style::new().green())
    }

    /// Conflicts and blocked operations
    fn warn(&self) -> Styled<&Self> {
        self.style(Style::new().yellow())
    }
}

impl<T: Display> Stylize for T {}

/// Green check mark
pub fn check() -> String {
    CHECK.green().to_string()
}

/// Red cross
pub fn cross() -> String {
    CROSS.red().to_string()
}

/// Dimmed arrow for sub-steps
pub fn arrow() -> String {
    "→".dimmed().to_string()
}
