//! Styled terminal output for facebatch
//!
//! Status lines go to stdout with a symbol prefix; errors go to stderr and
//! are shown even in quiet mode.

use console::style;
use std::sync::Arc;

use crate::parallel::{BarProgress, ProgressObserver};

/// Output handler for consistent CLI formatting
pub struct Output {
    verbose: bool,
    quiet: bool,
}

impl Output {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("✔").green(), message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        // Errors are always shown, even in quiet mode
        eprintln!("{} {}", style("✖").red(), message);
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("⚠").yellow(), message);
        }
    }

    /// Print a verbose message (only if verbose mode is enabled)
    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("{} {}", style("ℹ").dim(), style(message).dim());
        }
    }

    pub fn header(&self, title: &str) {
        if !self.quiet {
            println!("\n{}", style(title).bold().underlined());
        }
    }

    /// Print a step in a process
    pub fn step(&self, step: &str) {
        if !self.quiet {
            println!("{} {}", style("❯").cyan(), step);
        }
    }

    pub fn list_item(&self, item: &str) {
        if !self.quiet {
            println!("  • {item}");
        }
    }

    pub fn table_row(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {:<20} {}", style(key).dim(), value);
        }
    }

    /// Print summary statistics with enhanced styling
    pub fn summary_stats(&self, label: &str, value: usize) {
        if !self.quiet {
            println!("  {} {}", style(label).dim(), style(value.to_string()).bold());
        }
    }

    /// Progress reporter matching the output mode
    pub fn progress(&self, icon: &'static str) -> Arc<dyn ProgressObserver> {
        if self.quiet {
            Arc::new(BarProgress::hidden())
        } else {
            Arc::new(BarProgress::new().with_icon(icon))
        }
    }
}
