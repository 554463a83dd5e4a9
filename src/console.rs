//! Terminal progress display
//!
//! Opt-in visual feedback for interactive runs (`--show-progress`).
//! Disabled bars are no-ops, so the training loop drives one
//! unconditionally.

use std::io::{self, Write};

/// A simple sample-count progress bar for terminal output.
#[derive(Debug)]
pub struct ProgressBar {
    total: u64,
    current: u64,
    width: usize,
    message: String,
    enabled: bool,
}

impl ProgressBar {
    /// Create a new progress bar with the given total.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            current: 0,
            width: 40,
            message: String::new(),
            enabled: true,
        }
    }

    /// Set whether the progress bar is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the display width.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Set the message to display after the bar.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.render();
    }

    /// Set the current progress.
    pub fn set(&mut self, current: u64) {
        self.current = current.min(self.total);
        self.render();
    }

    /// Increment progress by the given amount.
    pub fn inc(&mut self, amount: u64) {
        self.set(self.current + amount);
    }

    /// Get the current progress percentage.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.current as f64 / self.total as f64) * 100.0
    }

    /// Finish the progress bar.
    pub fn finish(&mut self) {
        self.current = self.total;
        self.render();
        if self.enabled {
            println!();
        }
    }

    fn render(&self) {
        if !self.enabled {
            return;
        }

        let percentage = self.percentage();
        let filled = (percentage / 100.0 * self.width as f64) as usize;
        let empty = self.width - filled;

        print!(
            "\r[{}{}] {:>5.1}% {}",
            "█".repeat(filled),
            "░".repeat(empty),
            percentage,
            self.message
        );
        let _ = io::stdout().flush();
    }
}
