//! Progress bars for the training and evaluation passes

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.cyan} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})";

/// Progress bar over a known number of batches
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter with a known total
    pub fn new_with_total(message: &str, total: u64) -> Self {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("█▇▆▅▄▃▂▁  "));
        }
        bar.set_message(message.to_string());
        Self { bar }
    }

    /// Reporter that draws nothing
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Advance progress by 1 and optionally update message
    pub fn advance(&self, message: &str) {
        if !message.is_empty() {
            self.bar.set_message(message.to_string());
        }
        self.bar.inc(1);
    }

    /// Current position
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Finish the progress bar and clear it
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_counts_batches() {
        let progress = ProgressReporter::hidden();
        progress.advance("");
        progress.advance("loss: 0.1000");
        assert_eq!(progress.position(), 2);
        progress.finish_and_clear();
    }
}
