use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives incremental progress from a batch run
///
/// `advance` is called once per delivered result, from the thread consuming
/// the results, so implementations see a monotonically increasing count.
pub trait ProgressObserver: Send + Sync {
    fn start(&self, description: &str, total: Option<usize>);
    fn advance(&self, completed: usize, total: Option<usize>);
    fn finish(&self);
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressObserver for SilentProgress {
    fn start(&self, _description: &str, _total: Option<usize>) {}
    fn advance(&self, _completed: usize, _total: Option<usize>) {}
    fn finish(&self) {}
}

/// Terminal progress bar backed by indicatif
///
/// A new bar is created on every `start`, so one reporter can be reused
/// across the parallel attempt and a sequential fallback.
pub struct BarProgress {
    icon: &'static str,
    bar: Mutex<Option<ProgressBar>>,
    hidden: bool,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            icon: "⏳",
            bar: Mutex::new(None),
            hidden: false,
        }
    }

    /// Bar that keeps its state but never draws, for quiet mode
    pub fn hidden() -> Self {
        Self {
            hidden: true,
            ..Self::new()
        }
    }

    pub fn with_icon(mut self, icon: &'static str) -> Self {
        self.icon = icon;
        self
    }

    fn style(&self, known_total: bool) -> ProgressStyle {
        let template = if known_total {
            format!("{} {{msg}} [{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos:>5}}/{{len:5}} ({{percent}}%)", self.icon)
        } else {
            format!("{} {{msg}} [{{elapsed_precise}}] {{spinner}} {{pos}} items", self.icon)
        };
        ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn start(&self, description: &str, total: Option<usize>) {
        let bar = match total {
            Some(total) => ProgressBar::new(total as u64),
            None => ProgressBar::new_spinner(),
        };
        if self.hidden {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        bar.set_style(self.style(total.is_some()));
        bar.set_message(description.to_string());

        if let Ok(mut slot) = self.bar.lock()
            && let Some(previous) = slot.replace(bar)
        {
            previous.finish_and_clear();
        }
    }

    fn advance(&self, completed: usize, _total: Option<usize>) {
        if let Ok(slot) = self.bar.lock()
            && let Some(bar) = slot.as_ref()
        {
            bar.set_position(completed as u64);
        }
    }

    fn finish(&self) {
        if let Ok(mut slot) = self.bar.lock()
            && let Some(bar) = slot.take()
        {
            bar.finish();
        }
    }
}

/// Counts observer calls
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct CountingProgress {
    starts: AtomicUsize,
    advances: AtomicUsize,
    finishes: AtomicUsize,
    last_total: Mutex<Option<usize>>,
}

#[cfg(test)]
impl CountingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::Relaxed)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::Relaxed)
    }

    pub fn last_total(&self) -> Option<usize> {
        self.last_total.lock().ok().and_then(|total| *total)
    }
}

#[cfg(test)]
impl ProgressObserver for CountingProgress {
    fn start(&self, _description: &str, total: Option<usize>) {
        self.starts.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_total.lock() {
            *last = total;
        }
    }

    fn advance(&self, _completed: usize, _total: Option<usize>) {
        self.advances.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.finishes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_progress_lifecycle() {
        let reporter = BarProgress::hidden();
        reporter.start("Processing images", Some(10));
        reporter.advance(5, Some(10));
        reporter.finish();

        // Restart after finish creates a fresh bar
        reporter.start("Fallback", None);
        reporter.advance(1, None);
        reporter.finish();
    }

    #[test]
    fn test_counting_progress() {
        let counter = CountingProgress::new();
        counter.start("test", Some(3));
        for i in 1..=3 {
            counter.advance(i, Some(3));
        }
        counter.finish();

        assert_eq!(counter.starts(), 1);
        assert_eq!(counter.advances(), 3);
        assert_eq!(counter.finishes(), 1);
        assert_eq!(counter.last_total(), Some(3));
    }
}
