//! Small helpers for command-line progress reporting.

/// Coarse progress printing for long loops: one `processed: x/y`
/// line per decile, written to stderr.
pub struct ProgressBar {
    processed: usize,
    total: usize,
    quantum: usize,
    enabled: bool,
}

impl ProgressBar {
    /// Creates a bar tracking `total` steps. A disabled bar counts
    /// but never prints.
    pub fn new(total: usize, enabled: bool) -> ProgressBar {
        ProgressBar {
            processed: 0,
            total,
            quantum: total / 10 + 1,
            enabled,
        }
    }

    /// Counts one processed item, printing when a new decile starts.
    pub fn increment(&mut self) {
        if self.enabled && self.processed % self.quantum == 0 {
            eprintln!("processed: {}/{}", self.processed, self.total);
        }

        self.processed += 1;
    }
}

impl Drop for ProgressBar {
    fn drop(&mut self) {
        if self.enabled && self.processed > 0 {
            eprintln!("processed: {}/{}", self.processed, self.total);
        }
    }
}
