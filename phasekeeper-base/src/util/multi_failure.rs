use std::fmt;
use std::panic;

/// Runs many labeled checks, letting each fail on its own, and panics when dropped if
/// any of them did, naming the labels that failed.
///
/// Useful in [`#[test]`](macro@test) functions which check one property across every
/// phase state or similar, where seeing all the failing cases at once beats stopping at
/// the first.
#[derive(Debug, Default)]
pub struct MultiFailure {
    failed: Vec<String>,
}

impl MultiFailure {
    /// Constructs a [`MultiFailure`] with no failures yet.
    #[must_use = "this is useless if never invoked to collect failures"]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `f`. If it panics, records `label` as failed and returns [`None`].
    ///
    /// The panic message has already been printed by the panic hook at that point, so
    /// only the label is kept.
    pub fn catch<O, F>(&mut self, label: impl fmt::Display, f: F) -> Option<O>
    where
        F: FnOnce() -> O + panic::UnwindSafe,
    {
        match panic::catch_unwind(f) {
            Ok(output) => Some(output),
            Err(_) => {
                self.failed.push(label.to_string());
                None
            }
        }
    }

    /// Returns the labels of the checks which failed so far.
    pub fn failed(&self) -> &[String] {
        &self.failed
    }
}

impl Drop for MultiFailure {
    fn drop(&mut self) {
        if self.failed.is_empty() || std::thread::panicking() {
            return;
        }
        let report = format!(
            "{} of the checks failed: {}",
            self.failed.len(),
            self.failed.join(", ")
        );
        // `resume_unwind()` skips the panic hook; every failure was already reported.
        eprintln!("\n{report}");
        panic::resume_unwind(Box::new(report));
    }
}
