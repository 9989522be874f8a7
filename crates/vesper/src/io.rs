//! Print output abstraction.
//!
//! `print`/`println` and friends write through a [`PrintWriter`] supplied by
//! the embedder, so hosts can capture, discard, or forward output.

use std::fmt::Write as _;

/// Destination for `print`-family builtins.
pub trait PrintWriter {
    /// Writes a chunk of output (no newline added).
    fn write(&mut self, text: &str);

    /// Writes a newline.
    fn newline(&mut self) {
        self.write("\n");
    }
}

/// Writes to the process stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, text: &str) {
        print!("{text}");
    }
}

/// Discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _text: &str) {}
}

/// Collects output into a string, for tests and captured embedding.
#[derive(Debug, Default, Clone)]
pub struct CollectStringPrint {
    output: String,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written so far.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Returns the collected output, resetting the buffer.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, text: &str) {
        let _ = self.output.write_str(text);
    }
}
