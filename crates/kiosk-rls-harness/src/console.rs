//! Operator-facing output
//!
//! Check lines, section headers, and the summary are the harness's product, so
//! they go through [`Console`] rather than `tracing`: stdout in the binary,
//! a capture buffer in tests.

use std::sync::Mutex;

/// Sink for operator-facing lines
pub trait Console: Send + Sync {
    /// Print a section header
    fn section(&self, title: &str);

    /// Print one line
    fn line(&self, text: &str);
}

/// Writes to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn section(&self, title: &str) {
        println!();
        println!("== {} ==", title);
    }

    fn line(&self, text: &str) {
        println!("{}", text);
    }
}

/// Captured output from a run
#[derive(Debug, Default)]
pub struct CapturedConsole {
    lines: Mutex<Vec<String>>,
}

impl CapturedConsole {
    /// Create an empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Every captured line, section headers included
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// All output as a single string
    pub fn text(&self) -> String {
        self.lines().join("\n")
    }

    /// Captured lines starting with `marker`
    pub fn lines_starting_with(&self, marker: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(marker))
            .collect()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

impl Console for CapturedConsole {
    fn section(&self, title: &str) {
        self.push(format!("== {} ==", title));
    }

    fn line(&self, text: &str) {
        self.push(text.to_string());
    }
}
