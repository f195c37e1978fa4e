//! Command output
//!
//! Human mode prints status lines and one marked line per planned action.
//! JSON mode keeps stdout to exactly one document per command; warnings and
//! errors go to stderr as single-line JSON objects.

use std::io::{self, Write};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Leading marker of a plan line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Create,
    Update,
    Delete,
    Move,
    Conflict,
    EmptyFolder,
}

impl Mark {
    pub fn symbol(self) -> char {
        match self {
            Mark::Create => '+',
            Mark::Update => '~',
            Mark::Delete => '-',
            Mark::Move => '>',
            Mark::Conflict => '!',
            Mark::EmptyFolder => 'x',
        }
    }
}

/// `1 file`, `3 files`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

type Sink = Mutex<Box<dyn Write + Send>>;

pub struct Output {
    format: OutputFormat,
    out: Sink,
    err: Sink,
}

impl Output {
    /// Writes to the process's stdout and stderr
    pub fn stdio(format: OutputFormat) -> Self {
        Self::with_writers(format, Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn with_writers(
        format: OutputFormat,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            format,
            out: Mutex::new(out),
            err: Mutex::new(err),
        }
    }

    fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    // Broken pipes (`partsync check | head`) are not worth failing over
    fn emit(sink: &Sink, line: &str) {
        if let Ok(mut w) = sink.lock() {
            let _ = writeln!(w, "{line}");
        }
    }

    pub fn success(&self, message: &str) {
        if !self.is_json() {
            Self::emit(&self.out, &format!("\u{2713} {message}"));
        }
    }

    pub fn info(&self, message: &str) {
        if !self.is_json() {
            Self::emit(&self.out, &format!("  {message}"));
        }
    }

    pub fn warn(&self, message: &str) {
        let line = if self.is_json() {
            serde_json::json!({"level": "warning", "message": message}).to_string()
        } else {
            format!("\u{26a0} Warning: {message}")
        };
        Self::emit(&self.err, &line);
    }

    pub fn error(&self, message: &str) {
        let line = if self.is_json() {
            serde_json::json!({"success": false, "error": message}).to_string()
        } else {
            format!("\u{2717} Error: {message}")
        };
        Self::emit(&self.err, &line);
    }

    /// One planned action, e.g. `  + /A/bracket.stl`
    pub fn action(&self, mark: Mark, text: &str) {
        if !self.is_json() {
            Self::emit(&self.out, &format!("  {} {text}", mark.symbol()));
        }
    }

    /// A success line listing the non-zero counts, e.g. `2 creates, 1 delete`
    ///
    /// Prints `when_empty` if every count is zero.
    pub fn counts(&self, counts: &[(usize, &str)], when_empty: &str) {
        let parts: Vec<String> = counts
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, noun)| plural(*n, noun))
            .collect();
        if parts.is_empty() {
            self.success(when_empty);
        } else {
            self.success(&parts.join(", "));
        }
    }

    /// The command's JSON document; a no-op in human mode
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        if self.is_json() {
            let text =
                serde_json::to_string_pretty(value).context("Failed to serialize output")?;
            Self::emit(&self.out, &text);
        }
        Ok(())
    }
}
