//! Text formatting helpers for the IR printer.

use std::fmt;

const INDENT: &str = "  ";

/// Line-oriented text builder that indents nested blocks.
#[derive(Debug, Default)]
pub struct CodeFormatter {
    output: String,
    depth: usize,
}

impl CodeFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line at the current depth.
    pub fn writeln(&mut self, line: &str) {
        for _ in 0..self.depth {
            self.output.push_str(INDENT);
        }
        self.output.push_str(line);
        self.output.push('\n');
    }

    /// `header {`, the lines written by `f` one level deeper, then `}`.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, f: F) {
        self.writeln(&format!("{} {{", header));
        self.depth += 1;
        f(self);
        self.depth -= 1;
        self.writeln("}");
    }

    pub fn finish(self) -> String {
        self.output
    }
}

/// Format a list with separators.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Format a list with separators using a custom formatter.
pub fn format_list_with<T, F: Fn(&T) -> String>(items: &[T], sep: &str, f: F) -> String {
    items
        .iter()
        .map(f)
        .collect::<Vec<_>>()
        .join(sep)
}
