//! Source text and line/column positions.

use std::fmt;

/// 1-indexed line/column pair.
///
/// Columns count characters, not bytes, so that positions reported to
/// the editor line up with what the user sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Immutable source text with a line index.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    text: String,
    lines: Vec<(usize, usize)>,
}

impl SourceBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut lines = Vec::new();
        let mut start = 0;
        for chunk in text.split_inclusive('\n') {
            let body = chunk
                .strip_suffix('\n')
                .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
                .unwrap_or(chunk);
            lines.push((start, start + body.len()));
            start += chunk.len();
        }
        SourceBuffer { text, lines }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Text of a 1-indexed line without its terminator.
    pub fn line(&self, line: u32) -> Option<&str> {
        let index = (line as usize).checked_sub(1)?;
        self.lines
            .get(index)
            .map(|&(start, end)| &self.text[start..end])
    }

    /// Iterate `(line_number, text)` pairs, 1-indexed.
    pub fn lines(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.lines
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| (index as u32 + 1, &self.text[start..end]))
    }
}
