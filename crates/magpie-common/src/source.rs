//! Source file management.
//!
//! Chunk line tables refer back to the source file a module was loaded from;
//! the interpreter uses that to print stack traces for uncaught errors.

use std::fmt;
use std::path::{Path, PathBuf};

/// A source file with its content and precomputed line starts.
#[derive(Clone)]
pub struct SourceFile {
    path: PathBuf,
    source: String,
    /// Byte offsets of line starts. The first element is always 0.
    line_starts: Vec<u32>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        let source = source.into();
        let line_starts = compute_line_starts(&source);
        Self {
            path: path.into(),
            source,
            line_starts,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn num_lines(&self) -> usize {
        self.line_starts.len()
    }

    /// Returns the text of a 1-indexed line, without its terminator.
    pub fn line(&self, line: u32) -> Option<&str> {
        let index = line.checked_sub(1)? as usize;
        let start = *self.line_starts.get(index)? as usize;
        let end = self
            .line_starts
            .get(index + 1)
            .map(|&offset| offset as usize)
            .unwrap_or(self.source.len());
        Some(self.source[start..end].trim_end_matches(['\n', '\r']))
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("path", &self.path)
            .field("lines", &self.line_starts.len())
            .finish()
    }
}

fn compute_line_starts(source: &str) -> Vec<u32> {
    let mut starts = vec![0];
    for (offset, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            starts.push(offset as u32 + 1);
        }
    }
    starts
}
