//! Fixed-size, overlapping character windows over cleaned page text.

use std::ops::Range;
use thiserror::Error;

/// Window geometry for [`ChunkWindows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    window: usize,
    overlap: usize,
}

/// Rejected window geometries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChunkConfigError {
    /// A zero-character window can never advance.
    #[error("chunk window must be at least one character")]
    EmptyWindow,
    /// The window would never move forward.
    #[error("chunk overlap {overlap} must be smaller than the window {window}")]
    OverlapTooLarge {
        /// Requested window size.
        window: usize,
        /// Requested overlap.
        overlap: usize,
    },
}

impl ChunkConfig {
    /// Validates and builds a window geometry. `overlap` must be strictly less than `window`.
    pub fn new(window: usize, overlap: usize) -> Result<Self, ChunkConfigError> {
        if window == 0 {
            return Err(ChunkConfigError::EmptyWindow);
        }
        if overlap >= window {
            return Err(ChunkConfigError::OverlapTooLarge { window, overlap });
        }
        Ok(Self { window, overlap })
    }

    /// Characters per window.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Characters shared by consecutive windows.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive window starts; always at least one.
    pub fn stride(&self) -> usize {
        self.window - self.overlap
    }

    /// Lazily splits `text` into trimmed, non-empty windows.
    pub fn chunks<'a>(&self, text: &'a str) -> ChunkWindows<'a> {
        ChunkWindows::new(text, *self)
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            window: 900,
            overlap: 120,
        }
    }
}

/// Restartable iterator over the windows of one text.
///
/// Offsets are counted in characters, not bytes, so multi-byte scripts get
/// the same window length as ASCII.
#[derive(Debug, Clone)]
pub struct ChunkWindows<'a> {
    text: &'a str,
    config: ChunkConfig,
    boundaries: Vec<usize>,
    next_start: usize,
}

impl<'a> ChunkWindows<'a> {
    fn new(text: &'a str, config: ChunkConfig) -> Self {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
        boundaries.push(text.len());
        Self {
            text,
            config,
            boundaries,
            next_start: 0,
        }
    }

    /// Number of characters in the source text.
    pub fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Untrimmed character ranges of every window, in order.
    pub fn spans(&self) -> Vec<Range<usize>> {
        let len = self.char_len();
        let mut spans = Vec::new();
        let mut start = 0;
        while start < len {
            spans.push(start..(start + self.config.window).min(len));
            start += self.config.stride();
        }
        spans
    }

    /// Resets the iterator to the first window.
    pub fn restart(&mut self) {
        self.next_start = 0;
    }

    fn slice(&self, chars: Range<usize>) -> &'a str {
        &self.text[self.boundaries[chars.start]..self.boundaries[chars.end]]
    }
}

impl<'a> Iterator for ChunkWindows<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.char_len();
        while self.next_start < len {
            let start = self.next_start;
            let end = (start + self.config.window).min(len);
            self.next_start += self.config.stride();
            let window = self.slice(start..end).trim();
            if !window.is_empty() {
                return Some(window);
            }
        }
        None
    }
}
