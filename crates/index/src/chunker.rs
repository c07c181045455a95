//! Recursive character text splitter.
//!
//! Splits on paragraph breaks first, then line breaks, then spaces, then
//! single characters, and merges the pieces back into chunks of at most
//! `chunk_size` characters that share up to `chunk_overlap` characters with
//! their predecessor.

use std::collections::VecDeque;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self { chunk_size, chunk_overlap: chunk_overlap.min(chunk_size - 1) }
    }

    /// Split `text` into trimmed, non-empty chunks in document order.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, rest) = pick_separator(text, separators);

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).map(String::from).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();

        for piece in pieces {
            if char_len(&piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if rest.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, rest));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator));
        }
        chunks
    }

    /// Greedily join pieces up to `chunk_size`, carrying a tail of at most
    /// `chunk_overlap` characters into the next chunk.
    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();

        for piece in pieces {
            let len = char_len(piece);
            if !window.is_empty() && joined_len(&window, sep_len) + sep_len + len > self.chunk_size {
                chunks.push(join(&window, separator));
                while !window.is_empty()
                    && (joined_len(&window, sep_len) > self.chunk_overlap
                        || joined_len(&window, sep_len) + sep_len + len > self.chunk_size)
                {
                    window.pop_front();
                }
            }
            window.push_back(piece);
        }

        if !window.is_empty() {
            chunks.push(join(&window, separator));
        }
        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(800, 120)
    }
}

fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, sep) in separators.iter().copied().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn joined_len(window: &VecDeque<&str>, sep_len: usize) -> usize {
    let pieces: usize = window.iter().map(|p| char_len(p)).sum();
    pieces + sep_len * window.len().saturating_sub(1)
}

fn join(window: &VecDeque<&str>, separator: &str) -> String {
    window.iter().copied().collect::<Vec<_>>().join(separator)
}
