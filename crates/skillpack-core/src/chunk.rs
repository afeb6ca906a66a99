//! Streaming, overlapping text chunker.
//!
//! Splits document text into bounded [`Chunk`]s that overlap by a fixed
//! number of characters. Chunks are produced lazily, one window at a time,
//! so a multi-gigabyte document never has more than one window of text
//! (plus one read buffer) in memory.
//!
//! # Algorithm
//!
//! 1. Convert `chunk_size`, `overlap`, `lookback` and `threshold` to
//!    characters (tokens use a 4 chars/token ratio).
//! 2. Take a window of `chunk_size` characters starting at the cursor, or
//!    everything that is left if that is shorter (the final chunk).
//! 3. With a boundary mode configured, move the window end back to the
//!    nearest safe boundary within `lookback` characters. If there is none,
//!    hard-cut and flag the chunk `unsafe_cut`.
//! 4. Advance the cursor to `end - overlap` and repeat.
//!
//! # Guarantees
//!
//! - At least one chunk is produced (empty text yields one empty chunk).
//! - Indices are contiguous: `0, 1, 2, …, N-1`, in source order.
//! - Every chunk after the first starts with exactly `overlap` characters
//!   repeated from the end of its predecessor.
//! - [`reassemble`] of the chunks is the original text, byte for byte.
//!
//! # Example
//!
//! ```rust
//! use skillpack_core::chunk::{reassemble, ChunkConfig, StreamingChunker};
//!
//! let chunker = StreamingChunker::new(ChunkConfig {
//!     chunk_size: 10,
//!     overlap: 3,
//!     ..ChunkConfig::default()
//! })
//! .unwrap();
//! let text = "The quick brown fox jumps over the lazy dog.";
//! let chunks: Vec<_> = chunker.chunk_text("fox.md", text).collect();
//! assert_eq!(chunks[0].text, "The quick ");
//! assert_eq!(chunks[1].text, "ck brown f");
//! assert_eq!(reassemble(&chunks), text);
//! ```

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Chunk, Document, DocumentContent};

/// Approximate characters-per-token ratio used when sizes are given in tokens.
pub const CHARS_PER_TOKEN: usize = 4;

/// Unit in which chunk sizes are expressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Chars,
    Tokens,
}

/// Where a window may end.
///
/// A *paragraph boundary* is the position right after a line that is empty
/// or holds only whitespace. In `Markdown` mode paragraph boundaries inside a
/// fenced code block (```` ``` ```` or `~~~`) are not safe, and the end of a
/// closing fence line is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Opaque character stream; windows are always exactly `chunk_size`.
    #[default]
    None,
    Paragraph,
    Markdown,
}

/// User-facing chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum length of a chunk body.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Trailing characters of chunk N repeated at the start of chunk N+1.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub unit: ChunkUnit,
    #[serde(default)]
    pub boundary: BoundaryMode,
    /// Furthest a boundary search may look back from the hard cut.
    /// Defaults to a quarter of `chunk_size`.
    #[serde(default)]
    pub lookback: Option<usize>,
    /// Documents up to this length are packaged whole. Defaults to `chunk_size`.
    #[serde(default)]
    pub threshold: Option<usize>,
}

fn default_chunk_size() -> usize {
    4000
}
fn default_overlap() -> usize {
    200
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            unit: ChunkUnit::Chars,
            boundary: BoundaryMode::None,
            lookback: None,
            threshold: None,
        }
    }
}

/// Validated chunker with all sizes resolved to characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingChunker {
    size: usize,
    overlap: usize,
    lookback: usize,
    threshold: usize,
    boundary: BoundaryMode,
}

impl StreamingChunker {
    /// Validate `config`. Fails with [`Error::Config`] unless
    /// `0 <= overlap < chunk_size` and `lookback <= chunk_size`.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0".to_string()));
        }
        if config.overlap >= config.chunk_size {
            return Err(Error::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                config.overlap, config.chunk_size
            )));
        }
        let lookback = config.lookback.unwrap_or(config.chunk_size / 4);
        if lookback > config.chunk_size {
            return Err(Error::Config(format!(
                "lookback ({}) must not exceed chunk_size ({})",
                lookback, config.chunk_size
            )));
        }
        let threshold = config.threshold.unwrap_or(config.chunk_size);

        let scale = match config.unit {
            ChunkUnit::Chars => 1,
            ChunkUnit::Tokens => CHARS_PER_TOKEN,
        };
        let chars = |n: usize| {
            n.checked_mul(scale)
                .ok_or_else(|| Error::Config(format!("chunk size {} is too large", n)))
        };

        Ok(Self {
            size: chars(config.chunk_size)?,
            overlap: chars(config.overlap)?,
            lookback: chars(lookback)?,
            threshold: chars(threshold)?,
            boundary: config.boundary,
        })
    }

    /// Window length in characters.
    pub fn chunk_size(&self) -> usize {
        self.size
    }

    /// Overlap in characters.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Whether a document of `char_len` characters should be chunked rather
    /// than packaged whole.
    pub fn should_chunk(&self, char_len: usize) -> bool {
        char_len > self.threshold
    }

    /// [`should_chunk`](Self::should_chunk) for a document, reading at most
    /// `threshold + 1` characters of it.
    pub fn should_chunk_document(&self, document: &Document) -> Result<bool> {
        Ok(self.should_chunk(document.char_len_up_to(self.threshold)?))
    }

    /// Lazily chunk in-memory text.
    pub fn chunk_text<'a>(&self, source_path: &str, text: &'a str) -> TextChunks<'a> {
        TextChunks {
            chunker: *self,
            source_path: source_path.to_string(),
            text,
            byte_pos: 0,
            cursor: Cursor::default(),
        }
    }

    /// Lazily chunk a UTF-8 byte stream, holding at most one window of text.
    pub fn chunk_reader<R: BufRead>(&self, source_path: &str, reader: R) -> ReaderChunks<R> {
        ReaderChunks {
            chunker: *self,
            source_path: source_path.to_string(),
            reader,
            buf: String::new(),
            buf_chars: 0,
            carry: Vec::new(),
            eof: false,
            cursor: Cursor::default(),
        }
    }

    /// Lazily chunk a document, streaming file-backed content.
    ///
    /// Calling this again on the same document restarts from the beginning
    /// and yields an identical sequence.
    pub fn chunk<'a>(&self, document: &'a Document) -> Result<DocumentChunks<'a>> {
        match &document.content {
            DocumentContent::Text(text) => {
                Ok(DocumentChunks::Text(self.chunk_text(&document.path, text)))
            }
            DocumentContent::File(_) => {
                let reader = document.reader()?;
                Ok(DocumentChunks::Reader(
                    self.chunk_reader(&document.path, reader),
                ))
            }
        }
    }

    /// Decide the next window over `pending`, which starts at the cursor.
    ///
    /// `pending` must either hold more than `size` characters or be the
    /// whole remainder of the text (`eof`).
    fn plan(&self, pending: &str, eof: bool, scanner: &LineScanner) -> Window {
        let hard_end = match pending.char_indices().nth(self.size) {
            Some((i, _)) => i,
            None => {
                debug_assert!(eof, "window planned before buffer was filled");
                return Window {
                    len_bytes: pending.len(),
                    len_chars: pending.chars().count(),
                    advance_bytes: pending.len(),
                    last: true,
                    unsafe_cut: false,
                };
            }
        };

        let (cut_bytes, cut_chars, unsafe_cut) = match self.boundary {
            BoundaryMode::None => (hard_end, self.size, false),
            mode => match self.find_boundary(&pending[..hard_end], mode, scanner) {
                Some((bytes, chars)) => (bytes, chars, false),
                None => (hard_end, self.size, true),
            },
        };

        let advance_bytes = byte_offset(&pending[..cut_bytes], cut_chars - self.overlap);
        Window {
            len_bytes: cut_bytes,
            len_chars: cut_chars,
            advance_bytes,
            last: false,
            unsafe_cut,
        }
    }

    /// Latest safe boundary in `window` that still advances past the
    /// overlap and lies within the look-back range.
    fn find_boundary(
        &self,
        window: &str,
        mode: BoundaryMode,
        scanner: &LineScanner,
    ) -> Option<(usize, usize)> {
        let earliest = self
            .size
            .saturating_sub(self.lookback)
            .max(self.overlap + 1);
        let mut scan = scanner.clone();
        let mut best = None;
        for (n, (i, c)) in window.char_indices().enumerate() {
            if scan.step(c, mode) && n + 1 >= earliest {
                best = Some((i + c.len_utf8(), n + 1));
            }
        }
        best
    }
}

/// Byte index just past the first `chars` characters of `s`.
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

/// One planned window, relative to the cursor.
#[derive(Debug)]
struct Window {
    len_bytes: usize,
    len_chars: usize,
    advance_bytes: usize,
    last: bool,
    unsafe_cut: bool,
}

/// Position state shared by both iterator flavours.
#[derive(Debug, Clone, Default)]
struct Cursor {
    char_pos: usize,
    index: usize,
    scanner: LineScanner,
    done: bool,
}

impl Cursor {
    /// Emit the chunk for `window` over `pending` and move past it.
    fn take(
        &mut self,
        chunker: &StreamingChunker,
        source_path: &str,
        pending: &str,
        window: &Window,
    ) -> Chunk {
        let chunk = Chunk {
            source_path: source_path.to_string(),
            index: self.index,
            text: pending[..window.len_bytes].to_string(),
            start_offset: self.char_pos,
            end_offset: self.char_pos + window.len_chars,
            overlap_with_previous: if self.index == 0 { 0 } else { chunker.overlap },
            unsafe_cut: window.unsafe_cut,
        };

        if window.last {
            self.done = true;
        } else {
            let advanced = &pending[..window.advance_bytes];
            if chunker.boundary != BoundaryMode::None {
                for c in advanced.chars() {
                    self.scanner.step(c, chunker.boundary);
                }
            }
            self.char_pos += window.len_chars - chunker.overlap;
            self.index += 1;
        }
        chunk
    }
}

/// Tracks line structure across the stream so boundary decisions do not
/// depend on where a window happens to start.
#[derive(Debug, Clone)]
struct LineScanner {
    in_fence: bool,
    fence_char: char,
    /// Current line holds only spaces and tabs so far.
    blank: bool,
    indent: usize,
    /// First (up to three) non-indent characters of the current line.
    head: String,
}

impl Default for LineScanner {
    fn default() -> Self {
        Self {
            in_fence: false,
            fence_char: '`',
            blank: true,
            indent: 0,
            head: String::new(),
        }
    }
}

impl LineScanner {
    /// Consume `c`; returns true when the position right after it is a safe
    /// boundary under `mode`.
    fn step(&mut self, c: char, mode: BoundaryMode) -> bool {
        if c != '\n' {
            if self.blank && matches!(c, ' ' | '\t' | '\r') {
                self.indent += 1;
            } else {
                self.blank = false;
                if self.head.chars().count() < 3 {
                    self.head.push(c);
                }
            }
            return false;
        }

        let fence = self.fence_marker();
        let safe = match (mode, fence) {
            (BoundaryMode::None, _) => false,
            (BoundaryMode::Paragraph, _) => self.blank,
            (BoundaryMode::Markdown, Some(marker)) => {
                if self.in_fence && marker == self.fence_char {
                    self.in_fence = false;
                    true
                } else {
                    if !self.in_fence {
                        self.in_fence = true;
                        self.fence_char = marker;
                    }
                    false
                }
            }
            (BoundaryMode::Markdown, None) => self.blank && !self.in_fence,
        };

        self.blank = true;
        self.indent = 0;
        self.head.clear();
        safe
    }

    fn fence_marker(&self) -> Option<char> {
        if self.indent > 3 {
            return None;
        }
        match self.head.as_str() {
            "```" => Some('`'),
            "~~~" => Some('~'),
            _ => None,
        }
    }
}

/// Lazy chunk sequence over borrowed text. See [`StreamingChunker::chunk_text`].
#[derive(Debug, Clone)]
pub struct TextChunks<'a> {
    chunker: StreamingChunker,
    source_path: String,
    text: &'a str,
    byte_pos: usize,
    cursor: Cursor,
}

impl Iterator for TextChunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.cursor.done {
            return None;
        }
        let pending = &self.text[self.byte_pos..];
        let window = self.chunker.plan(pending, true, &self.cursor.scanner);
        let chunk = self
            .cursor
            .take(&self.chunker, &self.source_path, pending, &window);
        self.byte_pos += window.advance_bytes;
        Some(chunk)
    }
}

/// Lazy chunk sequence over a byte stream. See [`StreamingChunker::chunk_reader`].
///
/// Yields an [`Error::Io`] (and then stops) if the stream fails or is not
/// valid UTF-8.
#[derive(Debug)]
pub struct ReaderChunks<R> {
    chunker: StreamingChunker,
    source_path: String,
    reader: R,
    /// Text from the cursor onwards.
    buf: String,
    buf_chars: usize,
    /// Bytes of an incomplete UTF-8 sequence awaiting the next read.
    carry: Vec<u8>,
    eof: bool,
    cursor: Cursor,
}

impl<R: BufRead> ReaderChunks<R> {
    /// Read until the buffer holds more than one window or the stream ends.
    fn fill(&mut self) -> std::io::Result<()> {
        while !self.eof && self.buf_chars <= self.chunker.size {
            let data = self.reader.fill_buf()?;
            if data.is_empty() {
                self.eof = true;
                if !self.carry.is_empty() {
                    return Err(invalid_utf8("stream ends inside a UTF-8 sequence"));
                }
                break;
            }
            let n = data.len();
            self.carry.extend_from_slice(data);
            self.reader.consume(n);

            let valid = match std::str::from_utf8(&self.carry) {
                Ok(_) => self.carry.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            };
            let decoded = std::str::from_utf8(&self.carry[..valid])
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            self.buf_chars += decoded.chars().count();
            self.buf.push_str(decoded);
            self.carry.drain(..valid);
        }
        Ok(())
    }
}

fn invalid_utf8(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

impl<R: BufRead> Iterator for ReaderChunks<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Result<Chunk>> {
        if self.cursor.done {
            return None;
        }
        if let Err(e) = self.fill() {
            self.cursor.done = true;
            return Some(Err(Error::io(&self.source_path, e)));
        }

        let window = self.chunker.plan(&self.buf, self.eof, &self.cursor.scanner);
        let chunk = self
            .cursor
            .take(&self.chunker, &self.source_path, &self.buf, &window);
        if !window.last {
            let advanced_chars = window.len_chars - self.chunker.overlap;
            self.buf.drain(..window.advance_bytes);
            self.buf_chars -= advanced_chars;
        }
        Some(Ok(chunk))
    }
}

/// Chunks of a [`Document`], whichever way its content is stored.
pub enum DocumentChunks<'a> {
    Text(TextChunks<'a>),
    Reader(ReaderChunks<Box<dyn BufRead + 'a>>),
}

impl Iterator for DocumentChunks<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Result<Chunk>> {
        match self {
            DocumentChunks::Text(chunks) => chunks.next().map(Ok),
            DocumentChunks::Reader(chunks) => chunks.next(),
        }
    }
}

/// Rebuild the original text from its chunks, dropping each chunk's leading
/// overlap.
pub fn reassemble<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let mut text = String::new();
    for chunk in chunks {
        let skip = byte_offset(&chunk.text, chunk.overlap_with_previous);
        text.push_str(&chunk.text[skip..]);
    }
    text
}
