//! Lazy chunk production with carry-over line reassembly.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

use linewise_core::{AnalyzeError, ChunkData, StreamConfig, TextEncoding};

/// Pull-based sequence of [`ChunkData`] for one file.
///
/// Every reader owns its own file handle and cursor. Nothing is read until
/// [`Iterator::next`] is called, and dropping the reader closes the handle.
/// The stream length is the file length observed when the reader was opened.
pub struct ChunkReader {
    path: PathBuf,
    file: Option<File>,
    encoding: TextEncoding,
    total_len: u64,
    offset: u64,
    buf: Vec<u8>,
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    bytes_scanned: u64,
    next_index: usize,
    next_line: usize,
    reads: usize,
}

impl ChunkReader {
    /// Open `path` for chunked reading.
    ///
    /// Fails before any chunk is produced if the path is missing, unreadable
    /// or not a regular file.
    pub fn open(path: impl AsRef<Path>, config: &StreamConfig) -> Result<Self, AnalyzeError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| AnalyzeError::io(path, e))?;
        if !metadata.is_file() {
            return Err(AnalyzeError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(|e| AnalyzeError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            encoding: config.encoding,
            total_len: metadata.len(),
            offset: 0,
            buf: vec![0; config.chunk_size.max(1)],
            pending: Vec::new(),
            scanned: 0,
            bytes_scanned: 0,
            next_index: 0,
            next_line: 0,
            reads: 0,
        })
    }

    /// Path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stream length in bytes.
    pub fn file_size(&self) -> u64 {
        self.total_len
    }

    /// Raw reads issued so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Bytes inspected while looking for line terminators. Each byte is
    /// inspected once, however long the line it belongs to.
    pub fn bytes_scanned(&self) -> u64 {
        self.bytes_scanned
    }

    /// Lines emitted so far.
    pub fn lines_emitted(&self) -> usize {
        self.next_line
    }

    /// Whether the underlying handle has been released.
    pub fn is_finished(&self) -> bool {
        self.file.is_none()
    }

    /// Fill one window from the file, stopping at the snapshot length.
    fn read_window(&mut self) -> std::io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        let remaining = self.total_len - self.offset;
        let want = (self.buf.len() as u64).min(remaining) as usize;
        let mut filled = 0;

        while filled < want {
            match file.read(&mut self.buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(filled)
    }

    /// Split completed lines out of the pending buffer.
    fn drain_complete_lines(&mut self, lines: &mut Vec<String>) {
        let from = self.scanned;
        self.bytes_scanned += (self.pending.len() - from) as u64;

        let mut start = 0;
        for pos in memchr::memchr_iter(b'\n', &self.pending[from..]) {
            let end = from + pos;
            lines.push(self.encoding.decode(strip_cr(&self.pending[start..end])));
            start = end + 1;
        }

        self.pending.drain(..start);
        self.scanned = self.pending.len();
    }

    fn finish(&mut self) {
        self.file = None;
        self.pending = Vec::new();
        self.scanned = 0;
    }
}

impl Iterator for ChunkReader {
    type Item = Result<ChunkData, AnalyzeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.file.is_none() {
            return None;
        }
        if self.offset >= self.total_len {
            self.finish();
            return None;
        }

        let n = match self.read_window() {
            Ok(n) => n,
            Err(e) => {
                self.finish();
                return Some(Err(AnalyzeError::io(&self.path, e)));
            }
        };
        self.reads += 1;

        let byte_offset = self.offset;
        self.offset += n as u64;
        // A short read of zero bytes means the file shrank after open.
        let at_end = n == 0 || self.offset >= self.total_len;

        self.pending.extend_from_slice(&self.buf[..n]);

        let mut lines = Vec::new();
        self.drain_complete_lines(&mut lines);

        if at_end {
            if !self.pending.is_empty() {
                lines.push(self.encoding.decode(&self.pending));
            }
            self.finish();
            if n == 0 && lines.is_empty() {
                return None;
            }
        }

        let start_line = self.next_line;
        self.next_line += lines.len();

        let chunk = ChunkData {
            index: self.next_index,
            start_line,
            end_line: self.next_line,
            lines,
            byte_offset,
            size: n,
        };
        self.next_index += 1;

        Some(Ok(chunk))
    }
}

impl FusedIterator for ChunkReader {}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
