//! Backlog replay: the last N complete lines of a file, read from the end.
//!
//! Reading walks backwards in fixed-size chunks, so the cost depends on the
//! size of the backlog and not on the size of the file.

use std::io::{self, Read, Seek, SeekFrom};

const CHUNK_SIZE: usize = 8 * 1024;

/// Yields the lines of a seekable source from last to first.
pub(crate) struct ReverseLines<R> {
    inner: R,
    /// Start of the region held in `buf`.
    pos: u64,
    buf: Vec<u8>,
    chunk_size: usize,
    done: bool,
}

impl<R: Read + Seek> ReverseLines<R> {
    /// Read backwards from byte offset `end`, `chunk_size` bytes at a time.
    pub(crate) fn with_chunk_size(inner: R, end: u64, chunk_size: usize) -> Self {
        Self {
            inner,
            pos: end,
            buf: Vec::new(),
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    /// The bytes between the previous newline and the one before it, without
    /// the terminator. The first call returns whatever follows the final
    /// newline, which is empty for a file ending in `\n`.
    pub(crate) fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if let Some(idx) = self.buf.iter().rposition(|&b| b == b'\n') {
                let line = self.buf.split_off(idx + 1);
                self.buf.truncate(idx);
                return Ok(Some(line));
            }
            if self.pos == 0 {
                self.done = true;
                return Ok(Some(std::mem::take(&mut self.buf)));
            }

            let take = self.pos.min(self.chunk_size as u64);
            self.pos -= take;
            self.inner.seek(SeekFrom::Start(self.pos))?;
            let mut chunk = vec![0u8; take as usize];
            self.inner.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&self.buf);
            self.buf = chunk;
        }
    }
}

/// Lines replayed on attach plus the offset live following resumes from.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Backlog {
    /// Oldest first.
    pub lines: Vec<String>,
    /// Just past the last complete line. A trailing line without a newline
    /// is left for the follow loop to pick up once it is finished.
    pub resume_at: u64,
}

pub(crate) fn read_backlog<R: Read + Seek>(
    inner: R,
    len: u64,
    count: usize,
) -> io::Result<Backlog> {
    read_backlog_chunked(inner, len, count, CHUNK_SIZE)
}

fn read_backlog_chunked<R: Read + Seek>(
    inner: R,
    len: u64,
    count: usize,
    chunk_size: usize,
) -> io::Result<Backlog> {
    let mut reverse = ReverseLines::with_chunk_size(inner, len, chunk_size);
    let partial = reverse.next_line()?.unwrap_or_default();
    let resume_at = len - partial.len() as u64;
    if resume_at == 0 {
        // no complete line at all
        return Ok(Backlog::default());
    }

    let mut stack = Vec::with_capacity(count);
    while stack.len() < count {
        match reverse.next_line()? {
            Some(line) => stack.push(line),
            None => break,
        }
    }

    let mut lines = Vec::with_capacity(stack.len());
    while let Some(line) = stack.pop() {
        lines.push(decode_line(line));
    }
    Ok(Backlog { lines, resume_at })
}

/// Bytes of one line, without `\n`, to text. A trailing `\r` is dropped and
/// invalid UTF-8 is replaced.
pub(crate) fn decode_line(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    match String::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
