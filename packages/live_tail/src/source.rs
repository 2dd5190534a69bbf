use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::backlog::decode_line;

pub(crate) type StreamReader = BufReader<Box<dyn Read + Send>>;

/// What a [`Tail`](crate::Tail) follows.
pub enum TailSource {
    /// A file on disk. Reopened on every start, with backlog replay and
    /// rotation detection.
    File(PathBuf),
    /// Any other reader. Read as-is: no backlog, no reattachment.
    Stream(Box<dyn Read + Send>),
}

impl TailSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Stream(_) => "<stream>".to_string(),
        }
    }

    /// Default follow thread name for this source.
    pub(crate) fn thread_name(&self) -> String {
        match self {
            Self::File(path) => match path.file_name() {
                Some(name) => format!("tail-{}", name.to_string_lossy()),
                None => "tail-file".to_string(),
            },
            Self::Stream(_) => "tail-stream".to_string(),
        }
    }
}

impl fmt::Debug for TailSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<PathBuf> for TailSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for TailSource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

/// The tail's hold on its source between runs.
pub(crate) enum SourceSlot {
    File(PathBuf),
    /// `None` while a follow thread owns the stream.
    Stream(Option<StreamReader>),
}

impl From<TailSource> for SourceSlot {
    fn from(source: TailSource) -> Self {
        match source {
            TailSource::File(path) => Self::File(path),
            TailSource::Stream(reader) => Self::Stream(Some(BufReader::new(reader))),
        }
    }
}

/// An opened source handed to the follow thread.
pub(crate) enum Input {
    File { path: PathBuf, file: File },
    Stream(StreamReader),
}

impl Input {
    /// Open `path` for following. Only regular files can be tailed.
    pub(crate) fn open_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if !file.metadata()?.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        Ok(Self::File {
            path: path.to_path_buf(),
            file,
        })
    }
}

/// Outcome of one read attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Poll {
    Line(String),
    /// Bytes arrived but the line is not finished yet.
    Partial,
    /// Nothing new.
    Idle,
}

/// Line reader that never hands out half a line. Bytes read before the
/// terminating newline shows up are kept until it does.
pub(crate) struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
    /// Bytes consumed from the underlying source, including `pending`.
    offset: u64,
}

impl<R: BufRead> LineReader<R> {
    pub(crate) fn new(inner: R, offset: u64) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            offset,
        }
    }

    pub(crate) fn poll_line(&mut self) -> io::Result<Poll> {
        let read = self.inner.read_until(b'\n', &mut self.pending)?;
        if read == 0 {
            return Ok(Poll::Idle);
        }
        self.offset += read as u64;
        if self.pending.last() != Some(&b'\n') {
            return Ok(Poll::Partial);
        }
        self.pending.pop();
        Ok(Poll::Line(decode_line(std::mem::take(&mut self.pending))))
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}
