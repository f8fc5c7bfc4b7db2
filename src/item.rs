use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, BufRead, BufReader};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::error::Result;
use crate::subprocess::{Producer, SpliceSource};

/// A single value flowing through a dataflow.
///
/// Items are either byte/text chunks or plain scalar values.  Text items
/// may or may not carry a trailing newline; the runtime normalises only
/// when an item crosses into a byte-oriented boundary, such as a pipe
/// feeding a child process or a line-oriented sink.  At that point text
/// passes through unchanged and any other value is rendered as
/// `"{value}\n"`.
#[derive(Debug, Clone)]
pub enum Item {
    /// A text chunk, typically one line.
    Text(String),
    /// A raw byte chunk, produced when `universal_newlines` is off.
    Bytes(Vec<u8>),
    /// An integer value.
    Int(i64),
    /// A floating-point value.
    Float(f64),
}

impl Item {
    /// Serialise for a byte-oriented boundary: text and bytes pass
    /// through unchanged, other values render as `"{value}\n"`.
    pub fn into_chunk(self) -> Vec<u8> {
        match self {
            Item::Text(s) => s.into_bytes(),
            Item::Bytes(b) => b,
            other => format!("{}\n", other).into_bytes(),
        }
    }

    /// The text content, if this is a text item.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Item::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Text(s) => f.write_str(s),
            Item::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Item::Int(i) => write!(f, "{}", i),
            Item::Float(v) => write!(f, "{}", v),
        }
    }
}

// Floats are compared and hashed bitwise so that items can live in sets.

impl PartialEq for Item {
    fn eq(&self, other: &Item) -> bool {
        match (self, other) {
            (Item::Text(a), Item::Text(b)) => a == b,
            (Item::Bytes(a), Item::Bytes(b)) => a == b,
            (Item::Int(a), Item::Int(b)) => a == b,
            (Item::Float(a), Item::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Item {}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Item::Text(s) => {
                state.write_u8(0);
                s.hash(state);
            }
            Item::Bytes(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Item::Int(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            Item::Float(v) => {
                state.write_u8(3);
                v.to_bits().hash(state);
            }
        }
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Item) -> Ordering {
        fn rank(item: &Item) -> u8 {
            match item {
                Item::Text(_) => 0,
                Item::Bytes(_) => 1,
                Item::Int(_) => 2,
                Item::Float(_) => 3,
            }
        }
        match (self, other) {
            (Item::Text(a), Item::Text(b)) => a.cmp(b),
            (Item::Bytes(a), Item::Bytes(b)) => a.cmp(b),
            (Item::Int(a), Item::Int(b)) => a.cmp(b),
            (Item::Float(a), Item::Float(b)) => a.total_cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Item) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Item {
        Item::Text(s.to_owned())
    }
}

impl From<String> for Item {
    fn from(s: String) -> Item {
        Item::Text(s)
    }
}

impl From<Vec<u8>> for Item {
    fn from(b: Vec<u8>) -> Item {
        Item::Bytes(b)
    }
}

impl From<i32> for Item {
    fn from(i: i32) -> Item {
        Item::Int(i as i64)
    }
}

impl From<i64> for Item {
    fn from(i: i64) -> Item {
        Item::Int(i)
    }
}

impl From<f64> for Item {
    fn from(v: f64) -> Item {
        Item::Float(v)
    }
}

/// Render as text and add a trailing newline if one is missing.
pub fn nl(item: Item) -> Item {
    match item {
        Item::Text(s) if s.ends_with('\n') => Item::Text(s),
        other => Item::Text(format!("{}\n", other)),
    }
}

/// Render as text and remove any trailing newlines.
pub fn stripnl(item: Item) -> Item {
    let s = item.to_string();
    Item::Text(s.trim_end_matches('\n').to_owned())
}

/// Read one line-shaped item from a buffered reader.
///
/// In text mode the line keeps its trailing `\n` but `\r\n` is
/// normalised; in byte mode the raw bytes are returned as-is.
pub(crate) fn read_line_item<R: BufRead>(reader: &mut R, text: bool) -> io::Result<Option<Item>> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if text {
        let mut s = String::from_utf8_lossy(&buf).into_owned();
        if s.ends_with("\r\n") {
            s.truncate(s.len() - 2);
            s.push('\n');
        }
        Ok(Some(Item::Text(s)))
    } else {
        Ok(Some(Item::Bytes(buf)))
    }
}

pub(crate) struct FileLines {
    reader: BufReader<File>,
    text: bool,
}

impl FileLines {
    fn next_line(&mut self) -> Option<Result<Item>> {
        match read_line_item(&mut self.reader, self.text) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(err) => Some(Err(err.into())),
        }
    }
}

/// A finite, single-pass, lazy sequence of [`Item`]s.
///
/// An `ItemStream` is what a realised pipeline stage produces and what
/// the next stage consumes.  It is an ordinary iterator over
/// `Result<Item>`; iteration errors from a child process or a file
/// surface in-band.  A stream is not restartable - re-realising the
/// pipeline produces a fresh one.
///
/// Streams backed by a child's stdout or by an open file additionally
/// expose a readable OS descriptor (see [`ItemStream::fd`]).  The
/// subprocess layer uses that descriptor to splice two process stages
/// together without moving the data through this process.
pub struct ItemStream {
    inner: StreamInner,
}

enum StreamInner {
    Iter(Box<dyn Iterator<Item = Result<Item>> + Send>),
    Producer(Producer),
    File(FileLines),
}

impl ItemStream {
    /// A stream with no items.
    pub fn empty() -> ItemStream {
        ItemStream::from_results(Box::new(std::iter::empty()))
    }

    /// A stream over the given items.
    pub fn from_values(values: Vec<Item>) -> ItemStream {
        ItemStream::from_results(Box::new(values.into_iter().map(Ok)))
    }

    /// A stream over a boxed fallible iterator.
    pub fn from_results(iter: Box<dyn Iterator<Item = Result<Item>> + Send>) -> ItemStream {
        ItemStream {
            inner: StreamInner::Iter(iter),
        }
    }

    /// The lines of a started [`Producer`]'s standard output.
    pub fn from_producer(producer: Producer) -> ItemStream {
        ItemStream {
            inner: StreamInner::Producer(producer),
        }
    }

    /// The lines of an open file.
    pub(crate) fn from_file(file: File, text: bool) -> ItemStream {
        ItemStream {
            inner: StreamInner::File(FileLines {
                reader: BufReader::new(file),
                text,
            }),
        }
    }

    /// The OS descriptor backing this stream, when there is one.
    pub fn fd(&self) -> Option<RawFd> {
        match &self.inner {
            StreamInner::Iter(_) => None,
            StreamInner::Producer(p) => Some(p.as_raw_fd()),
            StreamInner::File(fl) => Some(fl.reader.get_ref().as_raw_fd()),
        }
    }

    /// True if the stream can be read directly from an OS descriptor.
    pub fn has_fd(&self) -> bool {
        self.fd().is_some()
    }

    /// Split into something the subprocess layer can wire to a child's
    /// stdin: either the backing descriptor (plus the process handle to
    /// reap, if any), or the stream itself for pumping.
    pub(crate) fn into_splice(self) -> SpliceSource {
        match self.inner {
            StreamInner::Producer(p) => {
                let (file, process) = p.into_parts();
                SpliceSource::Fd {
                    file,
                    feeder: Some(process),
                }
            }
            StreamInner::File(fl) => SpliceSource::Fd {
                // Dropping the BufReader's buffer is fine here: splicing
                // happens before the stream is iterated.
                file: fl.reader.into_inner(),
                feeder: None,
            },
            inner => SpliceSource::Stream(ItemStream { inner }),
        }
    }
}

impl Iterator for ItemStream {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Result<Item>> {
        match &mut self.inner {
            StreamInner::Iter(iter) => iter.next(),
            StreamInner::Producer(p) => p.next(),
            StreamInner::File(fl) => fl.next_line(),
        }
    }
}

impl fmt::Debug for ItemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            StreamInner::Iter(_) => "iter",
            StreamInner::Producer(_) => "producer",
            StreamInner::File(_) => "file",
        };
        write!(f, "ItemStream({})", kind)
    }
}
