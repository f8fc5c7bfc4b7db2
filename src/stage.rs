use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::ops::{Div, Shr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cmd::Cmd;
use crate::dataflow::{Pipeline, SinkTarget};
use crate::error::{Error, Result};
use crate::item::{Item, ItemStream};

/// A per-item callable, usable as a filter (mapping each item) or as a
/// sink (invoked for each item, result discarded).
pub type ItemFn = Arc<dyn Fn(Item) -> Item + Send + Sync>;

/// A whole-stream filter callable: receives the entire upstream stream
/// and returns a new one.
pub type StreamFn = Arc<dyn Fn(ItemStream) -> ItemStream + Send + Sync>;

/// A shared ordered sequence usable as a sink (and re-iterable source).
pub type SharedList = Arc<Mutex<Vec<Item>>>;

/// A shared set usable as a sink (and re-iterable source).
pub type SharedSet = Arc<Mutex<HashSet<Item>>>;

/// A shared writable object usable as a sink.
pub type SharedWrite = Arc<Mutex<dyn Write + Send>>;

/// One stage of a dataflow.
///
/// A stage declares which of the three roles it can play - source,
/// filter, sink - and the dispatchers ([`as_source`], [`filt`],
/// [`feed`]) select the adapter accordingly.  A single stage may fill
/// several roles: an external command is simultaneously a source (its
/// stdout), a filter (stdin to stdout) and a sink (consume stdin).
///
/// [`as_source`]: crate::as_source
/// [`filt`]: crate::filt
/// [`feed`]: crate::feed
#[derive(Clone)]
pub enum Stage {
    /// An external command: source, filter and sink.
    Cmd(Cmd),
    /// A file on disk: source (its lines) and sink (write items).
    File(FileStage),
    /// A literal item sequence: source only.
    Items(Vec<Item>),
    /// A per-item callable: filter (map) or sink (invoke and discard).
    Func(ItemFn),
    /// A whole-stream filter.
    StreamFn(StreamFn),
    /// A shared sequence: sink (contents replaced) or source (snapshot).
    List(SharedList),
    /// A shared set: sink (contents replaced) or source (snapshot).
    Set(SharedSet),
    /// The null sink: drains the stream without storing it.
    Null,
    /// A writable sink; non-text items are serialised as `"{value}\n"`.
    Write(SharedWrite),
}

impl Stage {
    /// Stage kind, for error messages and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Cmd(_) => "command",
            Stage::File(_) => "file",
            Stage::Items(_) => "items",
            Stage::Func(_) => "function",
            Stage::StreamFn(_) => "stream filter",
            Stage::List(_) => "list",
            Stage::Set(_) => "set",
            Stage::Null => "null",
            Stage::Write(_) => "writer",
        }
    }

    /// True if the stage can begin a pipeline.
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            Stage::Cmd(_) | Stage::File(_) | Stage::Items(_) | Stage::List(_) | Stage::Set(_)
        )
    }

    /// True if the stage can transform an upstream stream.
    pub fn is_filter(&self) -> bool {
        matches!(self, Stage::Cmd(_) | Stage::Func(_) | Stage::StreamFn(_))
    }

    /// True if the stage can terminate a pipeline.
    pub fn is_sink(&self) -> bool {
        matches!(
            self,
            Stage::Cmd(_)
                | Stage::File(_)
                | Stage::Func(_)
                | Stage::List(_)
                | Stage::Set(_)
                | Stage::Null
                | Stage::Write(_)
        )
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Cmd(cmd) => f.debug_tuple("Cmd").field(cmd).finish(),
            Stage::File(file) => f.debug_tuple("File").field(file).finish(),
            Stage::Items(items) => f.debug_tuple("Items").field(items).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<Cmd> for Stage {
    fn from(cmd: Cmd) -> Stage {
        Stage::Cmd(cmd)
    }
}

impl From<FileStage> for Stage {
    fn from(file: FileStage) -> Stage {
        Stage::File(file)
    }
}

impl From<&str> for Stage {
    /// A string is a source yielding itself as a single item.
    fn from(s: &str) -> Stage {
        Stage::Items(vec![Item::from(s)])
    }
}

impl From<String> for Stage {
    fn from(s: String) -> Stage {
        Stage::Items(vec![Item::from(s)])
    }
}

/// A source stage over the given values.
pub fn items<I>(values: I) -> Stage
where
    I: IntoIterator,
    I::Item: Into<Item>,
{
    Stage::Items(values.into_iter().map(Into::into).collect())
}

/// A per-item filter stage applying `f` to every item.
///
/// The same stage is accepted as a sink, in which case `f` is invoked
/// for each item and the result discarded.
pub fn map<F>(f: F) -> Stage
where
    F: Fn(Item) -> Item + Send + Sync + 'static,
{
    Stage::Func(Arc::new(f))
}

/// A whole-stream filter stage: `f` receives the entire upstream stream
/// and returns a new one.  Unlike per-item filters, it may aggregate,
/// drop or expand items.
pub fn stream_filter<F>(f: F) -> Stage
where
    F: Fn(ItemStream) -> ItemStream + Send + Sync + 'static,
{
    Stage::StreamFn(Arc::new(f))
}

/// The null sink: consumes the stream for effect only.
pub fn null() -> Stage {
    Stage::Null
}

/// A sink stage that replaces the contents of a shared sequence.
pub fn list(target: &SharedList) -> Stage {
    Stage::List(Arc::clone(target))
}

/// A sink stage that replaces the contents of a shared set.
pub fn set(target: &SharedSet) -> Stage {
    Stage::Set(Arc::clone(target))
}

/// A sink stage writing serialised items into `w`.
pub fn writer<W: Write + Send + 'static>(w: W) -> Stage {
    Stage::Write(Arc::new(Mutex::new(w)))
}

/// A fresh shared sequence for use with [`list`].
pub fn shared_list() -> SharedList {
    Arc::new(Mutex::new(Vec::new()))
}

/// A fresh shared set for use with [`set`].
pub fn shared_set() -> SharedSet {
    Arc::new(Mutex::new(HashSet::new()))
}

/// Drop consecutive duplicate items.
pub fn uniq() -> Stage {
    stream_filter(|stream| {
        let mut last: Option<Item> = None;
        ItemStream::from_results(Box::new(stream.filter(move |next| match next {
            Ok(item) => {
                if last.as_ref() == Some(item) {
                    false
                } else {
                    last = Some(item.clone());
                    true
                }
            }
            Err(_) => true,
        })))
    })
}

/// Serialise every item of `source` into `w`.
pub(crate) fn write_items<W: Write + ?Sized>(w: &mut W, source: ItemStream) -> Result<()> {
    for item in source {
        w.write_all(&item?.into_chunk()).map_err(Error::Io)?;
    }
    Ok(())
}

/// A file on disk, as a dataflow stage.
///
/// Iterated, it yields the lines of the file; used as a sink, it is
/// opened for writing (truncated) and the items are written to it.
/// [`appending`](Self::appending) returns the append-mode sibling.
#[derive(Debug, Clone, PartialEq)]
pub struct FileStage {
    path: PathBuf,
    append: bool,
}

impl FileStage {
    /// A stage for the file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> FileStage {
        FileStage {
            path: path.as_ref().to_owned(),
            append: false,
        }
    }

    /// The append-mode sibling of this file: as a sink it appends
    /// instead of truncating.
    pub fn appending(&self) -> FileStage {
        FileStage {
            path: self.path.clone(),
            append: true,
        }
    }

    /// The path this stage refers to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn open_source(&self) -> Result<ItemStream> {
        let file = File::open(&self.path).map_err(Error::Io)?;
        Ok(ItemStream::from_file(file, true))
    }

    pub(crate) fn feed(&self, source: ItemStream) -> Result<()> {
        let mut file = if self.append {
            OpenOptions::new().create(true).append(true).open(&self.path)
        } else {
            File::create(&self.path)
        }
        .map_err(Error::Io)?;
        write_items(&mut file, source)
    }
}

impl Div<Cmd> for FileStage {
    type Output = Pipeline;

    /// Compose this file's lines with a command.
    fn div(self, rhs: Cmd) -> Pipeline {
        Pipeline::pair(Stage::File(self), Stage::Cmd(rhs))
    }
}

impl Div<Stage> for FileStage {
    type Output = Pipeline;

    /// Compose this file's lines with a stage.
    fn div(self, rhs: Stage) -> Pipeline {
        Pipeline::pair(Stage::File(self), rhs)
    }
}

impl Div<FileStage> for FileStage {
    type Output = Pipeline;

    /// Compose two files (read one, write the other when run).
    fn div(self, rhs: FileStage) -> Pipeline {
        Pipeline::pair(Stage::File(self), Stage::File(rhs))
    }
}

impl Div<Pipeline> for FileStage {
    type Output = Pipeline;

    /// Prepend this file to a pipeline.
    fn div(self, rhs: Pipeline) -> Pipeline {
        Pipeline::single(Stage::File(self)).concat(rhs)
    }
}

impl<T: SinkTarget> Shr<T> for FileStage {
    type Output = Result<()>;

    /// Run this file's lines into a sink.
    fn shr(self, rhs: T) -> Result<()> {
        Pipeline::single(Stage::File(self)).run_into(rhs)
    }
}

impl Div<Cmd> for Stage {
    type Output = Pipeline;

    /// Compose a stage with a command.
    fn div(self, rhs: Cmd) -> Pipeline {
        Pipeline::pair(self, Stage::Cmd(rhs))
    }
}

impl Div<Stage> for Stage {
    type Output = Pipeline;

    /// Compose two stages.
    fn div(self, rhs: Stage) -> Pipeline {
        Pipeline::pair(self, rhs)
    }
}

impl Div<FileStage> for Stage {
    type Output = Pipeline;

    /// Compose a stage with a file.
    fn div(self, rhs: FileStage) -> Pipeline {
        Pipeline::pair(self, Stage::File(rhs))
    }
}

impl Div<Pipeline> for Stage {
    type Output = Pipeline;

    /// Prepend a stage to a pipeline.
    fn div(self, rhs: Pipeline) -> Pipeline {
        Pipeline::single(self).concat(rhs)
    }
}

impl<T: SinkTarget> Shr<T> for Stage {
    type Output = Result<()>;

    /// Run this stage's output into a sink.
    fn shr(self, rhs: T) -> Result<()> {
        Pipeline::single(self).run_into(rhs)
    }
}
