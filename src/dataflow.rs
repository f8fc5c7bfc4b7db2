use std::collections::HashSet;
use std::io::{self, Write};
use std::ops::{Div, Shr};
use std::sync::Arc;

use crate::cmd::Cmd;
use crate::error::{Error, Result};
use crate::item::{Item, ItemStream};
use crate::stage::{FileStage, SharedList, SharedSet, Stage, write_items};

/// Convert a stage into an item stream (the iterator protocol).
///
/// Literal items yield their elements, a command yields the lines of
/// its stdout (launching a producer), a file yields its lines, and the
/// container stages yield a snapshot of their contents.  Stages without
/// the source capability fail with
/// [`IncompletePipeline`](Error::IncompletePipeline).
pub fn as_source(stage: &Stage) -> Result<ItemStream> {
    match stage {
        Stage::Items(values) => Ok(ItemStream::from_values(values.clone())),
        Stage::Cmd(cmd) => cmd.clone().into_source(),
        Stage::File(file) => file.open_source(),
        Stage::List(target) => Ok(ItemStream::from_values(target.lock().unwrap().clone())),
        Stage::Set(target) => {
            let mut values: Vec<Item> = target.lock().unwrap().iter().cloned().collect();
            values.sort();
            Ok(ItemStream::from_values(values))
        }
        _ => Err(Error::IncompletePipeline),
    }
}

/// Apply a filter stage to an upstream stream (the filter protocol).
///
/// A whole-stream filter receives the upstream in one call; a per-item
/// callable is mapped over it; a command is relaunched with the
/// upstream as its stdin.  Anything else fails with
/// [`BadFilter`](Error::BadFilter).
pub fn filt(stage: &Stage, upstream: ItemStream) -> Result<ItemStream> {
    match stage {
        Stage::Cmd(cmd) => cmd.clone().filt(upstream),
        Stage::StreamFn(f) => Ok(f(upstream)),
        Stage::Func(f) => {
            let f = Arc::clone(f);
            Ok(ItemStream::from_results(Box::new(
                upstream.map(move |next| next.map(|item| f(item))),
            )))
        }
        _ => Err(Error::BadFilter(stage.kind())),
    }
}

/// Feed a source stream into a sink stage (the feed protocol).
///
/// Dispatch probes in this order: the whole-stream sink capability
/// (commands and files), callables (invoked per item), the container
/// table (sequence and set contents are replaced, the null sink
/// drains), and finally writable objects (non-text items serialised as
/// `"{value}\n"`).  Anything else fails with
/// [`BadSink`](Error::BadSink).
pub fn feed(stage: &Stage, source: ItemStream) -> Result<()> {
    match stage {
        // whole-stream sink capability
        Stage::Cmd(cmd) => cmd.clone().feed(source),
        Stage::File(file) => file.feed(source),
        // per-item callable
        Stage::Func(f) => {
            for item in source {
                f(item?);
            }
            Ok(())
        }
        // container table
        Stage::List(target) => {
            let values = source.collect::<Result<Vec<_>>>()?;
            let mut target = target.lock().unwrap();
            target.clear();
            target.extend(values);
            Ok(())
        }
        Stage::Set(target) => {
            let values = source.collect::<Result<Vec<_>>>()?;
            let mut target = target.lock().unwrap();
            target.clear();
            target.extend(values);
            Ok(())
        }
        Stage::Null => {
            for item in source {
                item?;
            }
            Ok(())
        }
        // writable object
        Stage::Write(target) => {
            let mut target = target.lock().unwrap();
            write_items(&mut *target, source)
        }
        _ => Err(Error::BadSink(stage.kind())),
    }
}

/// An immutable recipe for a dataflow: an ordered sequence of stages.
///
/// A pipeline is built declaratively - usually with the `/` operator -
/// and has no side effects until it is realised by iterating it,
/// applying it as a filter, or running it into a sink.  Construction
/// flattens: composing two pipelines concatenates their stage
/// sequences, so `stages` never contains a pipeline.
///
/// # Examples
///
/// Iterate a pipeline mixing an external command with an in-process
/// transform:
///
/// ```no_run
/// use cmdflow::{cmd, map, Item};
///
/// # fn dummy() -> cmdflow::Result<()> {
/// let upper = cmd!(cat, "notes.txt") / map(|x| {
///     Item::Text(x.to_string().to_uppercase())
/// });
/// for line in &upper {
///     print!("{}", line?);
/// }
/// # Ok(())
/// # }
/// ```
///
/// Run a pipeline into a sink with `>>`:
///
/// ```no_run
/// use cmdflow::{cmd, FileStage};
///
/// # fn dummy() -> cmdflow::Result<()> {
/// (cmd!(ls) / cmd!(sort) >> FileStage::new("listing.txt"))?;
/// # Ok(())
/// # }
/// ```
///
/// An empty pipeline iterates to the empty stream and filters as the
/// identity; running it is an error.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// The empty pipeline.
    pub fn new() -> Pipeline {
        Pipeline::default()
    }

    pub(crate) fn single(stage: Stage) -> Pipeline {
        Pipeline {
            stages: vec![stage],
        }
    }

    pub(crate) fn pair(first: Stage, second: Stage) -> Pipeline {
        Pipeline {
            stages: vec![first, second],
        }
    }

    pub(crate) fn concat(mut self, rhs: Pipeline) -> Pipeline {
        self.stages.extend(rhs.stages);
        self
    }

    /// The flattened stage sequence.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Append a stage; the method form of the `/` operator.
    pub fn pipe<S: Into<Stage>>(mut self, next: S) -> Pipeline {
        self.stages.push(next.into());
        self
    }

    /// Realise the pipeline as an item stream.
    ///
    /// The first stage is converted to a stream, and each following
    /// stage is applied to it as a filter.  Every call starts a fresh
    /// realisation; the returned stream is single-pass.
    pub fn stream(&self) -> Result<ItemStream> {
        match self.stages.split_first() {
            None => Ok(ItemStream::empty()),
            Some((first, rest)) => {
                let mut current = as_source(first)?;
                for stage in rest {
                    current = filt(stage, current)?;
                }
                Ok(current)
            }
        }
    }

    /// Whole-stream filter role: apply every stage to `upstream`.
    ///
    /// The empty pipeline returns the upstream unchanged.
    pub fn apply(&self, upstream: ItemStream) -> Result<ItemStream> {
        let mut current = upstream;
        for stage in &self.stages {
            current = filt(stage, current)?;
        }
        Ok(current)
    }

    /// Run the pipeline for effect.  The last stage must be a valid
    /// sink; everything before it forms the source stream.
    pub fn run(&self) -> Result<()> {
        let (last, init) = match self.stages.split_last() {
            None => return Err(Error::EmptyPipeline),
            Some(split) => split,
        };
        check_sink(last)?;
        let source = Pipeline {
            stages: init.to_vec(),
        }
        .stream()?;
        feed(last, source)
    }

    /// Run the pipeline's output into an explicit sink; the method form
    /// of the `>>` operator.
    pub fn run_into<T: SinkTarget>(&self, sink: T) -> Result<()> {
        sink.feed_from(self.stream()?)
    }

    /// Realise the pipeline and collect its items.
    pub fn collect_items(&self) -> Result<Vec<Item>> {
        self.stream()?.collect()
    }

    /// Write the pipeline's serialised output into `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_items(w, self.stream()?)
    }
}

fn check_sink(stage: &Stage) -> Result<()> {
    if stage.is_sink() {
        Ok(())
    } else if stage.is_filter() {
        Err(Error::IncompletePipeline)
    } else {
        Err(Error::BadSink(stage.kind()))
    }
}

impl IntoIterator for &Pipeline {
    type Item = Result<Item>;
    type IntoIter = ItemStream;

    /// Start a fresh realisation.  A failure to realise (for example a
    /// spawn error) is yielded as the stream's only element.
    fn into_iter(self) -> ItemStream {
        match self.stream() {
            Ok(stream) => stream,
            Err(err) => ItemStream::from_results(Box::new(std::iter::once(Err(err)))),
        }
    }
}

impl Div<Cmd> for Pipeline {
    type Output = Pipeline;

    /// Append a command to the pipeline.
    fn div(self, rhs: Cmd) -> Pipeline {
        self.pipe(rhs)
    }
}

impl Div<Stage> for Pipeline {
    type Output = Pipeline;

    /// Append a stage to the pipeline.
    fn div(self, rhs: Stage) -> Pipeline {
        self.pipe(rhs)
    }
}

impl Div<FileStage> for Pipeline {
    type Output = Pipeline;

    /// Append a file to the pipeline.
    fn div(self, rhs: FileStage) -> Pipeline {
        self.pipe(rhs)
    }
}

impl Div<Pipeline> for Pipeline {
    type Output = Pipeline;

    /// Concatenate two pipelines; their stage sequences are inlined.
    fn div(self, rhs: Pipeline) -> Pipeline {
        self.concat(rhs)
    }
}

impl<T: SinkTarget> Shr<T> for Pipeline {
    type Output = Result<()>;

    /// Run the pipeline into a sink.
    fn shr(self, rhs: T) -> Result<()> {
        self.run_into(rhs)
    }
}

/// A value that can terminate a dataflow: the right-hand side of `>>`.
///
/// Implementations exist for every sink-capable stage value, for the
/// standard output and error handles, and for mutable references to
/// plain containers (whose contents are replaced by the run).
pub trait SinkTarget {
    /// Consume the stream for effect.
    fn feed_from(self, source: ItemStream) -> Result<()>;
}

impl SinkTarget for Stage {
    fn feed_from(self, source: ItemStream) -> Result<()> {
        feed(&self, source)
    }
}

impl SinkTarget for Cmd {
    fn feed_from(self, source: ItemStream) -> Result<()> {
        self.feed(source)
    }
}

impl SinkTarget for FileStage {
    fn feed_from(self, source: ItemStream) -> Result<()> {
        FileStage::feed(&self, source)
    }
}

impl SinkTarget for Pipeline {
    /// Feed the stream through this pipeline's filters into its final
    /// sink stage.
    fn feed_from(self, source: ItemStream) -> Result<()> {
        let (last, init) = match self.stages.split_last() {
            None => return Err(Error::EmptyPipeline),
            Some(split) => split,
        };
        check_sink(last)?;
        let current = Pipeline {
            stages: init.to_vec(),
        }
        .apply(source)?;
        feed(last, current)
    }
}

impl SinkTarget for io::Stdout {
    fn feed_from(mut self, source: ItemStream) -> Result<()> {
        write_items(&mut self, source)
    }
}

impl SinkTarget for io::Stderr {
    fn feed_from(mut self, source: ItemStream) -> Result<()> {
        write_items(&mut self, source)
    }
}

impl SinkTarget for &mut Vec<Item> {
    /// Replace the sequence's contents with the stream's items.
    fn feed_from(self, source: ItemStream) -> Result<()> {
        let values = source.collect::<Result<Vec<_>>>()?;
        self.clear();
        self.extend(values);
        Ok(())
    }
}

impl SinkTarget for &mut HashSet<Item> {
    /// Replace the set's contents with the stream's items.
    fn feed_from(self, source: ItemStream) -> Result<()> {
        let values = source.collect::<Result<Vec<_>>>()?;
        self.clear();
        self.extend(values);
        Ok(())
    }
}

impl SinkTarget for &SharedList {
    fn feed_from(self, source: ItemStream) -> Result<()> {
        feed(&Stage::List(Arc::clone(self)), source)
    }
}

impl SinkTarget for &SharedSet {
    fn feed_from(self, source: ItemStream) -> Result<()> {
        feed(&Stage::Set(Arc::clone(self)), source)
    }
}
