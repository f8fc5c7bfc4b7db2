//! Shell-style dataflow pipelines for Rust.
//!
//! The entry points are the [`Cmd`] builder and the [`Pipeline`]
//! recipe.  A `Cmd` describes a pending external command; a `Pipeline`
//! is an ordered sequence of stages - commands, files, in-process
//! transforms, containers - composed with the `/` operator and run with
//! `>>`, in the spirit of a Unix shell command line.  Pipelines are
//! passive values: nothing is launched until a pipeline is iterated,
//! applied as a filter, or run into a sink.
//!
//! Compared to `std::process`, the crate adds:
//!
//! * Composition of external commands and in-process stages in one
//!   expression, with OS-level splicing whenever two adjacent stages
//!   are processes - the data never enters this process.
//!
//! * Iterables as subprocess input: any item stream can feed a child's
//!   stdin through a background pump thread and an OS pipe.
//!
//! * Argument trees: the line-shaped output of one command can be used
//!   directly as the argument list of another, like shell backticks.
//!
//! * An `error_level` policy converting bad exit codes into errors.
//!
//! # Examples
//!
//! Run a command and wait for it:
//!
//! ```no_run
//! use cmdflow::cmd;
//!
//! # fn dummy() -> cmdflow::Result<()> {
//! let code = cmd!(umount, "/mnt/usb").call()?;
//! # Ok(())
//! # }
//! ```
//!
//! Pipe one command through another into the host's stdout:
//!
//! ```no_run
//! use cmdflow::cmd;
//!
//! # fn dummy() -> cmdflow::Result<()> {
//! (cmd!(echo, "Hello, World!") / cmd!(rev) >> std::io::stdout())?;
//! # Ok(())
//! # }
//! ```
//!
//! Mix in-process values and transforms with external commands; `/`
//! binds tighter than `>>`, so the whole chain composes before it runs:
//!
//! ```no_run
//! use cmdflow::{cmd, items, list, map, shared_list};
//!
//! # fn dummy() -> cmdflow::Result<()> {
//! let out = shared_list();
//! (items([128, 129, 130, 131]) / cmd!(rev) / map(cmdflow::stripnl) >> list(&out))?;
//! # Ok(())
//! # }
//! ```
//!
//! Iterate the lines of a command's output:
//!
//! ```no_run
//! use cmdflow::cmd;
//!
//! # fn dummy() -> cmdflow::Result<()> {
//! for line in cmd!(ls, "-l").producer()? {
//!     print!("{}", line?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! This crate targets Unix; child processes are spawned through
//! `std::process`, and pipes are spliced at the descriptor level.

#![warn(missing_docs)]

mod cmd;
mod dataflow;
mod error;
mod item;
#[cfg(unix)]
mod posix;
mod pump;
mod stage;
mod subprocess;

pub use crate::cmd::{Arg, Cmd};
pub use crate::dataflow::{Pipeline, SinkTarget, as_source, feed, filt};
pub use crate::error::{Error, Result};
pub use crate::item::{Item, ItemStream, nl, stripnl};
pub use crate::pump::IterPipe;
pub use crate::stage::{
    FileStage, ItemFn, SharedList, SharedSet, SharedWrite, Stage, StreamFn, items, list, map, null,
    set, shared_list, shared_set, stream_filter, uniq, writer,
};
pub use crate::subprocess::{
    Consumer, ExitStatus, NullFile, OutputSpec, Producer, StdinSpec, Subprocess,
};
