use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::result;

/// Result alias used throughout the crate.
pub type Result<T> = result::Result<T, Error>;

/// Errors produced while composing or realising dataflows.
///
/// Composition-time misuse (such as building a [`Producer`] on a command
/// whose stdout is already redirected) fails eagerly.  Realisation
/// failures surface to whoever consumes the downstream item stream or
/// awaits the run.  Errors raised inside a pump thread are stored and
/// re-raised when the pump is closed.
///
/// [`Producer`]: crate::Producer
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A stage was used as a filter but is neither a whole-stream filter
    /// nor a per-item callable.  Carries the stage kind.
    BadFilter(&'static str),

    /// A stage was used as a sink but matches no sink adapter.  Carries
    /// the stage kind.
    BadSink(&'static str),

    /// A run was requested on a pipeline with no stages.
    EmptyPipeline,

    /// A filter-only pipeline was iterated without a source, or run
    /// without a sink.
    IncompletePipeline,

    /// A [`Consumer`] was built on a command that already redirects its
    /// standard input.
    ///
    /// [`Consumer`]: crate::Consumer
    StdinOverridden,

    /// A [`Producer`] was built on a command that already redirects its
    /// standard output.
    ///
    /// [`Producer`]: crate::Producer
    StdoutOverridden,

    /// A child process exited with a code at or above the configured
    /// `error_level`, or was killed by a signal (negative code).
    ChildFailed {
        /// Shell-style exit code; signals are negative.
        code: i32,
        /// The command line, truncated to at most 200 bytes.
        cmd: String,
    },

    /// The in-process source of a pump failed while the pump thread was
    /// reading it.  Surfaced when the pump is closed.
    PumpSource(Box<Error>),

    /// The OS refused to spawn the child process.
    Spawn(io::Error),

    /// An I/O error while moving items across a byte boundary.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadFilter(kind) => {
                write!(f, "filt: {} is not a valid filter", kind)
            }
            Error::BadSink(kind) => {
                write!(f, "feed: {} is not a valid data sink", kind)
            }
            Error::EmptyPipeline => write!(f, "cannot run an empty pipeline"),
            Error::IncompletePipeline => {
                write!(f, "pipeline has only filter stages")
            }
            Error::StdinOverridden => write!(f, "stdin already overridden"),
            Error::StdoutOverridden => write!(f, "stdout already overridden"),
            Error::ChildFailed { code, cmd } => {
                write!(f, "command {:?} failed with code {}", cmd, code)
            }
            Error::PumpSource(err) => write!(f, "pump source failed: {}", err),
            Error::Spawn(err) => write!(f, "failed to spawn process: {}", err),
            Error::Io(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::PumpSource(err) => Some(err.as_ref()),
            Error::Spawn(err) | Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
