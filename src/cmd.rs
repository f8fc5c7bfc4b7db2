use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::ops::{Div, Shr};
use std::path::{Path, PathBuf};

use crate::dataflow::{Pipeline, SinkTarget};
use crate::error::Result;
use crate::item::{Item, ItemStream};
use crate::stage::{FileStage, Stage};
use crate::subprocess::{Consumer, OutputSpec, Producer, StdinSpec, Subprocess};

#[cfg(unix)]
mod os {
    pub const SHELL: [&str; 2] = ["sh", "-c"];
}

use os::SHELL;

/// One node of a command's argument tree.
///
/// Arguments form a tree rather than a flat list so that the output of
/// one command (a sequence of lines) can be used directly as arguments
/// of another.  The tree is flattened when the command is launched.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A literal string argument.
    Str(String),
    /// An arbitrary value, coerced to text at launch.
    Value(Item),
    /// A nested argument sequence, expanded in order.
    List(Vec<Arg>),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Str(s) => f.write_str(s),
            Arg::Value(v) => fmt::Display::fmt(v, f),
            Arg::List(elems) => {
                f.write_str("[")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt::Display::fmt(elem, f)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Arg {
        Arg::Str(s.to_owned())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Arg {
        Arg::Str(s)
    }
}

impl From<Item> for Arg {
    fn from(item: Item) -> Arg {
        match item {
            Item::Text(s) => Arg::Str(s),
            other => Arg::Value(other),
        }
    }
}

impl From<i32> for Arg {
    fn from(i: i32) -> Arg {
        Arg::Value(Item::Int(i as i64))
    }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Arg {
        Arg::Value(Item::Int(i))
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Arg {
        Arg::Value(Item::Float(v))
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(elems: Vec<Arg>) -> Arg {
        Arg::List(elems)
    }
}

impl From<Vec<String>> for Arg {
    fn from(elems: Vec<String>) -> Arg {
        Arg::List(elems.into_iter().map(Arg::Str).collect())
    }
}

/// Launch options recognised by the subprocess layer.
#[derive(Debug, Clone, Default)]
pub(crate) struct LaunchConfig {
    pub stdin: StdinSpec,
    pub stdout: OutputSpec,
    pub stderr: OutputSpec,
    pub env: Option<Vec<(OsString, OsString)>>,
    pub cwd: Option<PathBuf>,
    pub error_level: Option<i32>,
    pub universal_newlines: bool,
}

impl LaunchConfig {
    fn new() -> LaunchConfig {
        LaunchConfig {
            universal_newlines: true,
            ..LaunchConfig::default()
        }
    }
}

/// A value describing a pending external command.
///
/// `Cmd` is an immutable record of an argument vector plus launch
/// options; every builder method returns a new value and leaves the
/// original unchanged, so partially-configured commands can be shared
/// and extended freely:
///
/// ```
/// use cmdflow::Cmd;
///
/// let grep = Cmd::new("grep").arg("-n");
/// let grep_use = grep.clone().arg("^use");
/// assert_eq!(grep.args.len(), 2);
/// assert_eq!(grep_use.args.len(), 3);
/// ```
///
/// A command participates in all three dataflow roles: iterate it as a
/// source (the lines of its stdout), compose it as a filter (its stdin
/// is spliced to the upstream), or feed it as a sink.  The `/` operator
/// chains commands and other stages into a [`Pipeline`]; `>>` runs the
/// result:
///
/// ```no_run
/// use cmdflow::cmd;
///
/// # fn dummy() -> cmdflow::Result<()> {
/// (cmd!(echo, "Hello, World!") / cmd!(rev) >> std::io::stdout())?;
/// # Ok(())
/// # }
/// ```
///
/// Nothing is launched until the command is iterated, run, or one of
/// the terminators ([`subprocess`], [`producer`], [`consumer`],
/// [`call`]) is invoked.
///
/// [`Pipeline`]: crate::Pipeline
/// [`subprocess`]: Self::subprocess
/// [`producer`]: Self::producer
/// [`consumer`]: Self::consumer
/// [`call`]: Self::call
#[derive(Debug, Clone)]
pub struct Cmd {
    /// The argument vector; the first element is the program.
    pub args: Vec<Arg>,
    pub(crate) config: LaunchConfig,
}

impl Cmd {
    /// A command that runs `program` with no arguments yet.
    pub fn new<S: AsRef<str>>(program: S) -> Cmd {
        Cmd {
            args: vec![Arg::Str(program.as_ref().to_owned())],
            config: LaunchConfig::new(),
        }
    }

    /// Like [`new`](Self::new), with underscores in the name turned
    /// into dashes: `Cmd::name("git_status")` runs `git-status`.
    ///
    /// This is what the [`cmd!`](crate::cmd!) macro expands to.
    pub fn name<S: AsRef<str>>(name: S) -> Cmd {
        Cmd::new(name.as_ref().replace('_', "-"))
    }

    /// A command that runs `cmdstr` through the system shell.
    ///
    /// Equivalent to `Cmd::new("sh").arg("-c").arg(cmdstr)`.  Be
    /// careful not to interpolate untrusted data into `cmdstr`; pass it
    /// as a separate argument instead.
    pub fn shell<S: AsRef<str>>(cmdstr: S) -> Cmd {
        Cmd::new(SHELL[0]).arg(SHELL[1]).arg(cmdstr.as_ref())
    }

    /// Appends `arg` to the argument vector.
    pub fn arg<A: Into<Arg>>(mut self, arg: A) -> Cmd {
        self.args.push(arg.into());
        self
    }

    /// Extends the argument vector with `args`.
    pub fn args<I>(mut self, args: I) -> Cmd
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Specifies the child's standard input.
    ///
    /// Accepts a [`StdinSpec`], an open `File`, an owned descriptor, a
    /// string (fed through a pump as a single item), an [`ItemStream`]
    /// (spliced directly when descriptor-backed, pumped otherwise), a
    /// running [`Producer`], or [`NullFile`](crate::NullFile).
    pub fn stdin<T: Into<StdinSpec>>(mut self, stdin: T) -> Cmd {
        self.config.stdin = stdin.into();
        self
    }

    /// Specifies the child's standard output.
    pub fn stdout<T: Into<OutputSpec>>(mut self, stdout: T) -> Cmd {
        self.config.stdout = stdout.into();
        self
    }

    /// Specifies the child's standard error.
    pub fn stderr<T: Into<OutputSpec>>(mut self, stderr: T) -> Cmd {
        self.config.stderr = stderr.into();
        self
    }

    fn ensure_env(&mut self) {
        if self.config.env.is_none() {
            self.config.env = Some(env::vars_os().collect());
        }
    }

    /// Clears the environment of the child process.
    pub fn env_clear(mut self) -> Cmd {
        self.config.env = Some(Vec::new());
        self
    }

    /// Sets an environment variable in the child process.  Other
    /// variables are inherited; call [`env_clear`](Self::env_clear)
    /// first if that is undesirable.
    pub fn env<K, V>(mut self, key: K, value: V) -> Cmd
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.ensure_env();
        self.config
            .env
            .as_mut()
            .unwrap()
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// Removes an environment variable from the child process.
    pub fn env_remove<K: AsRef<OsStr>>(mut self, key: K) -> Cmd {
        self.ensure_env();
        self.config
            .env
            .as_mut()
            .unwrap()
            .retain(|(k, _)| k != key.as_ref());
        self
    }

    /// Sets the working directory of the child process.
    pub fn cwd<P: AsRef<Path>>(mut self, dir: P) -> Cmd {
        self.config.cwd = Some(dir.as_ref().to_owned());
        self
    }

    /// Converts bad exit codes into errors on reap: a signalled exit or
    /// a code at or above `level` fails with
    /// [`Error::ChildFailed`](crate::Error::ChildFailed).
    pub fn error_level(mut self, level: i32) -> Cmd {
        self.config.error_level = Some(level);
        self
    }

    /// Controls text mode (the default).  When off, the producer side
    /// yields raw byte items without newline translation.
    pub fn universal_newlines(mut self, text: bool) -> Cmd {
        self.config.universal_newlines = text;
        self
    }

    pub(crate) fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub(crate) fn into_parts(self) -> (Vec<Arg>, LaunchConfig) {
        (self.args, self.config)
    }

    // Terminators

    /// Starts the subprocess described by this command.  The argument
    /// tree is flattened at this moment.
    pub fn subprocess(self) -> Result<Subprocess> {
        Subprocess::start(self)
    }

    /// Starts the command with its stdout piped, returning a
    /// line-iterable [`Producer`].
    pub fn producer(self) -> Result<Producer> {
        Producer::start(self)
    }

    /// Starts the command with its stdin piped, returning a writable
    /// [`Consumer`].
    pub fn consumer(self) -> Result<Consumer> {
        Consumer::start(self)
    }

    /// Starts the command, waits for completion, and returns the exit
    /// code.  Signalled exits are negative.
    pub fn call(self) -> Result<i32> {
        Ok(self.subprocess()?.wait()?.code())
    }

    // Dataflow roles

    /// Source role: the lines of the command's stdout.
    pub(crate) fn into_source(self) -> Result<ItemStream> {
        Ok(ItemStream::from_producer(self.producer()?))
    }

    /// Filter role: relaunch with the upstream as stdin.
    pub(crate) fn filt(self, upstream: ItemStream) -> Result<ItemStream> {
        self.stdin(upstream).into_source()
    }

    /// Sink role: feed the source into the command's stdin and wait.
    pub(crate) fn feed(self, source: ItemStream) -> Result<()> {
        self.stdin(source).subprocess()?.wait().map(drop)
    }
}

/// Build a [`Cmd`] from a bare program name, with optional arguments.
///
/// `cmd!(echo, "hi")` is `Cmd::name("echo").arg("hi")`; underscores in
/// the name become dashes, so `cmd!(git_status)` runs `git-status`.
#[macro_export]
macro_rules! cmd {
    ($name:ident) => {
        $crate::Cmd::name(stringify!($name))
    };
    ($name:ident, $($arg:expr),+ $(,)?) => {
        $crate::Cmd::name(stringify!($name))$(.arg($arg))+
    };
}

impl Div<Cmd> for Cmd {
    type Output = Pipeline;

    /// Compose two commands into a pipeline.
    fn div(self, rhs: Cmd) -> Pipeline {
        Pipeline::pair(Stage::Cmd(self), Stage::Cmd(rhs))
    }
}

impl Div<Stage> for Cmd {
    type Output = Pipeline;

    /// Compose a command with a stage into a pipeline.
    fn div(self, rhs: Stage) -> Pipeline {
        Pipeline::pair(Stage::Cmd(self), rhs)
    }
}

impl Div<FileStage> for Cmd {
    type Output = Pipeline;

    /// Compose a command with a file into a pipeline.
    fn div(self, rhs: FileStage) -> Pipeline {
        Pipeline::pair(Stage::Cmd(self), Stage::File(rhs))
    }
}

impl Div<Pipeline> for Cmd {
    type Output = Pipeline;

    /// Prepend a command to a pipeline.
    fn div(self, rhs: Pipeline) -> Pipeline {
        Pipeline::single(Stage::Cmd(self)).concat(rhs)
    }
}

impl<T: SinkTarget> Shr<T> for Cmd {
    type Output = Result<()>;

    /// Run this command's output into a sink.
    fn shr(self, rhs: T) -> Result<()> {
        Pipeline::single(Stage::Cmd(self)).run_into(rhs)
    }
}
