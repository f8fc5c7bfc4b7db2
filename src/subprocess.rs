use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{Child, Command, Stdio};

use crate::cmd::{Arg, Cmd};
use crate::error::{Error, Result};
use crate::item::{Item, ItemStream, read_line_item};
use crate::posix;
use crate::pump::IterPipe;

/// Exit status of a child process.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ExitStatus {
    /// The process exited with the given exit code.
    Exited(u32),
    /// The process was terminated by the given signal.
    Signaled(u8),
    /// Other `waitpid()` outcome.
    Other(i32),
    /// The process completed, but its exit status is unavailable.
    Undetermined,
}

impl ExitStatus {
    pub(crate) fn from_std(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            ExitStatus::Exited(code as u32)
        } else if let Some(sig) = status.signal() {
            ExitStatus::Signaled(sig as u8)
        } else {
            ExitStatus::Other(status.into_raw())
        }
    }

    /// True if the exit status of the process is 0.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Shell-style numeric code; exits by signal map to negative numbers.
    pub fn code(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => code as i32,
            ExitStatus::Signaled(sig) => -(sig as i32),
            ExitStatus::Other(raw) => raw,
            ExitStatus::Undetermined => -1,
        }
    }
}

/// Marker value redirecting a stream to the null device.
#[derive(Debug)]
pub struct NullFile;

/// What to feed the child's standard input.
#[derive(Debug, Default)]
pub enum StdinSpec {
    /// Inherit the parent's stdin.
    #[default]
    Inherit,
    /// Redirect to a new pipe whose write end stays with the parent.
    Pipe,
    /// Read from the null device.
    Null,
    /// Read from an open file or any owned descriptor.
    File(File),
    /// Feed the given text through a pump pipe, as a single item.
    Text(String),
    /// Feed the given item stream.  A descriptor-backed stream is
    /// spliced to the child directly; anything else goes through a pump.
    Stream(ItemStream),
}

impl Clone for StdinSpec {
    /// Returns a copy of the value.
    ///
    /// Cloning a `File` duplicates its descriptor with
    /// `File::try_clone` and panics in the unlikely case that fails.
    /// Cloning a spliced `Stream` panics: an item stream is single-pass
    /// and cannot be duplicated.
    fn clone(&self) -> StdinSpec {
        match self {
            StdinSpec::Inherit => StdinSpec::Inherit,
            StdinSpec::Pipe => StdinSpec::Pipe,
            StdinSpec::Null => StdinSpec::Null,
            StdinSpec::File(f) => StdinSpec::File(f.try_clone().expect("cloning stdin file")),
            StdinSpec::Text(s) => StdinSpec::Text(s.clone()),
            StdinSpec::Stream(_) => panic!("cannot clone a command with a spliced stdin stream"),
        }
    }
}

impl From<&str> for StdinSpec {
    fn from(s: &str) -> StdinSpec {
        StdinSpec::Text(s.to_owned())
    }
}

impl From<String> for StdinSpec {
    fn from(s: String) -> StdinSpec {
        StdinSpec::Text(s)
    }
}

impl From<File> for StdinSpec {
    fn from(f: File) -> StdinSpec {
        StdinSpec::File(f)
    }
}

impl From<OwnedFd> for StdinSpec {
    fn from(fd: OwnedFd) -> StdinSpec {
        StdinSpec::File(File::from(fd))
    }
}

impl From<ItemStream> for StdinSpec {
    fn from(stream: ItemStream) -> StdinSpec {
        StdinSpec::Stream(stream)
    }
}

impl From<Producer> for StdinSpec {
    fn from(producer: Producer) -> StdinSpec {
        StdinSpec::Stream(ItemStream::from_producer(producer))
    }
}

impl From<NullFile> for StdinSpec {
    fn from(_: NullFile) -> StdinSpec {
        StdinSpec::Null
    }
}

/// What to do with one of the child's output streams.
#[derive(Debug, Default)]
pub enum OutputSpec {
    /// Inherit the parent's stream.
    #[default]
    Inherit,
    /// Redirect to a new pipe whose read end stays with the parent.
    Pipe,
    /// Discard by writing to the null device.
    Null,
    /// Write to an open file.
    File(File),
}

impl Clone for OutputSpec {
    /// Returns a copy of the value; see [`StdinSpec::clone`] for the
    /// `File` caveat.
    fn clone(&self) -> OutputSpec {
        match self {
            OutputSpec::Inherit => OutputSpec::Inherit,
            OutputSpec::Pipe => OutputSpec::Pipe,
            OutputSpec::Null => OutputSpec::Null,
            OutputSpec::File(f) => OutputSpec::File(f.try_clone().expect("cloning output file")),
        }
    }
}

impl From<File> for OutputSpec {
    fn from(f: File) -> OutputSpec {
        OutputSpec::File(f)
    }
}

impl From<NullFile> for OutputSpec {
    fn from(_: NullFile) -> OutputSpec {
        OutputSpec::Null
    }
}

/// A descriptor-backed stream splits into the descriptor itself plus an
/// optional process handle that still needs reaping; everything else is
/// pumped.
pub(crate) enum SpliceSource {
    Fd {
        file: File,
        feeder: Option<Subprocess>,
    },
    Stream(ItemStream),
}

/// Maximum depth to which argument trees are expanded.
pub(crate) const MAX_ARG_DEPTH: usize = 3;

/// Flatten an argument tree into argv strings.
///
/// Nested lists are expanded in order up to [`MAX_ARG_DEPTH`]; past the
/// bound, what remains is coerced to its textual representation.
/// Strings below the top level lose their trailing newlines, so the
/// byte-identical stdout of one command can serve as argv of another,
/// like shell backticks.
pub(crate) fn flatten_args(args: &[Arg]) -> Vec<String> {
    let mut out = Vec::new();
    for arg in args {
        flatten_into(arg, 1, &mut out);
    }
    out
}

fn flatten_into(arg: &Arg, depth: usize, out: &mut Vec<String>) {
    match arg {
        Arg::Str(s) => out.push(strip_at_depth(s, depth)),
        Arg::Value(v) => out.push(strip_at_depth(&v.to_string(), depth)),
        Arg::List(elems) if depth < MAX_ARG_DEPTH => {
            for elem in elems {
                flatten_into(elem, depth + 1, out);
            }
        }
        Arg::List(_) => out.push(strip_at_depth(&arg.to_string(), depth)),
    }
}

fn strip_at_depth(s: &str, depth: usize) -> String {
    if depth >= 2 {
        s.trim_end_matches('\n').to_owned()
    } else {
        s.to_owned()
    }
}

/// Command line rendered for error messages, truncated to 200 bytes.
fn summarize(argv: &[String]) -> String {
    let mut s = argv.join(" ");
    if s.len() > 200 {
        let mut end = 200;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

enum Feeder {
    Pump(IterPipe),
    Process(Box<Subprocess>),
}

impl fmt::Debug for Feeder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feeder::Pump(_) => write!(f, "Feeder::Pump"),
            Feeder::Process(p) => write!(f, "Feeder::Process({:?})", p),
        }
    }
}

/// A started child process.
///
/// Created by [`Cmd::subprocess`] and by the façades built on top of it.
/// The wrapper adds three things over the raw spawn primitive: argument
/// trees are flattened at launch, `stdin` accepts in-process sources
/// (spliced through a descriptor when possible, pumped otherwise), and
/// an optional `error_level` converts bad exit codes into errors when
/// the process is reaped.
///
/// Any pump threads and upstream processes feeding this child's stdin
/// are adopted by the wrapper and closed or reaped by
/// [`wait`](Self::wait), so a finished pipeline leaves nothing running.
#[derive(Debug)]
pub struct Subprocess {
    pub(crate) child: Child,
    cmdline: String,
    error_level: Option<i32>,
    feeders: Vec<Feeder>,
    status: Option<ExitStatus>,
}

impl Subprocess {
    pub(crate) fn start(cmd: Cmd) -> Result<Subprocess> {
        let (args, config) = cmd.into_parts();
        let argv = flatten_args(&args);
        if argv.is_empty() {
            return Err(Error::Spawn(io::Error::new(
                ErrorKind::InvalidInput,
                "argv must not be empty",
            )));
        }
        let cmdline = summarize(&argv);

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        if let Some(env) = config.env {
            command.env_clear();
            command.envs(env);
        }
        if let Some(cwd) = config.cwd {
            command.current_dir(cwd);
        }

        let mut feeders = Vec::new();
        match config.stdin {
            StdinSpec::Inherit => {}
            StdinSpec::Pipe => {
                command.stdin(Stdio::piped());
            }
            StdinSpec::Null => {
                command.stdin(Stdio::null());
            }
            StdinSpec::File(f) => {
                command.stdin(Stdio::from(f));
            }
            StdinSpec::Text(s) => {
                let stream = ItemStream::from_values(vec![Item::Text(s)]);
                feeders.push(Feeder::Pump(attach_pump(&mut command, stream)?));
            }
            StdinSpec::Stream(stream) => match stream.into_splice() {
                SpliceSource::Fd { file, feeder } => {
                    // The fd fast path: the child reads the upstream
                    // descriptor directly and the data never enters this
                    // process.
                    command.stdin(Stdio::from(file));
                    if let Some(process) = feeder {
                        feeders.push(Feeder::Process(Box::new(process)));
                    }
                }
                SpliceSource::Stream(stream) => {
                    feeders.push(Feeder::Pump(attach_pump(&mut command, stream)?));
                }
            },
        }
        match config.stdout {
            OutputSpec::Inherit => {}
            OutputSpec::Pipe => {
                command.stdout(Stdio::piped());
            }
            OutputSpec::Null => {
                command.stdout(Stdio::null());
            }
            OutputSpec::File(f) => {
                command.stdout(Stdio::from(f));
            }
        }
        match config.stderr {
            OutputSpec::Inherit => {}
            OutputSpec::Pipe => {
                command.stderr(Stdio::piped());
            }
            OutputSpec::Null => {
                command.stderr(Stdio::null());
            }
            OutputSpec::File(f) => {
                command.stderr(Stdio::from(f));
            }
        }

        let child = command.spawn().map_err(Error::Spawn)?;
        Ok(Subprocess {
            child,
            cmdline,
            error_level: config.error_level,
            feeders,
            status: None,
        })
    }

    /// PID of the child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait for the child to finish and return its exit status.
    ///
    /// Reaps the child, then closes adopted pumps and upstream
    /// processes, surfacing any error stashed by a pump thread.  With
    /// `error_level` configured, a signalled exit or a code at or above
    /// the level fails with [`Error::ChildFailed`].
    pub fn wait(&mut self) -> Result<ExitStatus> {
        let status = match self.status {
            Some(status) => status,
            None => {
                let status = ExitStatus::from_std(self.child.wait().map_err(Error::Io)?);
                self.status = Some(status);
                status
            }
        };
        self.close_feeders()?;
        self.check_error_level(status)?;
        Ok(status)
    }

    /// Check whether the child has finished, without blocking.
    pub fn poll(&mut self) -> Option<ExitStatus> {
        if self.status.is_none()
            && let Ok(Some(status)) = self.child.try_wait()
        {
            self.status = Some(ExitStatus::from_std(status));
        }
        self.status
    }

    /// Send SIGTERM to the child.  Does nothing if it is already reaped.
    pub fn terminate(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        posix::kill(self.child.id(), posix::SIGTERM)
    }

    /// Send SIGKILL to the child.  Does nothing if it is already reaped.
    pub fn kill(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        self.child.kill()
    }

    // Feeders are closed only after the child is reaped: by then the
    // child has released the read ends, so no pump thread is still
    // blocked in write.
    fn close_feeders(&mut self) -> Result<()> {
        let mut first_err = None;
        for feeder in &mut self.feeders {
            let result = match feeder {
                Feeder::Pump(pump) => pump.close(),
                Feeder::Process(process) => process.wait().map(drop),
            };
            if let Err(err) = result
                && first_err.is_none()
            {
                first_err = Some(err);
            }
        }
        self.feeders.clear();
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_error_level(&self, status: ExitStatus) -> Result<()> {
        if let Some(level) = self.error_level {
            let code = status.code();
            if code < 0 || code >= level {
                return Err(Error::ChildFailed {
                    code,
                    cmd: self.cmdline.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        // Best-effort reap to avoid leaving a zombie behind.
        if self.status.is_none() {
            let _ = self.child.try_wait();
        }
    }
}

fn attach_pump(command: &mut Command, stream: ItemStream) -> Result<IterPipe> {
    let mut pump = IterPipe::new(stream);
    pump.fd()?;
    let read = pump.take_read().expect("pump read end");
    command.stdin(Stdio::from(read));
    Ok(pump)
}

/// A started subprocess exposed as a readable, line-iterable source.
///
/// `Producer` forces the command's stdout to a new pipe, takes ownership
/// of the parent end, and wraps it in a buffered reader.  It is both a
/// process handle (it can be waited on) and a file-like object: iterate
/// it for the lines of the child's stdout, or use [`Read`] for raw
/// bytes.  Line items keep their trailing newline; with
/// `universal_newlines` off, lines are yielded as raw [`Item::Bytes`].
///
/// Reaching end of stream reaps the child, so an `error_level` failure
/// surfaces as the final iterator element.
pub struct Producer {
    // The reader is declared first so that dropping a Producer closes
    // the pipe before the process handle attempts to reap.
    reader: BufReader<File>,
    process: Subprocess,
    text: bool,
    eof: bool,
}

impl Producer {
    pub(crate) fn start(cmd: Cmd) -> Result<Producer> {
        if !matches!(cmd.config().stdout, OutputSpec::Inherit) {
            return Err(Error::StdoutOverridden);
        }
        let text = cmd.config().universal_newlines;
        let mut process = Subprocess::start(cmd.stdout(OutputSpec::Pipe))?;
        let stdout = process.child.stdout.take().expect("child stdout");
        let file = File::from(OwnedFd::from(stdout));
        Ok(Producer {
            reader: BufReader::new(file),
            process,
            text,
            eof: false,
        })
    }

    /// Wait for the child to finish and return its exit status.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.process.wait()
    }

    /// Close the reader, then reap the child.
    pub fn close(self) -> Result<ExitStatus> {
        let Producer {
            reader,
            mut process,
            ..
        } = self;
        drop(reader);
        process.wait()
    }

    /// The stream of the child's stdout lines.
    pub fn into_stream(self) -> ItemStream {
        ItemStream::from_producer(self)
    }

    pub(crate) fn into_parts(self) -> (File, Subprocess) {
        (self.reader.into_inner(), self.process)
    }
}

impl Iterator for Producer {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Result<Item>> {
        if self.eof {
            return None;
        }
        match read_line_item(&mut self.reader, self.text) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.eof = true;
                // End of stream reaps the child; an error_level failure
                // is the last thing the iterator yields.
                match self.process.wait() {
                    Ok(_) => None,
                    Err(err) => Some(Err(err)),
                }
            }
            Err(err) => {
                self.eof = true;
                Some(Err(Error::Io(err)))
            }
        }
    }
}

impl Read for Producer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl AsRawFd for Producer {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.get_ref().as_raw_fd()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("process", &self.process)
            .field("text", &self.text)
            .finish()
    }
}

/// A started subprocess exposed as a writable sink.
///
/// `Consumer` forces the command's stdin to a new pipe and wraps the
/// parent's write end.  Dropping or [`close`](Self::close)-ing the
/// consumer closes the pipe, which delivers EOF to the child.
pub struct Consumer {
    // Declared before the process handle so that dropping a Consumer
    // delivers EOF before the handle attempts to reap the child.
    writer: Option<File>,
    process: Subprocess,
}

impl Consumer {
    pub(crate) fn start(cmd: Cmd) -> Result<Consumer> {
        if !matches!(cmd.config().stdin, StdinSpec::Inherit) {
            return Err(Error::StdinOverridden);
        }
        let mut process = Subprocess::start(cmd.stdin(StdinSpec::Pipe))?;
        let stdin = process.child.stdin.take().expect("child stdin");
        Ok(Consumer {
            writer: Some(File::from(OwnedFd::from(stdin))),
            process,
        })
    }

    /// Flush and close the child's stdin, delivering EOF, then reap.
    pub fn close(mut self) -> Result<ExitStatus> {
        self.writer.take();
        self.process.wait()
    }
}

impl Write for Consumer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.as_mut().expect("consumer already closed").write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.as_mut().expect("consumer already closed").flush()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("process", &self.process)
            .finish()
    }
}
