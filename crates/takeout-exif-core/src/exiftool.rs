use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use crate::error::{Error, IoContext, Result};

/// Line exiftool prints after each `-execute`. With `-echo` numbering it becomes `{ready<n>}`.
const READY_MARKER: &str = "{ready";

/// Tags written when restoring the capture time.
pub const CAPTURE_TIME_TAGS: &[&str] = &["CreateDate", "DateTimeOriginal"];

/// A synchronous request/response channel to a metadata tool.
///
/// Implementations are owned by one worker and called strictly in sequence.
pub trait MetadataTool: Send {
    /// Run one command and return its textual output.
    fn execute(&mut self, args: &[String]) -> Result<String>;

    /// Shut the tool down, consuming the handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens one tool handle per worker.
pub type ToolFactory = dyn Fn() -> Result<Box<dyn MetadataTool>> + Send + Sync;

/// A resident `exiftool -stay_open True -@ -` process.
///
/// Starting exiftool costs far more than a single read or write, so each worker keeps one
/// process alive for the whole run and feeds it commands over stdin.
pub struct ExifToolSession {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: BufReader<ChildStdout>,
    stderr_drain: Option<JoinHandle<()>>,
}

impl ExifToolSession {
    /// Launch `exiftool` found on `PATH`.
    pub fn open() -> Result<Self> {
        Self::open_with(Path::new("exiftool"))
    }

    /// Launch a specific exiftool executable.
    pub fn open_with(executable: &Path) -> Result<Self> {
        Self::spawn(Command::new(executable))
    }

    pub(crate) fn spawn(mut cmd: Command) -> Result<Self> {
        cmd.args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let program = cmd.get_program().to_string_lossy().into_owned();
        log::debug!("starting {} {:?}", program, cmd.get_args().collect::<Vec<_>>());

        let mut child = cmd.spawn().map_err(|source| Error::SpawnFailed {
            program: program.clone(),
            source,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::SpawnFailed {
                program,
                source: std::io::Error::other("child pipes were not captured"),
            });
        };

        // An unread stderr pipe would eventually block the child once its buffer fills.
        let stderr_drain = std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                log::trace!("exiftool stderr: {}", line);
            }
        });

        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            stdout: BufReader::new(stdout),
            stderr_drain: Some(stderr_drain),
        })
    }

    fn shutdown(&mut self) -> Result<()> {
        // The child is reaped even when the shutdown lines cannot be delivered.
        let sent = match self.stdin.take() {
            Some(mut stdin) => writeln!(stdin, "-stay_open")
                .and_then(|_| writeln!(stdin, "False"))
                .and_then(|_| stdin.flush())
                .io_context(|| "sending shutdown sequence"),
            None => Ok(()),
        };

        let waited = self.child.wait().io_context(|| "waiting for exiftool to exit");
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
        sent?;
        let status = waited?;
        if !status.success() {
            return Err(Error::ProcessExit { status });
        }
        Ok(())
    }

    /// Read one response up to the ready marker. Non-UTF-8 bytes are replaced rather than
    /// failing, so a response is always consumed whole.
    fn read_response(&mut self) -> Result<String> {
        let mut output = String::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = self
                .stdout
                .read_until(b'\n', &mut line)
                .io_context(|| "reading exiftool output")?;
            if n == 0 {
                return Err(Error::ProcessClosed);
            }
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim_end_matches(['\n', '\r']);
            if trimmed.starts_with(READY_MARKER) {
                return Ok(output);
            }
            output.push_str(trimmed);
            output.push('\n');
        }
    }
}

impl MetadataTool for ExifToolSession {
    fn execute(&mut self, args: &[String]) -> Result<String> {
        for arg in args {
            if arg.contains('\n') || arg.contains('\r') {
                return Err(Error::InvalidArgument {
                    arg: arg.clone(),
                    reason: "line breaks cannot be sent over the argument stream",
                });
            }
        }

        let stdin = self.stdin.as_mut().ok_or(Error::ProcessClosed)?;
        let sent = args
            .iter()
            .try_for_each(|arg| writeln!(stdin, "{}", arg))
            .and_then(|_| writeln!(stdin, "-execute"))
            .and_then(|_| stdin.flush())
            .io_context(|| "writing command");

        // After a failed exchange the stream position is unknown; the session is unusable.
        let output = match sent.and_then(|_| self.read_response()) {
            Ok(output) => output,
            Err(e) => {
                self.stdin = None;
                return Err(e);
            }
        };

        log::trace!("exiftool output:\n{}", output);
        Ok(output)
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.shutdown()
    }
}

impl Drop for ExifToolSession {
    fn drop(&mut self) {
        // The drain handle is only taken once the child has been waited on.
        if self.stderr_drain.is_some() {
            if let Err(e) = self.shutdown() {
                log::debug!("exiftool shutdown on drop: {}", e);
            }
        }
    }
}

/// Factory launching one `ExifToolSession` per call.
pub fn session_factory(executable: impl AsRef<Path>) -> Box<ToolFactory> {
    let executable = executable.as_ref().to_path_buf();
    Box::new(move || {
        let session = ExifToolSession::open_with(&executable)?;
        Ok(Box::new(session) as Box<dyn MetadataTool>)
    })
}

/// Render a path as a protocol argument.
pub fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidArgument {
            arg: path.to_string_lossy().into_owned(),
            reason: "path is not valid UTF-8",
        })
}

/// Arguments that set every capture-time tag of `path` to `datetime`, in place.
pub fn capture_time_args(path: &Path, datetime: &str) -> Result<Vec<String>> {
    let mut args = vec!["-overwrite_original".to_string()];
    for tag in CAPTURE_TIME_TAGS {
        args.push(format!("-{}={}", tag, datetime));
    }
    args.push(path_arg(path)?);
    Ok(args)
}

/// Fail when exiftool's summary says the write did not happen.
pub fn check_write_output(path: &Path, output: &str) -> Result<()> {
    let rejected = output
        .lines()
        .any(|l| l.contains("weren't updated due to errors"));
    if rejected {
        return Err(Error::ToolRejected {
            path: path.to_path_buf(),
            output: output.trim().to_string(),
        });
    }
    Ok(())
}
