/*!
Process runner: owns one child for the lifetime of one request.

- The child leads its own process group so the whole tree can be killed at once.
- stdout and stderr share a single pipe (or a single output file when redirected).
- stdin comes from the redirect file when given, else `/dev/null`.
- Dropping a `RunningProcess` that has not completed kills the group and reaps the child,
  so every exit path of a request (normal, disconnect, error) cleans up.
*/

use std::fs::File;
use std::io::{self, PipeReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use wait_timeout::ChildExt;

use crate::errors::GatewayError;
use crate::invocation::Invocation;

/// Upper bound for a single streamed read.
pub const CHUNK_SIZE: usize = 4096;

/// How long to wait for a killed child before giving up on a clean reap.
pub const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Spawned,
    Streaming,
    Completed,
    Killed,
    Failed,
}

#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    pgid: i32,
    output: Option<PipeReader>,
    state: ProcessState,
}

/// Open redirect files, then spawn the child in a fresh process group.
pub fn spawn(inv: &Invocation) -> Result<RunningProcess, GatewayError> {
    let line = inv.command_line();
    let (program, rest) = line
        .split_first()
        .ok_or_else(|| GatewayError::Config("empty command line".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(rest);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let stdin = match &inv.stdin_file {
        Some(p) => Stdio::from(File::open(p).map_err(|e| redirect_error("input", p, e))?),
        None => Stdio::null(),
    };
    cmd.stdin(stdin);

    let mut output = None;
    match &inv.stdout_file {
        Some(p) => {
            let f = File::create(p).map_err(|e| redirect_error("output", p, e))?;
            let f_err = f.try_clone()?;
            cmd.stdout(f);
            cmd.stderr(f_err);
        }
        None => {
            let (reader, writer) = io::pipe()?;
            let writer_err = writer.try_clone()?;
            cmd.stdout(writer);
            cmd.stderr(writer_err);
            output = Some(reader);
        }
    }

    let child = cmd.spawn().map_err(GatewayError::Spawn)?;
    // Release our copies of the pipe's write end so EOF is seen when the child exits.
    drop(cmd);

    let pgid = child.id() as i32;
    tracing::debug!(pid = pgid, "spawned child in its own process group");
    Ok(RunningProcess {
        child,
        pgid,
        output,
        state: ProcessState::Spawned,
    })
}

fn redirect_error(direction: &str, path: &str, e: io::Error) -> GatewayError {
    GatewayError::Io(io::Error::new(
        e.kind(),
        format!("cannot open {direction} file '{path}': {e}"),
    ))
}

impl RunningProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Buffered path: discard output as it arrives, then wait for the exit code.
    pub fn wait_exit_code(&mut self) -> io::Result<i32> {
        if let Some(mut out) = self.output.take() {
            io::copy(&mut out, &mut io::sink())?;
        }
        self.finish()
    }

    /// Hand the output pipe to a reader as a lazy, finite chunk sequence.
    ///
    /// Returns `None` when output goes to a file or was already taken.
    pub fn take_chunks(&mut self) -> Option<OutputChunks<PipeReader>> {
        let out = self.output.take()?;
        self.state = ProcessState::Streaming;
        Some(OutputChunks::new(out))
    }

    /// Wait for a child whose output has been fully consumed.
    pub fn finish(&mut self) -> io::Result<i32> {
        match self.child.wait() {
            Ok(status) => {
                self.state = ProcessState::Completed;
                Ok(exit_code(status))
            }
            Err(e) => {
                self.state = ProcessState::Failed;
                Err(e)
            }
        }
    }

    /// Wait at most `timeout` for the child; `None` while it is still running.
    pub fn wait_for(&mut self, timeout: Duration) -> io::Result<Option<i32>> {
        match self.child.wait_timeout(timeout) {
            Ok(Some(status)) => {
                self.state = ProcessState::Completed;
                Ok(Some(exit_code(status)))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.state = ProcessState::Failed;
                Err(e)
            }
        }
    }

    /// SIGKILL the whole process group, then reap the child within `REAP_TIMEOUT`.
    pub fn terminate(&mut self) -> io::Result<()> {
        if matches!(self.state, ProcessState::Completed | ProcessState::Killed) {
            return Ok(());
        }
        #[cfg(unix)]
        {
            match killpg(Pid::from_raw(self.pgid), Signal::SIGKILL) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pgid = self.pgid, error = %e, "killpg failed"),
            }
        }
        self.output = None;
        let reaped = self.child.wait_timeout(REAP_TIMEOUT)?;
        if reaped.is_none() {
            self.child.kill()?;
            self.child.wait()?;
        }
        self.state = ProcessState::Killed;
        tracing::debug!(pgid = self.pgid, "process group killed and reaped");
        Ok(())
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if matches!(self.state, ProcessState::Spawned | ProcessState::Streaming) {
            if let Err(e) = self.terminate() {
                tracing::warn!(pgid = self.pgid, error = %e, "cleanup of child failed");
            }
        }
    }
}

/// Exit status as a decimal-friendly integer; death by signal `N` reports `-N`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return -sig;
        }
    }
    1
}

/// Child output as a sequence of chunks of at most `CHUNK_SIZE` bytes.
///
/// Ends at EOF; a read error is yielded once and ends the sequence.
#[derive(Debug)]
pub struct OutputChunks<R> {
    reader: Option<R>,
    buf: Box<[u8]>,
}

impl<R: Read> OutputChunks<R> {
    pub fn new(reader: R) -> Self {
        OutputChunks {
            reader: Some(reader),
            buf: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
        }
    }
}

impl<R: Read> Iterator for OutputChunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        loop {
            match reader.read(&mut self.buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(n) => return Some(Ok(self.buf[..n].to_vec())),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
