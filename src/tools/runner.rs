use std::{
    ffi::OsString,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::PathBuf,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use crate::PrepError;

/// Poll interval while waiting for a child process.
/// Bounds how late a timeout is noticed.
const POLL: Duration = Duration::from_millis(50);

/// One external command.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Name used in errors and logs, e.g. `sample_video`.
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(tool: &str, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.to_owned(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command line for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in self.args.iter() {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// `None` if terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external commands. Implementations must be usable
/// from several pipeline workers at once.
pub trait ToolRunner: Send + Sync {
    /// Runs `invocation` to completion or until `timeout`, in which case
    /// the process is killed and `ExternalToolTimeout` returned.
    /// A non-zero exit status is not an error at this level.
    fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<ToolOutput, PrepError>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<ToolOutput, PrepError> {
        // Files rather than pipes, so a chatty tool can never
        // block on a full pipe while we poll
        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        let mut command = Command::new(&invocation.program);
        command.args(invocation.args.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?));
        if let Some(dir) = invocation.cwd.as_ref() {
            command.current_dir(dir);
        }

        log::debug!("[{}] {}", invocation.tool, invocation.display());
        let mut child = command.spawn()?;
        let started = Instant::now();

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                // already exited if kill fails
                let _ = child.kill();
                let _ = child.wait();
                return Err(PrepError::ExternalToolTimeout { tool: invocation.tool.clone(), timeout });
            }
            thread::sleep(POLL);
        };

        Ok(ToolOutput {
            code: status.code(),
            stdout: read_lossy(&mut stdout)?,
            stderr: read_lossy(&mut stderr)?,
        })
    }
}

fn read_lossy(file: &mut File) -> Result<String, PrepError> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Runs `invocation`, retrying once on timeout. Any other
/// failure, or a second timeout, is returned as is.
pub fn run_with_retry(runner: &dyn ToolRunner, invocation: &Invocation, timeout: Duration) -> Result<ToolOutput, PrepError> {
    match runner.run(invocation, timeout) {
        Err(PrepError::ExternalToolTimeout { .. }) => {
            log::warn!("[{}] timed out after {:.1}s, retrying once", invocation.tool, timeout.as_secs_f64());
            runner.run(invocation, timeout)
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ErrorKind;

    /// Times out a fixed number of times, then succeeds.
    struct Flaky {
        timeouts: usize,
        calls: AtomicUsize,
    }

    impl ToolRunner for Flaky {
        fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<ToolOutput, PrepError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match call < self.timeouts {
                true => Err(PrepError::ExternalToolTimeout { tool: invocation.tool.clone(), timeout }),
                false => Ok(ToolOutput { code: Some(0), ..Default::default() }),
            }
        }
    }

    #[test]
    fn timeout_is_retried_once() {
        let invocation = Invocation::new("sample_video", "mapillary_tools");
        let timeout = Duration::from_secs(1);

        let once = Flaky { timeouts: 1, calls: AtomicUsize::new(0) };
        assert!(run_with_retry(&once, &invocation, timeout).unwrap().success());
        assert_eq!(once.calls.load(Ordering::SeqCst), 2);

        let twice = Flaky { timeouts: 2, calls: AtomicUsize::new(0) };
        let err = run_with_retry(&twice, &invocation, timeout).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolTimeout);
        assert_eq!(twice.calls.load(Ordering::SeqCst), 2);
    }

    /// Exits non-zero on every call.
    struct Failing {
        calls: AtomicUsize,
    }

    impl ToolRunner for Failing {
        fn run(&self, invocation: &Invocation, _timeout: Duration) -> Result<ToolOutput, PrepError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PrepError::ExternalToolNonZeroExit { tool: invocation.tool.clone(), code: Some(1), stderr: String::new() })
        }
    }

    #[test]
    fn other_failures_are_not_retried() {
        let invocation = Invocation::new("process", "mapillary_tools");
        let failing = Failing { calls: AtomicUsize::new(0) };
        let err = run_with_retry(&failing, &invocation, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolNonZeroExit);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn display_joins_arguments() {
        let invocation = Invocation::new("upload", "mapillary_tools")
            .arg("upload")
            .arg("--user_name")
            .arg("someone");
        assert_eq!(invocation.display(), "mapillary_tools upload --user_name someone");
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_captures_and_times_out() {
        let echo = Invocation::new("sh", "sh").arg("-c").arg("echo out; echo err >&2; exit 3");
        let output = ProcessRunner.run(&echo, Duration::from_secs(10)).unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");

        let sleep = Invocation::new("sleep", "sleep").arg("5");
        let started = Instant::now();
        let err = ProcessRunner.run(&sleep, Duration::from_millis(200)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolTimeout);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
