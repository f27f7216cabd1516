use std::{
    iter,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::Receiver,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use super::{error::CommandError, executable::Executable, stream};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

////////////////////////////////////////////////////////////////////////////////////
// States for Started/Not Started process
////////////////////////////////////////////////////////////////////////////////////
#[derive(Debug)]
pub struct NotStarted {
    cmd: Command,
}

#[derive(Debug)]
pub struct Started {
    process: Child,
    stderr_lines: Receiver<String>,
    exit_status: Option<ExitStatus>,
}

/// An OS process whose diagnostic output (stderr) can be read line by line without blocking.
#[derive(Debug)]
pub struct ChildProcess<S = NotStarted> {
    bin: String,
    state: S,
}

////////////////////////////////////////////////////////////////////////////////////
// Not Started process
////////////////////////////////////////////////////////////////////////////////////
impl ChildProcess<NotStarted> {
    pub fn new(executable: &Executable) -> Self {
        let mut cmd = Command::new(&executable.bin);
        cmd.args(&executable.args)
            .envs(&executable.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        Self {
            bin: executable.bin.clone(),
            state: NotStarted { cmd },
        }
    }

    /// Spawns the process and starts draining its output streams in background threads.
    pub fn start(mut self) -> Result<ChildProcess<Started>, CommandError> {
        let mut process = self.state.cmd.spawn()?;
        let pid = process.id();

        let streams = process
            .stderr
            .take()
            .ok_or(CommandError::StreamPipeError("stderr".to_string()))
            .and_then(|stderr| {
                let stdout = process
                    .stdout
                    .take()
                    .ok_or(CommandError::StreamPipeError("stdout".to_string()))?;
                stream::spawn_output_logger(stdout, pid)?;
                Ok(stream::spawn_line_reader(stderr, pid)?)
            });

        let stderr_lines = match streams {
            Ok(rx) => rx,
            Err(err) => {
                // Don't leave behind a process nobody can observe.
                let _ = process.kill();
                let _ = process.wait();
                return Err(err);
            }
        };

        debug!(pid, bin = %self.bin, "process started");
        Ok(ChildProcess {
            bin: self.bin,
            state: Started {
                process,
                stderr_lines,
                exit_status: None,
            },
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////
// Started process
////////////////////////////////////////////////////////////////////////////////////
impl ChildProcess<Started> {
    pub fn pid(&self) -> u32 {
        self.state.process.id()
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    /// Checks the OS for the process state on every call. Once the process has exited its
    /// exit status is kept and available through [`ChildProcess::exit_status`].
    pub fn is_running(&mut self) -> bool {
        if self.state.exit_status.is_some() {
            return false;
        }
        match self.state.process.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = self.pid(), %status, "process exited");
                self.state.exit_status = Some(status);
                false
            }
            Err(err) => {
                warn!(pid = self.pid(), "could not check process state: {}", err);
                false
            }
        }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.state.exit_status
    }

    /// True when the process exited successfully or because it was asked to terminate.
    pub fn exited_cleanly(&self) -> bool {
        self.state.exit_status.is_some_and(is_clean_exit)
    }

    /// Asks the process to shut down gracefully.
    #[cfg(target_family = "unix")]
    pub fn terminate(&mut self) -> Result<(), CommandError> {
        use nix::{sys::signal, unistd::Pid};

        signal::kill(Pid::from_raw(self.pid() as i32), signal::SIGTERM)?;
        Ok(())
    }

    /// There is no graceful termination signal on this platform, the process is killed.
    #[cfg(not(target_family = "unix"))]
    pub fn terminate(&mut self) -> Result<(), CommandError> {
        self.kill()
    }

    pub fn kill(&mut self) -> Result<(), CommandError> {
        self.state.process.kill().map_err(CommandError::from)
    }

    /// Polls the process state until it exits or `timeout` elapses. Returns whether it exited.
    pub fn wait_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Returns the next complete line written to stderr, or an empty string when no line is
    /// available right now. A closed stream reads as no data.
    pub fn read_line(&self) -> String {
        self.state.stderr_lines.try_recv().unwrap_or_default()
    }

    /// Drains every line currently available.
    pub fn read_lines(&self) -> Vec<String> {
        iter::from_fn(|| Some(self.read_line()).filter(|line| !line.is_empty())).collect()
    }
}

#[cfg(target_family = "unix")]
fn is_clean_exit(status: ExitStatus) -> bool {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    status.success() || status.signal() == Some(Signal::SIGTERM as i32)
}

#[cfg(not(target_family = "unix"))]
fn is_clean_exit(status: ExitStatus) -> bool {
    status.success()
}

#[cfg(target_family = "unix")]
#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sh(script: &str) -> Executable {
        Executable::new("sh").with_args(["-c", script])
    }

    /// Reads until `count` lines arrived or a few seconds passed.
    fn read_at_least(process: &ChildProcess<Started>, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut lines = Vec::new();
        while lines.len() < count && Instant::now() < deadline {
            lines.extend(process.read_lines());
            std::thread::sleep(Duration::from_millis(10));
        }
        lines
    }

    #[test]
    fn reads_stderr_lines_only() {
        let process = ChildProcess::new(&sh("echo out; echo one >&2; printf 'two\\rthree' >&2"))
            .start()
            .unwrap();

        assert_eq!(vec!["one", "two", "three"], read_at_least(&process, 3));
    }

    #[test]
    fn read_line_does_not_block_without_output() {
        let mut process = ChildProcess::new(&sh("sleep 5")).start().unwrap();

        let timer = Instant::now();
        assert_eq!("", process.read_line());
        assert!(process.read_lines().is_empty());
        assert!(timer.elapsed() < Duration::from_secs(1));

        process.kill().unwrap();
        assert!(process.wait_exit(Duration::from_secs(5)));
    }

    #[test]
    fn terminate_is_a_clean_exit() {
        let mut process = ChildProcess::new(&sh("sleep 30")).start().unwrap();
        assert!(process.is_running());

        process.terminate().unwrap();

        assert!(process.wait_exit(Duration::from_secs(5)));
        assert!(!process.is_running());
        assert!(process.exited_cleanly());
    }

    #[test]
    fn kill_is_not_a_clean_exit() {
        let mut process = ChildProcess::new(&sh("sleep 30")).start().unwrap();

        process.kill().unwrap();

        assert!(process.wait_exit(Duration::from_secs(5)));
        assert!(!process.exited_cleanly());
    }

    #[test]
    fn exit_status_is_kept() {
        let mut process = ChildProcess::new(&sh("exit 3")).start().unwrap();

        assert!(process.wait_exit(Duration::from_secs(5)));
        assert_eq!(Some(3), process.exit_status().and_then(|s| s.code()));
        assert!(!process.exited_cleanly());
    }

    #[test]
    fn wait_exit_times_out_while_running() {
        let mut process = ChildProcess::new(&sh("sleep 30")).start().unwrap();

        assert!(!process.wait_exit(Duration::from_millis(100)));

        process.kill().unwrap();
        assert!(process.wait_exit(Duration::from_secs(5)));
    }

    #[test]
    fn start_fails_for_unknown_binary() {
        let result = ChildProcess::new(&Executable::new("surely-not-a-real-binary")).start();

        assert_matches!(result, Err(CommandError::IOError(_)));
    }
}
