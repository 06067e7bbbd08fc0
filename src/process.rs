//! Process supervision for the analysis server child process.
//!
//! # Process Cleanup Safety
//! [`ServerProcess`] owns the child. Dropping it without a prior
//! [`ServerProcess::terminate`] kills and reaps the process so no orphan or
//! zombie is left behind.

use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ClientError;

/// Interval between exit checks while waiting for a graceful exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// There was no running process to stop.
    NotRunning,
    /// The process exited on its own within the grace period.
    Exited(ExitStatus),
    /// The grace period elapsed and the process was killed.
    Killed,
}

/// A running analysis server process.
pub struct ServerProcess {
    child: Child,
    reaped: bool,
}

impl ServerProcess {
    /// Launch `[interpreter, script]` with piped stdin and stdout.
    ///
    /// Stderr is inherited so server crashes stay visible.
    pub fn spawn(config: &ServerConfig) -> Result<(Self, ChildStdin, ChildStdout), ClientError> {
        let [interpreter, script] = config.argv();
        info!("Starting analysis server: {}", config.command_line());

        let mut child = Command::new(interpreter)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ClientError::Launch {
                command: config.command_line(),
                source,
            })?;

        // Take ownership before any early return so Drop cleans up.
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let process = ServerProcess {
            child,
            reaped: false,
        };

        let missing = |what: &str| ClientError::Launch {
            command: config.command_line(),
            source: std::io::Error::other(format!("failed to capture {}", what)),
        };
        let stdin = stdin.ok_or_else(|| missing("stdin"))?;
        let stdout = stdout.ok_or_else(|| missing("stdout"))?;

        debug!("Analysis server spawned (pid {})", process.id());
        Ok((process, stdin, stdout))
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking check for an exit that already happened.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Wait up to `timeout` for the process to exit, then kill it.
    ///
    /// The caller is expected to have closed the process's stdin first;
    /// the analysis server treats end of input as a request to exit.
    pub fn terminate(mut self, timeout: Duration) -> Termination {
        let termination = self.wait_or_kill(timeout);
        self.reaped = true;
        termination
    }

    fn wait_or_kill(&mut self, timeout: Duration) -> Termination {
        let deadline = Instant::now() + timeout;

        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Analysis server exited with {}", status);
                    return Termination::Exited(status);
                }
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => {
                    warn!("Error waiting for analysis server: {}", e);
                    break;
                }
            }
        }

        warn!(
            "Analysis server did not exit within {}ms, killing",
            timeout.as_millis()
        );
        if let Err(e) = self.child.kill() {
            debug!("Kill failed (process may have just exited): {}", e);
        }
        let _ = self.child.wait();
        Termination::Killed
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            warn!("Analysis server dropped while running, killing");
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{BufRead, BufReader, Write};
    use std::path::Path;

    fn sh_available() -> bool {
        Path::new("/bin/sh").exists()
    }

    fn script(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn test_spawn_missing_executable_is_launch_error() {
        let config = ServerConfig::new("/definitely/not/here/dart", "server.snapshot");
        match ServerProcess::spawn(&config) {
            Err(ClientError::Launch { command, source }) => {
                assert_eq!(command, "/definitely/not/here/dart server.snapshot");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            Err(other) => panic!("Expected Launch error, got {:?}", other),
            Ok(_) => panic!("Expected Launch error, got a running process"),
        }
    }

    #[test]
    fn test_closing_stdin_lets_server_exit() {
        if !sh_available() {
            println!("Skipping process test (/bin/sh not available)");
            return;
        }
        let config = ServerConfig::new("/bin/sh", script("fake_server.sh"));
        let (process, mut stdin, stdout) = ServerProcess::spawn(&config).unwrap();

        let mut process = process;
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("server.connected"));
        assert!(!process.has_exited());

        stdin.flush().unwrap();
        drop(stdin);

        // End of output means the script is on its way out.
        line.clear();
        assert_eq!(reader.read_line(&mut line).unwrap(), 0);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !process.has_exited() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(process.has_exited());

        let termination = process.terminate(Duration::from_secs(5));
        assert!(matches!(termination, Termination::Exited(status) if status.success()));
    }

    #[test]
    fn test_unresponsive_server_is_killed() {
        if !sh_available() {
            println!("Skipping process test (/bin/sh not available)");
            return;
        }
        let config = ServerConfig::new("/bin/sh", script("stubborn_server.sh"));
        let (process, stdin, _stdout) = ServerProcess::spawn(&config).unwrap();
        drop(stdin);

        let started = Instant::now();
        let termination = process.terminate(Duration::from_millis(200));
        assert_eq!(termination, Termination::Killed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
