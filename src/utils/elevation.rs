use std::{
    io::{Read, Write},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info};
use serde::Deserialize;
use thiserror::Error;

use crate::datasource::file_path::{PKEXEC_BIN, SUDO_BIN};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ElevationError {
    #[error("privilege elevation denied: {0}")]
    PermissionDenied(String),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error talking to elevated process: {0}")]
    Io(#[from] std::io::Error),
    #[error("elevated process did not finish within {0:?}")]
    TimedOut(Duration),
}

/// How a command is run as a different principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    /// Already privileged, run the command as is
    Direct,
    Sudo,
    Pkexec,
}

/// Exit status plus captured output of one elevated invocation.
#[derive(Debug, Clone)]
pub struct ElevatedOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ElevatedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// One fully formed command to run with elevated privilege.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevatedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl ElevatedCommand {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin<S: Into<String>>(mut self, input: S) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// The privileged execution boundary. Sources and the applier only see this
/// trait so tests can stand in for the real elevation front-end.
pub trait PrivilegedRunner: Send + Sync {
    fn run(&self, command: &ElevatedCommand, deadline: Duration)
    -> Result<ElevatedOutput, ElevationError>;
}

/// Elevation through `sudo`, `pkexec` or nothing at all.
pub struct Elevation {
    mechanism: Mechanism,
    password: Option<String>,
}

impl Elevation {
    pub fn new(mechanism: Mechanism, password: Option<String>) -> Self {
        Self {
            mechanism,
            password,
        }
    }

    /// Establish a credential usable for repeated unattended calls. Root
    /// needs nothing; otherwise the mechanism is checked once through itself.
    pub fn acquire(mechanism: Mechanism, password: Option<String>) -> Result<Self, ElevationError> {
        if is_root() {
            info!("Running as root, no elevation needed");
            return Ok(Self::new(Mechanism::Direct, None));
        }

        let elevation = Self::new(mechanism, password);
        elevation.establish(&elevation)?;
        Ok(elevation)
    }

    /// Elevation for a single interactive call. pkexec is accepted as is
    /// since its prompt belongs to that call; everything else goes through
    /// `acquire`.
    pub fn per_invocation(
        mechanism: Mechanism,
        password: Option<String>,
    ) -> Result<Self, ElevationError> {
        if mechanism == Mechanism::Pkexec && !is_root() {
            return Ok(Self::new(Mechanism::Pkexec, None));
        }
        Self::acquire(mechanism, password)
    }

    /// Verify that `runner` can run commands as root without asking again.
    /// Only meaningful for a caller that is not root itself.
    fn establish(&self, runner: &dyn PrivilegedRunner) -> Result<(), ElevationError> {
        match self.mechanism {
            Mechanism::Direct => Err(ElevationError::PermissionDenied(
                "direct mechanism requested but not running as root".to_string(),
            )),
            Mechanism::Pkexec => Err(ElevationError::PermissionDenied(
                "pkexec authorizes one call at a time and cannot back unattended sampling"
                    .to_string(),
            )),
            Mechanism::Sudo => {
                let output = runner.run(&ElevatedCommand::new("true"), ACQUIRE_TIMEOUT)?;
                if output.success() {
                    info!("sudo credential established");
                    Ok(())
                } else {
                    let reason = output.stderr.trim().to_string();
                    error!("sudo credential rejected: {reason}");
                    Err(ElevationError::PermissionDenied(reason))
                }
            }
        }
    }

    fn build(&self, command: &ElevatedCommand) -> (Command, Option<String>) {
        match self.mechanism {
            Mechanism::Direct => {
                let mut cmd = Command::new(&command.program);
                cmd.args(&command.args);
                (cmd, command.stdin.clone())
            }
            Mechanism::Pkexec => {
                let mut cmd = Command::new(PKEXEC_BIN);
                cmd.arg(&command.program).args(&command.args);
                (cmd, command.stdin.clone())
            }
            Mechanism::Sudo => {
                let mut cmd = Command::new(SUDO_BIN);
                match &self.password {
                    Some(password) => {
                        // -k forces the password read so the payload never gets
                        // the password line; -S takes it from stdin
                        cmd.args(["-k", "-S", "-p", ""]);
                        let mut input = format!("{password}\n");
                        if let Some(payload) = &command.stdin {
                            input.push_str(payload);
                        }
                        cmd.arg("--").arg(&command.program).args(&command.args);
                        (cmd, Some(input))
                    }
                    None => {
                        cmd.args(["-n", "--"])
                            .arg(&command.program)
                            .args(&command.args);
                        (cmd, command.stdin.clone())
                    }
                }
            }
        }
    }
}

impl PrivilegedRunner for Elevation {
    fn run(
        &self,
        command: &ElevatedCommand,
        deadline: Duration,
    ) -> Result<ElevatedOutput, ElevationError> {
        let (mut cmd, input) = self.build(command);
        debug!(
            "Elevated run ({:?}): {} {}",
            self.mechanism,
            command.program,
            command.args.join(" ")
        );
        run_with_deadline(&mut cmd, &command.program, input.as_deref(), deadline)
    }
}

/// Spawn `cmd`, feed `input` to its stdin and wait at most `deadline`.
/// An unresponsive process is killed and reported as `TimedOut`.
pub fn run_with_deadline(
    cmd: &mut Command,
    program: &str,
    input: Option<&str>,
    deadline: Duration,
) -> Result<ElevatedOutput, ElevationError> {
    let mut child = cmd
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ElevationError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if let (Some(payload), Some(mut stdin)) = (input, child.stdin.take()) {
        // a child that exits early closes the pipe, that is not our failure
        if let Err(e) = stdin.write_all(payload.as_bytes()) {
            debug!("stdin of {program} closed early: {e}");
        }
    }

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    match wait_until(&mut child, Instant::now() + deadline)? {
        Some(status) => Ok(ElevatedOutput {
            code: exit_code(status),
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
        }),
        // grandchildren of an elevation front-end may still hold the pipes,
        // so the readers are left detached
        None => Err(ElevationError::TimedOut(deadline)),
    }
}

fn wait_until(
    child: &mut Child,
    deadline: Instant,
) -> Result<Option<ExitStatus>, ElevationError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn exit_code(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn sh(script: &str) -> ElevatedCommand {
        ElevatedCommand::new("sh").arg("-c").arg(script)
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Answers every command with a fixed exit code and records what it saw
    struct Scripted {
        code: i32,
        stderr: &'static str,
        seen: Mutex<Vec<ElevatedCommand>>,
    }

    impl Scripted {
        fn new(code: i32, stderr: &'static str) -> Self {
            Self {
                code,
                stderr,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl PrivilegedRunner for Scripted {
        fn run(
            &self,
            command: &ElevatedCommand,
            _deadline: Duration,
        ) -> Result<ElevatedOutput, ElevationError> {
            self.seen.lock().unwrap().push(command.clone());
            Ok(ElevatedOutput {
                code: Some(self.code),
                stdout: String::new(),
                stderr: self.stderr.to_string(),
            })
        }
    }

    #[test]
    fn sudo_is_established_by_running_true() {
        let runner = Scripted::new(0, "");
        let elevation = Elevation::new(Mechanism::Sudo, Some("hunter2".to_string()));
        elevation.establish(&runner).unwrap();
        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), [ElevatedCommand::new("true")]);
    }

    #[test]
    fn rejected_sudo_password_is_permission_denied() {
        let runner = Scripted::new(1, "sudo: 1 incorrect password attempt\n");
        let elevation = Elevation::new(Mechanism::Sudo, Some("wrong".to_string()));
        match elevation.establish(&runner) {
            Err(ElevationError::PermissionDenied(reason)) => {
                assert_eq!(reason, "sudo: 1 incorrect password attempt");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn pkexec_cannot_back_unattended_sampling() {
        let runner = Scripted::new(0, "");
        let elevation = Elevation::new(Mechanism::Pkexec, None);
        let err = elevation.establish(&runner).unwrap_err();
        assert!(matches!(err, ElevationError::PermissionDenied(_)));
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn direct_without_root_is_denied() {
        let runner = Scripted::new(0, "");
        let elevation = Elevation::new(Mechanism::Direct, None);
        assert!(matches!(
            elevation.establish(&runner),
            Err(ElevationError::PermissionDenied(_))
        ));
    }

    #[test]
    fn per_invocation_pkexec_skips_the_credential_check() {
        let elevation = Elevation::per_invocation(Mechanism::Pkexec, None).unwrap();
        let expected = if is_root() {
            Mechanism::Direct
        } else {
            Mechanism::Pkexec
        };
        assert_eq!(elevation.mechanism, expected);
    }

    #[test]
    fn direct_run_captures_stderr_and_exit_code() {
        let runner = Elevation::new(Mechanism::Direct, None);
        let script = sh("echo partial >&1; echo 'NVML: Insufficient Permissions' >&2; exit 3");
        let out = runner.run(&script, Duration::from_secs(5)).unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout, "partial\n");
        assert_eq!(out.stderr, "NVML: Insufficient Permissions\n");
    }

    #[test]
    fn stdin_payload_reaches_command() {
        let runner = Elevation::new(Mechanism::Direct, None);
        let command = ElevatedCommand::new("cat").stdin("op = \"init\"\n");
        let out = runner.run(&command, Duration::from_secs(5)).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "op = \"init\"\n");
    }

    #[test]
    fn unresponsive_process_times_out() {
        let runner = Elevation::new(Mechanism::Direct, None);
        let started = Instant::now();
        let err = runner
            .run(&ElevatedCommand::new("sleep").arg("10"), Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, ElevationError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let runner = Elevation::new(Mechanism::Direct, None);
        let command = ElevatedCommand::new("/nonexistent/hwtune-helper");
        let err = runner.run(&command, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ElevationError::Spawn { .. }));
    }

    #[test]
    fn sudo_with_password_prefixes_stdin() {
        let elevation = Elevation::new(Mechanism::Sudo, Some("hunter2".to_string()));
        let command = ElevatedCommand::new("rdmsr").arg("0x198").stdin("x");
        let (cmd, input) = elevation.build(&command);
        assert_eq!(cmd.get_program(), SUDO_BIN);
        assert_eq!(args_of(&cmd), ["-k", "-S", "-p", "", "--", "rdmsr", "0x198"]);
        assert_eq!(input.as_deref(), Some("hunter2\nx"));
    }

    #[test]
    fn pkexec_wraps_program() {
        let elevation = Elevation::new(Mechanism::Pkexec, None);
        let (cmd, input) = elevation.build(&ElevatedCommand::new("/usr/bin/hwtune").arg("helper"));
        assert_eq!(cmd.get_program(), PKEXEC_BIN);
        assert_eq!(args_of(&cmd), ["/usr/bin/hwtune", "helper"]);
        assert!(input.is_none());
    }
}
