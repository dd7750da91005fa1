//! External command execution.
//!
//! Firewall backends and interface routing shell out to `iptables`, `nft` and
//! `ip`. Every invocation goes through a [`CommandRunner`] so the rule logic
//! can be exercised against a recording fake instead of the real tools.

use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command could not be spawned (binary missing, permissions).
    #[error("Failed to run `{cmd}`: {source}")]
    Spawn {
        /// The rendered command line.
        cmd: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited unsuccessfully.
    #[error("`{cmd}` failed: {stderr}")]
    Failed {
        /// The rendered command line.
        cmd: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Exit code, if any.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Executes external programs.
///
/// `run` only fails when the program cannot be started; a non-zero exit is
/// reported through [`CommandOutput::success`] so callers can tell "rule not
/// present" apart from "tool missing".
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally feeding `stdin`.
    fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError>;

    /// Run and require a zero exit status.
    fn run_checked(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        let output = self.run(program, args, stdin)?;
        if output.success {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                cmd: render(program, args),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the host with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        let cmd_str = render(program, args);
        debug!("Running: {}", cmd_str);

        let spawn_err = |source| CommandError::Spawn {
            cmd: cmd_str.clone(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes()).map_err(spawn_err)?;
        }

        let output = child.wait_with_output().map_err(spawn_err)?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Render a command line for logs and error messages.
pub fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Convert string slices to owned arguments.
pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&str, &[String], Option<&str>) -> CommandOutput + Send + Sync>;

    /// Records every invocation and answers with a caller-supplied closure.
    pub(crate) struct ScriptedRunner {
        calls: Mutex<Vec<(String, Option<String>)>>,
        respond: Responder,
    }

    impl ScriptedRunner {
        pub(crate) fn new(
            respond: impl Fn(&str, &[String], Option<&str>) -> CommandOutput + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        /// Runner for which every command succeeds with empty output.
        pub(crate) fn succeeding() -> Self {
            Self::new(|_, _, _| CommandOutput::ok(""))
        }

        /// Rendered command lines, in call order.
        pub(crate) fn commands(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }

        /// Stdin passed to each call, in call order.
        pub(crate) fn inputs(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().iter().map(|(_, i)| i.clone()).collect()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(
            &self,
            program: &str,
            args: &[String],
            stdin: Option<&str>,
        ) -> Result<CommandOutput, CommandError> {
            self.calls
                .lock()
                .unwrap()
                .push((render(program, args), stdin.map(str::to_string)));
            Ok((self.respond)(program, args, stdin))
        }
    }
}
