//! Subprocess execution behind a trait so the restore step can be driven
//! by a fake in tests.

use std::io;
use std::process::{Command, Stdio};

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an external program to completion.
pub trait CommandExecutor {
    /// Run `program` with `args`, blocking until it exits.
    ///
    /// An `Err` means the process could not be started at all.
    fn run(&self, program: &str, args: &[String]) -> io::Result<ExecOutput>;
}

/// Executor backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn run(&self, program: &str, args: &[String]) -> io::Result<ExecOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(ExecOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_code_and_streams() {
        let output = SystemExecutor
            .run(
                "sh",
                &[
                    "-c".to_string(),
                    "echo restored; echo warn >&2; exit 3".to_string(),
                ],
            )
            .expect("run sh");
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "restored");
        assert_eq!(output.stderr.trim(), "warn");
    }

    #[test]
    fn missing_program_is_an_error() {
        let err = SystemExecutor
            .run("standby-definitely-not-installed", &[])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
