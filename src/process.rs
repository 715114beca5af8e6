//! process
//!
//! The Command Runner (C2): a pure function that spawns a subprocess with
//! captured streams. No retries, no timeouts - the caller decides policy.
//! Every external tool (`git`, `ruff`, `pytest`, `mypy`, the patch script
//! itself) goes through this so the Logger can record every invocation.

use std::path::Path;
use std::process::Command;

/// The outcome of one subprocess invocation.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub argv: Vec<String>,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn ok(&self) -> bool {
        self.returncode == 0
    }
}

/// Run `argv[0] argv[1..]` with `cwd` and optional extra environment
/// variables, capturing stdout/stderr as UTF-8 (lossy).
pub fn run(argv: &[String], cwd: Option<&Path>, env: &[(String, String)]) -> RunOutput {
    let Some((program, rest)) = argv.split_first() else {
        return RunOutput {
            argv: argv.to_vec(),
            returncode: 127,
            stdout: String::new(),
            stderr: "empty command".to_string(),
        };
    };

    let mut cmd = Command::new(program);
    cmd.args(rest);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }

    match cmd.output() {
        Ok(output) => RunOutput {
            argv: argv.to_vec(),
            returncode: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(e) => RunOutput {
            argv: argv.to_vec(),
            returncode: 127,
            stdout: String::new(),
            stderr: format!("failed to spawn {program:?}: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let out = run(
            &["sh".to_string(), "-c".to_string(), "echo hi".to_string()],
            None,
            &[],
        );
        assert!(out.ok());
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[test]
    fn nonzero_exit_is_surfaced() {
        let out = run(&["sh".to_string(), "-c".to_string(), "exit 3".to_string()], None, &[]);
        assert_eq!(out.returncode, 3);
        assert!(!out.ok());
    }

    #[test]
    fn empty_argv_fails_without_spawning() {
        let out = run(&[], None, &[]);
        assert_eq!(out.returncode, 127);
    }
}
