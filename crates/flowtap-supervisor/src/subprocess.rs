//! Bounds the capture's lifetime to a child process: the supervisor runs
//! capture for as long as the subcommand takes, then propagates its exit
//! status, per spec.md §6's subprocess protocol.

use crate::error::{Result, SupervisorError};
use std::process::Stdio;

/// Printed to stdout immediately before and after the subcommand runs, so
/// its output is easy to pick out of the supervisor's own log lines.
pub const SUBPROCESS_DELIMITER: &str = "======= _AKITA_SUBCOMMAND_ =======";

/// Runs `argv` to completion, inheriting stdout/stderr so its output
/// interleaves with the supervisor's own, bracketed by
/// [`SUBPROCESS_DELIMITER`]. When `user` is set, the command runs under
/// that user via `sudo -u`.
///
/// # Errors
///
/// Returns [`SupervisorError::SubprocessLaunch`] if the child could not be
/// spawned, or [`SupervisorError::SubprocessFailed`] if it ran and exited
/// non-zero.
pub async fn run_to_completion(argv: &[String], user: Option<&str>) -> Result<()> {
    let program = argv
        .first()
        .ok_or_else(|| SupervisorError::SubprocessLaunch("empty subcommand".to_string()))?;

    let mut command = match user {
        Some(user) => {
            let mut command = tokio::process::Command::new("sudo");
            command.arg("-u").arg(user).arg("--").arg(program).args(&argv[1..]);
            command
        }
        None => {
            let mut command = tokio::process::Command::new(program);
            command.args(&argv[1..]);
            command
        }
    };
    command.stdout(Stdio::inherit()).stderr(Stdio::inherit());

    println!("{SUBPROCESS_DELIMITER}");
    let status = command
        .status()
        .await
        .map_err(|e| SupervisorError::SubprocessLaunch(e.to_string()))?;
    println!("{SUBPROCESS_DELIMITER}");

    if status.success() {
        Ok(())
    } else {
        Err(SupervisorError::SubprocessFailed(status.code().unwrap_or(1)))
    }
}

/// Whether the current process already has elevated privileges, so the
/// caller can skip wrapping the subcommand in `sudo -u` when running as
/// that user already. Unix only; capture itself still needs privileges
/// independent of this check.
#[cfg(unix)]
#[must_use]
pub fn running_as_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
#[must_use]
pub fn running_as_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_exit_is_ok() {
        let argv = vec!["true".to_string()];
        run_to_completion(&argv, None).await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_is_subprocess_failed() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "exit 7".to_string()];
        let err = run_to_completion(&argv, None).await.unwrap_err();
        assert!(matches!(err, SupervisorError::SubprocessFailed(7)));
    }

    #[tokio::test]
    async fn empty_argv_is_launch_error() {
        let err = run_to_completion(&[], None).await.unwrap_err();
        assert!(matches!(err, SupervisorError::SubprocessLaunch(_)));
    }
}
