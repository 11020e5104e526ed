//! External program discovery, self-provisioning and invocation.

use crate::config::ToolConfig;
use crate::error::SnapshotError;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Resolves `program` on `PATH`, or checks it directly when it contains a
/// path separator.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Makes sure a tool is available, running its install command if not.
///
/// Install failure, or the tool still missing afterwards, is fatal.
pub async fn ensure_tool(tool: &ToolConfig) -> Result<PathBuf, SnapshotError> {
    if let Some(path) = find_program(&tool.program) {
        info!("{} is already installed", tool.program);
        return Ok(path);
    }

    warn!("{} is not installed", tool.program);
    let Some((program, args)) = tool.install.split_first() else {
        return Err(SnapshotError::Dependency(format!(
            "{} is not installed and no install command is configured",
            tool.program
        )));
    };

    info!("Attempting to install {}...", tool.program);
    run_command(program, args).await.map_err(|e| {
        SnapshotError::Dependency(format!("failed to install {}: {}", tool.program, e))
    })?;

    find_program(&tool.program).ok_or_else(|| {
        SnapshotError::Dependency(format!(
            "{} still not found on PATH after install",
            tool.program
        ))
    })
}

/// Runs a command to completion, capturing its output.
///
/// On failure the command line, stdout and stderr are logged and returned in
/// the error.
pub async fn run_command<S: AsRef<str>>(program: &str, args: &[S]) -> Result<Output, SnapshotError> {
    let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SnapshotError::Dependency(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            "✖ Error executing command: {} {:?} ({})\nStdout: {}\nStderr: {}",
            program, args, output.status, stdout, stderr
        );
        return Err(SnapshotError::Dependency(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(output)
}

/// Runs a command with the terminal attached, for tools that draw their own
/// progress.
pub async fn run_attached<S: AsRef<str>>(program: &Path, args: &[S]) -> Result<(), SnapshotError> {
    let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
    let status = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| {
            SnapshotError::Dependency(format!("failed to run {}: {}", program.display(), e))
        })?;
    if !status.success() {
        return Err(SnapshotError::Network(format!(
            "{} {:?} exited with {}",
            program.display(),
            args,
            status
        )));
    }
    Ok(())
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable shell script for use as a fake external tool.
    pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn finds_programs_on_path_and_by_path() {
        assert!(find_program("sh").is_some());
        assert!(find_program("storysnap-no-such-tool").is_none());

        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "aria2c", "exit 0");
        assert_eq!(find_program(tool.to_str().unwrap()), Some(tool.clone()));

        let plain = tmp.path().join("not-exec");
        std::fs::write(&plain, b"data").unwrap();
        assert!(find_program(plain.to_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn failed_install_is_dependency_error() {
        let tool = ToolConfig {
            program: "storysnap-no-such-tool".into(),
            install: vec!["sh".into(), "-c".into(), "exit 1".into()],
        };
        assert!(matches!(
            ensure_tool(&tool).await,
            Err(SnapshotError::Dependency(_))
        ));

        let noop_install = ToolConfig {
            program: "storysnap-no-such-tool".into(),
            install: vec!["sh".into(), "-c".into(), "exit 0".into()],
        };
        let err = ensure_tool(&noop_install).await.unwrap_err();
        assert!(err.to_string().contains("still not found"));

        let no_install = ToolConfig {
            program: "storysnap-no-such-tool".into(),
            install: vec![],
        };
        assert!(ensure_tool(&no_install).await.is_err());
    }

    #[tokio::test]
    async fn run_command_reports_exit_status() {
        assert!(run_command("sh", &["-c", "echo fine"]).await.is_ok());
        let err = run_command("sh", &["-c", "echo broken >&2; exit 3"])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
