//! Node service control.
//!
//! The pipeline only needs to stop and restart the node's services around
//! the destructive steps; everything else about service management lives
//! outside this crate.

use crate::error::SnapshotError;
use crate::transport::tools;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn stop(&self, names: &[String]) -> Result<(), SnapshotError>;
    async fn restart(&self, names: &[String]) -> Result<(), SnapshotError>;
    /// Whether the service is currently running.
    async fn status(&self, name: &str) -> Result<bool, SnapshotError>;
    async fn exists(&self, name: &str) -> Result<bool, SnapshotError>;
}

/// Filters `names` down to services the manager knows, warning about the rest.
pub async fn existing_services(
    manager: &dyn ServiceManager,
    names: &[String],
) -> Result<Vec<String>, SnapshotError> {
    let mut present = Vec::with_capacity(names.len());
    for name in names {
        if manager.exists(name).await? {
            present.push(name.clone());
        } else {
            warn!("Service {} does not exist, skipping", name);
        }
    }
    Ok(present)
}

/// `systemctl`-backed service manager.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: String,
    use_sudo: bool,
}

impl Systemctl {
    pub fn new(use_sudo: bool) -> Self {
        Self {
            program: "systemctl".to_string(),
            use_sudo,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Program and leading args for a state-changing call.
    fn privileged(&self) -> (String, Vec<String>) {
        if self.use_sudo {
            ("sudo".to_string(), vec![self.program.clone()])
        } else {
            (self.program.clone(), Vec::new())
        }
    }

    async fn control(&self, verb: &str, names: &[String]) -> Result<(), SnapshotError> {
        if names.is_empty() {
            return Ok(());
        }
        let (program, mut args) = self.privileged();
        args.push(verb.to_string());
        args.extend(names.iter().cloned());
        tools::run_command(&program, &args).await?;
        Ok(())
    }

    /// Runs a read-only query and reports whether it exited successfully.
    async fn query(&self, args: &[&str]) -> Result<bool, SnapshotError> {
        let status = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                SnapshotError::Dependency(format!("failed to run {}: {}", self.program, e))
            })?;
        Ok(status.success())
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn stop(&self, names: &[String]) -> Result<(), SnapshotError> {
        info!("Stopping services: {}", names.join(", "));
        self.control("stop", names).await
    }

    async fn restart(&self, names: &[String]) -> Result<(), SnapshotError> {
        info!("Restarting services: {}", names.join(", "));
        self.control("restart", names).await
    }

    async fn status(&self, name: &str) -> Result<bool, SnapshotError> {
        self.query(&["is-active", "--quiet", name]).await
    }

    async fn exists(&self, name: &str) -> Result<bool, SnapshotError> {
        let unit = format!("{}.service", name);
        self.query(&["cat", &unit]).await
    }
}
