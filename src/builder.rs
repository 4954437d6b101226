//! The external site builder, invoked as an opaque process.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Result, WebhookError};

const NOTIFY_COMMAND: &str = "telegram-notify";
const NOTIFY_ID: &str = "-id=github-webhook";

/// Turns a commit snapshot into a build output and updates the publish
/// pointer on success.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, input: &Path, output: &Path, pointer: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ExternalBuilder {
    program: String,
    notify: bool,
}

impl ExternalBuilder {
    pub fn new(program: impl Into<String>, notify: bool) -> Self {
        Self {
            program: program.into(),
            notify,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.builder.clone(), config.notify.is_some())
    }

    /// Program and arguments for one build, wrapped through `telegram-notify`
    /// when notifications are configured.
    pub fn command_line(&self, input: &Path, output: &Path, pointer: &Path) -> (String, Vec<String>) {
        let mut args: Vec<String> = [input, output, pointer]
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        if !self.notify {
            return (self.program.clone(), args);
        }

        let mut wrapped = vec![
            NOTIFY_ID.to_string(),
            "-success".to_string(),
            "--".to_string(),
            self.program.clone(),
        ];
        wrapped.append(&mut args);
        (NOTIFY_COMMAND.to_string(), wrapped)
    }
}

#[async_trait]
impl Builder for ExternalBuilder {
    async fn build(&self, input: &Path, output: &Path, pointer: &Path) -> Result<()> {
        let (program, args) = self.command_line(input, output, pointer);
        info!("Running: {} {}", program, args.join(" "));

        let status = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| {
                error!("{} failed to start: {}", program, e);
                WebhookError::BuildFailed(format!("{} failed to start: {}", program, e))
            })?;

        if !status.success() {
            return Err(WebhookError::BuildFailed(format!(
                "{} exited with {}",
                program, status
            )));
        }
        Ok(())
    }
}
