//! Asterisk CLI access
//!
//! Commands run through `asterisk -rx` as the Asterisk system user.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum AsteriskError {
    #[error("Failed to run asterisk: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of one CLI command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

impl CommandOutput {
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

#[async_trait]
pub trait AsteriskCli: Send + Sync {
    async fn execute(&self, command: &str) -> CommandOutput;

    async fn reload_pjsip(&self) -> CommandOutput {
        self.execute("pjsip reload").await
    }

    /// Whether Asterisk currently knows about the endpoint
    async fn endpoint_known(&self, id: &str) -> bool {
        let result = self.execute(&format!("pjsip show endpoint {}", id)).await;
        result.success && !result.output.contains("Not found")
    }
}

/// Runs `sudo -u <user> asterisk -rx <command>`
#[derive(Debug, Clone)]
pub struct SudoAsteriskCli {
    user: String,
    timeout: Duration,
}

impl SudoAsteriskCli {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, AsteriskError> {
        let mut cmd = Command::new("sudo");
        cmd.args(["-u", self.user.as_str(), "asterisk", "-rx", command])
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| AsteriskError::Timeout(self.timeout))??;

        let success = output.status.success();
        let text = if success {
            String::from_utf8_lossy(&output.stdout)
        } else {
            String::from_utf8_lossy(&output.stderr)
        };

        Ok(CommandOutput {
            success,
            output: text.trim().to_string(),
        })
    }
}

#[async_trait]
impl AsteriskCli for SudoAsteriskCli {
    async fn execute(&self, command: &str) -> CommandOutput {
        tracing::debug!("Running asterisk command: {}", command);

        match self.run(command).await {
            Ok(result) => {
                if !result.success {
                    tracing::warn!("Asterisk command {:?} failed: {}", command, result.output);
                }
                result
            }
            Err(e) => {
                tracing::error!("Asterisk command {:?} error: {}", command, e);
                CommandOutput::failed(e.to_string())
            }
        }
    }
}
