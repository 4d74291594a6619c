use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::IdentitySource;
use crate::error::AgentError;

/// Identity fixed by configuration.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    node_name: String,
}

impl StaticIdentity {
    /// Creates an identity that always reports `node_name`.
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }
}

#[async_trait]
impl IdentitySource for StaticIdentity {
    async fn local_name(&self) -> Result<String, AgentError> {
        if self.node_name.is_empty() {
            return Err(AgentError::Identity("static node name is empty".to_string()));
        }
        Ok(self.node_name.clone())
    }
}

/// Identity read from the agent's `info` command output.
#[derive(Debug, Clone)]
pub struct CommandIdentity {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandIdentity {
    /// Creates an adapter that runs `program args...` on every lookup.
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl IdentitySource for CommandIdentity {
    async fn local_name(&self) -> Result<String, AgentError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| AgentError::Timeout(self.timeout))??;
        if !output.status.success() {
            return Err(AgentError::Identity(format!(
                "'{}' exited with {}",
                self.program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let name = parse_agent_name(&stdout).ok_or_else(|| {
            AgentError::Identity(format!("no 'name =' line in '{}' output", self.program))
        })?;
        debug!(node = %name, "resolved local node from info command");
        Ok(name)
    }
}

/// Extracts the node name from `info` output (`name = <node>` line).
#[must_use]
pub fn parse_agent_name(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("name"))
        .filter_map(|rest| rest.trim_start().strip_prefix('='))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}
