use std::path::PathBuf;

use async_trait::async_trait;
use sitewatch_core::updater::ProcessManager;
use sitewatch_core::ProcessError;
use tokio::process::Command;

/// Restarts a process group by running `<program> <args..> <group>`,
/// e.g. `pm2 restart ecosystem.config.cjs`.
#[derive(Debug, Clone)]
pub struct CommandProcessManager {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[async_trait]
impl ProcessManager for CommandProcessManager {
    async fn restart_managed(&self, group: &str) -> Result<(), ProcessError> {
        let command = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .chain(std::iter::once(group))
            .collect::<Vec<_>>()
            .join(" ");

        let out = Command::new(&self.program)
            .args(&self.args)
            .arg(group)
            .current_dir(&self.cwd)
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !out.status.success() {
            return Err(ProcessError::Failed {
                command,
                code: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
