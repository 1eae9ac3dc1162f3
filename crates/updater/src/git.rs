use std::path::PathBuf;

use async_trait::async_trait;
use sitewatch_core::updater::SourceControl;
use sitewatch_core::VcsError;
use tokio::process::Command;

/// [`SourceControl`] over the `git` command line, run inside `repo`.
#[derive(Debug, Clone)]
pub struct GitCli {
    pub repo: PathBuf,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let command = format!("git {}", args.join(" "));
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .await
            .map_err(|source| VcsError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !out.status.success() {
            return Err(VcsError::Command {
                command,
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn fetch_remote(&self) -> Result<(), VcsError> {
        self.run(&["fetch", "--prune", "--quiet"]).await.map(drop)
    }

    async fn upstream_ref(&self) -> Result<String, VcsError> {
        match self
            .run(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"])
            .await
        {
            Ok(up) if !up.is_empty() => Ok(up),
            Ok(_) => Err(VcsError::NoUpstream),
            Err(VcsError::Command { stderr, .. }) if is_missing_upstream(&stderr) => Err(VcsError::NoUpstream),
            Err(e) => Err(e),
        }
    }

    async fn ahead_behind(&self, upstream: &str) -> Result<(u32, u32), VcsError> {
        let range = format!("HEAD...{upstream}");
        let raw = self.run(&["rev-list", "--left-right", "--count", &range]).await?;
        parse_ahead_behind(&raw)
    }

    async fn last_commit_subject(&self, rev: &str) -> Result<String, VcsError> {
        self.run(&["log", "-1", "--pretty=%s", rev]).await
    }

    async fn fast_forward_pull(&self) -> Result<(), VcsError> {
        self.run(&["pull", "--ff-only"]).await.map(drop)
    }
}

/// Whether `rev-parse @{u}` failed because no tracking branch is set, as
/// opposed to a broken repository.
fn is_missing_upstream(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no upstream") || stderr.contains("does not point to a branch")
}

/// Parse `rev-list --left-right --count` output: `<ahead>\t<behind>`.
pub fn parse_ahead_behind(raw: &str) -> Result<(u32, u32), VcsError> {
    let mut parts = raw.split_whitespace();
    let mut next = || -> Result<u32, VcsError> {
        parts
            .next()
            .ok_or_else(|| VcsError::Parse(format!("ahead/behind counts: {raw:?}")))?
            .parse()
            .map_err(|_| VcsError::Parse(format!("ahead/behind counts: {raw:?}")))
    };
    let ahead = next()?;
    let behind = next()?;
    Ok((ahead, behind))
}
