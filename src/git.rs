use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

/// Commit and push `file` when running in CI and the file changed.
/// Failures are logged; the ledger on disk is already durable.
pub async fn sync_ledger_if_ci(file: &Path) {
    if std::env::var("GITHUB_ACTIONS").ok().as_deref() != Some("true") {
        return;
    }
    if let Err(err) = commit_if_changed(file).await {
        warn!(?err, path = %file.display(), "failed to commit ledger");
    }
}

pub async fn commit_if_changed(file: &Path) -> Result<()> {
    let path = file
        .to_str()
        .ok_or_else(|| anyhow!("non UTF-8 ledger path: {}", file.display()))?;
    let status = run_git(&["status", "--porcelain", path]).await?;
    if status.trim().is_empty() {
        return Ok(());
    }
    run_git(&[
        "config",
        "--local",
        "user.email",
        "github-actions[bot]@users.noreply.github.com",
    ])
    .await?;
    run_git(&["config", "--local", "user.name", "github-actions[bot]"]).await?;
    run_git(&["add", path]).await?;
    run_git(&["commit", "-m", "chore: update posted log"]).await?;
    run_git(&["push"]).await?;
    info!(path, "committed ledger");
    Ok(())
}

async fn run_git(args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} exited with status {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
