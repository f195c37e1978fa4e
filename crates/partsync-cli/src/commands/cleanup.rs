//! Cleanup-folders command - remove empty remote folders
//!
//! Runs only the empty-folder sweep, repeating until no folder qualifies.
//! The sync root folder and folders that still mirror a local directory are
//! never removed.

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{CliContext, EngineSession};
use crate::output::{plural, Mark};

#[derive(Debug, Args)]
pub struct CleanupFoldersCommand {
    /// List the folders that would be deleted without deleting them
    #[arg(long)]
    pub dry_run: bool,
}

impl CleanupFoldersCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let out = ctx.output();
        let config = ctx.load_valid_config()?;

        let session = EngineSession::open(&config).await?;
        info!(dry_run = self.dry_run, "Cleaning up empty remote folders");
        let result = session.engine.cleanup_folders(self.dry_run).await;
        session.close().await;
        let folders = result?;

        if ctx.is_json() {
            let paths: Vec<String> = folders.iter().map(|f| f.full_path.to_string()).collect();
            return out.json(&serde_json::json!({
                "dry_run": self.dry_run,
                "count": folders.len(),
                "folders": paths,
            }));
        }

        if folders.is_empty() {
            out.success("No empty folders");
            return Ok(());
        }

        let verb = if self.dry_run { "Would delete" } else { "Deleted" };
        out.success(&format!("{verb} {}", plural(folders.len(), "folder")));
        for folder in &folders {
            out.action(Mark::EmptyFolder, &format!("/{}/ ({})", folder.full_path, folder.id));
        }
        Ok(())
    }
}
