//! Check command - preview the next resync
//!
//! Builds the remote cache, scans the watch root and computes the
//! reconciliation plan without executing it. Tracking corrections made while
//! planning go to an in-memory copy of the tracking store and are dropped.

use anyhow::{Context, Result};
use clap::Args;
use partsync_cache::{DatabasePool, SqliteTrackingStore};
use partsync_core::domain::{FolderPath, LocalFile};
use partsync_sync::engine::CheckReport;
use tracing::info;

use super::{CliContext, EngineSession};
use crate::output::Mark;

#[derive(Debug, Args)]
pub struct CheckCommand {}

impl CheckCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let out = ctx.output();
        let config = ctx.load_valid_config()?;

        let session = EngineSession::open(&config).await?;
        let scratch_pool = DatabasePool::in_memory()
            .await
            .context("Failed to create scratch tracking store")?;
        let scratch = SqliteTrackingStore::new(scratch_pool.pool().clone());

        info!(root = %config.sync.root.display(), "Computing reconciliation plan");
        let result = session.engine.check(&scratch).await;
        scratch_pool.close().await;
        session.close().await;
        let report = result?;

        if ctx.is_json() {
            return out.json(&report);
        }

        let plan = &report.plan;
        out.counts(
            &[
                (plan.creates.len(), "create"),
                (plan.updates.len(), "update"),
                (plan.deletes.len(), "delete"),
                (plan.folder_moves.len(), "move"),
                (plan.conflicts.len(), "conflict"),
                (report.empty_folders.len(), "empty folder"),
            ],
            "Remote is in sync with the local tree",
        );
        for (mark, line) in plan_lines(&report) {
            out.action(mark, &line);
        }
        if !plan.conflicts.is_empty() {
            out.warn("Conflicting files are skipped until resolved");
        }
        Ok(())
    }
}

fn remote_path(folder: &FolderPath, name: &str) -> String {
    if folder.is_root() {
        format!("/{name}")
    } else {
        format!("/{folder}/{name}")
    }
}

fn local_display(file: &LocalFile) -> String {
    remote_path(&file.folder_path, &file.file_name)
}

/// One line per planned action, in execution order
fn plan_lines(report: &CheckReport) -> Vec<(Mark, String)> {
    let plan = &report.plan;
    let mut lines = Vec::new();

    for conflict in &plan.conflicts {
        lines.push((
            Mark::Conflict,
            format!("{}: {}", conflict.local_path.display(), conflict.reason),
        ));
    }
    for mv in &plan.folder_moves {
        lines.push((
            Mark::Move,
            format!(
                "{} ({}) {} -> {}",
                mv.name,
                mv.remote_id,
                remote_path(&mv.from, ""),
                remote_path(&mv.to, "")
            ),
        ));
    }
    for file in &plan.creates {
        lines.push((Mark::Create, local_display(file)));
    }
    for update in &plan.updates {
        lines.push((
            Mark::Update,
            format!("{} ({})", local_display(&update.local), update.part.id),
        ));
    }
    for part in &plan.deletes {
        lines.push((
            Mark::Delete,
            format!("{} ({})", remote_path(&part.folder_path, &part.name), part.id),
        ));
    }
    for folder in &report.empty_folders {
        lines.push((
            Mark::EmptyFolder,
            format!("{}/", remote_path(&folder.full_path, "").trim_end_matches('/')),
        ));
    }
    lines
}
