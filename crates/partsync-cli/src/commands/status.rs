//! Status command - show tracking and configuration summary
//!
//! Reads the tracking database directly; no API calls are made, so this works
//! without credentials.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use partsync_cache::{DatabasePool, SqliteTrackingStore};
use partsync_core::config::Config;
use partsync_core::domain::TrackingEntry;
use partsync_core::ports::ITrackingStore;

use super::CliContext;
use crate::output::{plural, Output};

#[derive(Debug, Args)]
pub struct StatusCommand {}

/// Aggregates over the tracking table
#[derive(Debug, Default, PartialEq, Eq)]
struct TrackingSummary {
    entries: usize,
    /// Entries whose local file is gone
    missing: usize,
    /// Distinct remote parts referenced
    parts: usize,
}

impl TrackingSummary {
    fn from_entries(entries: &[TrackingEntry], exists: impl Fn(&Path) -> bool) -> Self {
        let mut ids: Vec<&str> = entries.iter().map(|e| e.remote_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            entries: entries.len(),
            missing: entries.iter().filter(|e| !exists(&e.file_path)).count(),
            parts: ids.len(),
        }
    }
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let out = ctx.output();
        let config = ctx.load_config();
        let db_path = &config.state.database;

        let summary = if db_path.exists() {
            Some(read_summary(db_path).await?)
        } else {
            None
        };

        if ctx.is_json() {
            out.json(&serde_json::json!({
                "config_path": ctx.config_path.display().to_string(),
                "root": config.sync.root.display().to_string(),
                "root_folder_name": config.sync.root_folder_name,
                "api_base_url": config.api.base_url,
                "store_id": config.api.store_id,
                "database": db_path.display().to_string(),
                "tracking": summary.as_ref().map(|s| serde_json::json!({
                    "entries": s.entries,
                    "missing": s.missing,
                    "parts": s.parts,
                })),
            }))?;
            return Ok(());
        }

        print_config_summary(&out, ctx, &config);
        match summary {
            Some(s) => {
                out.success(&format!(
                    "{} tracked ({})",
                    plural(s.entries, "file"),
                    plural(s.parts, "remote part"),
                ));
                if s.missing > 0 {
                    out.warn(&format!(
                        "{} no longer on disk; the next resync will resolve them",
                        plural(s.missing, "tracked file"),
                    ));
                }
            }
            None => out.info("No tracking database yet (the daemon has not run)"),
        }
        Ok(())
    }
}

async fn read_summary(db_path: &Path) -> Result<TrackingSummary> {
    let pool = DatabasePool::open_read_only(db_path)
        .await
        .context("Failed to open tracking database")?;
    let store = SqliteTrackingStore::new(pool.pool().clone());
    let entries = store.list_all().await;
    pool.close().await;
    Ok(TrackingSummary::from_entries(&entries?, Path::exists))
}

fn print_config_summary(out: &Output, ctx: &CliContext, config: &Config) {
    out.info(&format!("Config:      {}", ctx.config_path.display()));
    out.info(&format!("Watching:    {}", config.sync.root.display()));
    out.info(&format!("Remote root: {}", config.sync.root_folder_name));
    out.info(&format!("API:         {}", config.api.base_url));
    if config.api.store_id.is_empty() {
        out.info("Store:       (not configured)");
    } else {
        out.info(&format!("Store:       {}", config.api.store_id));
    }
    out.info(&format!("Database:    {}", config.state.database.display()));
}
