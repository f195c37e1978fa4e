//! Config command - View and validate partsync configuration
//!
//! Provides the `partsync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON), API key redacted
//! 2. Validates the configuration file and reports errors
//! 3. Prints the configuration file location

use anyhow::{Context, Result};
use clap::Subcommand;
use partsync_core::config::Config;
use tracing::info;

use super::CliContext;
use crate::output::plural;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx),
            ConfigCommand::Validate => self.execute_validate(ctx),
            ConfigCommand::Path => self.execute_path(ctx),
        }
    }

    fn execute_show(&self, ctx: &CliContext) -> Result<()> {
        let out = ctx.output();
        let config = redacted(ctx.load_config());

        info!(config_path = %ctx.config_path.display(), "Showing configuration");

        if ctx.is_json() {
            out.json(&config)?;
        } else {
            out.success(&format!("Configuration ({})", ctx.config_path.display()));
            out.info("");

            let yaml = serde_yaml::to_string(&config)
                .context("Failed to serialize configuration to YAML")?;

            for line in yaml.lines() {
                out.info(line);
            }
        }

        Ok(())
    }

    fn execute_validate(&self, ctx: &CliContext) -> Result<()> {
        let out = ctx.output();
        let config_path = &ctx.config_path;

        // Parse errors are reported rather than falling back to defaults
        let mut config = match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) if config_path.exists() => {
                if ctx.is_json() {
                    out.json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [format!("Failed to parse configuration: {e:#}")],
                    }))?;
                } else {
                    out.error(&format!("Failed to parse configuration: {e:#}"));
                    out.info(&format!("File: {}", config_path.display()));
                }
                return Ok(());
            }
            Err(_) => {
                out.info(&format!(
                    "Configuration file not found at {}; checking defaults",
                    config_path.display()
                ));
                Config::default()
            }
        };
        config.apply_env_overrides();

        info!(config_path = %config_path.display(), "Validating configuration");

        let errors = config.validate();

        if ctx.is_json() {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            out.json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }))?;
        } else if errors.is_empty() {
            out.success("Configuration is valid");
            out.info(&format!("File: {}", config_path.display()));
        } else {
            out.error(&format!("Configuration has {}:", plural(errors.len(), "error")));
            out.info(&format!("File: {}", config_path.display()));
            out.info("");
            for error in &errors {
                out.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        Ok(())
    }

    fn execute_path(&self, ctx: &CliContext) -> Result<()> {
        if ctx.is_json() {
            ctx.output().json(&serde_json::json!({
                "config_path": ctx.config_path.display().to_string(),
                "exists": ctx.config_path.exists(),
            }))?;
        } else {
            println!("{}", ctx.config_path.display());
        }
        Ok(())
    }
}

/// Replaces all but the last four characters of the API key
fn redacted(mut config: Config) -> Config {
    let key = &config.api.api_key;
    if !key.is_empty() {
        let visible: String = key
            .chars()
            .rev()
            .take(4.min(key.chars().count() / 2))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        config.api.api_key = format!("****{visible}");
    }
    config
}
