//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::SdkSettings;
use dispatch::{BatchingBarrier, ConnectivityBarrier};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<SettingsSummary>,
}

#[derive(Serialize)]
struct SettingsSummary {
    dispatcher_count: usize,
    barrier_count: usize,
    transformation_count: usize,
    mapped_dispatcher_count: usize,
    durable: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating settings");

    let result = validate_settings(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Settings validation failed")
    }
}

fn validate_settings(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(settings) => {
            let warnings = collect_warnings(&settings);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(SettingsSummary {
                    dispatcher_count: settings.dispatchers.len(),
                    barrier_count: settings.barriers.len(),
                    transformation_count: settings.transformations.len(),
                    mapped_dispatcher_count: settings.mappings.len(),
                    durable: settings.core.database_path.is_some(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Non-fatal issues
fn collect_warnings(settings: &SdkSettings) -> Vec<String> {
    let mut warnings = Vec::new();

    if settings.dispatchers.is_empty() {
        warnings.push("No dispatchers configured - tracked events will be dropped".to_string());
    }

    for id in settings.mappings.keys() {
        if !settings.dispatchers.iter().any(|d| &d.id == id) {
            warnings.push(format!("Mappings for '{id}' match no configured dispatcher"));
        }
    }

    for id in settings.barriers.keys() {
        if id != BatchingBarrier::ID && id != ConnectivityBarrier::ID {
            warnings.push(format!("Barrier '{id}' is not built in and applies only if the host registers it"));
        }
    }

    if settings.core.database_path.is_none() {
        warnings.push("core.database_path not set - queue is not durable".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Settings are valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Dispatchers: {}", summary.dispatcher_count);
            println!("  Barriers: {}", summary.barrier_count);
            println!("  Transformations: {}", summary.transformation_count);
            println!("  Mapped dispatchers: {}", summary.mapped_dispatcher_count);
            println!("  Durable queue: {}", summary.durable);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Settings are invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
