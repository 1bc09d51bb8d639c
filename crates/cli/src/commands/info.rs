//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use contracts::{QueueMetrics, SdkSettings};
use queue::QueueManager;
use serde::Serialize;
use tracing::info;

use super::{load_settings, open_repository};
use crate::cli::InfoArgs;

/// Settings info for JSON output
#[derive(Serialize)]
struct SettingsInfo {
    core: CoreInfo,
    dispatchers: Vec<DispatcherInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    barriers: Vec<BarrierInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    transformations: Vec<TransformationInfo>,
    /// Processor id -> pending dispatches; only for a durable queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pending: Option<BTreeMap<String, usize>>,
}

#[derive(Serialize)]
struct CoreInfo {
    max_queue_size: i64,
    expiration_secs: u64,
    max_in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_path: Option<String>,
}

#[derive(Serialize)]
struct DispatcherInfo {
    id: String,
    kind: String,
    dispatch_limit: usize,
    mapping_count: usize,
}

#[derive(Serialize)]
struct BarrierInfo {
    id: String,
    scopes: Option<Vec<String>>,
}

#[derive(Serialize)]
struct TransformationInfo {
    id: String,
    transformer_id: String,
    scopes: Vec<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading settings info");

    let settings = load_settings(&args.config)?;
    let pending = if settings.core.database_path.is_some() {
        Some(pending_counts(&settings)?)
    } else {
        None
    };
    let info = build_settings_info(&settings, pending);

    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize settings info")?;
        println!("{}", json);
    } else {
        print_settings_info(&info);
    }

    Ok(())
}

/// Pending dispatches per processor still stored in the queue database
fn pending_counts(settings: &SdkSettings) -> Result<BTreeMap<String, usize>> {
    let queue = QueueManager::new(open_repository(&settings.core)?)?;
    let processors = queue.enqueued_processors().borrow().clone();
    Ok(processors
        .into_iter()
        .map(|processor| {
            let pending = *queue.pending_count(&processor).borrow();
            (processor, pending)
        })
        .collect())
}

fn build_settings_info(settings: &SdkSettings, pending: Option<BTreeMap<String, usize>>) -> SettingsInfo {
    let dispatchers = settings
        .dispatchers
        .iter()
        .map(|d| DispatcherInfo {
            id: d.id.clone(),
            kind: format!("{:?}", d.kind),
            dispatch_limit: d.dispatch_limit,
            mapping_count: settings.mappings.get(&d.id).map_or(0, Vec::len),
        })
        .collect();

    let barriers = settings
        .barriers
        .iter()
        .map(|(id, b)| BarrierInfo {
            id: id.clone(),
            scopes: b
                .scopes
                .as_ref()
                .map(|scopes| scopes.iter().cloned().map(String::from).collect()),
        })
        .collect();

    let transformations = settings
        .transformations
        .iter()
        .map(|t| TransformationInfo {
            id: t.id.clone(),
            transformer_id: t.transformer_id.clone(),
            scopes: t.scopes.iter().cloned().map(String::from).collect(),
        })
        .collect();

    SettingsInfo {
        core: CoreInfo {
            max_queue_size: settings.core.max_queue_size,
            expiration_secs: settings.core.expiration_secs,
            max_in_flight: settings.core.max_in_flight,
            database_path: settings
                .core
                .database_path
                .as_ref()
                .map(|p| p.display().to_string()),
        },
        dispatchers,
        barriers,
        transformations,
        pending,
    }
}

fn print_settings_info(info: &SettingsInfo) {
    println!("=== Dispatch Settings ===\n");

    println!("Core");
    println!("   ├─ Max queue size: {}", info.core.max_queue_size);
    println!("   ├─ Expiration: {}s", info.core.expiration_secs);
    println!("   ├─ Max in flight: {}", info.core.max_in_flight);
    match &info.core.database_path {
        Some(path) => println!("   └─ Database: {}", path),
        None => println!("   └─ Database: (in-memory)"),
    }

    println!("\nDispatchers ({})", info.dispatchers.len());
    for (i, d) in info.dispatchers.iter().enumerate() {
        let prefix = if i == info.dispatchers.len() - 1 { "└─" } else { "├─" };
        println!(
            "   {} {} ({}, limit {}, {} mappings)",
            prefix, d.id, d.kind, d.dispatch_limit, d.mapping_count
        );
    }

    if !info.barriers.is_empty() {
        println!("\nBarriers ({})", info.barriers.len());
        for (i, b) in info.barriers.iter().enumerate() {
            let prefix = if i == info.barriers.len() - 1 { "└─" } else { "├─" };
            match &b.scopes {
                Some(scopes) => println!("   {} {} [{}]", prefix, b.id, scopes.join(", ")),
                None => println!("   {} {} (default scopes)", prefix, b.id),
            }
        }
    }

    if !info.transformations.is_empty() {
        println!("\nTransformations ({})", info.transformations.len());
        for (i, t) in info.transformations.iter().enumerate() {
            let prefix = if i == info.transformations.len() - 1 { "└─" } else { "├─" };
            println!("   {} {} via {} [{}]", prefix, t.id, t.transformer_id, t.scopes.join(", "));
        }
    }

    if let Some(pending) = &info.pending {
        println!("\nPending dispatches");
        if pending.is_empty() {
            println!("   └─ (none)");
        }
        for (i, (processor, count)) in pending.iter().enumerate() {
            let prefix = if i == pending.len() - 1 { "└─" } else { "├─" };
            println!("   {} {}: {}", prefix, processor, count);
        }
    }

    println!();
}
