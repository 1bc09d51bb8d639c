//! `run` command implementation.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{keys, DataObject, Dispatch, DispatchType, QueueMetrics, TrackStatus};
use dispatch::{create_dispatcher, DispatchRuntime, MetricsSnapshot, RuntimeOptions};
use pubsub::StateSubject;
use serde_json::Value;
use tracing::{info, warn};

use super::{load_settings, open_repository};
use crate::cli::RunArgs;
use crate::error::CliError;

const SYNTHETIC_EVENT: &str = "synthetic_event";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Execute the `run` command
pub async fn run_dispatch(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading settings");
    let settings = load_settings(&args.config)?;

    let dispatches = match &args.events {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read events from {}", path.display()))?;
            parse_events(&content)?
        }
        None => synthetic_events(args.count),
    };

    let repository = open_repository(&settings.core)?;
    let subject = StateSubject::new(settings.clone());
    let runtime = DispatchRuntime::new(subject.subscribe(), repository, RuntimeOptions::default())?;

    for config in &settings.dispatchers {
        let dispatcher = create_dispatcher(config)?;
        info!(dispatcher = %config.id, kind = ?config.kind, limit = config.dispatch_limit, "Registered dispatcher");
        runtime.dispatchers().insert(dispatcher);
    }
    if settings.dispatchers.is_empty() {
        warn!("No dispatchers configured - tracked events are dropped");
    }

    runtime.manager().start();

    let started = Instant::now();
    let mut statuses: BTreeMap<&'static str, usize> = BTreeMap::new();
    for dispatch in dispatches {
        let result = runtime.manager().track(dispatch).await?;
        *statuses.entry(result.status.as_str()).or_default() += 1;
    }
    info!(
        accepted = statuses.get(TrackStatus::Accepted.as_str()).copied().unwrap_or(0),
        dropped = statuses.get(TrackStatus::Dropped.as_str()).copied().unwrap_or(0),
        "Events tracked"
    );

    let outcome = tokio::select! {
        result = wait_for_delivery(&runtime, args.timeout) => result,
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, stopping delivery...");
            Ok(())
        }
    };

    let metrics = runtime.manager().metrics();
    runtime.manager().stop().await;
    print_summary(&metrics, started.elapsed());

    outcome?;
    info!("Dispatch run finished");
    Ok(())
}

/// Flush, then wait until every dispatcher has drained or `timeout_secs` passes
async fn wait_for_delivery(runtime: &DispatchRuntime, timeout_secs: u64) -> Result<()> {
    let deadline = (timeout_secs > 0).then(|| Instant::now() + Duration::from_secs(timeout_secs));
    runtime.manager().flush();
    loop {
        let pending = total_pending(runtime);
        if pending == 0 {
            return Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CliError::delivery_timeout(timeout_secs, pending).into());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Queued plus unacknowledged dispatches across all dispatchers
fn total_pending(runtime: &DispatchRuntime) -> usize {
    let queue = runtime.queue();
    runtime
        .dispatchers()
        .ids()
        .iter()
        .map(|id| *queue.pending_count(id).borrow() + *queue.in_flight_count(id).borrow())
        .sum()
}

/// One JSON object per line: `event_name` is required, `event_type` may be
/// `event` (default) or `view`, every other key is event data
pub(crate) fn parse_events(content: &str) -> Result<Vec<Dispatch>, CliError> {
    let mut dispatches = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let mut data: DataObject =
            serde_json::from_str(line).map_err(|e| CliError::invalid_event(line_no, e.to_string()))?;

        let name = match data.remove(keys::EVENT_NAME) {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => return Err(CliError::invalid_event(line_no, "missing event_name")),
        };
        let dispatch_type = match data.remove(keys::EVENT_TYPE) {
            None => DispatchType::Event,
            Some(Value::String(t)) if t == "event" => DispatchType::Event,
            Some(Value::String(t)) if t == "view" => DispatchType::View,
            Some(other) => {
                return Err(CliError::invalid_event(line_no, format!("unknown event_type {other}")))
            }
        };
        dispatches.push(Dispatch::new(name, dispatch_type, data));
    }
    Ok(dispatches)
}

fn synthetic_events(count: usize) -> Vec<Dispatch> {
    (0..count)
        .map(|sequence| {
            let mut data = DataObject::new();
            data.insert("sequence".into(), Value::from(sequence));
            Dispatch::new(SYNTHETIC_EVENT, DispatchType::Event, data)
        })
        .collect()
}

/// Ctrl+C or SIGTERM; pends forever if no handler can be installed
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_summary(metrics: &BTreeMap<String, MetricsSnapshot>, elapsed: Duration) {
    println!("\n=== Dispatch Summary ({:.2}s) ===\n", elapsed.as_secs_f64());
    if metrics.is_empty() {
        println!("  No dispatchers ran");
    }
    for (id, snapshot) in metrics {
        println!("{id}:");
        println!("  Sent: {}", snapshot.sent_count);
        println!("  Completed: {}", snapshot.completed_count);
        println!("  Dropped: {}", snapshot.dropped_count);
        println!("  Failures: {}", snapshot.failure_count);
        println!("  Pending: {}", snapshot.pending);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_parse_events() {
        let content = r#"{"event_name": "purchase", "amount": 3}

{"event_name": "home", "event_type": "view"}
"#;
        let dispatches = parse_events(content).unwrap();
        assert_eq!(dispatches.len(), 2);
        assert_eq!(dispatches[0].event_name(), Some("purchase"));
        assert_eq!(dispatches[0].payload().get("amount"), Some(&Value::from(3)));
        assert_eq!(
            dispatches[1].payload().get(keys::EVENT_TYPE),
            Some(&Value::String("view".into()))
        );
    }

    #[test]
    fn test_parse_events_reports_line() {
        let err = parse_events("{\"event_name\": \"a\"}\n{\"amount\": 1}\n").unwrap_err();
        assert!(matches!(err, CliError::InvalidEvent { line: 2, .. }));

        let err = parse_events("not json").unwrap_err();
        assert!(matches!(err, CliError::InvalidEvent { line: 1, .. }));

        let err = parse_events("{\"event_name\": \"a\", \"event_type\": \"click\"}").unwrap_err();
        assert!(matches!(err, CliError::InvalidEvent { line: 1, .. }));
    }

    #[test]
    fn test_synthetic_events_are_numbered() {
        let events = synthetic_events(3);
        let sequences: Vec<_> = events
            .iter()
            .map(|d| d.payload().get("sequence").cloned())
            .collect();
        assert_eq!(sequences, vec![Some(0.into()), Some(1.into()), Some(2.into())]);
    }

    #[tokio::test]
    async fn test_run_delivers_to_file_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let config_path = dir.path().join("dispatch.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
[[dispatchers]]
id = "archive"
kind = "file"
dispatch_limit = 5
params = {{ path = "{}" }}
"#,
            out.display()
        )
        .unwrap();

        let args = RunArgs {
            config: config_path,
            events: None,
            count: 4,
            timeout: 5,
            metrics_port: 0,
        };
        run_dispatch(&args).await.unwrap();

        let written = std::fs::read_to_string(out.join("archive.jsonl")).unwrap();
        assert_eq!(written.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_run_missing_config() {
        let args = RunArgs {
            config: PathBuf::from("/nonexistent/dispatch.toml"),
            events: None,
            count: 1,
            timeout: 1,
            metrics_port: 0,
        };
        assert!(run_dispatch(&args).await.is_err());
    }
}
