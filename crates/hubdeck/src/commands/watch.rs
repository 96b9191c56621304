//! `watch`: follow the live snapshot and print what changed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::warn;

use hubdeck_core::{CoreError, EntityFilter, EntityStore, Snapshot};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ChangeKind {
    Added,
    Changed,
    Removed,
}

impl ChangeKind {
    fn label(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Changed => "changed",
            Self::Removed => "removed",
        }
    }
}

#[derive(Debug, Serialize)]
struct ChangeEvent {
    at: DateTime<Utc>,
    kind: ChangeKind,
    entity_id: String,
    old_state: Option<String>,
    new_state: Option<String>,
}

/// Entities that differ between two snapshots, restricted to `filter`.
fn diff(previous: &Snapshot, next: &Snapshot, filter: &EntityFilter) -> Vec<ChangeEvent> {
    let at = Utc::now();
    let mut events = Vec::new();

    for entity in next.iter().filter(|e| filter.matches(e)) {
        let old = previous.get(entity.id.as_str());
        let kind = match old {
            None => ChangeKind::Added,
            Some(old) if !Arc::ptr_eq(old, entity) => ChangeKind::Changed,
            Some(_) => continue,
        };
        events.push(ChangeEvent {
            at,
            kind,
            entity_id: entity.id.to_string(),
            old_state: old.map(|e| e.state.clone()),
            new_state: Some(entity.state.clone()),
        });
    }

    for entity in previous.iter().filter(|e| filter.matches(e)) {
        if next.get(entity.id.as_str()).is_none() {
            events.push(ChangeEvent {
                at,
                kind: ChangeKind::Removed,
                entity_id: entity.id.to_string(),
                old_state: Some(entity.state.clone()),
                new_state: None,
            });
        }
    }

    events
}

fn render_event(event: &ChangeEvent, format: &OutputFormat, color: bool) -> Result<String, CliError> {
    let line = match format {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(event, true)?,
        OutputFormat::Yaml => format!("---\n{}", serde_yaml::to_string(event)?),
        OutputFormat::Plain => format!(
            "{} {}",
            event.entity_id,
            event.new_state.as_deref().unwrap_or("")
        ),
        OutputFormat::Table => {
            let time = event.at.with_timezone(&Local).format("%H:%M:%S");
            let old = event.old_state.as_deref().unwrap_or("-");
            let new = event.new_state.as_deref().unwrap_or("-");
            format!(
                "{time}  {:<8} {}  {} -> {}",
                event.kind.label(),
                event.entity_id,
                output::paint_state(old, color),
                output::paint_state(new, color),
            )
        }
    };
    Ok(line)
}

pub async fn handle(store: &EntityStore, args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let filter = super::entity_filter(&args.filter);
    let color = output::should_color(&global.color);

    match store.start().await {
        Ok(_) => {}
        Err(e @ (CoreError::AuthenticationFailed { .. } | CoreError::Cancelled)) => {
            return Err(e.into());
        }
        Err(CoreError::Api {
            status: Some(401 | 403),
            message,
            ..
        }) => return Err(CliError::AuthFailed { message }),
        Err(e) => warn!(error = %e, "initial load failed; waiting for the hub"),
    }

    let mut stream = store.subscribe_snapshot();
    let mut previous = store.snapshot();
    if !global.quiet {
        eprintln!(
            "Watching {} entities (Ctrl-C to stop)",
            filter.apply(previous.iter()).len()
        );
    }

    let stop = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            () = &mut stop => break,
            next = stream.changed() => {
                let Some(snapshot) = next else { break };
                for event in diff(&previous, &snapshot, &filter) {
                    output::print_output(&render_event(&event, &global.output, color)?, global.quiet);
                }
                previous = snapshot;
            }
        }
    }
    Ok(())
}
