//! `call`, `on`, `off` and `toggle`.

use std::fmt::Write;

use serde::Serialize;
use serde_json::{Map, Value};

use hubdeck_core::{Entity, EntityId, EntityStore, LoadSource, ServiceAction, ServiceCallResult};

use crate::cli::{CallArgs, GlobalOpts, TargetArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct ServiceReport {
    service: String,
    source: LoadSource,
    changed: Vec<Entity>,
}

impl ServiceReport {
    fn new(domain: &str, service: &str, result: ServiceCallResult) -> Self {
        Self {
            service: format!("{domain}.{service}"),
            source: result.source,
            changed: result.changed,
        }
    }
}

fn detail(report: &ServiceReport, color: bool) -> String {
    let mut out = format!("Called {} via {}", report.service, report.source);
    for entity in &report.changed {
        let _ = write!(
            out,
            "\n  {}  {}",
            entity.id,
            output::paint_state(&entity.display_state(), color)
        );
    }
    out
}

fn print_report(report: &ServiceReport, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        report,
        |r| detail(r, color),
        |r| {
            r.changed
                .iter()
                .map(|e| format!("{} {}", e.id, e.state))
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// `--data` must be a JSON object; its keys merge into the service data.
fn parse_data(raw: Option<&str>) -> Result<Option<Map<String, Value>>, CliError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(Some(map)),
        other => Err(CliError::Validation {
            field: "data".into(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}

pub async fn call(store: &EntityStore, args: &CallArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let extra = parse_data(args.data.as_deref())?;
    let result = store
        .call_service(&args.domain, &args.service, args.entity.as_deref(), extra)
        .await?;
    print_report(&ServiceReport::new(&args.domain, &args.service, result), global)
}

/// `on`, `off` and `toggle`: the service domain is the entity's own.
pub async fn perform(
    store: &EntityStore,
    action: ServiceAction,
    args: &TargetArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let result = store.perform(action, &args.entity_id).await?;
    let domain = EntityId::new(args.entity_id.as_str());
    print_report(
        &ServiceReport::new(domain.domain(), action.service(), result),
        global,
    )
}
