//! `states`, `get` and `domains`: read-only views of one bulk load.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use hubdeck_core::{Entity, EntityStore};

use crate::cli::{GetArgs, GlobalOpts, StatesArgs};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "Entity")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Last Changed")]
    changed: String,
}

fn entity_row(entity: &Arc<Entity>, color: bool) -> EntityRow {
    EntityRow {
        id: entity.id.to_string(),
        name: entity.display_name.clone(),
        state: output::paint_state(&entity.display_state(), color),
        changed: entity
            .last_changed_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
    }
}

fn detail(entity: &Arc<Entity>) -> String {
    let mut lines = vec![
        ("Entity", entity.id.to_string()),
        ("Name", entity.display_name.clone()),
        ("Domain", entity.category.clone()),
        ("State", entity.display_state()),
        ("Last Changed", entity.last_changed.clone()),
        ("Last Updated", entity.last_updated.clone()),
    ];
    let mut attrs: Vec<String> = entity
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    attrs.sort_unstable();
    if !attrs.is_empty() {
        lines.push(("Attributes", attrs.join("\n              ")));
    }
    output::detail_lines(&lines)
}

#[derive(Clone, Serialize, Tabled)]
struct DomainRow {
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Entities")]
    count: usize,
}

pub async fn list(
    store: &EntityStore,
    args: &StatesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    store.refresh().await?;
    let snapshot = store.snapshot();
    let filter = super::entity_filter(&args.filter);
    let entities: Vec<Arc<Entity>> = filter.apply(snapshot.iter()).into_iter().cloned().collect();

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &entities,
        |e| entity_row(e, color),
        |e| e.id.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn get(store: &EntityStore, args: &GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    store.refresh().await?;
    let entity = store.require(&args.entity_id)?;

    let out = output::render_single(&global.output, &entity, detail, |e| e.state.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn domains(store: &EntityStore, global: &GlobalOpts) -> Result<(), CliError> {
    store.refresh().await?;
    let rows: Vec<DomainRow> = store
        .grouped()
        .into_iter()
        .map(|(domain, entities)| DomainRow {
            domain,
            count: entities.len(),
        })
        .collect();

    let out = output::render_list(
        &global.output,
        &rows,
        DomainRow::clone,
        |r| r.domain.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
