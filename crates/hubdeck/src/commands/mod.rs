//! Command handlers, one module per command group.

pub mod config_cmd;
pub mod services;
pub mod states;
pub mod status;
pub mod watch;

use hubdeck_core::{EntityFilter, EntityStore, ServiceAction};

use crate::cli::{Command, FilterArgs, GlobalOpts};
use crate::error::CliError;

/// Route a hub-bound command to its handler.
pub async fn dispatch(
    cmd: Command,
    store: &EntityStore,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::States(args) => states::list(store, &args, global).await,
        Command::Get(args) => states::get(store, &args, global).await,
        Command::Domains => states::domains(store, global).await,
        Command::Watch(args) => watch::handle(store, &args, global).await,
        Command::Call(args) => services::call(store, &args, global).await,
        Command::On(args) => services::perform(store, ServiceAction::TurnOn, &args, global).await,
        Command::Off(args) => services::perform(store, ServiceAction::TurnOff, &args, global).await,
        Command::Toggle(args) => {
            services::perform(store, ServiceAction::Toggle, &args, global).await
        }
        Command::Status(args) => status::handle(store, &args, global).await,
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}

/// Translate `--domain/--search/--all` into a core filter.
pub(crate) fn entity_filter(args: &FilterArgs) -> EntityFilter {
    let mut filter = args
        .domain
        .iter()
        .fold(EntityFilter::new(), |f, domain| f.domain(domain.as_str()))
        .include_hidden(args.all)
        .include_disabled(args.all);
    if let Some(needle) = &args.search {
        filter = filter.search(needle.as_str());
    }
    filter
}
