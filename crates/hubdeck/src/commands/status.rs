//! `status`: one-shot health report of the event stream and the store.

use std::time::Duration;

use tracing::warn;

use hubdeck_core::{ConnectionPhase, ConnectionState, EntityStore, StoreDiagnostics};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;

fn settled(state: &ConnectionState) -> bool {
    state.auth_failed
        || matches!(
            state.phase,
            ConnectionPhase::Connected | ConnectionPhase::PermanentlyDisabled
        )
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}

fn detail(diag: &StoreDiagnostics) -> String {
    output::detail_lines(&[
        ("Event stream", or_dash(diag.phase)),
        ("Attempts", diag.attempt_count.to_string()),
        ("Messages", diag.message_count.to_string()),
        ("Auth failed", diag.auth_failed.to_string()),
        ("Stream error", or_dash(diag.connection_error.as_deref())),
        ("Entities", diag.entity_count.to_string()),
        ("Live updates", diag.realtime_updates.to_string()),
        ("Last update", or_dash(diag.last_update)),
        ("Last full load", or_dash(diag.last_full_load)),
        ("Polling", diag.polling.to_string()),
        ("Load error", or_dash(diag.error.as_deref())),
    ])
}

pub async fn handle(
    store: &EntityStore,
    args: &StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Err(e) = store.start().await {
        warn!(error = %e, "initial load failed");
    }

    if let Some(conn) = store.connection() {
        let mut rx = conn.state();
        let waited = tokio::time::timeout(Duration::from_secs(args.wait), async {
            rx.wait_for(settled).await.is_ok()
        })
        .await;
        if waited.is_err() {
            warn!(wait_secs = args.wait, "event stream did not settle");
        }
    }

    let diag = store.diagnostics();
    let out = output::render_single(&global.output, &diag, detail, |d| or_dash(d.phase))?;
    output::print_output(&out, global.quiet);
    Ok(())
}
