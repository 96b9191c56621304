// ── Store supervisor ──
//
// One task per store. It watches the connection phase, the snapshot and
// the load status, and after every change reconciles three things:
//   - the `state_changed` subscription (wanted iff connected and loaded)
//   - the REST polling fallback (wanted iff not connected, not disabled
//     and the snapshot is non-empty)
//   - a forced reload on entering `Connected` with an empty snapshot,
//     deferred while another load is still in flight

use std::sync::{Arc, Weak};

use hubdeck_api::{ConnectionPhase, ConnectionState, HandlerError, HubEvent, STATE_CHANGED};
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::StoreInner;

pub(super) async fn supervise(inner: Arc<StoreInner>, cancel: CancellationToken) {
    let mut conn_rx = inner.connection_state();
    let mut snapshot_rx = inner.snapshot.subscribe();
    let mut status_rx = inner.status.subscribe();
    let mut poll: Option<Interval> = None;
    let mut last_phase: Option<ConnectionPhase> = None;
    let mut reload_pending = false;

    loop {
        let phase = conn_rx.as_mut().map(|rx| rx.borrow_and_update().phase);
        snapshot_rx.borrow_and_update();
        status_rx.borrow_and_update();

        let connected = phase == Some(ConnectionPhase::Connected);
        if connected && last_phase != phase {
            reload_pending = true;
        }
        last_phase = phase;
        reload_pending = connected && reload_pending && !reload_if_empty(&inner, &cancel);

        reconcile_subscription(&inner, phase);
        reconcile_polling(&inner, phase, &mut poll);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = connection_changed(conn_rx.as_mut()) => {
                if changed.is_err() {
                    conn_rx = None;
                }
            }
            Ok(()) = snapshot_rx.changed() => {}
            Ok(()) = status_rx.changed() => {}
            () = next_tick(poll.as_mut()) => {
                debug!("polling fallback tick");
                spawn_load(&inner, &cancel, false);
            }
        }
    }

    inner.set_subscription(None);
    debug!("store supervisor stopped");
}

// ── Reconcilers ──────────────────────────────────────────────────────

/// Returns `false` while the reload has to wait for an in-flight load.
fn reload_if_empty(inner: &Arc<StoreInner>, cancel: &CancellationToken) -> bool {
    if !inner.snapshot.borrow().is_empty() {
        return true;
    }
    if inner.is_loading() {
        return false;
    }
    info!("connected with an empty snapshot; reloading");
    spawn_load(inner, cancel, true);
    true
}

fn reconcile_subscription(inner: &Arc<StoreInner>, phase: Option<ConnectionPhase>) {
    let wanted = phase == Some(ConnectionPhase::Connected) && inner.status.borrow().initial_load_done;
    if wanted == inner.has_subscription() {
        return;
    }

    if wanted {
        let Some(conn) = &inner.connection else {
            return;
        };
        let weak = Arc::downgrade(inner);
        let subscription = conn.subscribe(STATE_CHANGED, move |event| on_state_changed(&weak, event));
        inner.set_subscription(Some(subscription));
        debug!("state_changed subscription active");
    } else {
        inner.set_subscription(None);
        debug!("state_changed subscription dropped");
    }
}

fn reconcile_polling(
    inner: &StoreInner,
    phase: Option<ConnectionPhase>,
    poll: &mut Option<Interval>,
) {
    let wanted = polling_eligible(phase, inner.snapshot.borrow().is_empty());
    if wanted == poll.is_some() {
        return;
    }

    if wanted {
        let period = inner.config.poll_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        *poll = Some(interval);
        info!(period_secs = period.as_secs(), "polling fallback started");
    } else {
        *poll = None;
        info!("polling fallback stopped");
    }
    inner.status.send_if_modified(|status| {
        let changed = status.polling != wanted;
        status.polling = wanted;
        changed
    });
}

/// Polling runs while the socket is down but may come back, and only
/// once there is something to keep fresh. Without a socket at all
/// (`phase == None`) it is the only update path.
fn polling_eligible(phase: Option<ConnectionPhase>, snapshot_empty: bool) -> bool {
    !snapshot_empty
        && !matches!(
            phase,
            Some(ConnectionPhase::Connected | ConnectionPhase::PermanentlyDisabled)
        )
}

// ── Helpers ──────────────────────────────────────────────────────────

fn on_state_changed(inner: &Weak<StoreInner>, event: &HubEvent) -> Result<(), HandlerError> {
    let Some(inner) = inner.upgrade() else {
        return Ok(());
    };
    let change = event.state_changed()?;
    inner.apply_change(change);
    Ok(())
}

fn spawn_load(inner: &Arc<StoreInner>, cancel: &CancellationToken, force: bool) {
    let inner = Arc::clone(inner);
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            result = inner.load(force) => {
                if let Err(e) = result {
                    warn!(error = %e, force, "background load failed");
                }
            }
        }
    });
}

async fn connection_changed(
    rx: Option<&mut watch::Receiver<ConnectionState>>,
) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
