// ── Single connection lifecycle ──
//
// connect → auth_required → auth → auth_ok → subscribe → read/write until
// the socket drops, the hub closes it, or the session token is cancelled.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{
    self, Message,
    protocol::{CloseFrame, frame::coding::CloseCode},
};
use tokio_util::sync::CancellationToken;

use super::Inner;
use crate::error::Error;
use crate::frame::{self, InboundFrame, ResponseFrame};

/// How a session ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Local disconnect or shutdown.
    Cancelled,
    /// The hub closed the socket with code 1000.
    NormalClose,
}

/// Run one connection until it ends. `Err` means the caller should
/// consult the circuit breaker.
pub(crate) async fn run(inner: &Arc<Inner>, cancel: &CancellationToken) -> Result<SessionEnd, Error> {
    let config = &inner.config;
    tracing::info!(url = %config.ws_url, "Connecting to hub websocket");

    let deadline = Instant::now() + config.handshake_timeout;
    let timed_out = || Error::HandshakeTimeout {
        timeout_secs: config.handshake_timeout.as_secs(),
    };

    let ws_stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        result = tokio::time::timeout_at(deadline, tokio_tungstenite::connect_async(config.ws_url.as_str())) => {
            let (ws_stream, _response) = result
                .map_err(|_| timed_out())?
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            ws_stream
        }
    };
    let (mut write, mut read) = ws_stream.split();

    // The socket is open from here on: a cancelled handshake still closes
    // it with a normal close code.
    let authenticated = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = tokio::time::timeout_at(deadline, authenticate(&mut write, &mut read, &config.token)) => {
            Some(result.map_err(|_| timed_out()))
        }
    };
    match authenticated {
        Some(result) => result??,
        None => {
            send_normal_close(&mut write).await;
            return Ok(SessionEnd::Cancelled);
        }
    }

    for event_type in &config.event_types {
        let id = inner.next_id();
        let text = frame::with_id(frame::subscribe_events_payload(event_type), id)?;
        write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
        tracing::debug!(id, event_type = %event_type, "subscribed to hub events");
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    inner.outbound.store(Some(Arc::new(out_tx)));
    inner.on_connected();

    let outcome = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                send_normal_close(&mut write).await;
                break Ok(SessionEnd::Cancelled);
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        inner.count_message();
                        handle_text(inner, &text);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        inner.count_message();
                        tracing::debug!("ignoring binary websocket frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                        // tungstenite answers pings itself
                        tracing::trace!("websocket control frame");
                    }
                    Some(Ok(Message::Close(close))) => break close_outcome(close.as_ref()),
                    Some(Err(e)) => break Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        break Err(Error::WebSocketClosed {
                            code: 1006,
                            reason: "stream ended without close frame".into(),
                        });
                    }
                }
            }
            Some(text) = out_rx.recv() => {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    break Err(Error::WebSocketConnect(e.to_string()));
                }
            }
        }
    };

    inner.outbound.store(None);
    outcome
}

fn close_outcome(close: Option<&CloseFrame>) -> Result<SessionEnd, Error> {
    match close {
        Some(cf) if cf.code == CloseCode::Normal => {
            tracing::info!(reason = %cf.reason.as_str(), "Hub closed websocket normally");
            Ok(SessionEnd::NormalClose)
        }
        Some(cf) => Err(Error::WebSocketClosed {
            code: u16::from(cf.code),
            reason: cf.reason.as_str().to_owned(),
        }),
        None => Err(Error::WebSocketClosed {
            code: 1005,
            reason: "close frame without status".into(),
        }),
    }
}

/// Route one post-handshake text frame. Malformed frames are dropped.
fn handle_text(inner: &Inner, text: &str) {
    match InboundFrame::parse(text) {
        Ok(InboundFrame::Event { event, .. }) => {
            inner.registry.dispatch(&event);
        }
        Ok(InboundFrame::Result(response)) => {
            inner.pending.resolve(response);
        }
        Ok(InboundFrame::Pong { id }) => {
            inner.pending.resolve(ResponseFrame {
                id,
                success: true,
                result: None,
                error: None,
            });
        }
        Ok(other) => {
            tracing::debug!(frame = ?other, "ignoring unexpected frame");
        }
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed frame");
        }
    }
}

/// Read until the next text frame and decode it. Used only during the
/// handshake, where anything unparseable is fatal.
/// `auth_required` → `auth` → `auth_ok`.
async fn authenticate<W, R>(write: &mut W, read: &mut R, token: &SecretString) -> Result<(), Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    match next_frame(read).await? {
        InboundFrame::AuthRequired { ha_version } => {
            tracing::debug!(?ha_version, "hub requested authentication");
        }
        other => {
            return Err(Error::Handshake(format!(
                "expected auth_required, got {other:?}"
            )));
        }
    }

    write
        .send(Message::Text(frame::auth_frame(token).into()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    match next_frame(read).await? {
        InboundFrame::AuthOk { ha_version } => {
            tracing::info!(?ha_version, "Hub websocket authenticated");
            Ok(())
        }
        InboundFrame::AuthInvalid { message } => Err(Error::AuthRejected {
            message: message.unwrap_or_else(|| "invalid access token".into()),
        }),
        other => Err(Error::Handshake(format!(
            "expected auth_ok, got {other:?}"
        ))),
    }
}

async fn send_normal_close<W>(write: &mut W)
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let close = CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".into(),
    };
    if let Err(e) = write.send(Message::Close(Some(close))).await {
        tracing::debug!(error = %e, "close frame not delivered");
    }
}

async fn next_frame<S>(read: &mut S) -> Result<InboundFrame, Error>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                return InboundFrame::parse(&text)
                    .map_err(|e| Error::Handshake(e.to_string()));
            }
            Some(Ok(Message::Close(close))) => {
                return Err(match close_outcome(close.as_ref()) {
                    Err(e) => e,
                    Ok(_) => Error::WebSocketClosed {
                        code: 1000,
                        reason: "closed during handshake".into(),
                    },
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => {
                return Err(Error::Handshake(
                    "stream ended during handshake".into(),
                ));
            }
        }
    }
}
