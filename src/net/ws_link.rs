//! `tokio-tungstenite` implementation of [`Link`].
//!
//! Each link is one spawned task that owns the socket. The task loops over
//! connect, pump, and backoff until it is closed or the server rejects the
//! credential. The handle talks to it over two channels: an outbox of frames
//! and a control channel (`Reconnect`, `Close`).
//!
//! Every connect attempt is bounded by the handshake timeout and raced
//! against the control channel, so `Reconnect` restarts a stalled attempt
//! and `Close` abandons it. While connected the task pings on a fixed period
//! and drops the socket once nothing has arrived within the idle timeout.
//! A half-open socket left behind by a suspended device therefore surfaces
//! as `Disconnected` instead of staying connected forever.
//!
//! Frames submitted while the socket is down are dropped. Anything still in
//! the outbox when a new socket comes up is discarded before `Connected` is
//! reported, so strokes drawn before an outage are never replayed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use frames::Frame;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::connection::{Connector, Link, LinkEvent, LinkTarget, LinkTimeouts};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Reconnect,
    Close,
}

enum ConnectFailure {
    Unauthorized,
    Other(String),
}

enum PumpExit {
    /// The owner closed the link or dropped the listener.
    Stopped,
    Dropped(String),
}

/// Opens links backed by real WebSocket connections. Requires a Tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Link = WsLink;

    fn open(&self, target: &LinkTarget, listener: mpsc::UnboundedSender<LinkEvent>) -> WsLink {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(link_loop(
            target.clone(),
            listener,
            outbox_rx,
            control_rx,
            Arc::clone(&connected),
        ));

        WsLink { outbox: outbox_tx, control: control_tx, connected }
    }
}

/// Handle to a running link task.
pub struct WsLink {
    outbox: mpsc::UnboundedSender<Frame>,
    control: mpsc::UnboundedSender<Control>,
    connected: Arc<AtomicBool>,
}

impl Link for WsLink {
    fn send(&self, frame: Frame) -> bool {
        if !self.is_connected() {
            debug!(event = %frame.event, "link down; dropping outbound frame");
            return false;
        }
        self.outbox.send(frame).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn reconnect(&self) {
        let _ = self.control.send(Control::Reconnect);
    }

    fn close(&self) {
        let _ = self.control.send(Control::Close);
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// LINK TASK
// =============================================================================

async fn link_loop(
    target: LinkTarget,
    listener: mpsc::UnboundedSender<LinkEvent>,
    mut outbox: mpsc::UnboundedReceiver<Frame>,
    mut control: mpsc::UnboundedReceiver<Control>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::new(target.backoff);

    loop {
        let attempt = tokio::select! {
            result = tokio::time::timeout(target.timeouts.handshake, connect(&target)) => {
                result.unwrap_or_else(|_| {
                    Err(ConnectFailure::Other(format!(
                        "handshake timed out after {}ms",
                        target.timeouts.handshake.as_millis()
                    )))
                })
            }
            command = control.recv() => match command {
                Some(Control::Reconnect) => {
                    debug!("reconnect requested; restarting connect attempt");
                    backoff.reset();
                    continue;
                }
                Some(Control::Close) | None => return,
            },
        };

        match attempt {
            Ok(socket) => {
                backoff.reset();
                while outbox.try_recv().is_ok() {}
                connected.store(true, Ordering::Release);
                info!(url = %target.endpoint.socket_url(), "realtime link connected");
                if listener.send(LinkEvent::Connected).is_err() {
                    return;
                }

                let exit = pump(socket, target.timeouts, &listener, &mut outbox, &mut control).await;
                connected.store(false, Ordering::Release);
                match exit {
                    PumpExit::Stopped => {
                        debug!("realtime link stopped");
                        return;
                    }
                    PumpExit::Dropped(reason) => {
                        warn!(%reason, "realtime link dropped");
                        if listener.send(LinkEvent::Disconnected { reason }).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(ConnectFailure::Unauthorized) => {
                warn!("realtime handshake rejected: unauthorized");
                let _ = listener.send(LinkEvent::Unauthorized);
                return;
            }
            Err(ConnectFailure::Other(reason)) => {
                debug!(%reason, attempt = backoff.attempts() + 1, "realtime connect failed");
                if listener.send(LinkEvent::ConnectFailed { reason }).is_err() {
                    return;
                }
            }
        }

        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis(), "waiting before reconnect");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            command = control.recv() => match command {
                Some(Control::Reconnect) => {
                    debug!("reconnect requested; skipping backoff");
                    backoff.reset();
                }
                Some(Control::Close) | None => return,
            },
        }
    }
}

async fn connect(target: &LinkTarget) -> Result<Socket, ConnectFailure> {
    let mut request = target
        .endpoint
        .socket_url()
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectFailure::Other(e.to_string()))?;
    let bearer = HeaderValue::from_str(&target.credential.bearer())
        .map_err(|e| ConnectFailure::Other(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match connect_async(request).await {
        Ok((socket, _response)) => Ok(socket),
        Err(tungstenite::Error::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
            Err(ConnectFailure::Unauthorized)
        }
        Err(e) => Err(ConnectFailure::Other(e.to_string())),
    }
}

async fn pump(
    socket: Socket,
    timeouts: LinkTimeouts,
    listener: &mpsc::UnboundedSender<LinkEvent>,
    outbox: &mut mpsc::UnboundedReceiver<Frame>,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> PumpExit {
    let (mut write, mut read) = socket.split();

    let period = timeouts.ping_interval.max(Duration::from_millis(1));
    let mut ping = tokio::time::interval_at(Instant::now() + period, period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle = tokio::time::sleep(timeouts.idle);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            incoming = read.next() => {
                idle.as_mut().reset(Instant::now() + timeouts.idle);
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => match frames::decode_frame(&bytes) {
                        Ok(frame) => {
                            if listener.send(LinkEvent::Frame(frame)).is_err() {
                                return PumpExit::Stopped;
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping undecodable frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return PumpExit::Dropped("closed by server".to_owned()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpExit::Dropped(e.to_string()),
                }
            }
            () = &mut idle => {
                return PumpExit::Dropped(format!("no traffic for {}ms", timeouts.idle.as_millis()));
            }
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    return PumpExit::Dropped(e.to_string());
                }
            }
            outgoing = outbox.recv() => {
                let Some(frame) = outgoing else {
                    return PumpExit::Stopped;
                };
                let bytes = frames::encode_frame(&frame);
                if let Err(e) = write.send(Message::Binary(bytes.into())).await {
                    return PumpExit::Dropped(e.to_string());
                }
            }
            command = control.recv() => match command {
                Some(Control::Reconnect) => {}
                Some(Control::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return PumpExit::Stopped;
                }
            },
        }
    }
}
