//! Single-task driver for a [`Session`].
//!
//! DESIGN
//! ======
//! The session is not shared. One task owns it and multiplexes three
//! sources with `select!`: events from the current link, commands from the
//! host, and a periodic tick for presence timers. Link events are polled
//! first so a command never observes a state the link has already moved
//! past.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::net::connection::Connector;
use crate::protocol::payload::{NormalizedPoint, StrokeColor};
use crate::protocol::RoomKey;
use crate::session::{Session, SessionObserver};
use crate::state::{Emit, Pen};

/// A host action against the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Stroke { from: NormalizedPoint, to: NormalizedPoint },
    Pen(Pen),
    Clear,
    Emote(String),
    Select(Option<RoomKey>),
    Reconnect,
    Foreground,
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` expects {expected}")]
    Usage { command: &'static str, expected: &'static str },
    #[error("`{0}` is not a number")]
    NotANumber(String),
}

/// Parse one line of the interactive command language. Blank lines yield
/// `None`.
///
/// ```text
/// stroke x1 y1 x2 y2 | pen <color> [width] | eraser [width] | clear
/// emote <emoji> | select <room> | leave | reconnect | foreground | status | quit
/// ```
///
/// # Errors
///
/// Returns [`CommandError`] for unknown verbs or bad arguments.
pub fn parse_command(line: &str) -> Result<Option<SessionCommand>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match verb {
        "stroke" | "draw" => {
            let [x1, y1, x2, y2] = args.as_slice() else {
                return Err(CommandError::Usage { command: "stroke", expected: "four coordinates" });
            };
            SessionCommand::Stroke {
                from: NormalizedPoint::new(number(x1)?, number(y1)?),
                to: NormalizedPoint::new(number(x2)?, number(y2)?),
            }
        }
        "pen" => match args.as_slice() {
            [color] => SessionCommand::Pen(Pen { color: ink(color)?, ..Pen::default() }),
            [color, width] => SessionCommand::Pen(Pen { color: ink(color)?, width: number(width)?, style: None }),
            _ => return Err(CommandError::Usage { command: "pen", expected: "a color and an optional width" }),
        },
        "eraser" => match args.as_slice() {
            [] => SessionCommand::Pen(Pen::eraser(Pen::default().width)),
            [width] => SessionCommand::Pen(Pen::eraser(number(width)?)),
            _ => return Err(CommandError::Usage { command: "eraser", expected: "an optional width" }),
        },
        "clear" => SessionCommand::Clear,
        "emote" => {
            if args.is_empty() {
                return Err(CommandError::Usage { command: "emote", expected: "an emoji" });
            }
            SessionCommand::Emote(args.join(" "))
        }
        "select" | "join" => {
            let room = args.first().and_then(|raw| RoomKey::parse(raw));
            let Some(room) = room else {
                return Err(CommandError::Usage { command: "select", expected: "a room key" });
            };
            SessionCommand::Select(Some(room))
        }
        "leave" => SessionCommand::Select(None),
        "reconnect" => SessionCommand::Reconnect,
        "foreground" => SessionCommand::Foreground,
        "status" => SessionCommand::Status,
        "quit" | "exit" => SessionCommand::Quit,
        other => return Err(CommandError::Unknown(other.to_owned())),
    };
    Ok(Some(command))
}

fn number(raw: &str) -> Result<f64, CommandError> {
    raw.parse::<f64>().map_err(|_| CommandError::NotANumber(raw.to_owned()))
}

fn ink(raw: &str) -> Result<StrokeColor, CommandError> {
    StrokeColor::parse(raw).map_err(|_| CommandError::Usage { command: "pen", expected: "a color token" })
}

/// Apply one command. Drawing commands return their emit outcome.
pub fn apply<C: Connector, O: SessionObserver>(
    session: &mut Session<C, O>,
    command: SessionCommand,
    now: Instant,
) -> Option<Emit> {
    match command {
        SessionCommand::Stroke { from, to } => Some(session.emit_stroke(from, to)),
        SessionCommand::Clear => Some(session.emit_clear()),
        SessionCommand::Emote(emoji) => Some(session.emit_emote(&emoji)),
        SessionCommand::Pen(pen) => {
            session.set_pen(pen);
            None
        }
        SessionCommand::Select(room) => {
            session.select_room(room, now);
            None
        }
        SessionCommand::Reconnect => {
            session.reconnect(now);
            None
        }
        SessionCommand::Foreground => {
            session.foreground();
            None
        }
        SessionCommand::Status => {
            info!(
                signed_in = session.is_signed_in(),
                online = session.is_online(),
                room = session.selected_room().map(RoomKey::as_str),
                presence = session.presence().as_str(),
                reconnect_available = session.reconnect_available(),
                stats = ?session.stats(),
                "session status"
            );
            None
        }
        SessionCommand::Quit => None,
    }
}

/// Drive `session` until a `Quit` command arrives or the command channel
/// closes, then sign out.
pub async fn run<C: Connector, O: SessionObserver>(
    session: &mut Session<C, O>,
    mut commands: mpsc::Receiver<SessionCommand>,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            event = session.manager_mut().next_event() => {
                session.handle_link_event(event, Instant::now());
            }
            command = commands.recv() => match command {
                None | Some(SessionCommand::Quit) => break,
                Some(command) => {
                    if let Some(outcome) = apply(session, command, Instant::now()) {
                        if !outcome.is_sent() {
                            warn!(?outcome, "drawing command not sent");
                        }
                    }
                }
            },
            _ = ticker.tick() => session.tick(Instant::now()),
        }
    }

    info!("session driver stopping");
    session.sign_out(Instant::now());
}

#[cfg(test)]
#[path = "driver_test.rs"]
mod tests;
