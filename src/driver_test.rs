use serde_json::json;

use super::*;
use crate::config::ClientConfig;
use crate::net::connection::LinkEvent;
use crate::net::test_helpers::MockConnector;
use crate::protocol::events::{DRAW_STROKE, ROOM_JOIN, ROOM_JOINED};
use crate::session::Identity;
use crate::state::PresenceState;

struct Quiet;

impl SessionObserver for Quiet {}

fn session() -> (Session<MockConnector, Quiet>, MockConnector) {
    let config = ClientConfig::from_lookup(|key| {
        (key == "DRAWBACK_BACKEND_URL").then(|| "http://localhost:3000".to_owned())
    })
    .expect("config");
    let link = MockConnector::default();
    (Session::new(&config, link.clone(), Quiet), link)
}

fn room(key: &str) -> RoomKey {
    RoomKey::parse(key).expect("room key")
}

// =============================================================
// Parsing
// =============================================================

#[test]
fn blank_line_is_nothing() {
    assert_eq!(parse_command("   "), Ok(None));
}

#[test]
fn draw_reads_four_coordinates() {
    assert_eq!(
        parse_command("stroke 0.1 0.2 0.3 0.4"),
        Ok(Some(SessionCommand::Stroke {
            from: NormalizedPoint::new(0.1, 0.2),
            to: NormalizedPoint::new(0.3, 0.4),
        }))
    );
    assert_eq!(
        parse_command("draw 0.1 0.2"),
        Err(CommandError::Usage { command: "stroke", expected: "four coordinates" })
    );
    assert_eq!(parse_command("stroke a 0 0 0"), Err(CommandError::NotANumber("a".to_owned())));
}

#[test]
fn pen_and_eraser_build_pens() {
    let Ok(Some(SessionCommand::Pen(pen))) = parse_command("pen #000000 4") else {
        panic!("expected pen");
    };
    assert_eq!(pen.color, StrokeColor::Ink("#000000".to_owned()));
    assert!((pen.width - 4.0).abs() < f64::EPSILON);

    let Ok(Some(SessionCommand::Pen(eraser))) = parse_command("eraser") else {
        panic!("expected eraser");
    };
    assert!(eraser.color.is_eraser());
}

#[test]
fn room_commands() {
    assert_eq!(parse_command("select  req-1 "), Ok(Some(SessionCommand::Select(Some(room("req-1"))))));
    assert_eq!(parse_command("leave"), Ok(Some(SessionCommand::Select(None))));
    assert!(parse_command("join").is_err());
}

#[test]
fn emote_keeps_whole_argument() {
    assert_eq!(parse_command("emote 👍 👍"), Ok(Some(SessionCommand::Emote("👍 👍".to_owned()))));
}

#[test]
fn unknown_verb_is_reported() {
    assert_eq!(parse_command("dance"), Err(CommandError::Unknown("dance".to_owned())));
}

// =============================================================
// Applying
// =============================================================

#[test]
fn drawing_commands_report_outcome() {
    let (mut session, _link) = session();
    let now = Instant::now();
    assert!(apply(&mut session, SessionCommand::Clear, now).is_some());
    assert!(apply(&mut session, SessionCommand::Status, now).is_none());
}

#[tokio::test]
async fn run_handles_queued_link_events_before_commands() {
    let (mut session, link) = session();
    let now = Instant::now();
    session.select_room(Some(room("r1")), now);
    session.sign_in(Identity::new("token-1", "u1").expect("identity"), now);

    link.emit(LinkEvent::Connected);
    let mut joined = frames::Frame::new(ROOM_JOINED, json!({"peerIds": ["u2"]}));
    joined.room_key = Some("r1".to_owned());
    link.emit_frame(joined);

    let (tx, rx) = mpsc::channel(8);
    tx.send(SessionCommand::Stroke { from: NormalizedPoint::new(0.1, 0.1), to: NormalizedPoint::new(0.5, 0.5) })
        .await
        .expect("send");
    tx.send(SessionCommand::Quit).await.expect("send");

    run(&mut session, rx, Duration::from_millis(50)).await;

    let sent: Vec<String> = link.with_link(0, |p| p.sent.iter().map(|f| f.event.clone()).collect());
    assert_eq!(sent, vec![ROOM_JOIN, DRAW_STROKE]);
    assert!(link.with_link(0, |p| p.closed));
    assert!(!session.is_signed_in());
    assert_eq!(session.presence(), PresenceState::NotJoined);
}

#[tokio::test]
async fn run_stops_when_command_channel_closes() {
    let (mut session, _link) = session();
    let (tx, rx) = mpsc::channel(1);
    drop(tx);
    run(&mut session, rx, Duration::from_millis(50)).await;
    assert!(!session.is_signed_in());
}
