use std::time::Instant;

use clap::{Parser, Subcommand};
use drawback::driver::{self, SessionCommand, parse_command};
use drawback::net::WsConnector;
use drawback::net::api::{ApiError, ChatActions, ChatRequest, ChatRequests, HttpChatRequests, UserSummary};
use drawback::notice::{Notice, NoticeKind};
use drawback::protocol::{ClearEvent, EmoteEvent, RoomKey, StrokeEvent};
use drawback::state::PresenceState;
use drawback::{ClientConfig, ConfigError, Identity, Session, SessionObserver};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("invalid room key `{0}`")]
    InvalidRoom(String),
}

#[derive(Parser, Debug)]
#[command(name = "drawback", about = "Drawback realtime drawing session client")]
struct Cli {
    #[arg(long, env = "DRAWBACK_BACKEND_URL")]
    backend_url: Option<String>,

    #[arg(long, env = "DRAWBACK_ACCESS_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "DRAWBACK_USER_ID")]
    user_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a drawing session and read commands from stdin.
    Session {
        #[arg(long)]
        room: Option<String>,
    },
    /// Send a chat request to a user by display name.
    Request { display_name: String },
    Accept { request_id: String },
    Reject { request_id: String },
    Cancel { request_id: String },
    /// List sent and received chat requests.
    Requests,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_lookup(|key| match key {
        "DRAWBACK_BACKEND_URL" => cli.backend_url.clone(),
        "DRAWBACK_ACCESS_TOKEN" => cli.token.clone(),
        "DRAWBACK_USER_ID" => cli.user_id.clone(),
        other => std::env::var(other).ok(),
    })?;

    match cli.command {
        Command::Session { room } => run_session(&config, room.as_deref()).await,
        Command::Request { display_name } => {
            let actions = chat_actions(&config)?;
            let request = actions.send_request(&display_name).await?;
            println!("sent {}", describe(&request));
            Ok(())
        }
        Command::Accept { request_id } => respond(&config, &request_id, true).await,
        Command::Reject { request_id } => respond(&config, &request_id, false).await,
        Command::Cancel { request_id } => {
            chat_actions(&config)?.cancel(&request_id).await?;
            println!("cancelled {request_id}");
            Ok(())
        }
        Command::Requests => {
            let actions = chat_actions(&config)?;
            for request in actions.api().list_received().await? {
                println!("received {}", describe(&request));
            }
            for request in actions.api().list_sent().await? {
                println!("sent     {}", describe(&request));
            }
            Ok(())
        }
    }
}

fn identity(config: &ClientConfig) -> Result<Identity, ConfigError> {
    let token = config.access_token.as_deref().ok_or(ConfigError::MissingCredential)?;
    let user_id = config.user_id.as_deref().ok_or(ConfigError::MissingUserId)?;
    Identity::new(token, user_id)
}

fn chat_actions(config: &ClientConfig) -> Result<ChatActions<HttpChatRequests>, CliError> {
    let identity = identity(config)?;
    let api = HttpChatRequests::new(&config.endpoint, &identity.credential, config.http_timeout)?;
    Ok(ChatActions::new(api))
}

async fn respond(config: &ClientConfig, request_id: &str, accept: bool) -> Result<(), CliError> {
    let outcome = chat_actions(config)?.respond(request_id, accept).await?;
    println!("{}", describe(&outcome.request));
    if let Some(room) = outcome.room_key() {
        println!("room: {room} (drawback session --room {room})");
    }
    Ok(())
}

fn describe(request: &ChatRequest) -> String {
    let name = |user: Option<&UserSummary>, fallback: &str| {
        user.map_or_else(|| fallback.to_owned(), |u| u.display_name.clone())
    };
    format!(
        "{} {} -> {} [{:?}]",
        request.id,
        name(request.from_user.as_ref(), &request.from_user_id),
        name(request.to_user.as_ref(), &request.to_user_id),
        request.status
    )
}

async fn run_session(config: &ClientConfig, room: Option<&str>) -> Result<(), CliError> {
    let identity = identity(config)?;
    let room = room
        .map(|raw| RoomKey::parse(raw).ok_or_else(|| CliError::InvalidRoom(raw.to_owned())))
        .transpose()?;

    let mut session = Session::new(config, WsConnector, ConsoleObserver);
    let now = Instant::now();
    session.sign_in(identity, now);
    session.select_room(room, now);

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Ok(Some(command)) => {
                    let quit = command == SessionCommand::Quit;
                    if tx.send(command).await.is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => eprintln!("{e}"),
            }
        }
    });

    driver::run(&mut session, rx, config.tick).await;
    Ok(())
}

/// Prints what a canvas would render.
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn presence_changed(&mut self, state: PresenceState) {
        println!("presence: {}", state.as_str());
    }

    fn reconnect_available(&mut self, available: bool) {
        if available {
            println!("peer has not shown up; type `reconnect` to retry");
        }
    }

    fn connection_changed(&mut self, online: bool) {
        println!("{}", if online { "connected" } else { "disconnected" });
    }

    fn room_activated(&mut self, room: Option<&RoomKey>) {
        match room {
            Some(room) => println!("room: {room}"),
            None => println!("no room selected"),
        }
    }

    fn waiting_rooms_changed(&mut self, rooms: &[RoomKey]) {
        for room in rooms {
            println!("peer waiting in {room}");
        }
    }

    fn stroke(&mut self, event: &StrokeEvent) {
        let s = &event.stroke;
        println!(
            "{} stroke ({:.3},{:.3})->({:.3},{:.3}) {} w{}",
            event.user_id,
            s.from.x,
            s.from.y,
            s.to.x,
            s.to.y,
            s.color.as_token(),
            s.width
        );
    }

    fn clear(&mut self, event: &ClearEvent) {
        println!("{} cleared the canvas", event.user_id);
    }

    fn emote(&mut self, event: &EmoteEvent) {
        println!("{} {}", event.user_id, event.emoji);
    }

    fn notice(&mut self, notice: &Notice) {
        match notice.kind {
            NoticeKind::Error => eprintln!("{notice}"),
            NoticeKind::Success | NoticeKind::Info => println!("{notice}"),
        }
    }

    fn session_expired(&mut self) {
        eprintln!("session expired; type `quit` and sign in again");
    }
}
