//! Line-based front end for the `murmur` binary.

use anyhow::Result;
use chrono::{Local, TimeZone, Utc};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use murmur_client::network::{Backoff, LiveEvent, LiveUpdates, NetworkClient};
use murmur_client::state::{
    AppStateInner, DayBoundary, StoredCredentials, StretchLabel, validate_password,
    validate_username,
};
use murmur_client::sync::{LoadOutcome, SendOutcome, read_attachment};
use murmur_client::{ChatSession, ClientConfig, ClientError};
use murmur_protocol::{ChatId, MessageId};

pub struct Input {
    lines: Lines<BufReader<Stdin>>,
}

impl Input {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }

    async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        println!("{}", label);
        Ok(self.next_line().await?.map(|line| line.trim().to_string()))
    }
}

pub enum Exit {
    Quit,
    /// The server rejected the access key
    SignedOut,
}

/// Credentials from the environment for unattended logins
struct AutoLogin {
    username: Option<String>,
    password: Option<String>,
}

impl AutoLogin {
    fn from_env() -> Self {
        Self {
            username: std::env::var("MURMUR_USER").ok(),
            password: std::env::var("MURMUR_PASSWORD").ok(),
        }
    }
}

/// Restore a stored access key or log in interactively.
/// Returns `None` when stdin is closed.
pub async fn authenticate(network: &NetworkClient, input: &mut Input) -> Result<Option<String>> {
    if let Some(stored) = StoredCredentials::load() {
        tracing::info!("Restored stored access key");
        network.set_access_key(Some(stored.access_key.clone())).await;
        return Ok(Some(stored.access_key));
    }

    let auto = AutoLogin::from_env();
    if let (Some(username), Some(password)) = (&auto.username, &auto.password) {
        match network.login(username, password).await {
            Ok(response) => {
                StoredCredentials::from(response.clone()).save();
                return Ok(Some(response.access_key));
            }
            Err(e) => tracing::warn!("Auto-login failed: {}", e),
        }
    }

    loop {
        let Some(mode) = input.prompt("[l]ogin or [r]egister?").await? else {
            return Ok(None);
        };
        let register = mode.starts_with('r');

        let Some(username) = input.prompt("username:").await? else {
            return Ok(None);
        };
        let Some(password) = input.prompt("password:").await? else {
            return Ok(None);
        };

        if let Err(e) = validate_username(&username).and_then(|_| validate_password(&password)) {
            println!("{}", e);
            continue;
        }

        if register {
            if let Err(e) = network.register(&username, &password).await {
                println!("Registration failed: {}", e);
                continue;
            }
            println!("Registered {}", username);
        }

        match network.login(&username, &password).await {
            Ok(response) => {
                StoredCredentials::from(response.clone()).save();
                return Ok(Some(response.access_key));
            }
            Err(e) => println!("Login failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Chats,
    Open(ChatId),
    Older,
    Enter { name: String, password: String },
    Create { name: String, password: String },
    Leave(Option<ChatId>),
    Delete(Vec<MessageId>),
    Attach { path: String, caption: String },
    Status,
    Help,
    Quit,
    Send(String),
    Invalid(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if !line.starts_with('/') {
        return Command::Send(line.to_string());
    }

    let mut parts = line.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("/chats", []) => Command::Chats,
        ("/open", [id]) => match id.parse() {
            Ok(id) => Command::Open(id),
            Err(_) => Command::Invalid(format!("not a chat id: {}", id)),
        },
        ("/older", []) => Command::Older,
        ("/enter", [name, rest @ ..]) => Command::Enter {
            name: name.to_string(),
            password: rest.join(" "),
        },
        ("/create", [name, rest @ ..]) => Command::Create {
            name: name.to_string(),
            password: rest.join(" "),
        },
        ("/leave", []) => Command::Leave(None),
        ("/leave", [id]) => match id.parse() {
            Ok(id) => Command::Leave(Some(id)),
            Err(_) => Command::Invalid(format!("not a chat id: {}", id)),
        },
        ("/delete", ids) if !ids.is_empty() => {
            match ids.iter().map(|id| id.parse()).collect::<Result<Vec<MessageId>, _>>() {
                Ok(ids) => Command::Delete(ids),
                Err(_) => Command::Invalid("message ids must be numbers".to_string()),
            }
        }
        ("/attach", [path, caption @ ..]) => Command::Attach {
            path: path.to_string(),
            caption: caption.join(" "),
        },
        ("/status", []) => Command::Status,
        ("/help", _) => Command::Help,
        ("/quit", _) => Command::Quit,
        _ => Command::Invalid(format!("unknown command: {}", line)),
    }
}

const HELP: &str = "\
/chats                   list chats
/open <id>               open a chat
/older                   load older messages
/enter <name> [password] enter an existing chat
/create <name> [password] create a chat
/leave [id]              leave a chat (default: the open one)
/delete <id>..           delete messages of the open chat
/attach <path> [caption] send an image to the open chat
/status                  connection and queue status
/quit                    exit
anything else is sent to the open chat";

fn format_time(ts: i64, boundary: DayBoundary) -> String {
    let Some(utc) = Utc.timestamp_opt(ts, 0).single() else {
        return ts.to_string();
    };
    match boundary {
        DayBoundary::Utc => utc.format("%H:%M").to_string(),
        DayBoundary::Local => utc.with_timezone(&Local).format("%H:%M").to_string(),
    }
}

fn format_label(label: StretchLabel, boundary: DayBoundary) -> String {
    match label {
        StretchLabel::Single(ts) => format_time(ts, boundary),
        StretchLabel::Span { first, last } => format!(
            "{} - {}",
            format_time(first, boundary),
            format_time(last, boundary)
        ),
    }
}

fn render_chats(state: &AppStateInner) -> String {
    let mut out = String::new();
    if state.chats.is_empty() {
        out.push_str("No chats yet. /enter or /create one.\n");
    }
    for chat in &state.chats {
        let marker = if state.active_chat_id() == Some(chat.id) {
            '*'
        } else {
            ' '
        };
        let unread = if chat.unread { " (new)" } else { "" };
        let _ = writeln!(out, "{} {:>4}  {}{}", marker, chat.id, chat.name, unread);
    }
    out
}

fn render_timeline(state: &AppStateInner) -> String {
    let mut out = String::new();
    let Some(active) = state.active.as_ref() else {
        out.push_str("No chat open.\n");
        return out;
    };

    let _ = writeln!(
        out,
        "== {} ({} members) ==",
        active.name, active.members_count
    );
    if active.timeline.reached_start() {
        out.push_str("-- start of chat --\n");
    }

    let mut day = None;
    for stretch in active.timeline.stretches() {
        if day != Some(stretch.day()) {
            day = Some(stretch.day());
            let _ = writeln!(out, "--- {} ---", stretch.day());
        }

        let sender = match stretch.sender_name() {
            Some(name) => name.to_string(),
            None => format!("user #{}", stretch.sender_id()),
        };
        let _ = writeln!(
            out,
            "{} [{}]",
            sender,
            format_label(stretch.label(), state.day_boundary)
        );

        for message in stretch.messages() {
            let _ = writeln!(out, "  {:>6}  {}", message.id, message.text);
            for attachment in &message.attachments {
                let _ = writeln!(
                    out,
                    "          <{} {}>",
                    attachment.content_type, attachment.hash
                );
            }
        }
    }
    out
}

async fn print_timeline(session: &ChatSession) {
    print!("{}", render_timeline(&*session.state().read().await));
}

/// Outcome of one command; errors bubble up so the caller can spot a
/// rejected access key.
async fn execute(session: &ChatSession, command: Command) -> murmur_client::Result<bool> {
    match command {
        Command::Chats => print!("{}", render_chats(&*session.state().read().await)),
        Command::Open(chat_id) => {
            session.open_chat(chat_id).await?;
            print_timeline(session).await;
        }
        Command::Older => match session.load_older().await {
            LoadOutcome::Loaded(_) => print_timeline(session).await,
            LoadOutcome::AtStart | LoadOutcome::Empty => println!("No older messages."),
            LoadOutcome::Busy => println!("Already loading."),
            LoadOutcome::NoChat => println!("No chat open."),
            LoadOutcome::Failed => println!("Could not load older messages."),
            LoadOutcome::Stale => {}
        },
        Command::Enter { name, password } => {
            session.enter_chat(&name, &password).await?;
            print_timeline(session).await;
        }
        Command::Create { name, password } => {
            session.create_chat(&name, &password).await?;
            print_timeline(session).await;
        }
        Command::Leave(chat_id) => {
            let chat_id = match chat_id {
                Some(id) => id,
                None => session
                    .state()
                    .active_chat_id()
                    .await
                    .ok_or(ClientError::NoActiveChat)?,
            };
            session.leave_chat(chat_id).await?;
            print_timeline(session).await;
        }
        Command::Delete(ids) => session.delete_messages(ids).await?,
        Command::Attach { path, caption } => {
            let attachment = read_attachment(Path::new(&path)).await?;
            session.send(&caption, vec![attachment]).await?;
        }
        Command::Status => {
            let connected = session.state().read().await.is_connected;
            println!(
                "{}, {} message(s) waiting to send{}",
                if connected { "connected" } else { "offline" },
                session.pending_sends(),
                if session.is_loading_history() {
                    ", loading history"
                } else {
                    ""
                }
            );
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(false),
        Command::Send(text) => {
            if !text.is_empty() {
                session.send(&text, Vec::new()).await?;
            }
        }
        Command::Invalid(message) => println!("{}", message),
    }
    Ok(true)
}

/// Run a signed-in session until the user quits or the key is rejected
pub async fn run(
    config: &ClientConfig,
    network: Arc<NetworkClient>,
    access_key: String,
    input: &mut Input,
) -> Result<Exit> {
    let (mut session, mut outcomes) = ChatSession::new(network, config);

    match session.bootstrap(access_key.clone()).await {
        Ok(()) => {}
        Err(ClientError::InvalidAccessKey) => return Ok(Exit::SignedOut),
        Err(e) => return Err(e.into()),
    }

    let (live, mut events) = LiveUpdates::spawn(
        &config.live_updates_url(),
        &access_key,
        Backoff {
            initial: config.reconnect_initial(),
            max: config.reconnect_max(),
        },
    );
    session.attach_live(live).await;

    print!("{}", render_chats(&*session.state().read().await));
    print_timeline(&session).await;
    println!("Type /help for commands.");

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    return Ok(Exit::Quit);
                };
                match execute(&session, parse_command(&line)).await {
                    Ok(true) => {}
                    Ok(false) => return Ok(Exit::Quit),
                    Err(ClientError::InvalidAccessKey) => return Ok(Exit::SignedOut),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Some(event) = events.recv() => {
                let redraw = matches!(
                    event,
                    LiveEvent::Server(_) | LiveEvent::Connected { resumed: true }
                );
                match session.handle_live(event).await {
                    Ok(()) => {}
                    Err(ClientError::InvalidAccessKey) => return Ok(Exit::SignedOut),
                    Err(e) => tracing::warn!("Failed to apply live update: {}", e),
                }
                if redraw {
                    print_timeline(&session).await;
                }
            }
            Some(outcome) = outcomes.recv() => {
                if let SendOutcome::Failed { error, .. } = outcome {
                    println!("Message not sent: {}", error);
                }
            }
        }
    }
}
